//! Reference catalog selection.
//!
//! Catalog access itself (network services, local mirrors) sits behind the
//! [`CatalogQuery`] trait. This module decides what to ask for and how to
//! combine the answers: overly dense fields are cut to their brightest stars,
//! and a sparse answer is topped up from a fallback catalog.

mod table;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::star::CatalogStar;

pub use table::{read_catalog, read_catalog_csv};

/// Reference catalogs the solver knows how to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    /// Pan-STARRS DR1.
    PanStarrs,
    /// 2MASS point sources.
    TwoMass,
    /// Gaia.
    Gaia,
}

impl CatalogKind {
    /// Catalog to top up from when this one returns too few stars.
    ///
    /// Pan-STARRS does not cover the far southern sky, and Gaia is thin in some
    /// magnitude ranges, so the two back each other up.
    pub fn fallback(self) -> Option<CatalogKind> {
        match self {
            CatalogKind::PanStarrs => Some(CatalogKind::Gaia),
            CatalogKind::Gaia => Some(CatalogKind::PanStarrs),
            CatalogKind::TwoMass => None,
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogKind::PanStarrs => "PS",
            CatalogKind::TwoMass => "2MASS",
            CatalogKind::Gaia => "GAIA",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for CatalogKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PS" | "PS1" | "PANSTARRS" => Ok(CatalogKind::PanStarrs),
            "2MASS" | "TWOMASS" => Ok(CatalogKind::TwoMass),
            "GAIA" => Ok(CatalogKind::Gaia),
            other => Err(anyhow!("unknown catalog {:?}", other)),
        }
    }
}

/// Source of reference stars around a sky position.
pub trait CatalogQuery {
    /// Stars of `kind` within `radius_arcmin` of `center` (`ra`, `dec` in degrees).
    fn query(&self, center: [f64; 2], radius_arcmin: f64, kind: CatalogKind) -> Result<Vec<CatalogStar>>;
}

/// In-memory star tables, one per catalog, answering cone queries.
#[derive(Debug, Clone, Default)]
pub struct LocalCatalogs {
    tables: HashMap<CatalogKind, Vec<CatalogStar>>,
}

impl LocalCatalogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `stars` to the table of `kind`.
    pub fn insert(&mut self, kind: CatalogKind, stars: Vec<CatalogStar>) {
        self.tables.entry(kind).or_default().extend(stars);
    }
}

impl CatalogQuery for LocalCatalogs {
    fn query(&self, center: [f64; 2], radius_arcmin: f64, kind: CatalogKind) -> Result<Vec<CatalogStar>> {
        let table = self
            .tables
            .get(&kind)
            .ok_or_else(|| anyhow!("no local {} table", kind))?;
        let center = CatalogStar::new(center[0], center[1], 0.0);
        let radius_deg = radius_arcmin / 60.0;
        Ok(table
            .iter()
            .filter(|s| s.separation_deg(&center) <= radius_deg)
            .copied()
            .collect())
    }
}

/// Limits applied to a catalog answer.
#[derive(Debug, Clone)]
pub struct CatalogSelectConfig {
    /// More stars than this are cut down to `keep_brightest`. Default 500.
    pub max_sources: usize,
    /// `max_sources` multiplier when the query radius was widened. Default 2.25.
    pub increase_fov_source_factor: f64,
    /// Stars kept when cutting. Default 400.
    pub keep_brightest: usize,
    /// Fewer stars than this trigger the fallback catalog. Default 5.
    pub min_stars: usize,
}

impl Default for CatalogSelectConfig {
    fn default() -> Self {
        Self {
            max_sources: 500,
            increase_fov_source_factor: 2.25,
            keep_brightest: 400,
            min_stars: 5,
        }
    }
}

/// Query reference stars for one image.
///
/// A primary answer larger than the source limit is cut to its brightest
/// stars. A primary answer below `min_stars`, or a failed primary query, is
/// topped up from [`CatalogKind::fallback`]; duplicates between the two
/// catalogs are kept.
///
/// # Errors
///
/// A failed query with no fallback, or a failed fallback query.
pub fn select_reference_stars<Q: CatalogQuery + ?Sized>(
    query: &Q,
    center: [f64; 2],
    radius_arcmin: f64,
    kind: CatalogKind,
    increase_fov: bool,
    config: &CatalogSelectConfig,
) -> Result<Vec<CatalogStar>> {
    let fallback = kind.fallback();
    let mut stars = match query.query(center, radius_arcmin, kind) {
        Ok(stars) => stars,
        Err(e) if fallback.is_some() => {
            warn!("{} query failed ({:#}), relying on fallback", kind, e);
            Vec::new()
        }
        Err(e) => return Err(e).with_context(|| format!("querying {} catalog", kind)),
    };
    info!(
        "{} returned {} stars within {:.2}′ of ({:.5}°, {:.5}°)",
        kind,
        stars.len(),
        radius_arcmin,
        center[0],
        center[1]
    );

    let limit = if increase_fov {
        (config.max_sources as f64 * config.increase_fov_source_factor) as usize
    } else {
        config.max_sources
    };
    if stars.len() > limit {
        stars = keep_brightest(stars, config.keep_brightest);
    }

    if stars.len() < config.min_stars {
        if let Some(other) = fallback {
            let extra = query
                .query(center, radius_arcmin, other)
                .with_context(|| format!("querying fallback {} catalog", other))?;
            info!(
                "{} has too few stars, adding {} from {}; duplicates are possible",
                kind,
                extra.len(),
                other
            );
            stars = merge_catalogs(stars, extra);
        }
    }

    Ok(stars)
}

/// Concatenate two star lists. Duplicates are not removed.
pub fn merge_catalogs(mut first: Vec<CatalogStar>, second: Vec<CatalogStar>) -> Vec<CatalogStar> {
    first.extend(second);
    first
}

/// The `n` brightest stars, brightest first. Equal magnitudes keep their order.
pub fn keep_brightest(mut stars: Vec<CatalogStar>, n: usize) -> Vec<CatalogStar> {
    stars.sort_by(|a, b| a.magnitude.total_cmp(&b.magnitude));
    stars.truncate(n);
    stars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(n: usize, ra: f64, dec: f64) -> Vec<CatalogStar> {
        (0..n)
            .map(|k| CatalogStar::new(ra + 0.001 * (k % 20) as f64, dec + 0.001 * (k / 20) as f64, 20.0 - 0.01 * k as f64))
            .collect()
    }

    #[test]
    fn parse_and_fallback() {
        assert_eq!("ps".parse::<CatalogKind>().unwrap(), CatalogKind::PanStarrs);
        assert_eq!("GAIA".parse::<CatalogKind>().unwrap(), CatalogKind::Gaia);
        assert_eq!("2mass".parse::<CatalogKind>().unwrap(), CatalogKind::TwoMass);
        assert!("sdss".parse::<CatalogKind>().is_err());
        assert_eq!(CatalogKind::PanStarrs.fallback(), Some(CatalogKind::Gaia));
        assert_eq!(CatalogKind::Gaia.fallback(), Some(CatalogKind::PanStarrs));
        assert_eq!(CatalogKind::TwoMass.fallback(), None);
    }

    #[test]
    fn local_cone_query() {
        let mut local = LocalCatalogs::new();
        local.insert(
            CatalogKind::Gaia,
            vec![
                CatalogStar::new(100.0, 20.0, 10.0),
                CatalogStar::new(100.05, 20.0, 11.0),
                CatalogStar::new(101.0, 20.0, 12.0),
            ],
        );
        let near = local.query([100.0, 20.0], 4.0, CatalogKind::Gaia).unwrap();
        assert_eq!(near.len(), 2);
        assert!(local.query([100.0, 20.0], 4.0, CatalogKind::TwoMass).is_err());
    }

    #[test]
    fn dense_field_is_cut_to_brightest() {
        let mut local = LocalCatalogs::new();
        local.insert(CatalogKind::PanStarrs, cluster(600, 50.0, 10.0));
        let config = CatalogSelectConfig::default();
        let stars = select_reference_stars(&local, [50.01, 10.01], 10.0, CatalogKind::PanStarrs, false, &config).unwrap();
        assert_eq!(stars.len(), 400);
        assert!(stars.windows(2).all(|w| w[0].magnitude <= w[1].magnitude));

        // Widened query raises the limit to 1125: nothing is cut
        let stars = select_reference_stars(&local, [50.01, 10.01], 10.0, CatalogKind::PanStarrs, true, &config).unwrap();
        assert_eq!(stars.len(), 600);
    }

    #[test]
    fn sparse_field_is_topped_up() {
        let mut local = LocalCatalogs::new();
        local.insert(CatalogKind::Gaia, cluster(3, 200.0, -30.0));
        local.insert(CatalogKind::PanStarrs, cluster(8, 200.0, -30.0));
        let stars = select_reference_stars(
            &local,
            [200.0, -30.0],
            5.0,
            CatalogKind::Gaia,
            false,
            &CatalogSelectConfig::default(),
        )
        .unwrap();
        assert_eq!(stars.len(), 11);
    }

    #[test]
    fn failed_primary_uses_fallback_and_2mass_fails_hard() {
        let mut local = LocalCatalogs::new();
        local.insert(CatalogKind::Gaia, cluster(10, 5.0, 5.0));
        let stars = select_reference_stars(
            &local,
            [5.0, 5.0],
            5.0,
            CatalogKind::PanStarrs,
            false,
            &CatalogSelectConfig::default(),
        )
        .unwrap();
        assert_eq!(stars.len(), 10);

        let err = select_reference_stars(
            &local,
            [5.0, 5.0],
            5.0,
            CatalogKind::TwoMass,
            false,
            &CatalogSelectConfig::default(),
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("2MASS"));
    }

    #[test]
    fn keep_brightest_is_stable() {
        let stars = vec![
            CatalogStar::new(1.0, 0.0, 12.0),
            CatalogStar::new(2.0, 0.0, 10.0),
            CatalogStar::new(3.0, 0.0, 12.0),
        ];
        let kept = keep_brightest(stars, 2);
        assert_eq!(kept[0].ra, 2.0);
        assert_eq!(kept[1].ra, 1.0);
    }
}
