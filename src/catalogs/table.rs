//! Reference star tables stored as CSV.
//!
//! The table needs a header row. Columns named `ra`, `dec` and `mag` (or
//! `magnitude`, any case) are used wherever they appear; without those names
//! the first three columns are taken in that order. Extra columns are ignored.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::star::CatalogStar;

/// Column positions of the fields a [`CatalogStar`] needs.
struct Columns {
    ra: usize,
    dec: usize,
    mag: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        match (find(&["ra"]), find(&["dec"]), find(&["mag", "magnitude"])) {
            (Some(ra), Some(dec), Some(mag)) => Self { ra, dec, mag },
            _ => Self { ra: 0, dec: 1, mag: 2 },
        }
    }
}

/// Load a star table from a CSV file.
pub fn read_catalog_csv<P: AsRef<Path>>(path: P) -> Result<Vec<CatalogStar>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening catalog table {}", path.display()))?;
    read_catalog(file).with_context(|| format!("reading catalog table {}", path.display()))
}

/// Load a star table from any CSV reader.
///
/// Rows with an empty `ra` or `dec` are skipped; an empty magnitude is read as
/// infinitely faint.
pub fn read_catalog<R: Read>(reader: R) -> Result<Vec<CatalogStar>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = Columns::from_headers(rdr.headers()?);

    let mut stars = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let (ra, dec) = (field(columns.ra), field(columns.dec));
        if ra.is_empty() || dec.is_empty() {
            debug!("Catalog row {} has no position, skipped", row + 1);
            continue;
        }
        let ra: f64 = ra.parse().with_context(|| format!("row {}: bad ra {:?}", row + 1, ra))?;
        let dec: f64 = dec
            .parse()
            .with_context(|| format!("row {}: bad dec {:?}", row + 1, dec))?;
        let mag = match field(columns.mag) {
            "" => f64::INFINITY,
            m => m.parse().with_context(|| format!("row {}: bad magnitude {:?}", row + 1, m))?,
        };
        stars.push(CatalogStar::new(ra, dec, mag));
    }
    Ok(stars)
}
