/// A reference star returned by a sky catalog query.
///
/// Positions are ICRS degrees at the catalog epoch. The magnitude is a generic
/// "brightness" value (lower = brighter) whose band depends on the catalog.
/// When two catalogs were merged the list may contain duplicates; they are
/// tolerated by every stage of the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogStar {
    pub ra: f64,
    pub dec: f64,
    pub magnitude: f64,
}

impl CatalogStar {
    pub fn new(ra: f64, dec: f64, magnitude: f64) -> Self {
        Self { ra, dec, magnitude }
    }

    /// Unit vector pointing to the star's position on the celestial sphere.
    pub fn uvec(&self) -> nalgebra::Vector3<f64> {
        let (rasin, racos) = self.ra.to_radians().sin_cos();
        let (decsin, deccos) = self.dec.to_radians().sin_cos();
        nalgebra::Vector3::new(deccos * racos, deccos * rasin, decsin)
    }

    /// Great-circle separation to another star, in degrees.
    pub fn separation_deg(&self, other: &CatalogStar) -> f64 {
        let a = self.uvec();
        let b = other.uvec();
        // atan2 of |a×b| and a·b stays accurate for tiny separations
        a.cross(&b).norm().atan2(a.dot(&b)).to_degrees()
    }
}
