//! Lambert Conformal Conic projection.
//!
//! The NAM grids (and most NCEP regional grids) are defined on a Lambert
//! Conformal cone over a spherical earth. Two views of the projection are
//! provided:
//!
//! - [`LambertConformal`] maps geographic coordinates to planar meters
//!   relative to the projection origin (lat0, lon0), without false
//!   easting/northing. This is the CF `lambert_conformal_conic` mapping.
//! - [`LambertGrid`] anchors the projection at the first grid point of a
//!   GRIB2 template 3.30 grid and converts between geographic coordinates
//!   and fractional grid indices.

use std::f64::consts::PI;

use crate::ProjectionError;

/// Mean earth radius assumed by NCEP models (meters).
pub const NCEP_EARTH_RADIUS: f64 = 6_371_229.0;

const TO_RAD: f64 = PI / 180.0;
const TO_DEG: f64 = 180.0 / PI;

/// Lambert Conformal Conic projection over a sphere.
#[derive(Debug, Clone, PartialEq)]
pub struct LambertConformal {
    /// Latitude of origin in radians
    lat0: f64,
    /// Central meridian in radians
    lon0: f64,
    /// First standard parallel in radians
    latin1: f64,
    /// Second standard parallel in radians
    latin2: f64,
    /// Earth radius (meters)
    earth_radius: f64,
    /// Cone constant
    n: f64,
    /// F constant
    f: f64,
    /// Rho at the latitude of origin
    rho0: f64,
}

impl LambertConformal {
    /// Create a projection from parameters in degrees.
    ///
    /// # Arguments
    /// * `lat0_deg` - Latitude of the projection origin
    /// * `lon0_deg` - Central meridian (LoV in GRIB2); 0..360 and -180..180 are both accepted
    /// * `latin1_deg` - First standard parallel
    /// * `latin2_deg` - Second standard parallel (equal to `latin1_deg` for a tangent cone)
    /// * `earth_radius` - Radius of the spherical earth in meters
    pub fn new(
        lat0_deg: f64,
        lon0_deg: f64,
        latin1_deg: f64,
        latin2_deg: f64,
        earth_radius: f64,
    ) -> Result<Self, ProjectionError> {
        if !(earth_radius > 0.0) {
            return Err(ProjectionError::InvalidParameter(format!(
                "earth radius must be positive, got {}",
                earth_radius
            )));
        }

        let projection = Self::build(lat0_deg, lon0_deg, latin1_deg, latin2_deg, earth_radius);
        if !projection.n.is_finite() || projection.n.abs() < 1e-12 || !projection.rho0.is_finite() {
            return Err(ProjectionError::InvalidParameter(format!(
                "degenerate cone for standard parallels {} and {}",
                latin1_deg, latin2_deg
            )));
        }

        Ok(projection)
    }

    /// The native projection of the NAM-NMM 218 dataset.
    ///
    /// Origin 25°N, central meridian 265°E, single standard parallel 25°N,
    /// spherical earth of radius 6,371,229 m.
    pub fn nam() -> Self {
        Self::build(25.0, 265.0, 25.0, 25.0, NCEP_EARTH_RADIUS)
    }

    fn build(
        lat0_deg: f64,
        lon0_deg: f64,
        latin1_deg: f64,
        latin2_deg: f64,
        earth_radius: f64,
    ) -> Self {
        let lat0 = lat0_deg * TO_RAD;
        let lon0 = lon0_deg * TO_RAD;
        let latin1 = latin1_deg * TO_RAD;
        let latin2 = latin2_deg * TO_RAD;

        let n = if (latin1 - latin2).abs() < 1e-10 {
            // Tangent cone
            latin1.sin()
        } else {
            // Secant cone
            let ln_ratio = (latin1.cos() / latin2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + latin2 / 2.0).tan() / (PI / 4.0 + latin1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };

        let f = (latin1.cos() * (PI / 4.0 + latin1 / 2.0).tan().powf(n)) / n;
        let rho0 = earth_radius * f / (PI / 4.0 + lat0 / 2.0).tan().powf(n);

        Self {
            lat0,
            lon0,
            latin1,
            latin2,
            earth_radius,
            n,
            f,
            rho0,
        }
    }

    /// Latitude of origin in degrees.
    pub fn latitude_of_origin(&self) -> f64 {
        self.lat0 * TO_DEG
    }

    /// Central meridian in degrees, as given at construction.
    pub fn central_meridian(&self) -> f64 {
        self.lon0 * TO_DEG
    }

    /// Standard parallels in degrees.
    pub fn standard_parallels(&self) -> (f64, f64) {
        (self.latin1 * TO_DEG, self.latin2 * TO_DEG)
    }

    pub fn earth_radius(&self) -> f64 {
        self.earth_radius
    }

    /// Project geographic coordinates (degrees) to planar (x, y) in meters.
    pub fn project(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let lat = lat_deg * TO_RAD;
        let dlon = normalize_radians(lon_deg * TO_RAD - self.lon0);

        let rho = self.rho(lat);
        let theta = self.n * dlon;

        let x = rho * theta.sin();
        let y = self.rho0 - rho * theta.cos();
        (x, y)
    }

    /// Inverse projection from planar meters to (lat, lon) in degrees.
    ///
    /// Longitudes are normalized to [-180, 180).
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let dy = self.rho0 - y;
        let sign = self.n.signum();
        let rho = sign * (x * x + dy * dy).sqrt();

        if rho == 0.0 {
            return (sign * 90.0, normalize_degrees(self.lon0 * TO_DEG));
        }

        let theta = (sign * x).atan2(sign * dy);
        let lat = 2.0 * (self.earth_radius * self.f / rho).powf(1.0 / self.n).atan() - PI / 2.0;
        let lon = self.lon0 + theta / self.n;

        (lat * TO_DEG, normalize_degrees(lon * TO_DEG))
    }

    fn rho(&self, lat: f64) -> f64 {
        self.earth_radius * self.f / (PI / 4.0 + lat / 2.0).tan().powf(self.n)
    }
}

/// A regular grid laid out on a Lambert Conformal projection.
///
/// Grid index `i` runs along x (columns), `j` along y (rows). When
/// `j_positive` is false the rows run from north to south.
#[derive(Debug, Clone, PartialEq)]
pub struct LambertGrid {
    projection: LambertConformal,
    /// Planar coordinates of the first grid point
    x0: f64,
    y0: f64,
    /// Grid spacing in X direction (meters)
    pub dx: f64,
    /// Grid spacing in Y direction (meters)
    pub dy: f64,
    /// Number of grid points in X (i) direction
    pub nx: usize,
    /// Number of grid points in Y (j) direction
    pub ny: usize,
    /// Whether rows are scanned in the +y direction
    pub j_positive: bool,
}

impl LambertGrid {
    /// Create a grid from GRIB2 template 3.30 parameters.
    ///
    /// # Arguments
    /// * `lat1_deg` - Latitude of first grid point (degrees)
    /// * `lon1_deg` - Longitude of first grid point (degrees)
    /// * `lov_deg` - Central meridian / orientation of the grid (degrees)
    /// * `latin1_deg` - First standard parallel (degrees)
    /// * `latin2_deg` - Second standard parallel (degrees)
    /// * `dx` - Grid spacing X (meters)
    /// * `dy` - Grid spacing Y (meters)
    /// * `nx` - Number of X grid points
    /// * `ny` - Number of Y grid points
    /// * `earth_radius` - Spherical earth radius (meters)
    #[allow(clippy::too_many_arguments)]
    pub fn from_grib2(
        lat1_deg: f64,
        lon1_deg: f64,
        lov_deg: f64,
        latin1_deg: f64,
        latin2_deg: f64,
        dx: f64,
        dy: f64,
        nx: usize,
        ny: usize,
        earth_radius: f64,
    ) -> Result<Self, ProjectionError> {
        if nx == 0 || ny == 0 {
            return Err(ProjectionError::InvalidParameter(format!(
                "grid must be non-empty, got {}x{}",
                nx, ny
            )));
        }

        // The origin latitude only shifts y by a constant, so anchor it on latin1.
        let projection =
            LambertConformal::new(latin1_deg, lov_deg, latin1_deg, latin2_deg, earth_radius)?;
        let (x0, y0) = projection.project(lat1_deg, lon1_deg);

        Ok(Self {
            projection,
            x0,
            y0,
            dx,
            dy,
            nx,
            ny,
            j_positive: true,
        })
    }

    /// The NAM 218 CONUS grid (614 x 428, 12.19 km).
    pub fn nam218() -> Self {
        Self {
            projection: LambertConformal::nam(),
            x0: 0.0,
            y0: 0.0,
            dx: 12_191.0,
            dy: 12_191.0,
            nx: 614,
            ny: 428,
            j_positive: true,
        }
        .anchored_at(12.19, 226.541)
    }

    /// Set the scanning direction of rows.
    pub fn with_j_positive(mut self, j_positive: bool) -> Self {
        self.j_positive = j_positive;
        self
    }

    fn anchored_at(mut self, lat1_deg: f64, lon1_deg: f64) -> Self {
        let (x0, y0) = self.projection.project(lat1_deg, lon1_deg);
        self.x0 = x0;
        self.y0 = y0;
        self
    }

    pub fn projection(&self) -> &LambertConformal {
        &self.projection
    }

    /// Convert geographic coordinates (degrees) to fractional grid indices (i, j).
    pub fn geo_to_grid(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let (x, y) = self.projection.project(lat_deg, lon_deg);
        let i = (x - self.x0) / self.dx;
        let j = if self.j_positive {
            (y - self.y0) / self.dy
        } else {
            (self.y0 - y) / self.dy
        };
        (i, j)
    }

    /// Convert grid indices (i, j) to geographic coordinates (lat, lon) in degrees.
    pub fn grid_to_geo(&self, i: f64, j: f64) -> (f64, f64) {
        let x = self.x0 + i * self.dx;
        let y = if self.j_positive {
            self.y0 + j * self.dy
        } else {
            self.y0 - j * self.dy
        };
        self.projection.unproject(x, y)
    }

    /// Latitude and longitude of every grid point, row-major (`ny` rows of `nx`).
    pub fn latlons(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lats = Vec::with_capacity(self.nx * self.ny);
        let mut lons = Vec::with_capacity(self.nx * self.ny);
        for j in 0..self.ny {
            for i in 0..self.nx {
                let (lat, lon) = self.grid_to_geo(i as f64, j as f64);
                lats.push(lat);
                lons.push(lon);
            }
        }
        (lats, lons)
    }

    /// Check if a geographic point is within the grid.
    pub fn contains(&self, lat_deg: f64, lon_deg: f64) -> bool {
        let (i, j) = self.geo_to_grid(lat_deg, lon_deg);
        i >= 0.0 && i <= (self.nx - 1) as f64 && j >= 0.0 && j <= (self.ny - 1) as f64
    }

    /// Get grid dimensions.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }
}

/// Wrap an angle in radians to [-π, π].
fn normalize_radians(mut angle: f64) -> f64 {
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

/// Wrap an angle in degrees to [-180, 180).
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
