//! Synthetic GRIB2 message builder.
//!
//! Produces small NAM-style messages: Lambert Conformal grid (template
//! 3.30), product template 4.0 or 4.8, simple packing (template 5.0) with
//! an optional bitmap. NaN values in the data are written as missing
//! points through the bitmap.

use projection::LambertConformal;

/// Build a minimal GRIB2 message with the specified parameters
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    // Grid definition
    nx: u32,
    ny: u32,
    la1: f64,
    lo1: f64,
    lov: f64,
    latin: f64,
    dx: f64,
    dy: f64,
    scanning_mode: u8,
    // Product definition
    product_template: u16,
    category: u8,
    number: u8,
    level_type: u8,
    level_scale: u8,
    level_value: i32,
    time_unit: u8,
    forecast_time: u32,
    // Data
    data_values: Vec<f32>,
}

impl Grib2Builder {
    /// Temperature at 500 hPa on a 20x20 NAM 218 patch centered on Macon,
    /// GA, for the 2020-03-01 12Z run.
    pub fn nam() -> Self {
        let mut builder = Self {
            discipline: 0,
            center: 7,
            year: 2020,
            month: 3,
            day: 1,
            hour: 12,
            nx: 20,
            ny: 20,
            la1: 0.0,
            lo1: 0.0,
            lov: 265.0,
            latin: 25.0,
            dx: 12_191.0,
            dy: 12_191.0,
            scanning_mode: 0x40,
            product_template: 0,
            category: 0,
            number: 0,
            level_type: 100,
            level_scale: 0,
            level_value: 50_000,
            time_unit: 1,
            forecast_time: 0,
            data_values: Vec::new(),
        };
        builder = builder.centered_on(32.8, -83.6);
        builder.data_values = crate::create_test_grid(20, 20);
        builder
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Resize the grid, keeping its center, and fill it with the
    /// `create_test_grid` pattern.
    pub fn with_grid(mut self, nx: u32, ny: u32) -> Self {
        let (lat, lon) = self.center_point();
        self.nx = nx;
        self.ny = ny;
        self.data_values = crate::create_test_grid(nx as usize, ny as usize);
        self.centered_on(lat, lon)
    }

    /// Place the first grid point so that `(lat, lon)` sits at the center
    /// cell `(nx / 2, ny / 2)`.
    pub fn centered_on(mut self, lat: f64, lon: f64) -> Self {
        let proj = self.projection();
        let (x, y) = proj.project(lat, lon);
        let x0 = x - (self.nx / 2) as f64 * self.dx;
        let y0 = y - (self.ny / 2) as f64 * self.dy;
        let (la1, lo1) = proj.unproject(x0, y0);
        self.la1 = la1;
        self.lo1 = lo1.rem_euclid(360.0);
        self
    }

    /// Parameter by (discipline, category, number).
    pub fn with_parameter(mut self, discipline: u8, category: u8, number: u8) -> Self {
        self.discipline = discipline;
        self.category = category;
        self.number = number;
        self
    }

    /// First fixed surface as stored: type, scale factor and scaled value.
    pub fn with_level(mut self, level_type: u8, scale: u8, value: i32) -> Self {
        self.level_type = level_type;
        self.level_scale = scale;
        self.level_value = value;
        self
    }

    /// Isobaric surface in hPa.
    pub fn with_isobaric(self, hpa: i32) -> Self {
        self.with_level(100, 0, hpa * 100)
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.time_unit = 1;
        self.forecast_time = hour;
        self
    }

    pub fn with_forecast_time(mut self, unit: u8, value: u32) -> Self {
        self.time_unit = unit;
        self.forecast_time = value;
        self
    }

    /// Use product template 4.8 (statistics over a time interval).
    pub fn with_time_interval(mut self) -> Self {
        self.product_template = 8;
        self
    }

    pub fn with_scanning_mode(mut self, mode: u8) -> Self {
        self.scanning_mode = mode;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; (self.nx * self.ny) as usize];
        self
    }

    pub fn with_gradient(mut self, min_val: f32, max_val: f32) -> Self {
        let n = (self.nx * self.ny) as usize;
        self.data_values = (0..n)
            .map(|i| min_val + (max_val - min_val) * (i as f32 / n as f32))
            .collect();
        self
    }

    /// Row-major values; NaN marks a missing point.
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Latitude and longitude of the first grid point.
    pub fn first_point(&self) -> (f64, f64) {
        (self.la1, self.lo1)
    }

    /// Build the complete GRIB2 message bytes
    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.build_section1(),
            self.build_section3(),
            self.build_section4(),
            self.build_section5(),
            self.build_section6(),
            self.build_section7(),
        ];

        let message_length = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]); // Reserved
        message.push(self.discipline);
        message.push(2); // Edition 2
        message.extend_from_slice(&(message_length as u64).to_be_bytes());

        for section in &sections {
            message.extend_from_slice(section);
        }

        message.extend_from_slice(b"7777");
        message
    }

    fn projection(&self) -> LambertConformal {
        LambertConformal::new(
            self.latin,
            self.lov,
            self.latin,
            self.latin,
            projection::NCEP_EARTH_RADIUS,
        )
        .unwrap_or_else(|_| LambertConformal::nam())
    }

    fn center_point(&self) -> (f64, f64) {
        let proj = self.projection();
        let (x1, y1) = proj.project(self.la1, self.lo1);
        proj.unproject(
            x1 + (self.nx / 2) as f64 * self.dx,
            y1 + (self.ny / 2) as f64 * self.dy,
        )
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);

        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-center
        section.push(2); // Master table version
        section.push(1); // Local table version
        section.push(1); // Start of forecast

        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0); // Minute
        section.push(0); // Second

        section.push(0); // Operational
        section.push(1); // Forecast
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let mut section = Vec::new();

        // Template 3.30: 14 header bytes + 67 template bytes
        section.extend_from_slice(&81u32.to_be_bytes());
        section.push(3);

        section.push(0); // Source of grid definition
        section.extend_from_slice(&(self.nx * self.ny).to_be_bytes());
        section.push(0); // Octets for optional list
        section.push(0); // Interpretation of optional list
        section.extend_from_slice(&30u16.to_be_bytes());

        section.push(6); // Spherical earth, radius 6371229 m
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());

        section.extend_from_slice(&self.nx.to_be_bytes());
        section.extend_from_slice(&self.ny.to_be_bytes());
        section.extend_from_slice(&encode_signed(micro(self.la1)));
        section.extend_from_slice(&encode_signed(micro(self.lo1)));
        section.push(8); // Resolution and component flags
        section.extend_from_slice(&encode_signed(micro(self.latin))); // LaD
        section.extend_from_slice(&encode_signed(micro(self.lov)));
        section.extend_from_slice(&((self.dx * 1000.0).round() as u32).to_be_bytes());
        section.extend_from_slice(&((self.dy * 1000.0).round() as u32).to_be_bytes());
        section.push(0); // North pole on projection plane
        section.push(self.scanning_mode);
        section.extend_from_slice(&encode_signed(micro(self.latin))); // Latin1
        section.extend_from_slice(&encode_signed(micro(self.latin))); // Latin2
        section.extend_from_slice(&encode_signed(-90_000_000)); // Southern pole lat
        section.extend_from_slice(&0u32.to_be_bytes()); // Southern pole lon
        section
    }

    fn build_section4(&self) -> Vec<u8> {
        let mut section = Vec::new();
        let section_length: u32 = if self.product_template == 8 { 58 } else { 34 };

        section.extend_from_slice(&section_length.to_be_bytes());
        section.push(4);

        section.extend_from_slice(&0u16.to_be_bytes()); // Coordinate values
        section.extend_from_slice(&self.product_template.to_be_bytes());

        section.push(self.category);
        section.push(self.number);
        section.push(2); // Forecast
        section.push(0); // Background generating process
        section.push(84); // NAM
        section.extend_from_slice(&0u16.to_be_bytes()); // Hours of cutoff
        section.push(0); // Minutes of cutoff
        section.push(self.time_unit);
        section.extend_from_slice(&self.forecast_time.to_be_bytes());

        section.push(self.level_type);
        section.push(self.level_scale);
        section.extend_from_slice(&encode_signed(self.level_value));

        section.push(255); // No second fixed surface
        section.push(255);
        section.extend_from_slice(&[0xFF; 4]);

        if self.product_template == 8 {
            // End of overall time interval: one hour after the forecast time
            section.extend_from_slice(&self.year.to_be_bytes());
            section.push(self.month);
            section.push(self.day);
            section.push(self.hour);
            section.push(0);
            section.push(0);
            section.push(1); // One time range
            section.extend_from_slice(&0u32.to_be_bytes()); // None missing
            section.push(0); // Average
            section.push(2); // Successive times, same start
            section.push(1); // Hours
            section.extend_from_slice(&1u32.to_be_bytes());
            section.push(255);
            section.extend_from_slice(&0u32.to_be_bytes());
        }
        section
    }

    fn packing(&self) -> (f32, i16, u8) {
        let (min_val, max_val) = self
            .data_values
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| {
                (min.min(v), max.max(v))
            });

        if !min_val.is_finite() {
            return (0.0, 0, 0);
        }

        let range = (max_val - min_val) as f64;
        if range == 0.0 {
            return (min_val, 0, 0);
        }

        // value = R + packed * 2^E, with packed < 2^16
        let binary_scale_factor = (range / 65535.0).log2().ceil() as i16;
        (min_val, binary_scale_factor, 16)
    }

    fn has_missing(&self) -> bool {
        self.data_values.iter().any(|v| v.is_nan())
    }

    fn build_section5(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing();
        let present = self.data_values.iter().filter(|v| !v.is_nan()).count() as u32;

        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);

        section.extend_from_slice(&present.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0

        section.extend_from_slice(&reference_value.to_be_bytes());
        section.extend_from_slice(&encode_signed16(binary_scale_factor));
        section.extend_from_slice(&encode_signed16(0)); // Decimal scale factor
        section.push(bits_per_value);
        section.push(0); // Floating point
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        if !self.has_missing() {
            let mut section = 6u32.to_be_bytes().to_vec();
            section.push(6);
            section.push(255); // No bitmap
            return section;
        }

        let mut bits = vec![0u8; self.data_values.len().div_ceil(8)];
        for (i, v) in self.data_values.iter().enumerate() {
            if !v.is_nan() {
                bits[i / 8] |= 0x80 >> (i % 8);
            }
        }

        let mut section = ((6 + bits.len()) as u32).to_be_bytes().to_vec();
        section.push(6);
        section.push(0); // Bitmap follows
        section.extend_from_slice(&bits);
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let packed = self.pack_simple();
        let mut section = ((5 + packed.len()) as u32).to_be_bytes().to_vec();
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }

    fn pack_simple(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing();
        if bits_per_value == 0 {
            return Vec::new();
        }

        let binary_scale = 2f64.powi(binary_scale_factor as i32);
        let mut packed = Vec::new();
        for &val in self.data_values.iter().filter(|v| !v.is_nan()) {
            let packed_value = ((val as f64 - reference_value as f64) / binary_scale)
                .round()
                .clamp(0.0, 65535.0) as u16;
            packed.extend_from_slice(&packed_value.to_be_bytes());
        }
        packed
    }
}

/// Concatenate messages into the contents of one file.
pub fn concat_messages(messages: &[Vec<u8>]) -> Vec<u8> {
    messages.iter().flatten().copied().collect()
}

fn micro(degrees: f64) -> i32 {
    (degrees * 1e6).round() as i32
}

/// GRIB2 sign-magnitude encoding of a 32-bit integer.
pub fn encode_signed(value: i32) -> [u8; 4] {
    let magnitude = value.unsigned_abs() & 0x7FFF_FFFF;
    let sign = if value < 0 { 0x8000_0000 } else { 0 };
    (magnitude | sign).to_be_bytes()
}

/// GRIB2 sign-magnitude encoding of a 16-bit integer.
pub fn encode_signed16(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    let sign = if value < 0 { 0x8000 } else { 0 };
    (magnitude | sign).to_be_bytes()
}
