//! # Country Start Coordinates
//!
//! Maps an ISO 3166-1 alpha-2 country code to a start position on the canvas.
//! The canvas is a Web Mercator world map, `CANVAS_SIZE` pixels wide, with the
//! origin at longitude 0 / latitude 0.

/// Edge length of the world canvas in pixels.
pub const CANVAS_SIZE: f64 = 65536.0;

/// Mercator cut-off, the projection diverges at the poles.
const MAX_LATITUDE: f64 = 85.051_128_78;

/// Approximate geographic centre (latitude, longitude) per country.
const COUNTRY_CENTRES: &[(&str, f64, f64)] = &[
    ("AE", 24.0, 54.0),
    ("AR", -34.0, -64.0),
    ("AT", 47.33, 13.33),
    ("AU", -27.0, 133.0),
    ("BD", 24.0, 90.0),
    ("BE", 50.83, 4.0),
    ("BG", 43.0, 25.0),
    ("BR", -10.0, -55.0),
    ("BY", 53.0, 28.0),
    ("CA", 60.0, -95.0),
    ("CH", 47.0, 8.0),
    ("CL", -30.0, -71.0),
    ("CN", 35.0, 105.0),
    ("CO", 4.0, -72.0),
    ("CZ", 49.75, 15.5),
    ("DE", 51.0, 9.0),
    ("DK", 56.0, 10.0),
    ("DZ", 28.0, 3.0),
    ("EG", 27.0, 30.0),
    ("ES", 40.0, -4.0),
    ("FI", 64.0, 26.0),
    ("FR", 46.0, 2.0),
    ("GB", 54.0, -2.0),
    ("GR", 39.0, 22.0),
    ("HR", 45.17, 15.5),
    ("HU", 47.0, 20.0),
    ("ID", -5.0, 120.0),
    ("IE", 53.0, -8.0),
    ("IL", 31.5, 34.75),
    ("IN", 20.0, 77.0),
    ("IQ", 33.0, 44.0),
    ("IR", 32.0, 53.0),
    ("IT", 42.83, 12.83),
    ("JP", 36.0, 138.0),
    ("KR", 37.0, 127.5),
    ("KZ", 48.0, 68.0),
    ("LT", 56.0, 24.0),
    ("LV", 57.0, 25.0),
    ("MA", 32.0, -5.0),
    ("MX", 23.0, -102.0),
    ("MY", 2.5, 112.5),
    ("NG", 10.0, 8.0),
    ("NL", 52.5, 5.75),
    ("NO", 62.0, 10.0),
    ("NZ", -41.0, 174.0),
    ("PE", -10.0, -76.0),
    ("PH", 13.0, 122.0),
    ("PK", 30.0, 70.0),
    ("PL", 52.0, 20.0),
    ("PT", 39.5, -8.0),
    ("RO", 46.0, 25.0),
    ("RS", 44.0, 21.0),
    ("RU", 60.0, 100.0),
    ("SA", 25.0, 45.0),
    ("SE", 62.0, 15.0),
    ("SG", 1.37, 103.8),
    ("SK", 48.67, 19.5),
    ("TH", 15.0, 100.0),
    ("TR", 39.0, 35.0),
    ("TW", 23.5, 121.0),
    ("UA", 49.0, 32.0),
    ("US", 38.0, -97.0),
    ("VE", 8.0, -66.0),
    ("VN", 16.0, 106.0),
    ("ZA", -29.0, 24.0),
];

/// Projects a geographic position onto canvas pixel coordinates.
pub fn project(latitude: f64, longitude: f64) -> [i32; 2] {
    let lat = latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = longitude / 360.0 * CANVAS_SIZE;
    let y = -(std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln() / (2.0 * std::f64::consts::PI) * CANVAS_SIZE;
    [x.round() as i32, y.round() as i32]
}

/// Start coordinates for a country code; `[0, 0]` for unknown codes.
pub fn cc_to_coords(code: &str) -> [i32; 2] {
    let code = code.trim();
    COUNTRY_CENTRES
        .iter()
        .find(|(cc, _, _)| cc.eq_ignore_ascii_case(code))
        .map_or([0, 0], |&(_, lat, lon)| project(lat, lon))
}
