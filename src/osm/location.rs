//! Fixed-point coordinates

use serde::{Deserialize, Serialize};

/// Number of fixed-point units per degree
pub const COORDINATE_PRECISION: i32 = 10_000_000;

const UNDEFINED: i32 = i32::MAX;

/// A longitude/latitude pair in units of 1e-7 degrees
///
/// The default location is undefined; undefined coordinates are stored as
/// `i32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    x: i32,
    y: i32,
}

impl Location {
    /// Location from fixed-point values
    pub const fn new(x: i32, y: i32) -> Self {
        Location { x, y }
    }

    pub const fn undefined() -> Self {
        Location {
            x: UNDEFINED,
            y: UNDEFINED,
        }
    }

    /// Location from degrees, rounding half away from zero
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Location {
            x: double_to_fix(lon),
            y: double_to_fix(lat),
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn lon(&self) -> f64 {
        f64::from(self.x) / f64::from(COORDINATE_PRECISION)
    }

    pub fn lat(&self) -> f64 {
        f64::from(self.y) / f64::from(COORDINATE_PRECISION)
    }

    /// Whether either coordinate has been set
    pub fn is_defined(&self) -> bool {
        self.x != UNDEFINED || self.y != UNDEFINED
    }

    /// Whether the location is defined and inside the valid degree ranges
    pub fn is_valid(&self) -> bool {
        let max_lon = 180 * COORDINATE_PRECISION;
        let max_lat = 90 * COORDINATE_PRECISION;
        (-max_lon..=max_lon).contains(&self.x) && (-max_lat..=max_lat).contains(&self.y)
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::undefined()
    }
}

fn double_to_fix(degrees: f64) -> i32 {
    (degrees * f64::from(COORDINATE_PRECISION)).round() as i32
}
