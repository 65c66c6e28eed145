//! Small value types shared across the crate: the vendor firmware version
//! and device serial.

use std::{fmt, str::FromStr};

use crate::error::{ctor::*, Result};

/// YubicoPIV firmware version (`major.minor.patch`), ordered so callers can
/// feature-gate on e.g. "metadata requires >= 5.3.0".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Version { major, minor, patch }
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Version::new(bytes[0], bytes[1], bytes[2])
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A YubicoPIV device serial number.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Serial(pub u32);

impl Serial {
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Serial(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Serial {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u32>().map(Serial).map_err(|_| invalid_data_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_orders_by_major_then_minor_then_patch() {
        assert!(Version::new(5, 2, 0) < Version::new(5, 3, 0));
        assert!(Version::new(4, 9, 9) < Version::new(5, 0, 0));
    }

    #[test]
    fn version_display() {
        assert_eq!(Version::new(5, 3, 1).to_string(), "5.3.1");
    }

    #[test]
    fn serial_from_str_round_trips() {
        let s: Serial = "7654321".parse().unwrap();
        assert_eq!(s.to_string(), "7654321");
    }

    #[test]
    fn serial_from_str_rejects_non_numeric() {
        assert!("abc".parse::<Serial>().is_err());
    }
}
