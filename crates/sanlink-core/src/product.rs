// Product series detection from the firmware version.

use std::fmt;

/// Capability family of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductSeries {
    /// Firmware before major version 6.
    #[default]
    Classic,
    /// Firmware major version 6 and later.
    Modern,
}

impl ProductSeries {
    /// Classify a firmware version.
    ///
    /// Accepts dotted point releases (`6.1.5`) and product version strings
    /// (`V600R005C00`, `V500R007C60`). Unparseable versions are `Classic`.
    pub fn from_version(version: &str) -> Self {
        match major_version(version) {
            Some(major) if major >= 6 => Self::Modern,
            _ => Self::Classic,
        }
    }

    pub fn is_modern(self) -> bool {
        self == Self::Modern
    }
}

impl fmt::Display for ProductSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classic => f.write_str("classic"),
            Self::Modern => f.write_str("modern"),
        }
    }
}

fn major_version(version: &str) -> Option<u32> {
    let version = version.trim();
    if let Some(rest) = version.strip_prefix(['V', 'v']) {
        // `V600R005C00`: the first digit of the V-number is the major.
        return rest.chars().next()?.to_digit(10);
    }
    version.split('.').next()?.parse().ok()
}
