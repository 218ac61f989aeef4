//! Platform data model.

use std::fmt;

/// Attributes queried once per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformAttribute {
    Vendor,
    Name,
    Version,
}

impl fmt::Display for PlatformAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlatformAttribute::Vendor => "CL_PLATFORM_VENDOR",
            PlatformAttribute::Name => "CL_PLATFORM_NAME",
            PlatformAttribute::Version => "CL_PLATFORM_VERSION",
        };
        f.write_str(name)
    }
}

/// A vendor driver instance grouping one or more devices.
#[derive(Debug, Clone)]
pub struct Platform<H> {
    pub handle: H,
    pub vendor: String,
    pub name: String,
    pub version: String,
}

impl<H> Platform<H> {
    pub fn new(handle: H, vendor: impl Into<String>) -> Self {
        Self {
            handle,
            vendor: vendor.into(),
            name: String::new(),
            version: String::new(),
        }
    }
}
