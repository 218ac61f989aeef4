//! Device data model.
//!
//! A device is an opaque driver handle plus the capability profile probed
//! once at discovery time. Profiles are immutable for the rest of the run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extension marker for double-precision floating point support.
pub const FP64_EXTENSION: &str = "cl_khr_fp64";

/// Which device types an enumeration asks the driver for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    All,
    Default,
    Cpu,
    Gpu,
    Accelerator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::All => "all",
            DeviceKind::Default => "default",
            DeviceKind::Cpu => "cpu",
            DeviceKind::Gpu => "gpu",
            DeviceKind::Accelerator => "accelerator",
        };
        f.write_str(name)
    }
}

/// Attributes probed for every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAttribute {
    Name,
    Vendor,
    ComputeUnits,
    GlobalMemSize,
    MaxClockFrequency,
    MaxMemAllocSize,
    LocalMemSize,
    Available,
    Extensions,
}

impl DeviceAttribute {
    /// Probe order used by the catalog.
    pub const ALL: [DeviceAttribute; 9] = [
        DeviceAttribute::Name,
        DeviceAttribute::Vendor,
        DeviceAttribute::ComputeUnits,
        DeviceAttribute::GlobalMemSize,
        DeviceAttribute::MaxClockFrequency,
        DeviceAttribute::MaxMemAllocSize,
        DeviceAttribute::LocalMemSize,
        DeviceAttribute::Available,
        DeviceAttribute::Extensions,
    ];

    /// Name of the matching `CL_DEVICE_*` query.
    pub fn cl_name(self) -> &'static str {
        match self {
            DeviceAttribute::Name => "CL_DEVICE_NAME",
            DeviceAttribute::Vendor => "CL_DEVICE_VENDOR",
            DeviceAttribute::ComputeUnits => "CL_DEVICE_MAX_COMPUTE_UNITS",
            DeviceAttribute::GlobalMemSize => "CL_DEVICE_GLOBAL_MEM_SIZE",
            DeviceAttribute::MaxClockFrequency => "CL_DEVICE_MAX_CLOCK_FREQUENCY",
            DeviceAttribute::MaxMemAllocSize => "CL_DEVICE_MAX_MEM_ALLOC_SIZE",
            DeviceAttribute::LocalMemSize => "CL_DEVICE_LOCAL_MEM_SIZE",
            DeviceAttribute::Available => "CL_DEVICE_AVAILABLE",
            DeviceAttribute::Extensions => "CL_DEVICE_EXTENSIONS",
        }
    }
}

impl fmt::Display for DeviceAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cl_name())
    }
}

/// Value returned by a single device or platform info query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Uint(u32),
    Ulong(u64),
    Bool(bool),
    Text(String),
}

impl InfoValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            InfoValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            InfoValue::Ulong(v) => Some(*v),
            InfoValue::Uint(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InfoValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            InfoValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Static attributes of one device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityProfile {
    pub name: String,
    pub vendor: String,
    pub compute_units: u32,
    pub global_memory_bytes: u64,
    pub clock_mhz: u32,
    pub max_alloc_bytes: u64,
    pub local_memory_bytes: u64,
    pub available: bool,
    /// In the order the driver reported them.
    pub extensions: Vec<String>,
}

impl CapabilityProfile {
    /// Split a space-separated `CL_DEVICE_EXTENSIONS` string, keeping the
    /// driver's order and dropping repeats.
    pub fn parse_extensions(raw: &str) -> Vec<String> {
        let mut extensions = Vec::new();
        for ext in raw.split_whitespace() {
            if !extensions.iter().any(|e: &String| e == ext) {
                extensions.push(ext.to_owned());
            }
        }
        extensions
    }

    /// Add an extension unless already listed.
    pub fn add_extension(&mut self, extension: &str) {
        if !self.supports(extension) {
            self.extensions.push(extension.to_owned());
        }
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }

    pub fn supports_fp64(&self) -> bool {
        self.supports(FP64_EXTENSION)
    }

    /// Max single allocation in MiB, as shown in device listings.
    pub fn max_alloc_mib(&self) -> u64 {
        self.max_alloc_bytes / (1024 * 1024)
    }
}

/// A discovered device: driver handle plus its probed profile.
#[derive(Debug, Clone)]
pub struct Device<H> {
    pub handle: H,
    pub profile: CapabilityProfile,
}

impl<H> Device<H> {
    pub fn new(handle: H, profile: CapabilityProfile) -> Self {
        Self { handle, profile }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }
}
