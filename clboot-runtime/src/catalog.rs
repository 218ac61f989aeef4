//! Platform and device discovery.
//!
//! Enumerates every platform the driver reports and every device on each,
//! probing a full capability profile per device. Counts come from the
//! driver, so nothing is truncated.

use crate::error::{BootstrapError, Result};
use crate::report::Reported;
use clboot_types::{
    CapabilityProfile, ComputeDriver, Device, DeviceAttribute, DeviceKind, InfoValue, Platform,
    PlatformAttribute, Status,
};
use std::fmt::Write as _;
use tracing::debug;

/// One platform with the devices found on it, in driver order.
#[derive(Debug, Clone)]
pub struct PlatformEntry<P, D> {
    pub platform: Platform<P>,
    pub devices: Vec<Device<D>>,
}

/// Result of a full enumeration.
#[derive(Debug, Clone)]
pub struct DeviceCatalog<P, D> {
    entries: Vec<PlatformEntry<P, D>>,
}

/// Catalog type produced by a given driver.
pub type CatalogFor<Drv> =
    DeviceCatalog<<Drv as ComputeDriver>::PlatformId, <Drv as ComputeDriver>::DeviceId>;

impl<P: Clone, D: Clone> DeviceCatalog<P, D> {
    /// Enumerate all platforms and their devices of `kind`.
    ///
    /// Any failing query aborts the whole enumeration.
    pub fn enumerate<Drv>(driver: &Drv, kind: DeviceKind) -> Result<Self>
    where
        Drv: ComputeDriver<PlatformId = P, DeviceId = D>,
    {
        let platform_ids = driver
            .platform_ids()
            .reported("Error getting platform ids")
            .map_err(|status| BootstrapError::PlatformEnumeration { status })?;

        debug!(
            target: "clboot::catalog",
            backend = driver.backend_name(),
            count = platform_ids.len(),
            "enumerated platforms"
        );

        let mut entries = Vec::with_capacity(platform_ids.len());
        for (i, id) in platform_ids.into_iter().enumerate() {
            let platform = describe_platform(driver, i, id)?;

            let device_ids = driver
                .device_ids(&platform.handle, kind)
                .or_else(|status| {
                    // A platform without devices of the requested kind is not an error.
                    if status == Status::DEVICE_NOT_FOUND {
                        Ok(Vec::new())
                    } else {
                        Err(status)
                    }
                })
                .reported("Error getting device ids")
                .map_err(|status| BootstrapError::DeviceEnumeration { platform: i, status })?;

            let mut devices = Vec::with_capacity(device_ids.len());
            for (j, device_id) in device_ids.into_iter().enumerate() {
                let profile = probe(driver, &device_id).map_err(|(attribute, status)| {
                    BootstrapError::CapabilityQuery {
                        platform: i,
                        device: j,
                        attribute,
                        status,
                    }
                })?;
                debug!(
                    target: "clboot::catalog",
                    platform = i,
                    device = j,
                    name = %profile.name,
                    compute_units = profile.compute_units,
                    clock_mhz = profile.clock_mhz,
                    global_memory = profile.global_memory_bytes,
                    "probed device"
                );
                devices.push(Device::new(device_id, profile));
            }

            entries.push(PlatformEntry { platform, devices });
        }

        Ok(Self { entries })
    }
}

impl<P, D> DeviceCatalog<P, D> {
    /// Build a catalog from already-known entries.
    pub fn from_entries(entries: Vec<PlatformEntry<P, D>>) -> Self {
        Self { entries }
    }

    pub fn platforms(&self) -> &[PlatformEntry<P, D>] {
        &self.entries
    }

    pub fn platform(&self, index: usize) -> Option<&Platform<P>> {
        self.entries.get(index).map(|e| &e.platform)
    }

    pub fn device(&self, platform: usize, device: usize) -> Option<&Device<D>> {
        self.entries.get(platform)?.devices.get(device)
    }

    /// All devices as `(platform index, device index, device)`, in
    /// enumeration order.
    pub fn devices(&self) -> impl Iterator<Item = (usize, usize, &Device<D>)> {
        self.entries.iter().enumerate().flat_map(|(i, entry)| {
            entry
                .devices
                .iter()
                .enumerate()
                .map(move |(j, device)| (i, j, device))
        })
    }

    pub fn device_count(&self) -> usize {
        self.entries.iter().map(|e| e.devices.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.device_count() == 0
    }

    /// Human-readable device listing, one line per device.
    pub fn summary(&self, print_extensions: bool) -> String {
        let mut out = String::new();
        for (i, j, device) in self.devices() {
            let p = &device.profile;
            let _ = writeln!(
                out,
                "Platform-{i} Device-{j}\t{} - {}\tCores: {}\tMemory: {}MB\tAvailable: {}",
                p.vendor,
                p.name,
                p.compute_units,
                p.max_alloc_mib(),
                if p.available { "Yes" } else { "No" }
            );
            if print_extensions {
                if let Some((first, rest)) = p.extensions.split_first() {
                    let _ = write!(out, "\t\tExtensions: \t{first}");
                    for ext in rest {
                        let _ = write!(out, "\n\t\t\t\t{ext}");
                    }
                    out.push('\n');
                }
            }
        }
        out
    }
}

fn describe_platform<Drv: ComputeDriver>(
    driver: &Drv,
    index: usize,
    id: Drv::PlatformId,
) -> Result<Platform<Drv::PlatformId>> {
    let query = |attribute| {
        driver
            .platform_info(&id, attribute)
            .reported("Error getting platform info")
            .map_err(|status| BootstrapError::DeviceEnumeration { platform: index, status })
    };
    let vendor = query(PlatformAttribute::Vendor)?;
    let name = query(PlatformAttribute::Name)?;
    let version = query(PlatformAttribute::Version)?;
    debug!(target: "clboot::catalog", platform = index, %vendor, %name, %version, "platform");
    Ok(Platform {
        handle: id,
        vendor,
        name,
        version,
    })
}

/// Query every static attribute of one device.
///
/// Fails on the first attribute whose query errors or whose value has the
/// wrong shape, naming that attribute.
pub fn probe<Drv: ComputeDriver>(
    driver: &Drv,
    device: &Drv::DeviceId,
) -> std::result::Result<CapabilityProfile, (DeviceAttribute, Status)> {
    let mut profile = CapabilityProfile::default();
    for attribute in DeviceAttribute::ALL {
        let value = driver
            .device_info(device, attribute)
            .reported(&format!("Error querying {attribute}"))
            .map_err(|status| (attribute, status))?;
        assign(&mut profile, attribute, value).ok_or((attribute, Status::INVALID_VALUE))?;
    }
    Ok(profile)
}

fn assign(profile: &mut CapabilityProfile, attribute: DeviceAttribute, value: InfoValue) -> Option<()> {
    match attribute {
        DeviceAttribute::Name => profile.name = value.into_text()?,
        DeviceAttribute::Vendor => profile.vendor = value.into_text()?,
        DeviceAttribute::ComputeUnits => profile.compute_units = value.as_u32()?,
        DeviceAttribute::GlobalMemSize => profile.global_memory_bytes = value.as_u64()?,
        DeviceAttribute::MaxClockFrequency => profile.clock_mhz = value.as_u32()?,
        DeviceAttribute::MaxMemAllocSize => profile.max_alloc_bytes = value.as_u64()?,
        DeviceAttribute::LocalMemSize => profile.local_memory_bytes = value.as_u64()?,
        DeviceAttribute::Available => profile.available = value.as_bool()?,
        DeviceAttribute::Extensions => {
            profile.extensions = CapabilityProfile::parse_extensions(&value.into_text()?)
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::{DeviceSpec, DriverCall, SimDeviceId, SimulatedDriver};

    fn two_platform_driver() -> SimulatedDriver {
        SimulatedDriver::builder()
            .platform("Intel", |p| {
                p.device(DeviceSpec::new("Iris", 24, 1100, 1 << 31).extensions("cl_khr_icd"))
            })
            .platform("NVIDIA", |p| {
                p.device(DeviceSpec::new("RTX", 46, 2500, 1 << 33).fp64())
                    .device(DeviceSpec::new("T4", 40, 1590, 1 << 34).fp64().available(false))
            })
            .build()
    }

    #[test]
    fn enumerates_in_driver_order() {
        let driver = two_platform_driver();
        let catalog = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap();

        assert_eq!(catalog.platforms().len(), 2);
        assert_eq!(catalog.device_count(), 3);
        assert_eq!(catalog.platform(1).unwrap().vendor, "NVIDIA");

        let names: Vec<_> = catalog.devices().map(|(i, j, d)| (i, j, d.name().to_string())).collect();
        assert_eq!(
            names,
            vec![
                (0, 0, "Iris".to_string()),
                (1, 0, "RTX".to_string()),
                (1, 1, "T4".to_string())
            ]
        );
    }

    #[test]
    fn probe_fills_every_field() {
        let driver = two_platform_driver();
        let catalog = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap();
        let t4 = &catalog.device(1, 1).unwrap().profile;

        assert_eq!(t4.compute_units, 40);
        assert_eq!(t4.clock_mhz, 1590);
        assert_eq!(t4.global_memory_bytes, 1 << 34);
        assert_eq!(t4.max_alloc_bytes, (1 << 34) / 4);
        assert!(!t4.available);
        assert!(t4.supports_fp64());
        assert_eq!(t4.vendor, "NVIDIA");
    }

    #[test]
    fn no_cap_on_device_count() {
        let driver = SimulatedDriver::builder()
            .platform("Many", |mut p| {
                for n in 0..40 {
                    p = p.device(DeviceSpec::new(&format!("dev{n}"), 1, 100, 1 << 20));
                }
                p
            })
            .build();
        let catalog = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap();
        assert_eq!(catalog.device_count(), 40);
    }

    #[test]
    fn platform_failure_is_fatal() {
        let driver = two_platform_driver();
        driver.fail(DriverCall::PlatformIds, Status::PLATFORM_NOT_FOUND_KHR);
        let err = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::PlatformEnumeration { status } if status == Status::PLATFORM_NOT_FOUND_KHR
        ));
    }

    #[test]
    fn single_attribute_failure_is_fatal() {
        let driver = two_platform_driver();
        driver.fail(
            DriverCall::DeviceInfo(DeviceAttribute::MaxClockFrequency),
            Status::INVALID_DEVICE,
        );
        let err = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap_err();
        match err {
            BootstrapError::CapabilityQuery {
                platform,
                device,
                attribute,
                status,
            } => {
                assert_eq!((platform, device), (0, 0));
                assert_eq!(attribute, DeviceAttribute::MaxClockFrequency);
                assert_eq!(status, Status::INVALID_DEVICE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wrong_shaped_attribute_is_fatal() {
        let driver = two_platform_driver();
        driver.set_info(
            SimDeviceId { platform: 1, device: 1 },
            DeviceAttribute::ComputeUnits,
            InfoValue::Text("forty".into()),
        );
        let err = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::CapabilityQuery {
                platform: 1,
                device: 1,
                attribute: DeviceAttribute::ComputeUnits,
                status,
            } if status == Status::INVALID_VALUE
        ));
    }

    #[test]
    fn narrow_integer_widens_for_memory() {
        let driver = two_platform_driver();
        let id = SimDeviceId { platform: 0, device: 0 };
        driver.set_info(id, DeviceAttribute::GlobalMemSize, InfoValue::Uint(4096));
        let profile = probe(&driver, &id).unwrap();
        assert_eq!(profile.global_memory_bytes, 4096);
    }

    #[test]
    fn cleared_failures_allow_enumeration() {
        let driver = two_platform_driver();
        driver.fail(DriverCall::PlatformIds, Status::OUT_OF_HOST_MEMORY);
        assert!(DeviceCatalog::enumerate(&driver, DeviceKind::All).is_err());

        driver.clear_failures();
        let catalog = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap();
        assert_eq!(catalog.device_count(), 3);
    }

    #[test]
    fn probe_reads_every_attribute() {
        let driver = SimulatedDriver::builder()
            .platform("Mesa", |p| {
                p.device(
                    DeviceSpec::new("gfx1100", 48, 2500, 24 << 30)
                        .vendor("Advanced Micro Devices, Inc.")
                        .max_alloc(20 << 30)
                        .local_memory(64 << 10)
                        .extensions("cl_khr_fp16")
                        .fp64(),
                )
            })
            .build();
        let profile = probe(&driver, &SimDeviceId { platform: 0, device: 0 }).unwrap();
        assert_eq!(profile.name, "gfx1100");
        assert_eq!(profile.vendor, "Advanced Micro Devices, Inc.");
        assert_eq!(profile.compute_units, 48);
        assert_eq!(profile.clock_mhz, 2500);
        assert_eq!(profile.global_memory_bytes, 24 << 30);
        assert_eq!(profile.max_alloc_mib(), 20 * 1024);
        assert_eq!(profile.local_memory_bytes, 64 << 10);
        assert!(profile.available);
        assert_eq!(profile.extensions, ["cl_khr_icd", "cl_khr_fp16", "cl_khr_fp64"]);
    }

    #[test]
    fn device_enumeration_failure_names_platform() {
        let driver = two_platform_driver();
        driver.fail(DriverCall::DeviceIds, Status::INVALID_PLATFORM);
        let err = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap_err();
        assert!(matches!(err, BootstrapError::DeviceEnumeration { platform: 0, .. }));
    }

    #[test]
    fn kind_filter_skips_platforms_without_matches() {
        let driver = SimulatedDriver::builder()
            .platform("CPU only", |p| p.device(DeviceSpec::new("cpu", 8, 3000, 1 << 34).cpu()))
            .platform("GPU", |p| p.device(DeviceSpec::new("gpu", 20, 1500, 1 << 32)))
            .build();
        let catalog = DeviceCatalog::enumerate(&driver, DeviceKind::Gpu).unwrap();
        assert_eq!(catalog.platforms().len(), 2);
        assert!(catalog.platforms()[0].devices.is_empty());
        assert_eq!(catalog.device(1, 0).unwrap().name(), "gpu");
    }

    #[test]
    fn summary_lists_devices_and_extensions() {
        let driver = two_platform_driver();
        let catalog = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap();

        let plain = catalog.summary(false);
        assert_eq!(plain.lines().count(), 3);
        assert!(plain.contains("Platform-1 Device-1\tNVIDIA - T4\tCores: 40\tMemory: 4096MB\tAvailable: No"));
        assert!(!plain.contains("cl_khr_fp64"));

        let verbose = catalog.summary(true);
        assert!(verbose.contains("\t\tExtensions: \tcl_khr_icd\n\t\t\t\tcl_khr_fp64\n"));
    }
}
