//! End-to-end bootstrap: enumerate, select, build.
//!
//! A [`Session`] owns the catalog it selected from and the compute context it
//! built. [`Session::start`] reports failures as values;
//! [`Session::start_or_exit`] applies the fail-fast policy instead.

use clboot_runtime::report;
use clboot_runtime::{
    BootstrapConfig, BootstrapError, CatalogFor, ComputeContext, ContextBuilder, DeviceCatalog,
    DeviceSelector, Result, ScoreResult,
};
use clboot_types::{ComputeDriver, Device, Platform};
use tracing::info;

/// A device chosen and a kernel ready on it.
pub struct Session<'d, D: ComputeDriver> {
    catalog: CatalogFor<D>,
    selection: ScoreResult,
    context: ComputeContext<'d, D>,
}

impl<'d, D: ComputeDriver> Session<'d, D> {
    /// Run the full bootstrap against `driver`, compiling `source` and
    /// resolving the entry point named in `config`.
    pub fn start(driver: &'d D, config: &BootstrapConfig, source: &str) -> Result<Self> {
        let catalog = DeviceCatalog::enumerate(driver, config.selection.device_kind)?;
        info!(
            target: "clboot::session",
            backend = driver.backend_name(),
            platforms = catalog.platforms().len(),
            devices = catalog.device_count(),
            "catalog ready"
        );
        if config.diagnostics.print_devices {
            print!("{}", catalog.summary(config.diagnostics.print_extensions));
        }

        let selector = DeviceSelector::from_config(&config.selection);
        let selection = selector.select_best(&catalog)?;
        println!(
            "Initiating platform-{} device-{}.",
            selection.platform, selection.device
        );

        let (platform, device) = match (
            catalog.platform(selection.platform),
            catalog.device(selection.platform, selection.device),
        ) {
            (Some(platform), Some(device)) => (platform, device),
            _ => {
                return Err(BootstrapError::NoEligibleDevice {
                    required: selector.required_extension().to_string(),
                    scanned: catalog.device_count(),
                })
            }
        };

        let context = ContextBuilder::from_config(driver, &config.build).build(
            platform,
            device,
            source,
            &config.kernel.entry_point,
        )?;

        Ok(Self {
            catalog,
            selection,
            context,
        })
    }

    /// [`start`](Self::start), terminating the process on any failure.
    pub fn start_or_exit(driver: &'d D, config: &BootstrapConfig, source: &str) -> Self {
        report::unwrap_or_terminate(Self::start(driver, config, source))
    }

    pub fn catalog(&self) -> &CatalogFor<D> {
        &self.catalog
    }

    pub fn selection(&self) -> ScoreResult {
        self.selection
    }

    pub fn platform(&self) -> Option<&Platform<D::PlatformId>> {
        self.catalog.platform(self.selection.platform)
    }

    pub fn device(&self) -> &Device<D::DeviceId> {
        self.context.device()
    }

    pub fn context(&self) -> &ComputeContext<'d, D> {
        &self.context
    }

    /// Release the compute context.
    pub fn finish(self) -> Result<()> {
        self.context.release()
    }
}
