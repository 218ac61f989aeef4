//! Execution environment bootstrap.
//!
//! Turns a selected device into a ready-to-dispatch [`ComputeContext`] by
//! acquiring, in strict order, a context, an in-order command queue, a
//! program built from source, and the kernel entry point.

use crate::config::BuildConfig;
use crate::error::{BootstrapError, Result};
use crate::lifecycle;
use crate::report::Reported;
use clboot_types::{ComputeDriver, Device, Platform, Status};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// The four driver objects owned by a built context.
pub(crate) struct Handles<D: ComputeDriver> {
    pub(crate) context: D::Context,
    pub(crate) queue: D::Queue,
    pub(crate) program: D::Program,
    pub(crate) kernel: D::Kernel,
}

/// A fully built execution environment on one device.
///
/// All four handles are valid for as long as the value exists. Release it
/// with [`ComputeContext::release`]; dropping it releases too, with a
/// warning. Not meant to be shared across threads.
pub struct ComputeContext<'d, D: ComputeDriver> {
    pub(crate) driver: &'d D,
    device: Device<D::DeviceId>,
    pub(crate) handles: Option<Handles<D>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<'d, D: ComputeDriver> ComputeContext<'d, D> {
    fn new(driver: &'d D, device: Device<D::DeviceId>, handles: Handles<D>) -> Self {
        Self {
            driver,
            device,
            handles: Some(handles),
            _not_sync: PhantomData,
        }
    }

    fn handles(&self) -> &Handles<D> {
        match &self.handles {
            Some(handles) => handles,
            // Only `release` and `Drop` take the handles, and both consume the value.
            None => unreachable!("compute context used after release"),
        }
    }

    pub fn driver(&self) -> &'d D {
        self.driver
    }

    pub fn device(&self) -> &Device<D::DeviceId> {
        &self.device
    }

    pub fn context(&self) -> &D::Context {
        &self.handles().context
    }

    pub fn queue(&self) -> &D::Queue {
        &self.handles().queue
    }

    pub fn program(&self) -> &D::Program {
        &self.handles().program
    }

    pub fn kernel(&self) -> &D::Kernel {
        &self.handles().kernel
    }

    /// Release program, kernel, queue and context, in that order.
    pub fn release(mut self) -> Result<()> {
        match self.handles.take() {
            Some(handles) => lifecycle::release_handles(self.driver, handles),
            None => Ok(()),
        }
    }
}

impl<D: ComputeDriver> Drop for ComputeContext<'_, D> {
    fn drop(&mut self) {
        if let Some(handles) = self.handles.take() {
            warn!(
                target: "clboot::lifecycle",
                device = %self.device.profile.name,
                "compute context dropped without release"
            );
            // Errors are already logged by release_handles; drop must not panic.
            let _ = lifecycle::release_handles(self.driver, handles);
        }
    }
}

impl<D: ComputeDriver> fmt::Debug for ComputeContext<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeContext")
            .field("backend", &self.driver.backend_name())
            .field("device", &self.device.profile.name)
            .field("live", &self.handles.is_some())
            .finish()
    }
}

/// Acquires a [`ComputeContext`] for one device.
pub struct ContextBuilder<'d, D: ComputeDriver> {
    driver: &'d D,
    options: String,
}

impl<'d, D: ComputeDriver> ContextBuilder<'d, D> {
    pub fn new(driver: &'d D) -> Self {
        Self {
            driver,
            options: String::new(),
        }
    }

    pub fn from_config(driver: &'d D, config: &BuildConfig) -> Self {
        Self::new(driver).options(config.options.clone())
    }

    /// Options string passed to the program build.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Run the acquisition sequence.
    ///
    /// There is no retry. When a step fails, whatever the earlier steps
    /// acquired is released in reverse order before the error is returned,
    /// so a partially built context never escapes.
    pub fn build(
        &self,
        platform: &Platform<D::PlatformId>,
        device: &Device<D::DeviceId>,
        source: &str,
        entry_point: &str,
    ) -> Result<ComputeContext<'d, D>> {
        let driver = self.driver;
        let device_id = &device.handle;

        let context = driver
            .create_context(&platform.handle, device_id)
            .reported("Error creating context")
            .map_err(|status| BootstrapError::ContextCreation { status })?;
        debug!(target: "clboot::context", device = %device.profile.name, "context created");

        let queue = match driver
            .create_queue(&context, device_id)
            .reported("Error creating command queue")
        {
            Ok(queue) => queue,
            Err(status) => {
                unwind::<D>(driver, None, None, context);
                return Err(BootstrapError::QueueCreation { status });
            }
        };

        let mut program = match driver
            .create_program(&context, source)
            .reported("Failed to create compute program")
        {
            Ok(program) => program,
            Err(status) => {
                unwind::<D>(driver, None, Some(queue), context);
                return Err(BootstrapError::ProgramCompile { status });
            }
        };

        if let Err(status) = driver
            .build_program(&mut program, device_id, &self.options)
            .reported("Failed to build program executable")
        {
            let (log, log_status) = match fetch_build_log(driver, &program, device_id) {
                Ok(log) => (log, None),
                Err(log_status) => {
                    warn!(
                        target: "clboot::context",
                        status = %log_status,
                        "build log unavailable"
                    );
                    (String::new(), Some(log_status))
                }
            };
            unwind::<D>(driver, Some(program), Some(queue), context);
            return Err(BootstrapError::ProgramBuild {
                status,
                log,
                log_status,
            });
        }
        debug!(target: "clboot::context", options = %self.options, "program built");

        let kernel = match driver
            .create_kernel(&program, entry_point)
            .reported("Failed to create compute kernel")
        {
            Ok(kernel) => kernel,
            Err(status) => {
                unwind::<D>(driver, Some(program), Some(queue), context);
                return Err(BootstrapError::KernelCreation {
                    entry_point: entry_point.to_string(),
                    status,
                });
            }
        };

        info!(
            target: "clboot::context",
            device = %device.profile.name,
            entry_point,
            "compute context ready"
        );
        Ok(ComputeContext::new(
            driver,
            device.clone(),
            Handles {
                context,
                queue,
                program,
                kernel,
            },
        ))
    }
}

/// Fetch the full build log: query its size, allocate exactly that much,
/// then read it. The text stops at the first NUL.
pub fn fetch_build_log<D: ComputeDriver>(
    driver: &D,
    program: &D::Program,
    device: &D::DeviceId,
) -> std::result::Result<String, Status> {
    let size = driver
        .build_log_size(program, device)
        .reported("Error querying build log size")?;
    if size == 0 {
        return Ok(String::new());
    }

    let mut buf = vec![0u8; size];
    driver
        .read_build_log(program, device, &mut buf)
        .reported("Error reading build log")?;

    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Release whatever a failed build acquired, newest first.
fn unwind<D: ComputeDriver>(
    driver: &D,
    program: Option<D::Program>,
    queue: Option<D::Queue>,
    context: D::Context,
) {
    if let Some(program) = program {
        let _ = driver.release_program(program).reported("Error releasing program");
    }
    if let Some(queue) = queue {
        let _ = driver.release_queue(queue).reported("Error releasing command queue");
    }
    let _ = driver.release_context(context).reported("Error releasing context");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::{DeviceSpec, DriverCall, SimulatedDriver, SQUARE_SOURCE};
    use crate::catalog::DeviceCatalog;
    use clboot_types::DeviceKind;

    fn single_device() -> SimulatedDriver {
        SimulatedDriver::builder()
            .platform("Sim", |p| p.device(DeviceSpec::new("sim0", 8, 1000, 1 << 30).fp64()))
            .build()
    }

    fn build_with<'d>(
        driver: &'d SimulatedDriver,
        source: &str,
        entry_point: &str,
    ) -> Result<ComputeContext<'d, SimulatedDriver>> {
        let catalog = DeviceCatalog::enumerate(driver, DeviceKind::All).unwrap();
        let platform = catalog.platform(0).unwrap();
        let device = catalog.device(0, 0).unwrap();
        ContextBuilder::new(driver).build(platform, device, source, entry_point)
    }

    #[test]
    fn acquires_in_order() {
        let driver = single_device();
        let ctx = build_with(&driver, SQUARE_SOURCE, "square").unwrap();
        assert_eq!(driver.live_handles(), 4);
        assert_eq!(ctx.device().name(), "sim0");
        assert_eq!(
            driver.acquisition_log(),
            vec!["context", "queue", "program", "build", "kernel"]
        );
        ctx.release().unwrap();
    }

    #[test]
    fn malformed_source_returns_exact_log_and_no_kernel() {
        let driver = single_device();
        let source = "__kernel void square(__global float* a) {\n    a[0] = 1.0f;\n";
        let err = build_with(&driver, source, "square").unwrap_err();

        let expected = SimulatedDriver::unbalanced_log(source);
        match &err {
            BootstrapError::ProgramBuild {
                status,
                log,
                log_status,
            } => {
                assert_eq!(*status, Status::BUILD_PROGRAM_FAILURE);
                assert_eq!(log, &expected);
                assert!(!log.is_empty());
                assert_eq!(*log_status, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(driver.kernels_created(), 0);
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn long_build_log_is_not_truncated() {
        let driver = single_device();
        let log = "warning: something odd\n".repeat(500);
        driver.set_build_failure(Some(log.clone()));
        let err = build_with(&driver, SQUARE_SOURCE, "square").unwrap_err();
        assert!(log.len() > 2048);
        assert_eq!(err.build_log(), Some(log.as_str()));
    }

    #[test]
    fn empty_build_log_is_handled() {
        let driver = single_device();
        driver.set_build_failure(Some(String::new()));
        let err = build_with(&driver, SQUARE_SOURCE, "square").unwrap_err();
        assert_eq!(err.build_log(), Some(""));
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn failed_log_fetch_is_recorded_not_blanked() {
        let source = "__kernel void square(__global float* a) {\n";
        for call in [DriverCall::BuildLogSize, DriverCall::ReadBuildLog] {
            let driver = single_device();
            driver.fail(call, Status::OUT_OF_HOST_MEMORY);
            let err = build_with(&driver, source, "square").unwrap_err();

            assert_eq!(err.status(), Some(Status::BUILD_PROGRAM_FAILURE));
            assert_eq!(err.build_log(), None, "{call:?}");
            assert_eq!(err.build_log_status(), Some(Status::OUT_OF_HOST_MEMORY));
            assert_eq!(driver.kernels_created(), 0);
            assert_eq!(driver.live_handles(), 0);
        }
    }

    #[test]
    fn unknown_entry_point_is_kernel_error() {
        let driver = single_device();
        let err = build_with(&driver, SQUARE_SOURCE, "cube").unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::KernelCreation { ref entry_point, status }
                if entry_point == "cube" && status == Status::INVALID_KERNEL_NAME
        ));
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn each_step_failure_unwinds_earlier_steps() {
        let cases = [
            (DriverCall::CreateContext, "ContextCreation"),
            (DriverCall::CreateQueue, "QueueCreation"),
            (DriverCall::CreateProgram, "ProgramCompile"),
            (DriverCall::CreateKernel, "KernelCreation"),
        ];
        for (call, expected) in cases {
            let driver = single_device();
            driver.fail(call, Status::OUT_OF_RESOURCES);
            let err = build_with(&driver, SQUARE_SOURCE, "square").unwrap_err();
            let name = match err {
                BootstrapError::ContextCreation { .. } => "ContextCreation",
                BootstrapError::QueueCreation { .. } => "QueueCreation",
                BootstrapError::ProgramCompile { .. } => "ProgramCompile",
                BootstrapError::KernelCreation { .. } => "KernelCreation",
                other => panic!("unexpected error: {other:?}"),
            };
            assert_eq!(name, expected);
            assert_eq!(driver.live_handles(), 0, "{expected} leaked handles");
        }
    }

    #[test]
    fn build_options_reach_the_driver() {
        let driver = single_device();
        let catalog = DeviceCatalog::enumerate(&driver, DeviceKind::All).unwrap();
        let ctx = ContextBuilder::from_config(
            &driver,
            &BuildConfig {
                options: "-cl-std=CL1.2".into(),
            },
        )
        .build(
            catalog.platform(0).unwrap(),
            catalog.device(0, 0).unwrap(),
            SQUARE_SOURCE,
            "square",
        )
        .unwrap();
        assert_eq!(driver.last_build_options().as_deref(), Some("-cl-std=CL1.2"));
        ctx.release().unwrap();
    }
}
