//! Teardown of a built compute context.
//!
//! Buffers the workload allocated against the context are not touched here;
//! they belong to the workload.

use crate::context::{ComputeContext, Handles};
use crate::error::{BootstrapError, Result};
use crate::report::Reported;
use clboot_types::{ComputeDriver, Status};
use tracing::debug;

/// Release a context: program, kernel, command queue, then context.
pub fn release<D: ComputeDriver>(context: ComputeContext<'_, D>) -> Result<()> {
    context.release()
}

/// Release all four handles in fixed order. A failing release does not stop
/// the remaining ones; the first failure is returned.
pub(crate) fn release_handles<D: ComputeDriver>(driver: &D, handles: Handles<D>) -> Result<()> {
    let Handles {
        context,
        queue,
        program,
        kernel,
    } = handles;

    let outcomes: [(&'static str, std::result::Result<(), Status>); 4] = [
        (
            "program",
            driver.release_program(program).reported("Error releasing program"),
        ),
        (
            "kernel",
            driver.release_kernel(kernel).reported("Error releasing kernel"),
        ),
        (
            "command queue",
            driver.release_queue(queue).reported("Error releasing command queue"),
        ),
        (
            "context",
            driver.release_context(context).reported("Error releasing context"),
        ),
    ];

    let mut first = None;
    for (resource, outcome) in outcomes {
        if let Err(status) = outcome {
            first.get_or_insert(BootstrapError::Release { resource, status });
        }
    }
    debug!(target: "clboot::lifecycle", ok = first.is_none(), "compute context released");

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::{DeviceSpec, DriverCall, SimulatedDriver, SQUARE_SOURCE};
    use crate::catalog::DeviceCatalog;
    use crate::context::ContextBuilder;
    use clboot_types::DeviceKind;

    fn driver() -> SimulatedDriver {
        SimulatedDriver::builder()
            .platform("Sim", |p| p.device(DeviceSpec::new("sim0", 4, 800, 1 << 28).fp64()))
            .build()
    }

    fn built(driver: &SimulatedDriver) -> ComputeContext<'_, SimulatedDriver> {
        let catalog = DeviceCatalog::enumerate(driver, DeviceKind::All).unwrap();
        ContextBuilder::new(driver)
            .build(
                catalog.platform(0).unwrap(),
                catalog.device(0, 0).unwrap(),
                SQUARE_SOURCE,
                "square",
            )
            .unwrap()
    }

    #[test]
    fn release_order_is_program_kernel_queue_context() {
        let driver = driver();
        let ctx = built(&driver);
        release(ctx).unwrap();
        assert_eq!(
            driver.release_log(),
            vec!["program", "kernel", "queue", "context"]
        );
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn failing_release_still_releases_the_rest() {
        let driver = driver();
        let ctx = built(&driver);
        driver.fail(DriverCall::ReleaseKernel, Status::INVALID_KERNEL);

        let err = ctx.release().unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Release { resource: "kernel", status } if status == Status::INVALID_KERNEL
        ));
        assert_eq!(driver.release_log(), vec!["program", "queue", "context"]);
    }

    #[test]
    fn drop_releases_in_same_order() {
        let driver = driver();
        {
            let _ctx = built(&driver);
            assert_eq!(driver.live_handles(), 4);
        }
        assert_eq!(driver.live_handles(), 0);
        assert_eq!(
            driver.release_log(),
            vec!["program", "kernel", "queue", "context"]
        );
    }
}
