//! clboot - pick the best OpenCL device and bootstrap a kernel on it
//!
//! Enumerates every platform and device, scores the ones that support double
//! precision (`clock × compute units + global memory`), and acquires a
//! context, in-order queue, built program and kernel on the winner. Teardown
//! releases them in a fixed order. Failures are returned as values; the
//! fail-fast policy lives at the top, in [`Session::start_or_exit`] and
//! [`report::terminate`].
//!
//! ```no_run
//! use clboot::{BootstrapConfig, Session, SimulatedDriver, SQUARE_SOURCE};
//!
//! let driver = SimulatedDriver::workstation();
//! let session = Session::start(&driver, &BootstrapConfig::default(), SQUARE_SOURCE)?;
//! println!("running on {}", session.device().name());
//! session.finish()?;
//! # Ok::<(), clboot::BootstrapError>(())
//! ```

pub mod logging;
pub mod session;

// Re-export the data model and runtime for a single import path
pub use clboot_runtime::*;
pub use clboot_types::*;

pub use clboot_runtime::backends::simulated::{DeviceSpec, DriverCall, SQUARE_SOURCE};
pub use clboot_runtime::backends::SimulatedDriver;
#[cfg(feature = "opencl")]
pub use clboot_runtime::backends::OpenClDriver;

pub use session::Session;
