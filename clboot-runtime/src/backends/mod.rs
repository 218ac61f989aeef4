//! Compute driver implementations.
//!
//! The simulated driver is always available. The OpenCL driver needs the
//! `opencl` feature and an ICD loader at link time.

pub mod simulated;

#[cfg(feature = "opencl")]
pub mod opencl;

pub use simulated::SimulatedDriver;

#[cfg(feature = "opencl")]
pub use opencl::OpenClDriver;
