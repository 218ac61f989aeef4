//! The seam between the bootstrap core and the underlying compute API.
//!
//! Every call mirrors one OpenCL entry point and reports failures as a raw
//! [`Status`]. Classification into bootstrap errors happens in the runtime.

use crate::{DeviceAttribute, DeviceKind, InfoValue, PlatformAttribute, Status};
use std::fmt::Debug;

/// A compute driver: platform/device enumeration plus the handful of object
/// constructors needed to reach a ready kernel.
///
/// Calls block until the driver returns. Implementations are not expected to
/// be thread safe.
pub trait ComputeDriver {
    type PlatformId: Clone + Debug;
    type DeviceId: Clone + Debug;
    type Context;
    type Queue;
    type Program;
    type Kernel;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    fn platform_ids(&self) -> Result<Vec<Self::PlatformId>, Status>;

    fn platform_info(
        &self,
        platform: &Self::PlatformId,
        attribute: PlatformAttribute,
    ) -> Result<String, Status>;

    fn device_ids(
        &self,
        platform: &Self::PlatformId,
        kind: DeviceKind,
    ) -> Result<Vec<Self::DeviceId>, Status>;

    fn device_info(
        &self,
        device: &Self::DeviceId,
        attribute: DeviceAttribute,
    ) -> Result<InfoValue, Status>;

    /// Create a context bound to exactly one device.
    fn create_context(
        &self,
        platform: &Self::PlatformId,
        device: &Self::DeviceId,
    ) -> Result<Self::Context, Status>;

    /// Create an in-order command queue.
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::DeviceId,
    ) -> Result<Self::Queue, Status>;

    fn create_program(&self, context: &Self::Context, source: &str) -> Result<Self::Program, Status>;

    fn build_program(
        &self,
        program: &mut Self::Program,
        device: &Self::DeviceId,
        options: &str,
    ) -> Result<(), Status>;

    /// Size in bytes of the build log, including any trailing NUL.
    fn build_log_size(&self, program: &Self::Program, device: &Self::DeviceId) -> Result<usize, Status>;

    /// Copy the build log into `buf`, which holds at least
    /// [`build_log_size`](Self::build_log_size) bytes.
    fn read_build_log(
        &self,
        program: &Self::Program,
        device: &Self::DeviceId,
        buf: &mut [u8],
    ) -> Result<(), Status>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, Status>;

    fn release_program(&self, program: Self::Program) -> Result<(), Status>;
    fn release_kernel(&self, kernel: Self::Kernel) -> Result<(), Status>;
    fn release_queue(&self, queue: Self::Queue) -> Result<(), Status>;
    fn release_context(&self, context: Self::Context) -> Result<(), Status>;
}
