//! OpenCL driver backed by the `opencl3` crate.
//!
//! Handles are the `opencl3` RAII wrappers, so releasing one means dropping
//! it.
//!
//! `Program::get_build_log` does the size query and the read in one call, so
//! `build_log_size` fetches the log once and caches it; `read_build_log`
//! copies from that cache and only goes back to the driver on a miss.

use clboot_types::{
    ComputeDriver, DeviceAttribute, DeviceKind, InfoValue, PlatformAttribute, Status,
};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, cl_device_type, cl_platform_id, cl_program};
use std::cell::RefCell;

fn status(err: ClError) -> Status {
    Status(err.0)
}

fn device_type(kind: DeviceKind) -> cl_device_type {
    match kind {
        DeviceKind::All => CL_DEVICE_TYPE_ALL,
        DeviceKind::Default => CL_DEVICE_TYPE_DEFAULT,
        DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceKind::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
    }
}

/// Driver over the system's OpenCL ICD loader.
#[derive(Debug, Default)]
pub struct OpenClDriver {
    build_log: RefCell<Option<CachedLog>>,
}

#[derive(Debug)]
struct CachedLog {
    program: cl_program,
    device: cl_device_id,
    text: String,
}

impl OpenClDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached_log(&self, program: &Program, device: cl_device_id) -> Option<String> {
        self.build_log
            .borrow()
            .as_ref()
            .filter(|log| log.program == program.get() && log.device == device)
            .map(|log| log.text.clone())
    }
}

impl ComputeDriver for OpenClDriver {
    type PlatformId = cl_platform_id;
    type DeviceId = cl_device_id;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;

    fn backend_name(&self) -> &'static str {
        "opencl"
    }

    fn platform_ids(&self) -> Result<Vec<cl_platform_id>, Status> {
        let platforms = get_platforms().map_err(status)?;
        Ok(platforms.iter().map(Platform::id).collect())
    }

    fn platform_info(&self, platform: &cl_platform_id, attribute: PlatformAttribute) -> Result<String, Status> {
        let platform = Platform::new(*platform);
        match attribute {
            PlatformAttribute::Vendor => platform.vendor(),
            PlatformAttribute::Name => platform.name(),
            PlatformAttribute::Version => platform.version(),
        }
        .map_err(status)
    }

    fn device_ids(&self, platform: &cl_platform_id, kind: DeviceKind) -> Result<Vec<cl_device_id>, Status> {
        Platform::new(*platform)
            .get_devices(device_type(kind))
            .map_err(status)
    }

    fn device_info(&self, device: &cl_device_id, attribute: DeviceAttribute) -> Result<InfoValue, Status> {
        let device = Device::new(*device);
        let value = match attribute {
            DeviceAttribute::Name => InfoValue::Text(device.name().map_err(status)?),
            DeviceAttribute::Vendor => InfoValue::Text(device.vendor().map_err(status)?),
            DeviceAttribute::ComputeUnits => InfoValue::Uint(device.max_compute_units().map_err(status)?),
            DeviceAttribute::GlobalMemSize => InfoValue::Ulong(device.global_mem_size().map_err(status)?),
            DeviceAttribute::MaxClockFrequency => {
                InfoValue::Uint(device.max_clock_frequency().map_err(status)?)
            }
            DeviceAttribute::MaxMemAllocSize => {
                InfoValue::Ulong(device.max_mem_alloc_size().map_err(status)?)
            }
            DeviceAttribute::LocalMemSize => InfoValue::Ulong(device.local_mem_size().map_err(status)?),
            DeviceAttribute::Available => InfoValue::Bool(device.available().map_err(status)?),
            DeviceAttribute::Extensions => InfoValue::Text(device.extensions().map_err(status)?),
        };
        Ok(value)
    }

    fn create_context(&self, _platform: &cl_platform_id, device: &cl_device_id) -> Result<Context, Status> {
        Context::from_device(&Device::new(*device)).map_err(status)
    }

    fn create_queue(&self, context: &Context, _device: &cl_device_id) -> Result<CommandQueue, Status> {
        // Properties 0: in-order, no profiling. The context holds exactly one device.
        CommandQueue::create_default(context, 0).map_err(status)
    }

    fn create_program(&self, context: &Context, source: &str) -> Result<Program, Status> {
        Program::create_from_source(context, source).map_err(status)
    }

    fn build_program(&self, program: &mut Program, device: &cl_device_id, options: &str) -> Result<(), Status> {
        program.build(&[*device], options).map_err(status)
    }

    fn build_log_size(&self, program: &Program, device: &cl_device_id) -> Result<usize, Status> {
        let text = program.get_build_log(*device).map_err(status)?;
        let size = if text.is_empty() { 0 } else { text.len() + 1 };
        *self.build_log.borrow_mut() = Some(CachedLog {
            program: program.get(),
            device: *device,
            text,
        });
        Ok(size)
    }

    fn read_build_log(&self, program: &Program, device: &cl_device_id, buf: &mut [u8]) -> Result<(), Status> {
        let log = match self.cached_log(program, *device) {
            Some(text) => text,
            None => program.get_build_log(*device).map_err(status)?,
        };
        let bytes = log.as_bytes();
        if buf.len() < bytes.len() + 1 {
            return Err(Status::INVALID_VALUE);
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = 0;
        Ok(())
    }

    fn create_kernel(&self, program: &Program, name: &str) -> Result<Kernel, Status> {
        Kernel::create(program, name).map_err(status)
    }

    fn release_program(&self, program: Program) -> Result<(), Status> {
        self.build_log.borrow_mut().take();
        drop(program);
        Ok(())
    }

    fn release_kernel(&self, kernel: Kernel) -> Result<(), Status> {
        drop(kernel);
        Ok(())
    }

    fn release_queue(&self, queue: CommandQueue) -> Result<(), Status> {
        drop(queue);
        Ok(())
    }

    fn release_context(&self, context: Context) -> Result<(), Status> {
        drop(context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs an ICD with at least one device; passes vacuously without one.
    #[test]
    fn log_read_uses_the_size_query_fetch() {
        let driver = OpenClDriver::new();
        let Some(platform) = driver.platform_ids().ok().and_then(|p| p.into_iter().next()) else {
            return;
        };
        let Some(device) = driver
            .device_ids(&platform, DeviceKind::All)
            .ok()
            .and_then(|d| d.into_iter().next())
        else {
            return;
        };

        let context = driver.create_context(&platform, &device).unwrap();
        let mut program = driver
            .create_program(&context, "__kernel void broken(__global float* a) {\n")
            .unwrap();
        assert!(driver.build_program(&mut program, &device, "").is_err());

        let size = driver.build_log_size(&program, &device).unwrap();
        assert!(driver.cached_log(&program, device).is_some());
        let mut buf = vec![0u8; size.max(1)];
        driver.read_build_log(&program, &device, &mut buf).unwrap();

        driver.release_program(program).unwrap();
        assert!(driver.build_log.borrow().is_none());
        driver.release_context(context).unwrap();
    }
}
