//! In-memory compute driver.
//!
//! Behaves like an OpenCL ICD with a fixed set of platforms and devices.
//! Every handle it hands out is tracked, so callers can check that a
//! bootstrap/teardown cycle leaves nothing live. Any call can be made to fail
//! with a chosen status. The "compiler" accepts any source with balanced
//! braces and exposes every `__kernel void <name>(` it finds.

use clboot_types::{
    CapabilityProfile, ComputeDriver, DeviceAttribute, DeviceKind, InfoValue, PlatformAttribute,
    Status, FP64_EXTENSION,
};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

/// Reference kernel used by tests and the demo: squares each element.
pub const SQUARE_SOURCE: &str = r#"__kernel void square(
    __global float* input,
    __global float* output,
    const unsigned int count)
{
    int i = get_global_id(0);
    if (i < count)
        output[i] = input[i] * input[i];
}
"#;

/// Driver entry points that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverCall {
    PlatformIds,
    PlatformInfo,
    DeviceIds,
    DeviceInfo(DeviceAttribute),
    CreateContext,
    CreateQueue,
    CreateProgram,
    BuildProgram,
    BuildLogSize,
    ReadBuildLog,
    CreateKernel,
    ReleaseProgram,
    ReleaseKernel,
    ReleaseQueue,
    ReleaseContext,
}

/// Description of one simulated device.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    kind: DeviceKind,
    vendor: Option<String>,
    profile: CapabilityProfile,
}

impl DeviceSpec {
    /// A GPU with `cl_khr_icd` only. Max allocation defaults to a quarter of
    /// global memory and local memory to 48 KiB.
    pub fn new(name: &str, compute_units: u32, clock_mhz: u32, global_memory_bytes: u64) -> Self {
        Self {
            kind: DeviceKind::Gpu,
            vendor: None,
            profile: CapabilityProfile {
                name: name.to_string(),
                vendor: String::new(),
                compute_units,
                global_memory_bytes,
                clock_mhz,
                max_alloc_bytes: global_memory_bytes / 4,
                local_memory_bytes: 48 * 1024,
                available: true,
                extensions: CapabilityProfile::parse_extensions("cl_khr_icd"),
            },
        }
    }

    pub fn fp64(self) -> Self {
        self.extensions(FP64_EXTENSION)
    }

    /// Append space-separated extensions.
    pub fn extensions(mut self, raw: &str) -> Self {
        for ext in raw.split_whitespace() {
            self.profile.add_extension(ext);
        }
        self
    }

    pub fn available(mut self, available: bool) -> Self {
        self.profile.available = available;
        self
    }

    pub fn kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn cpu(self) -> Self {
        self.kind(DeviceKind::Cpu)
    }

    pub fn vendor(mut self, vendor: &str) -> Self {
        self.vendor = Some(vendor.to_string());
        self
    }

    pub fn max_alloc(mut self, bytes: u64) -> Self {
        self.profile.max_alloc_bytes = bytes;
        self
    }

    pub fn local_memory(mut self, bytes: u64) -> Self {
        self.profile.local_memory_bytes = bytes;
        self
    }
}

/// Description of one simulated platform.
#[derive(Debug, Clone)]
pub struct PlatformSpec {
    vendor: String,
    name: String,
    version: String,
    devices: Vec<DeviceSpec>,
}

impl PlatformSpec {
    fn new(vendor: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            name: format!("{vendor} OpenCL"),
            version: "OpenCL 1.2 clboot-sim".to_string(),
            devices: Vec::new(),
        }
    }

    pub fn device(mut self, spec: DeviceSpec) -> Self {
        self.devices.push(spec);
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }
}

#[derive(Debug, Default)]
pub struct SimulatedDriverBuilder {
    platforms: Vec<PlatformSpec>,
}

impl SimulatedDriverBuilder {
    pub fn platform(mut self, vendor: &str, devices: impl FnOnce(PlatformSpec) -> PlatformSpec) -> Self {
        self.platforms.push(devices(PlatformSpec::new(vendor)));
        self
    }

    pub fn build(self) -> SimulatedDriver {
        let platforms = self
            .platforms
            .into_iter()
            .map(|mut platform| {
                for device in &mut platform.devices {
                    device.profile.vendor = device
                        .vendor
                        .clone()
                        .unwrap_or_else(|| platform.vendor.clone());
                }
                platform
            })
            .collect();
        SimulatedDriver {
            platforms,
            state: RefCell::new(State::default()),
        }
    }
}

/// Device handle: indices into the platform table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimDeviceId {
    pub platform: usize,
    pub device: usize,
}

#[derive(Debug)]
pub struct SimContext {
    id: u64,
    device: SimDeviceId,
}

#[derive(Debug)]
pub struct SimQueue {
    id: u64,
}

#[derive(Debug)]
pub struct SimProgram {
    id: u64,
    source: String,
    built: bool,
    kernels: Vec<String>,
    log: String,
}

#[derive(Debug)]
pub struct SimKernel {
    id: u64,
    name: String,
}

impl SimKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
struct State {
    failures: HashMap<DriverCall, Status>,
    build_failure: Option<String>,
    next_id: u64,
    live: BTreeSet<u64>,
    acquisitions: Vec<&'static str>,
    releases: Vec<&'static str>,
    kernels_created: usize,
    last_build_options: Option<String>,
    info_overrides: HashMap<(SimDeviceId, DeviceAttribute), InfoValue>,
}

/// The simulated driver. Single-threaded; state lives in a `RefCell`.
#[derive(Debug)]
pub struct SimulatedDriver {
    platforms: Vec<PlatformSpec>,
    state: RefCell<State>,
}

impl SimulatedDriver {
    pub fn builder() -> SimulatedDriverBuilder {
        SimulatedDriverBuilder::default()
    }

    /// A small mixed machine: a CPU runtime and a discrete GPU with fp64,
    /// plus an integrated GPU without it.
    pub fn workstation() -> Self {
        Self::builder()
            .platform("The pocl project", |p| {
                p.device(
                    DeviceSpec::new("cpu-x86-64", 16, 3600, 32 << 30)
                        .cpu()
                        .fp64()
                        .extensions("cl_khr_int64_base_atomics"),
                )
            })
            .platform("Intel(R) Corporation", |p| {
                p.device(DeviceSpec::new("Intel(R) UHD Graphics 770", 32, 1550, 24 << 30).extensions("cl_khr_fp16"))
            })
            .platform("NVIDIA Corporation", |p| {
                p.device(
                    DeviceSpec::new("NVIDIA GeForce RTX 4070", 46, 2475, 12 << 30)
                        .fp64()
                        .extensions("cl_khr_fp16 cl_nv_device_attribute_query"),
                )
                .version("OpenCL 3.0 CUDA 12.4.131")
            })
            .build()
    }

    /// Make every later `call` fail with `status`.
    pub fn fail(&self, call: DriverCall, status: Status) {
        self.state.borrow_mut().failures.insert(call, status);
    }

    /// Answer later `attribute` queries on `device` with `value`, whatever
    /// its shape.
    pub fn set_info(&self, device: SimDeviceId, attribute: DeviceAttribute, value: InfoValue) {
        self.state
            .borrow_mut()
            .info_overrides
            .insert((device, attribute), value);
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Force every later build to fail with this log, or restore the normal
    /// compiler with `None`.
    pub fn set_build_failure(&self, log: Option<String>) {
        self.state.borrow_mut().build_failure = log;
    }

    /// Number of contexts, queues, programs and kernels not yet released.
    pub fn live_handles(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn kernels_created(&self) -> usize {
        self.state.borrow().kernels_created
    }

    /// Successful and attempted acquisitions, in call order.
    pub fn acquisition_log(&self) -> Vec<&'static str> {
        self.state.borrow().acquisitions.clone()
    }

    /// Successful releases, in call order.
    pub fn release_log(&self) -> Vec<&'static str> {
        self.state.borrow().releases.clone()
    }

    pub fn last_build_options(&self) -> Option<String> {
        self.state.borrow().last_build_options.clone()
    }

    /// The log the compiler produces for `source`, empty if it compiles.
    pub fn unbalanced_log(source: &str) -> String {
        compile_errors(source).unwrap_or_default()
    }

    fn injected(&self, call: DriverCall) -> Result<(), Status> {
        match self.state.borrow().failures.get(&call) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn acquire(&self, what: &'static str) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id);
        state.acquisitions.push(what);
        id
    }

    fn release(&self, call: DriverCall, what: &'static str, id: u64, invalid: Status) -> Result<(), Status> {
        self.injected(call)?;
        let mut state = self.state.borrow_mut();
        if !state.live.remove(&id) {
            return Err(invalid);
        }
        state.releases.push(what);
        Ok(())
    }

    fn platform_spec(&self, platform: usize) -> Result<&PlatformSpec, Status> {
        self.platforms.get(platform).ok_or(Status::INVALID_PLATFORM)
    }

    fn device_spec(&self, id: &SimDeviceId) -> Result<&DeviceSpec, Status> {
        self.platform_spec(id.platform)?
            .devices
            .get(id.device)
            .ok_or(Status::INVALID_DEVICE)
    }
}

impl ComputeDriver for SimulatedDriver {
    type PlatformId = usize;
    type DeviceId = SimDeviceId;
    type Context = SimContext;
    type Queue = SimQueue;
    type Program = SimProgram;
    type Kernel = SimKernel;

    fn backend_name(&self) -> &'static str {
        "simulated"
    }

    fn platform_ids(&self) -> Result<Vec<usize>, Status> {
        self.injected(DriverCall::PlatformIds)?;
        if self.platforms.is_empty() {
            return Err(Status::PLATFORM_NOT_FOUND_KHR);
        }
        Ok((0..self.platforms.len()).collect())
    }

    fn platform_info(&self, platform: &usize, attribute: PlatformAttribute) -> Result<String, Status> {
        self.injected(DriverCall::PlatformInfo)?;
        let spec = self.platform_spec(*platform)?;
        Ok(match attribute {
            PlatformAttribute::Vendor => spec.vendor.clone(),
            PlatformAttribute::Name => spec.name.clone(),
            PlatformAttribute::Version => spec.version.clone(),
        })
    }

    fn device_ids(&self, platform: &usize, kind: DeviceKind) -> Result<Vec<SimDeviceId>, Status> {
        self.injected(DriverCall::DeviceIds)?;
        let spec = self.platform_spec(*platform)?;
        let ids: Vec<_> = spec
            .devices
            .iter()
            .enumerate()
            .filter(|(index, device)| match kind {
                DeviceKind::All => true,
                DeviceKind::Default => *index == 0,
                other => device.kind == other,
            })
            .map(|(device, _)| SimDeviceId {
                platform: *platform,
                device,
            })
            .collect();
        if ids.is_empty() {
            return Err(Status::DEVICE_NOT_FOUND);
        }
        Ok(ids)
    }

    fn device_info(&self, device: &SimDeviceId, attribute: DeviceAttribute) -> Result<InfoValue, Status> {
        self.injected(DriverCall::DeviceInfo(attribute))?;
        let p = &self.device_spec(device)?.profile;
        if let Some(value) = self.state.borrow().info_overrides.get(&(*device, attribute)) {
            return Ok(value.clone());
        }
        Ok(match attribute {
            DeviceAttribute::Name => InfoValue::Text(p.name.clone()),
            DeviceAttribute::Vendor => InfoValue::Text(p.vendor.clone()),
            DeviceAttribute::ComputeUnits => InfoValue::Uint(p.compute_units),
            DeviceAttribute::GlobalMemSize => InfoValue::Ulong(p.global_memory_bytes),
            DeviceAttribute::MaxClockFrequency => InfoValue::Uint(p.clock_mhz),
            DeviceAttribute::MaxMemAllocSize => InfoValue::Ulong(p.max_alloc_bytes),
            DeviceAttribute::LocalMemSize => InfoValue::Ulong(p.local_memory_bytes),
            DeviceAttribute::Available => InfoValue::Bool(p.available),
            DeviceAttribute::Extensions => InfoValue::Text(
                p.extensions.join(" "),
            ),
        })
    }

    fn create_context(&self, platform: &usize, device: &SimDeviceId) -> Result<SimContext, Status> {
        self.injected(DriverCall::CreateContext)?;
        self.device_spec(device)?;
        if device.platform != *platform {
            return Err(Status::INVALID_DEVICE);
        }
        Ok(SimContext {
            id: self.acquire("context"),
            device: *device,
        })
    }

    fn create_queue(&self, context: &SimContext, device: &SimDeviceId) -> Result<SimQueue, Status> {
        self.injected(DriverCall::CreateQueue)?;
        if context.device != *device {
            return Err(Status::INVALID_DEVICE);
        }
        if !self.state.borrow().live.contains(&context.id) {
            return Err(Status::INVALID_CONTEXT);
        }
        Ok(SimQueue {
            id: self.acquire("queue"),
        })
    }

    fn create_program(&self, context: &SimContext, source: &str) -> Result<SimProgram, Status> {
        self.injected(DriverCall::CreateProgram)?;
        if !self.state.borrow().live.contains(&context.id) {
            return Err(Status::INVALID_CONTEXT);
        }
        if source.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        Ok(SimProgram {
            id: self.acquire("program"),
            source: source.to_string(),
            built: false,
            kernels: Vec::new(),
            log: String::new(),
        })
    }

    fn build_program(&self, program: &mut SimProgram, device: &SimDeviceId, options: &str) -> Result<(), Status> {
        {
            let mut state = self.state.borrow_mut();
            state.acquisitions.push("build");
            state.last_build_options = Some(options.to_string());
        }
        self.injected(DriverCall::BuildProgram)?;
        self.device_spec(device)?;

        let forced = self.state.borrow().build_failure.clone();
        if let Some(log) = forced.or_else(|| compile_errors(&program.source)) {
            program.built = false;
            program.log = log;
            return Err(Status::BUILD_PROGRAM_FAILURE);
        }
        program.built = true;
        program.kernels = kernel_names(&program.source);
        program.log.clear();
        Ok(())
    }

    fn build_log_size(&self, program: &SimProgram, _device: &SimDeviceId) -> Result<usize, Status> {
        self.injected(DriverCall::BuildLogSize)?;
        if program.log.is_empty() {
            Ok(0)
        } else {
            Ok(program.log.len() + 1)
        }
    }

    fn read_build_log(&self, program: &SimProgram, _device: &SimDeviceId, buf: &mut [u8]) -> Result<(), Status> {
        self.injected(DriverCall::ReadBuildLog)?;
        let bytes = program.log.as_bytes();
        if buf.len() < bytes.len() + 1 {
            return Err(Status::INVALID_VALUE);
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = 0;
        Ok(())
    }

    fn create_kernel(&self, program: &SimProgram, name: &str) -> Result<SimKernel, Status> {
        self.state.borrow_mut().acquisitions.push("kernel");
        self.injected(DriverCall::CreateKernel)?;
        if !program.built {
            return Err(Status::INVALID_PROGRAM_EXECUTABLE);
        }
        if !program.kernels.iter().any(|k| k == name) {
            return Err(Status::INVALID_KERNEL_NAME);
        }
        let id = {
            let mut state = self.state.borrow_mut();
            state.next_id += 1;
            let id = state.next_id;
            state.live.insert(id);
            state.kernels_created += 1;
            id
        };
        Ok(SimKernel {
            id,
            name: name.to_string(),
        })
    }

    fn release_program(&self, program: SimProgram) -> Result<(), Status> {
        self.release(DriverCall::ReleaseProgram, "program", program.id, Status::INVALID_PROGRAM)
    }

    fn release_kernel(&self, kernel: SimKernel) -> Result<(), Status> {
        self.release(DriverCall::ReleaseKernel, "kernel", kernel.id, Status::INVALID_KERNEL)
    }

    fn release_queue(&self, queue: SimQueue) -> Result<(), Status> {
        self.release(DriverCall::ReleaseQueue, "queue", queue.id, Status::INVALID_COMMAND_QUEUE)
    }

    fn release_context(&self, context: SimContext) -> Result<(), Status> {
        self.release(DriverCall::ReleaseContext, "context", context.id, Status::INVALID_CONTEXT)
    }
}

/// Brace check standing in for a real compiler. Returns the diagnostic log
/// on failure.
fn compile_errors(source: &str) -> Option<String> {
    let mut depth: i64 = 0;
    let mut last_line = 1;
    for (n, line) in source.lines().enumerate() {
        last_line = n + 1;
        for (col, ch) in line.chars().enumerate() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Some(format!(
                            "<source>:{}:{}: error: extraneous closing brace ('}}')\n1 error generated.\n",
                            n + 1,
                            col + 1
                        ));
                    }
                }
                _ => {}
            }
        }
    }
    if depth > 0 {
        return Some(format!(
            "<source>:{last_line}:1: error: expected '}}'\n1 error generated.\n"
        ));
    }
    None
}

fn kernel_names(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find("kernel") {
        let after = &rest[pos + "kernel".len()..];
        let tail = after.trim_start();
        if let Some(sig) = tail.strip_prefix("void") {
            let sig = sig.trim_start();
            let name: String = sig
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() && sig[name.len()..].trim_start().starts_with('(') {
                names.push(name);
            }
        }
        rest = after;
    }
    names
}
