//! `square` demonstration: bootstrap on the best device, square 1024 random
//! floats, and count how many results come back exact.
//!
//! Without the `opencl` feature the simulated driver stands in and the
//! dispatch step is skipped.
//!
//! Set `CLBOOT_CONFIG` to a TOML file to override the defaults.

use anyhow::{Context as _, Result};
use clboot::report;
use clboot::{BootstrapConfig, BootstrapError, Session};
use rand::Rng;

const DATA_SIZE: usize = 1024;

fn load_config() -> BootstrapConfig {
    match std::env::var_os("CLBOOT_CONFIG") {
        Some(path) => report::unwrap_or_terminate(
            BootstrapConfig::from_file(&path).map_err(BootstrapError::from),
        ),
        None => BootstrapConfig::default(),
    }
}

fn main() -> Result<()> {
    clboot::logging::init(0);

    let config = load_config();
    let source = std::fs::read_to_string(&config.kernel.source)
        .with_context(|| format!("reading kernel source {}", config.kernel.source.display()))?;

    let mut rng = rand::thread_rng();
    let data: Vec<f32> = (0..DATA_SIZE).map(|_| rng.gen::<f32>()).collect();

    run(&config, &source, &data)
}

#[cfg(feature = "opencl")]
fn run(config: &BootstrapConfig, source: &str, data: &[f32]) -> Result<()> {
    let driver = clboot::OpenClDriver::new();
    let session = Session::start_or_exit(&driver, config, source);

    let results = square::dispatch(session.context(), data)?;

    let mut correct = 0;
    for (i, (x, y)) in data.iter().zip(&results).enumerate() {
        if *y == x * x {
            correct += 1;
        } else {
            println!("[{i}]: {x}^2 == {}, != {y}", x * x);
        }
    }
    println!("Computed '{correct}/{}' correct values!", data.len());

    report::unwrap_or_terminate(session.finish());
    Ok(())
}

#[cfg(not(feature = "opencl"))]
fn run(config: &BootstrapConfig, source: &str, data: &[f32]) -> Result<()> {
    let driver = clboot::SimulatedDriver::workstation();
    let session = Session::start_or_exit(&driver, config, source);

    println!(
        "Kernel '{}' ready on {} (simulated backend, {} values not dispatched).",
        config.kernel.entry_point,
        session.device().name(),
        data.len()
    );

    report::unwrap_or_terminate(session.finish());
    Ok(())
}

#[cfg(feature = "opencl")]
mod square {
    //! Buffer setup, launch and read-back. Buffers are owned here and freed
    //! before the session releases the context.

    use anyhow::Result;
    use clboot::{ComputeContext, OpenClDriver};
    use opencl3::kernel::ExecuteKernel;
    use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY};
    use opencl3::types::{cl_float, cl_uint, CL_BLOCKING};
    use std::ptr;

    pub fn dispatch(ctx: &ComputeContext<'_, OpenClDriver>, data: &[f32]) -> Result<Vec<f32>> {
        let count = data.len();
        let queue = ctx.queue();

        // SAFETY: no host pointer is passed, the driver allocates both buffers.
        let mut input = unsafe {
            Buffer::<cl_float>::create(ctx.context(), CL_MEM_READ_ONLY, count, ptr::null_mut())?
        };
        let output = unsafe {
            Buffer::<cl_float>::create(ctx.context(), CL_MEM_WRITE_ONLY, count, ptr::null_mut())?
        };

        // SAFETY: blocking write from a live slice of exactly `count` elements.
        let _write = unsafe { queue.enqueue_write_buffer(&mut input, CL_BLOCKING, 0, data, &[])? };

        let n = count as cl_uint;
        // SAFETY: argument types match the `square` signature.
        let event = unsafe {
            ExecuteKernel::new(ctx.kernel())
                .set_arg(&input)
                .set_arg(&output)
                .set_arg(&n)
                .set_global_work_size(count)
                .enqueue_nd_range(queue)?
        };
        event.wait()?;

        let mut results = vec![0.0f32; count];
        // SAFETY: blocking read into a slice of exactly `count` elements.
        let _read = unsafe { queue.enqueue_read_buffer(&output, CL_BLOCKING, 0, &mut results, &[])? };
        Ok(results)
    }
}
