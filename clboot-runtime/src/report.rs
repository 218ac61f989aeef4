//! Error reporting and the top-level fail-fast policy.
//!
//! Components call [`check`] or [`Reported::reported`] at every fallible
//! driver call. Those only log; whether a failure ends the process is decided
//! once, at the top, through [`terminate`].

use crate::error::BootstrapError;
use clboot_types::Status;
use tracing::error;

/// Exit status used when an error carries no driver status of its own.
pub const EXIT_FAILURE: i32 = 1;


/// No-op on success. Otherwise log `description` with the resolved status
/// text and hand the status back.
pub fn check(description: &str, status: Status) -> Result<(), Status> {
    if status.is_success() {
        return Ok(());
    }
    log_failure(description, status);
    Err(status)
}

/// Logging pass-through for driver results.
pub trait Reported<T> {
    fn reported(self, description: &str) -> Result<T, Status>;
}

impl<T> Reported<T> for Result<T, Status> {
    fn reported(self, description: &str) -> Result<T, Status> {
        self.map_err(|status| {
            log_failure(description, status);
            status
        })
    }
}

fn log_failure(description: &str, status: Status) {
    error!(
        target: "clboot::report",
        code = status.code(),
        "{}: {}",
        description,
        status.text()
    );
}

/// Process exit status for an error.
///
/// Driver failures exit with their status code. Selection, build, kernel and
/// configuration failures use [`EXIT_FAILURE`], as does any status whose low
/// byte is zero, since the OS keeps only that byte.
pub fn exit_code(err: &BootstrapError) -> i32 {
    match err {
        BootstrapError::NoEligibleDevice { .. }
        | BootstrapError::ProgramBuild { .. }
        | BootstrapError::KernelCreation { .. }
        | BootstrapError::Config(_) => EXIT_FAILURE,
        other => match other.status() {
            Some(status) if status.code() & 0xff != 0 => status.code(),
            _ => EXIT_FAILURE,
        },
    }
}

/// Text written to stdout before terminating.
pub fn diagnostic(err: &BootstrapError) -> String {
    let mut text = format!("Error: {err}\n");
    match err {
        BootstrapError::ProgramBuild {
            log_status: Some(log_status),
            ..
        } => {
            text.push_str(&format!("build log unavailable: {log_status}\n"));
        }
        BootstrapError::ProgramBuild { log, .. } => {
            text.push('\n');
            text.push_str(log);
            if !log.ends_with('\n') {
                text.push('\n');
            }
        }
        BootstrapError::NoEligibleDevice { required, .. } => {
            text.push_str(&format!(
                "Try using an OpenCL 1.1 compatible device with {required} support, and check the installed driver.\n"
            ));
        }
        _ => {}
    }
    text
}

/// Print the diagnostic and exit the process.
pub fn terminate(err: BootstrapError) -> ! {
    let code = exit_code(&err);
    error!(target: "clboot::report", exit_code = code, "{}", err);
    print!("{}", diagnostic(&err));
    std::process::exit(code)
}

pub fn unwrap_or_terminate<T>(result: Result<T, BootstrapError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => terminate(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clboot_types::DeviceAttribute;

    #[test]
    fn check_passes_success_through() {
        assert_eq!(check("creating context", Status::SUCCESS), Ok(()));
        assert_eq!(
            check("creating context", Status::INVALID_DEVICE),
            Err(Status::INVALID_DEVICE)
        );
    }

    #[test]
    fn reported_keeps_value_and_status() {
        let ok: Result<u32, Status> = Ok(4);
        assert_eq!(ok.reported("querying cores"), Ok(4));

        let err: Result<u32, Status> = Err(Status::OUT_OF_RESOURCES);
        assert_eq!(err.reported("querying cores"), Err(Status::OUT_OF_RESOURCES));
    }

    #[test]
    fn driver_failures_exit_with_their_code() {
        let err = BootstrapError::CapabilityQuery {
            platform: 0,
            device: 1,
            attribute: DeviceAttribute::Extensions,
            status: Status::INVALID_DEVICE,
        };
        assert_eq!(exit_code(&err), -33);
        assert_eq!(
            exit_code(&BootstrapError::PlatformEnumeration {
                status: Status::PLATFORM_NOT_FOUND_KHR
            }),
            -1001
        );
    }

    #[test]
    fn policy_failures_exit_with_fixed_code() {
        let build = BootstrapError::ProgramBuild {
            status: Status::BUILD_PROGRAM_FAILURE,
            log: String::new(),
            log_status: None,
        };
        let none = BootstrapError::NoEligibleDevice {
            required: "cl_khr_fp64".into(),
            scanned: 0,
        };
        assert_eq!(exit_code(&build), EXIT_FAILURE);
        assert_eq!(exit_code(&none), EXIT_FAILURE);
    }

    #[test]
    fn build_diagnostic_contains_full_log() {
        let log = "x".repeat(10_000) + "\n<source>:2:1: error: expected '}'";
        let err = BootstrapError::ProgramBuild {
            status: Status::BUILD_PROGRAM_FAILURE,
            log: log.clone(),
            log_status: None,
        };
        let text = diagnostic(&err);
        assert!(text.starts_with("Error: Failed to build program executable"));
        assert!(text.contains(&log));
    }

    #[test]
    fn no_device_diagnostic_has_hint() {
        let err = BootstrapError::NoEligibleDevice {
            required: "cl_khr_fp64".into(),
            scanned: 3,
        };
        let text = diagnostic(&err);
        assert!(text.contains("none of 3 device(s) supports cl_khr_fp64"));
        assert!(text.contains("OpenCL 1.1 compatible device"));
    }

    #[test]
    fn missing_build_log_is_called_out() {
        let err = BootstrapError::ProgramBuild {
            status: Status::BUILD_PROGRAM_FAILURE,
            log: String::new(),
            log_status: Some(Status::OUT_OF_HOST_MEMORY),
        };
        let text = diagnostic(&err);
        assert!(text.contains("build log unavailable: CL_OUT_OF_HOST_MEMORY (-6)"));
        assert_eq!(exit_code(&err), EXIT_FAILURE);
    }

    #[test]
    fn status_with_zero_low_byte_still_exits_nonzero() {
        for code in [-256, -512, 256] {
            let err = BootstrapError::ContextCreation { status: Status(code) };
            assert_eq!(exit_code(&err), EXIT_FAILURE, "status {code}");
        }
        let err = BootstrapError::ContextCreation {
            status: Status::SUCCESS,
        };
        assert_eq!(exit_code(&err), EXIT_FAILURE);
    }

    #[test]
    fn no_device_hint_names_required_extension() {
        let err = BootstrapError::NoEligibleDevice {
            required: "cl_khr_fp16".into(),
            scanned: 1,
        };
        let text = diagnostic(&err);
        assert!(text.contains("with cl_khr_fp16 support"));
        assert!(!text.contains("cl_khr_fp64"));
    }
}
