//! Bootstrap error taxonomy.

use crate::config::ConfigError;
use clboot_types::{DeviceAttribute, Status};

/// Every way the bootstrap sequence can fail.
///
/// Variants that come from a driver call carry the raw [`Status`].
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Error getting platform ids: {status}")]
    PlatformEnumeration { status: Status },

    #[error("Error getting device ids for platform-{platform}: {status}")]
    DeviceEnumeration { platform: usize, status: Status },

    #[error("Error querying {attribute} of platform-{platform} device-{device}: {status}")]
    CapabilityQuery {
        platform: usize,
        device: usize,
        attribute: DeviceAttribute,
        status: Status,
    },

    #[error("No suitable device was found: none of {scanned} device(s) supports {required}")]
    NoEligibleDevice { required: String, scanned: usize },

    #[error("Error creating context: {status}")]
    ContextCreation { status: Status },

    #[error("Error creating command queue: {status}")]
    QueueCreation { status: Status },

    #[error("Failed to create compute program: {status}")]
    ProgramCompile { status: Status },

    /// `log_status` is set when the log itself could not be fetched; `log`
    /// is then empty.
    #[error("Failed to build program executable: {status}")]
    ProgramBuild {
        status: Status,
        log: String,
        log_status: Option<Status>,
    },

    #[error("Failed to create compute kernel '{entry_point}': {status}")]
    KernelCreation { entry_point: String, status: Status },

    #[error("Error releasing {resource}: {status}")]
    Release { resource: &'static str, status: Status },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BootstrapError {
    /// Driver status behind this error, if it came from a driver call.
    pub fn status(&self) -> Option<Status> {
        match self {
            BootstrapError::PlatformEnumeration { status }
            | BootstrapError::DeviceEnumeration { status, .. }
            | BootstrapError::CapabilityQuery { status, .. }
            | BootstrapError::ContextCreation { status }
            | BootstrapError::QueueCreation { status }
            | BootstrapError::ProgramCompile { status }
            | BootstrapError::ProgramBuild { status, .. }
            | BootstrapError::KernelCreation { status, .. }
            | BootstrapError::Release { status, .. } => Some(*status),
            BootstrapError::NoEligibleDevice { .. } | BootstrapError::Config(_) => None,
        }
    }

    /// Compiler output attached to a failed program build. `None` when the
    /// log could not be fetched.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            BootstrapError::ProgramBuild {
                log,
                log_status: None,
                ..
            } => Some(log),
            _ => None,
        }
    }

    /// Why the build log of a failed program build is missing.
    pub fn build_log_status(&self) -> Option<Status> {
        match self {
            BootstrapError::ProgramBuild { log_status, .. } => *log_status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_step() {
        let err = BootstrapError::ContextCreation {
            status: Status::OUT_OF_HOST_MEMORY,
        };
        assert_eq!(
            err.to_string(),
            "Error creating context: CL_OUT_OF_HOST_MEMORY (-6)"
        );
    }

    #[test]
    fn status_and_log_accessors() {
        let err = BootstrapError::ProgramBuild {
            status: Status::BUILD_PROGRAM_FAILURE,
            log: "line 3: error".into(),
            log_status: None,
        };
        assert_eq!(err.status(), Some(Status(-11)));
        assert_eq!(err.build_log(), Some("line 3: error"));
        assert_eq!(err.build_log_status(), None);

        let err = BootstrapError::ProgramBuild {
            status: Status::BUILD_PROGRAM_FAILURE,
            log: String::new(),
            log_status: Some(Status::OUT_OF_RESOURCES),
        };
        assert_eq!(err.build_log(), None);
        assert_eq!(err.build_log_status(), Some(Status::OUT_OF_RESOURCES));

        let err = BootstrapError::NoEligibleDevice {
            required: "cl_khr_fp64".into(),
            scanned: 2,
        };
        assert_eq!(err.status(), None);
        assert_eq!(err.build_log(), None);
    }
}
