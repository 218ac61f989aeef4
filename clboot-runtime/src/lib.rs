//! clboot runtime - device discovery, selection and fail-fast context bootstrap
//!
//! The pipeline is [`DeviceCatalog::enumerate`] → [`DeviceSelector::select_best`]
//! → [`ContextBuilder::build`] → (workload) → [`ComputeContext::release`].
//! Every step returns a [`Result`]; only the caller decides whether a failure
//! ends the process, normally through [`report::terminate`].

pub mod backends;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod report;
pub mod selector;

pub use catalog::{probe, CatalogFor, DeviceCatalog, PlatformEntry};
pub use config::{BootstrapConfig, BuildConfig, ConfigError, DiagnosticsConfig, KernelConfig, SelectionConfig};
pub use context::{fetch_build_log, ComputeContext, ContextBuilder};
pub use error::{BootstrapError, Result};
pub use report::{check, Reported};
pub use selector::{score, DeviceSelector, ScoreResult};
