//! clboot types - data model shared by the device catalog and the bootstrap runtime

pub mod device;
pub mod driver;
pub mod platform;
pub mod status;

pub use device::*;
pub use driver::ComputeDriver;
pub use platform::*;
pub use status::{status_text, Status};
