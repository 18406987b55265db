//! Systemd code

mod bus;
mod error;
mod service;
mod unit;

pub use bus::{Connect, JobOutcome, ServiceManager, SystemBus, SystemManager, UnitStatus};
pub use error::{Error, UnitErrors};
pub use service::Service;
pub use unit::{DEFAULT_TAG, RenderError, ServiceDescriptor, UnitPaths, render};
