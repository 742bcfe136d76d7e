mod link;
mod settings;

pub use link::LinkConfig;
pub use settings::{Device, Link, Logger, Settings, Telemetry};
