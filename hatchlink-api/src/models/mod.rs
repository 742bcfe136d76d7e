mod event;
mod link;
mod settings;
mod telemetry;

pub use event::*;
pub use link::*;
pub use settings::*;
pub use telemetry::*;
