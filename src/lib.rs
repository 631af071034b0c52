pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod events;
pub mod http;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod renderer;
pub mod scanner;
pub mod telemetry;
pub mod worker;

pub use error::FarmError;
