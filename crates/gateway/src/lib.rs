//! The routing engine: dispatcher, consumer/listener loops, supervisor
//! and the HTTP introspection surface.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod input;
pub mod output;
pub mod supervisor;

pub use config::GatewayConfig;
pub use dispatch::{DispatchSummary, Dispatcher};
pub use error::GatewayError;
pub use input::InputWorker;
pub use output::OutputWorker;
pub use supervisor::{RunningGateway, Supervisor};
