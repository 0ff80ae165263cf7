//! Routing configuration: the typed route table and its JSON loader.

pub mod error;
pub mod loader;
pub mod model;
pub mod table;

pub use error::RoutingError;
pub use loader::{load, resolve_source, ConfigSource, ROUTING_CONFIG_ENV};
pub use model::{
    DestinationConfig, Direction, ErrorHandlingConfig, PartitionStrategy, Route, RoutingConfig,
};
pub use table::RouteTable;
