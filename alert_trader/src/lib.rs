pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod live;
pub mod models;
pub mod server;
pub mod signal;
pub mod sizing;
pub mod time_sync;

pub use coordinator::{Coordinator, CoordinatorSettings, FlipPolicy, Outcome};
pub use error::{CoordinatorError, GatewayError, NotReadyReason, ParseError};
pub use gateway::Gateway;
pub use models::*;
