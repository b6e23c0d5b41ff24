//! Infrastructure layer for the client.
//!
//! - [`connector`] – [`TungsteniteConnector`]: dials real WebSocket servers.
//! - [`config_file`] – loads an [`EndpointConfig`](crate::EndpointConfig)
//!   from a TOML file.

pub mod config_file;
pub mod connector;

pub use config_file::{load_config, ClientFileConfig, ConfigFileError};
pub use connector::TungsteniteConnector;
