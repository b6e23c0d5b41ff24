//! The dialing port used by [`ClientSession`](super::ClientSession).

use async_trait::async_trait;
use tether_core::ConnectionHandle;

use crate::domain::EndpointConfig;
use crate::error::DialError;

/// Opens one WebSocket connection to the configured endpoint.
///
/// The production implementation is
/// [`TungsteniteConnector`](crate::TungsteniteConnector); tests plug in
/// scripted connectors that fail, succeed or hang on demand.
///
/// Implementations must bound their own work by
/// [`EndpointConfig::handshake_timeout`]; the session cancels a pending dial
/// only when it is stopped.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &EndpointConfig) -> Result<ConnectionHandle, DialError>;
}
