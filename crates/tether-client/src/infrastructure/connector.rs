//! Real WebSocket dialer built on `tokio-tungstenite`.
//!
//! `ws://` endpoints are plain TCP.  `wss://` endpoints are wrapped in TLS by
//! rustls, verified against the bundled webpki root certificates.

use std::sync::Once;

use async_trait::async_trait;
use tether_core::{websocket_config, ConnectionHandle};
use tokio::time::timeout;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::debug;

use crate::application::Connector;
use crate::domain::EndpointConfig;
use crate::error::DialError;

/// Dials `{scheme}://{host}:{port}{path}` with the configured headers,
/// message size limit and handshake timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Makes `ring` the process-wide rustls provider unless one is already set.
fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err only means the application installed its own provider first.
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// Builds the upgrade request for `config`, including every header.
pub fn build_request(config: &EndpointConfig) -> Result<Request, DialError> {
    let url = config.url();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|source| DialError::InvalidRequest {
            url: url.clone(),
            source,
        })?;

    for (name, value) in &config.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| DialError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| DialError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        request.headers_mut().insert(header_name, header_value);
    }
    Ok(request)
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, config: &EndpointConfig) -> Result<ConnectionHandle, DialError> {
        let url = config.url();
        let request = build_request(config)?;
        ensure_crypto_provider();
        let ws_config = websocket_config(config.max_read_message_size);

        let dial = connect_async_with_config(request, Some(ws_config), false);
        let (stream, response) = match timeout(config.handshake_timeout, dial).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(source)) => return Err(DialError::Handshake { url, source }),
            Err(_) => {
                return Err(DialError::Timeout {
                    url,
                    timeout: config.handshake_timeout,
                })
            }
        };

        debug!(url = %url, status = %response.status(), "websocket handshake complete");
        Ok(ConnectionHandle::from_websocket(stream, url, config.timeouts()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
