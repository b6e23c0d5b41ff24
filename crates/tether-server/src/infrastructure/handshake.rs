//! Upgrade validation for inbound connections.
//!
//! Before a connection is upgraded, [`admit`] checks the request against the
//! server configuration and the registry:
//!
//! | Check                                   | Failure status |
//! |-----------------------------------------|----------------|
//! | path equals `config.path`               | 404            |
//! | `Origin` allowed (absent is allowed)    | 403            |
//! | client id valid (or generated)          | 400            |
//! | client id not already registered        | 409            |
//!
//! A rejected request receives a plain HTTP error response and never
//! becomes a WebSocket.

use tether_core::websocket_config;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

use crate::application::ConnectionRegistry;
use crate::domain::{resolve_client_id, ServerConfig};
use crate::error::HandshakeError;

/// Why [`admit`] refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub reason: String,
}

impl Rejection {
    fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.reason));
        *response.status_mut() = self.status;
        response
    }
}

/// Decides whether `request` may upgrade and, if so, under which client id.
pub fn admit(
    request: &Request,
    config: &ServerConfig,
    registry: &ConnectionRegistry,
) -> Result<String, Rejection> {
    if request.uri().path() != config.path {
        return Err(Rejection::new(
            StatusCode::NOT_FOUND,
            format!("no websocket endpoint at {}", request.uri().path()),
        ));
    }

    // A non-text Origin cannot match any allow-list entry except "*".
    let origin = request
        .headers()
        .get(ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if !config.allows_origin(origin) {
        return Err(Rejection::new(StatusCode::FORBIDDEN, "origin not allowed"));
    }

    let header = request
        .headers()
        .get(config.client_id_header.as_str())
        .map(|value| value.to_str().map_err(|_| ()));
    let client_id = resolve_client_id(header, config.assign_missing_ids)
        .map_err(|e| Rejection::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    if registry.contains(&client_id) {
        return Err(Rejection::new(
            StatusCode::CONFLICT,
            format!("client id already connected: {client_id}"),
        ));
    }
    Ok(client_id)
}

/// Performs the server side of the upgrade on `stream`.
///
/// Returns the WebSocket and the admitted client id.
///
/// # Errors
///
/// - [`HandshakeError::Rejected`] when [`admit`] refused the request.
/// - [`HandshakeError::Timeout`] after `config.handshake_timeout`.
/// - [`HandshakeError::Protocol`] for malformed upgrade requests.
pub async fn accept<S>(
    stream: S,
    config: &ServerConfig,
    registry: &ConnectionRegistry,
) -> Result<(WebSocketStream<S>, String), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut verdict: Option<Result<String, Rejection>> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let decision = admit(request, config, registry);
        let reply = match &decision {
            Ok(_) => Ok(response),
            Err(rejection) => Err(rejection.clone().into_response()),
        };
        verdict = Some(decision);
        reply
    };

    let ws_config = websocket_config(config.max_read_message_size);
    let upgrade = accept_hdr_async_with_config(stream, callback, Some(ws_config));
    let outcome = timeout(config.handshake_timeout, upgrade).await;

    match outcome {
        Err(_) => Err(HandshakeError::Timeout(config.handshake_timeout)),
        Ok(Ok(ws)) => match verdict {
            Some(Ok(client_id)) => Ok((ws, client_id)),
            _ => Err(HandshakeError::Rejected {
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                reason: "upgrade completed without a client id".to_string(),
            }),
        },
        Ok(Err(e)) => match verdict {
            Some(Err(rejection)) => Err(HandshakeError::Rejected {
                status: rejection.status.as_u16(),
                reason: rejection.reason,
            }),
            _ => Err(HandshakeError::Protocol(e)),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
