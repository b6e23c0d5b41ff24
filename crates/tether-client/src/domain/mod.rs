//! Domain layer for the client.
//!
//! - [`config`] – [`EndpointConfig`] and [`RetryPolicy`]: where to dial and
//!   how hard to try.
//! - [`state`] – [`SessionState`] and its legal transitions.

pub mod config;
pub mod state;

pub use config::{EndpointConfig, RetryPolicy, CLIENT_ID_HEADER};
pub use state::SessionState;
