//! ConnectionRegistry: client id → live connection.
//!
//! # Concurrency (for beginners)
//!
//! The registry is touched from many tasks at once: the accept path inserts,
//! every read loop removes its own entry when its connection dies, and any
//! caller may `send` or `broadcast` at any time.  A [`DashMap`] shards the map
//! internally, so none of these callers takes a lock of its own.
//!
//! The one rule: **never hold a map guard across an `.await`**.  Every
//! method that writes to a connection first clones the `Arc<ConnectionHandle>`
//! out of the map, lets the guard drop, and only then awaits the write.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tether_core::ConnectionHandle;
use tracing::debug;

use crate::error::RegistryError;

/// Outcome of one [`ConnectionRegistry::broadcast`].
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Clients the frame was written to.
    pub delivered: usize,
    /// One entry per client whose write failed.
    pub failures: Vec<RegistryError>,
}

/// Concurrent map from client id to that client's connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `client_id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateClient`] if the id is taken; the existing
    /// connection is left untouched.
    pub fn insert(
        &self,
        client_id: &str,
        handle: Arc<ConnectionHandle>,
    ) -> Result<(), RegistryError> {
        match self.connections.entry(client_id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateClient(client_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                debug!(client_id, "registered");
                Ok(())
            }
        }
    }

    /// Removes `client_id` only if it still maps to `handle`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_if_current(&self, client_id: &str, handle: &Arc<ConnectionHandle>) -> bool {
        let removed = self
            .connections
            .remove_if(client_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some();
        if removed {
            debug!(client_id, "deregistered");
        }
        removed
    }

    /// The connection registered under `client_id`.
    pub fn get(&self, client_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .get(client_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.connections.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Every registered id, sorted.
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// A point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<(String, Arc<ConnectionHandle>)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Sends `payload` as JSON to one client.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownClient`] if nobody is registered as `client_id`.
    /// - [`RegistryError::Encode`] if `payload` cannot be serialised.
    /// - [`RegistryError::Delivery`] carrying the connection's own error.
    pub async fn send<T>(&self, client_id: &str, payload: &T) -> Result<(), RegistryError>
    where
        T: Serialize + ?Sized,
    {
        let handle = self
            .get(client_id)
            .ok_or_else(|| RegistryError::UnknownClient(client_id.to_string()))?;
        let text = serde_json::to_string(payload)?;
        handle
            .send_text(text)
            .await
            .map_err(|source| RegistryError::Delivery {
                client_id: client_id.to_string(),
                source,
            })
    }

    /// Sends `payload` to every client registered at the time of the call.
    ///
    /// The payload is encoded once and written to all connections
    /// concurrently.  A failed client does not stop delivery to the others.
    ///
    /// # Errors
    ///
    /// Only [`RegistryError::Encode`]; per-client failures are collected in
    /// the returned [`BroadcastReport`].
    pub async fn broadcast<T>(&self, payload: &T) -> Result<BroadcastReport, RegistryError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(payload)?;
        let deliveries = self.snapshot().into_iter().map(|(client_id, handle)| {
            let text = text.clone();
            async move {
                handle
                    .send_text(text)
                    .await
                    .map_err(|source| RegistryError::Delivery { client_id, source })
            }
        });

        let mut report = BroadcastReport::default();
        for outcome in join_all(deliveries).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => report.failures.push(e),
            }
        }
        debug!(
            delivered = report.delivered,
            failed = report.failures.len(),
            "broadcast complete"
        );
        Ok(report)
    }

    /// Closes every registered connection with `reason`.
    ///
    /// Entries stay in the map; each read loop removes its own entry once it
    /// observes the close.  Returns the number of connections closed.
    pub async fn close_all(&self, reason: &str) -> usize {
        let handles = self.snapshot();
        let count = handles.len();
        join_all(handles.iter().map(|(_, handle)| handle.close(reason))).await;
        count
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
