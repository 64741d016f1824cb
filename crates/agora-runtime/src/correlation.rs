//! RPC correlation table
//!
//! Maps each outstanding request id to the completion handle of the call
//! that issued it. An entry is removed exactly once: by the matching
//! response, or by the caller giving up (drop / cancellation).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use agora_core::constants::PENDING_REQUEST_COUNT_MAX;
use agora_core::error::{Error, Result};
use agora_core::RpcResponse;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Outstanding requests issued by one agent
#[derive(Debug)]
pub struct PendingRequests {
    owner: String,
    limit: usize,
    entries: Mutex<HashMap<Uuid, oneshot::Sender<RpcResponse>>>,
}

impl PendingRequests {
    /// Create an empty table for `owner` (used in error messages)
    pub fn new(owner: impl Into<String>) -> Arc<Self> {
        Self::with_limit(owner, PENDING_REQUEST_COUNT_MAX)
    }

    /// Create an empty table with an explicit size limit
    pub fn with_limit(owner: impl Into<String>, limit: usize) -> Arc<Self> {
        debug_assert!(limit > 0);
        Arc::new(Self {
            owner: owner.into(),
            limit,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Record a completion handle for `request_id`
    ///
    /// The returned handle removes the entry when dropped, so a cancelled
    /// caller never leaks one.
    pub fn register(self: &Arc<Self>, request_id: Uuid) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.limit {
                return Err(Error::TooManyPendingRequests {
                    agent_id: self.owner.clone(),
                    limit: self.limit,
                });
            }
            if entries.contains_key(&request_id) {
                return Err(Error::DuplicateRequestId {
                    request_id: request_id.to_string(),
                });
            }
            entries.insert(request_id, tx);
        }

        Ok(PendingResponse {
            request_id,
            rx,
            _guard: PendingGuard {
                table: Arc::downgrade(self),
                request_id,
            },
        })
    }

    /// Complete the call waiting on `response.request_id`
    ///
    /// An unknown id (never issued, already resolved, or abandoned) is a
    /// protocol violation and the response is discarded.
    pub fn resolve(&self, response: RpcResponse) -> Result<()> {
        let request_id = response.request_id;
        let sender = self.entries.lock().remove(&request_id);

        let sender = sender.ok_or_else(|| {
            Error::protocol_violation(format!(
                "response for unknown request id {} at agent {}",
                request_id, self.owner
            ))
        })?;

        if sender.send(response).is_err() {
            debug!(request_id = %request_id, agent_id = %self.owner, "Caller stopped waiting before response");
        }
        Ok(())
    }

    /// Drop every completion handle; waiting callers see `RequestAbandoned`
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        drained.len()
    }

    pub fn contains(&self, request_id: &Uuid) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn remove(&self, request_id: &Uuid) {
        self.entries.lock().remove(request_id);
    }
}

/// Removes the entry when the waiting side goes away
#[derive(Debug)]
struct PendingGuard {
    table: Weak<PendingRequests>,
    request_id: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(&self.request_id);
        }
    }
}

/// Completion handle for one outstanding request
#[derive(Debug)]
pub struct PendingResponse {
    request_id: Uuid,
    rx: oneshot::Receiver<RpcResponse>,
    _guard: PendingGuard,
}

impl PendingResponse {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Wait for the response
    ///
    /// Fails with `RequestAbandoned` if the table dropped the entry
    /// without resolving it.
    pub async fn recv(mut self) -> Result<RpcResponse> {
        let request_id = self.request_id;
        (&mut self.rx).await.map_err(|_| Error::RequestAbandoned {
            request_id: request_id.to_string(),
        })
    }
}
