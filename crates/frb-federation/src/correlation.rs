//! Request id -> waiting caller.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::message::{RemoteResponse, RequestId};

#[derive(Default)]
pub struct PendingCalls {
    waiting: Mutex<HashMap<RequestId, oneshot::Sender<RemoteResponse>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the response to `id`.
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<RemoteResponse> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(id, tx);
        rx
    }

    /// Hand a response to its caller. Returns `false` when nobody waits for
    /// it any more (late or unknown response); it is dropped.
    pub fn resolve(&self, response: RemoteResponse) -> bool {
        let id = response.id;
        let Some(tx) = self.waiting.lock().remove(&id) else {
            debug!(request_id = %id, from = %response.from, "dropping unsolicited response");
            return false;
        };
        if tx.send(response).is_err() {
            debug!(request_id = %id, "caller gave up before the response arrived");
            return false;
        }
        true
    }

    /// Forget `id`; used after a timeout or a failed send.
    pub fn cancel(&self, id: RequestId) {
        self.waiting.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
