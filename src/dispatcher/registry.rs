use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatcher::MonitorClient;
use crate::MonitorId;

/// Registry of the clients a dispatcher has handed out.
///
/// Entries are keyed by monitor id and hold an explicit release handle: an
/// `AtomicBool` shared with the client and flipped by the client's `Drop`.
/// Liveness is therefore exact the moment a producer drops its client; the
/// worker's external timer only compacts released entries out of storage.
pub(crate) struct ClientRegistry {
    entries: Mutex<Vec<RegisteredClient>>,
}

struct RegisteredClient {
    id: MonitorId,
    released: Arc<AtomicBool>,
}

impl ClientRegistry {
    pub(crate) const fn new() -> ClientRegistry {
        ClientRegistry {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, client: &MonitorClient) {
        self.entries.lock().unwrap().push(RegisteredClient {
            id: client.id(),
            released: client.release_handle(),
        });
    }

    /// Compact released entries out of storage; returns how many were
    /// removed.
    pub(crate) fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|entry| {
            let released = entry.released.load(Ordering::SeqCst);
            if released {
                tracing::trace!(monitor = %entry.id, "client handle released");
            }
            !released
        });
        before - entries.len()
    }

    /// Number of clients whose handle has not been released.
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| !entry.released.load(Ordering::SeqCst))
            .count()
    }
}
