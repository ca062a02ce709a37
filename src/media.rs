use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifier of a stored media entry, rendered as a `media:` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaId(u64);

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "media:{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<MediaId, MediaEntry>,
}

/// In-memory registry of playable audio. Entries live exactly as long as the
/// `MediaLease` returned by `create`.
#[derive(Debug, Clone, Default)]
pub struct MediaStore {
    inner: Arc<Mutex<Inner>>,
}

impl MediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `bytes` for playback. The store shares the allocation.
    pub fn create(&self, bytes: Arc<[u8]>, mime_type: &str) -> MediaLease {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = MediaId(inner.next_id);
        inner.entries.insert(
            id,
            MediaEntry {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        log::debug!("Created {id} ({mime_type})");
        MediaLease {
            id,
            store: self.clone(),
        }
    }

    /// Look up a live entry. Revoked ids return `None`.
    pub fn get(&self, id: MediaId) -> Option<MediaEntry> {
        self.lock().entries.get(&id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn revoke(&self, id: MediaId) {
        if self.lock().entries.remove(&id).is_some() {
            log::debug!("Revoked {id}");
        }
    }
}

/// Owner of one stored entry. Dropping the lease revokes it.
#[derive(Debug)]
pub struct MediaLease {
    id: MediaId,
    store: MediaStore,
}

impl MediaLease {
    pub fn id(&self) -> MediaId {
        self.id
    }

    pub fn entry(&self) -> Option<MediaEntry> {
        self.store.get(self.id)
    }
}

impl Drop for MediaLease {
    fn drop(&mut self) {
        self.store.revoke(self.id);
    }
}
