use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

/// Handle to one stored object. Cloning the handle does not extend the
/// object's lifetime; once revoked, every clone dangles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUrl {
    id: u64,
    url: String,
}

impl ObjectUrl {
    pub fn url(&self) -> &str {
        &self.url
    }
}

struct StoredObject {
    data: Bytes,
    mime: String,
}

/// In-memory store for downloaded attachment bytes, addressed by opaque
/// URLs. Stands in for a browser object-URL registry; controllers must
/// revoke what they create or the bytes stay resident.
#[derive(Default)]
pub struct ObjectStore {
    next_id: AtomicU64,
    objects: Mutex<HashMap<u64, StoredObject>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, data: Bytes, mime: &str) -> ObjectUrl {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().expect("object store lock").insert(
            id,
            StoredObject {
                data,
                mime: mime.to_string(),
            },
        );
        ObjectUrl {
            id,
            url: format!("blob:palaver/{id}"),
        }
    }

    /// Returns false when the handle was already revoked.
    pub fn revoke(&self, url: &ObjectUrl) -> bool {
        self.objects
            .lock()
            .expect("object store lock")
            .remove(&url.id)
            .is_some()
    }

    pub fn get(&self, url: &ObjectUrl) -> Option<Bytes> {
        self.objects
            .lock()
            .expect("object store lock")
            .get(&url.id)
            .map(|o| o.data.clone())
    }

    pub fn mime(&self, url: &ObjectUrl) -> Option<String> {
        self.objects
            .lock()
            .expect("object store lock")
            .get(&url.id)
            .map(|o| o.mime.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("object store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
