use std::sync::Arc;

use palaver_shared::UserKey;

use crate::blob::BlobTransfer;
use crate::peer::PeerSync;
use crate::store::RecordStore;
use crate::thread::ThreadOpener;

/// Identity of the local client.
pub trait IdentityProvider: Send + Sync {
    fn public_key(&self) -> UserKey;
}

/// Typed bundle of the collaborator services a controller depends on.
/// Controllers receive this explicitly instead of reaching into an
/// ambient registry.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub threads: Arc<dyn ThreadOpener>,
    pub store: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobTransfer>,
    pub peers: Arc<dyn PeerSync>,
}
