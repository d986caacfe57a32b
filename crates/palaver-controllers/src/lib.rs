//! View-model controllers for the Palaver client.
//!
//! Each controller subscribes to a record stream, folds the stream's
//! add/update/delete events into an in-memory view model, and announces
//! changes through typed [`Signal`]s. Controllers never talk to a UI
//! directly; a frontend reads the view model after each update signal.

pub mod binding;
pub mod channel;
pub mod channels;
pub mod error;
pub mod notifications;
pub mod objects;
pub mod presence;
pub mod signal;
pub mod transfer;

pub use binding::{Reconciler, StreamBinding};
pub use channel::{ChannelConfig, ChannelController, DownloadInfo, Message, TransferKind, UploadInfo};
pub use channels::{Channel, ChannelsConfig, ChannelsController};
pub use error::ControllerError;
pub use notifications::{Notification, NotificationsController};
pub use objects::{ObjectStore, ObjectUrl};
pub use presence::{PresenceConfig, PresenceController};
pub use signal::Signal;
