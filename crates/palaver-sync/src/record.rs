use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palaver_shared::{ItemId, UserKey};

/// An immutable, content-addressed unit of data distributed by the
/// synchronization service.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: ItemId,
    /// Public key of the record signer.
    pub owner: UserKey,
    /// Scoping parent (e.g. the channel a message belongs to).
    pub parent: Option<ItemId>,
    /// Predecessor link to the previous record in the same timeline.
    pub prev: Option<ItemId>,
    /// Reference identity; present on direct (1:1) channel records.
    pub reference: Option<UserKey>,
    pub created_at: DateTime<Utc>,
    /// Literal byte payload (message text, filename, presence salt).
    pub data: Bytes,
    pub has_blob: bool,
    pub blob_length: Option<u64>,
    /// BLAKE3 hash of the blob content, when one is attached.
    pub blob_hash: Option<[u8; 32]>,
    /// Whether the record requires license grants before it is
    /// distributable to its targets.
    pub licensed: bool,
    /// Minimum license distance still required (tombstones may keep a
    /// residual requirement after deletion).
    pub min_license_distance: u8,
    /// Opaque side-channel annotation payload (edits, reactions).
    pub annotations: Option<Bytes>,
}

impl Record {
    /// The literal payload as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<String> {
        std::str::from_utf8(&self.data).ok().map(str::to_string)
    }

    /// Best-effort parse of the annotation payload. Garbage annotations
    /// yield `None` rather than an error.
    pub fn annotations(&self) -> Option<Annotations> {
        let raw = self.annotations.as_ref()?;
        serde_json::from_slice(raw).ok()
    }
}

/// Fields for posting a new record.
#[derive(Debug, Clone, Default)]
pub struct RecordFields {
    pub data: Bytes,
    pub parent: Option<ItemId>,
    pub prev: Option<ItemId>,
    pub reference: Option<UserKey>,
    pub blob_hash: Option<[u8; 32]>,
    pub blob_length: Option<u64>,
}

/// Merged annotation state carried alongside a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotations {
    /// Last-writer-wins edited text. An empty string hides the message.
    pub edited_text: Option<String>,
    /// Aggregate of reaction votes.
    pub reactions: Option<Reactions>,
}

impl Annotations {
    pub fn to_bytes(&self) -> Bytes {
        // Serializing a plain struct of maps and strings cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}

/// Reaction aggregate: reaction label mapped to the hex keys of everyone
/// currently reacting with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reactions {
    pub by_reaction: BTreeMap<String, Vec<String>>,
}

impl Reactions {
    /// Whether `key` currently reacts with `reaction`.
    pub fn has_reacted(&self, reaction: &str, key: &UserKey) -> bool {
        self.by_reaction
            .get(reaction)
            .map(|keys| keys.iter().any(|k| k == &key.to_hex()))
            .unwrap_or(false)
    }

    /// Apply a single vote to the aggregate.
    pub fn apply(&mut self, reaction: &str, key: &UserKey, negate: bool) {
        let hex = key.to_hex();
        let keys = self.by_reaction.entry(reaction.to_string()).or_default();
        if negate {
            keys.retain(|k| k != &hex);
        } else if !keys.contains(&hex) {
            keys.push(hex);
        }
        if self.by_reaction.get(reaction).is_some_and(Vec::is_empty) {
            self.by_reaction.remove(reaction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_annotations(raw: &[u8]) -> Record {
        Record {
            id: ItemId([1; 32]),
            owner: UserKey([2; 32]),
            parent: None,
            prev: None,
            reference: None,
            created_at: Utc::now(),
            data: Bytes::from_static(b"hello"),
            has_blob: false,
            blob_length: None,
            blob_hash: None,
            licensed: false,
            min_license_distance: 0,
            annotations: Some(Bytes::copy_from_slice(raw)),
        }
    }

    #[test]
    fn test_annotations_round_trip() {
        let mut ann = Annotations::default();
        ann.edited_text = Some("edited".into());
        let record = record_with_annotations(&ann.to_bytes());
        assert_eq!(record.annotations(), Some(ann));
    }

    #[test]
    fn test_garbage_annotations_parse_to_none() {
        let record = record_with_annotations(b"{not json");
        assert!(record.annotations().is_none());
    }

    #[test]
    fn test_reaction_toggle_cycle() {
        let key = UserKey([3; 32]);
        let mut reactions = Reactions::default();

        reactions.apply("thumbsup", &key, false);
        assert!(reactions.has_reacted("thumbsup", &key));

        // Double vote is idempotent.
        reactions.apply("thumbsup", &key, false);
        assert_eq!(reactions.by_reaction["thumbsup"].len(), 1);

        reactions.apply("thumbsup", &key, true);
        assert!(!reactions.has_reacted("thumbsup", &key));
        assert!(reactions.by_reaction.is_empty());
    }
}
