//! The canonical Nostr event: wire shape, category classification (§3.3),
//! canonical serialization, and id/signature verification (§3.1, P3).

mod canonical;

pub use canonical::canonical_id;

use crate::common::error::{Error, Result};
use secp256k1::{schnorr::Signature, Message, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};

/// A tag is an ordered sequence of strings; the first element is the tag name.
pub type Tag = Vec<String>;

/// The canonical Nostr event (spec §3.1). Field names and hex casing match
/// the wire format exactly so `#[derive(Serialize, Deserialize)]` round-trips.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

/// Behavioral category derived purely from `kind` (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Ephemeral,
    Replaceable,
    Addressable,
    Deletion,
    Regular,
}

impl Event {
    pub fn category(&self) -> Category {
        category_of(self.kind)
    }

    /// First value of the first `["d", ...]` tag, if any.
    pub fn d_tag(&self) -> Option<&str> {
        self.tag_value("d")
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All values in position 1 of every tag named `name`, in order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
    }

    /// Event ids targeted by this event's `e` tags (used by kind-5 deletions).
    pub fn deletion_targets(&self) -> Vec<&str> {
        self.tag_values("e").collect()
    }

    /// Recomputes the canonical id and checks it against `self.id`, then
    /// verifies `self.sig` under `self.pubkey` for that id (P3).
    pub fn verify_id_and_sig(&self) -> Result<()> {
        let expected = canonical_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)?;
        if expected != self.id {
            return Err(Error::custom("event id does not match canonical serialization"));
        }

        let id_bytes = hex::decode(&self.id)?;
        let pubkey_bytes = hex::decode(&self.pubkey)?;
        let xonly = XOnlyPublicKey::from_slice(&pubkey_bytes)?;
        let sig_bytes = hex::decode(&self.sig)?;
        let sig = Signature::from_slice(&sig_bytes)?;

        let msg = Message::from_digest_slice(&id_bytes)?;
        SECP256K1
            .verify_schnorr(&sig, &msg, &xonly)
            .map_err(Error::Secp256k1Error)
    }

    /// Count of leading zero bits in the event id, used by NIP-13 PoW checks.
    pub fn id_leading_zero_bits(&self) -> Result<u32> {
        let bytes = hex::decode(&self.id)?;
        Ok(leading_zero_bits(&bytes))
    }
}

/// Counts leading zero bits across a byte slice, MSB-first.
pub fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut count = 0;
    for byte in bytes {
        if *byte == 0 {
            count += 8;
            continue;
        }
        count += byte.leading_zeros();
        break;
    }
    count
}

pub fn category_of(kind: u16) -> Category {
    if (20000..30000).contains(&kind) {
        Category::Ephemeral
    } else if (10000..20000).contains(&kind) || matches!(kind, 0 | 3 | 41) {
        Category::Replaceable
    } else if (30000..40000).contains(&kind) {
        Category::Addressable
    } else if kind == 5 {
        Category::Deletion
    } else {
        Category::Regular
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_categories() {
        assert_eq!(category_of(20123), Category::Ephemeral);
        assert_eq!(category_of(0), Category::Replaceable);
        assert_eq!(category_of(10002), Category::Replaceable);
        assert_eq!(category_of(3), Category::Replaceable);
        assert_eq!(category_of(30023), Category::Addressable);
        assert_eq!(category_of(5), Category::Deletion);
        assert_eq!(category_of(1), Category::Regular);
    }

    #[test]
    fn leading_zero_bits_counts_across_bytes() {
        assert_eq!(leading_zero_bits(&[0x00, 0x0f]), 12);
        assert_eq!(leading_zero_bits(&[0xff]), 0);
        assert_eq!(leading_zero_bits(&[0x00, 0x00]), 16);
    }

    #[test]
    fn d_tag_extraction() {
        let evt = Event {
            id: String::new(),
            pubkey: String::new(),
            created_at: 0,
            kind: 30023,
            tags: vec![vec!["d".into(), "post-1".into()], vec!["title".into(), "Hi".into()]],
            content: String::new(),
            sig: String::new(),
        };
        assert_eq!(evt.d_tag(), Some("post-1"));
        assert_eq!(evt.tag_value("title"), Some("Hi"));
        assert_eq!(evt.tag_value("missing"), None);
    }
}
