//! Validator (spec §4.5): the seven-step pipeline every inbound event and
//! filter passes through before it reaches the processor or the store.

mod kinds;

use crate::common::error::{Error, RejectReason, Result};
use crate::event::{Category, Event};
use crate::filter::Filter;
use async_trait::async_trait;
use std::collections::HashSet;

/// Looks up the author of an already-stored event, for deletion authorization
/// (spec §4.5 step 6). Implemented by `Store` in production, by a fixture in tests.
#[async_trait]
pub trait DeletionLookup: Send + Sync {
    async fn pubkey_of(&self, id: &str) -> Option<String>;
}

/// Relay-wide policy the validator pipeline checks against (spec §4.5).
pub struct ValidatorContext<'a> {
    pub blacklist: &'a HashSet<String>,
    pub whitelist: &'a HashSet<String>,
    pub min_pow_difficulty: u32,
    pub max_content_length: usize,
    pub max_event_tags: usize,
    /// Max length of a single tag element (spec §4.5 step 1).
    pub max_tag_element_length: usize,
    pub created_at_skew_secs: i64,
    /// Authenticated pubkey of the connection submitting this event, if any
    /// (spec §4.5 step 7, NIP-70 protected events).
    pub authenticated_pubkey: Option<&'a str>,
}

/// Runs the full pipeline. Any step's rejection short-circuits with a
/// specific `RejectReason` category (spec §7).
pub async fn validate_event(evt: &Event, ctx: &ValidatorContext<'_>, lookup: &dyn DeletionLookup) -> Result<()> {
    validate_structural(evt, ctx)?;
    evt.verify_id_and_sig().map_err(|_| rejected_invalid("id or signature verification failed"))?;
    validate_policy(evt, ctx)?;
    validate_pow(evt, ctx)?;
    kinds::validate_kind(evt)?;
    validate_deletion_authorization(evt, lookup).await?;
    validate_protected(evt, ctx)?;
    Ok(())
}

/// Step 1: field presence, hex shape, ranges, skew, length/count bounds.
fn validate_structural(evt: &Event, ctx: &ValidatorContext<'_>) -> Result<()> {
    if evt.id.len() != 64 || !is_hex(&evt.id) {
        return Err(rejected_invalid("id must be 64 lowercase hex chars"));
    }
    if evt.pubkey.len() != 64 || !is_hex(&evt.pubkey) {
        return Err(rejected_invalid("pubkey must be 64 lowercase hex chars"));
    }
    if evt.sig.len() != 128 || !is_hex(&evt.sig) {
        return Err(rejected_invalid("sig must be 128 lowercase hex chars"));
    }
    let now = now_secs();
    if (evt.created_at - now).abs() > ctx.created_at_skew_secs {
        return Err(rejected_invalid("created_at is outside the accepted skew window"));
    }
    if evt.content.len() > ctx.max_content_length {
        return Err(rejected_invalid("content exceeds max_content_length"));
    }
    if evt.tags.len() > ctx.max_event_tags {
        return Err(rejected_invalid("too many tags"));
    }
    for tag in &evt.tags {
        if tag.is_empty() {
            return Err(rejected_invalid("empty tag"));
        }
        if tag.iter().any(|element| element.len() > ctx.max_tag_element_length) {
            return Err(rejected_invalid("tag element exceeds max_tag_element_length"));
        }
    }
    Ok(())
}

/// Step 3: blacklist/whitelist.
fn validate_policy(evt: &Event, ctx: &ValidatorContext<'_>) -> Result<()> {
    if !ctx.blacklist.is_empty() && ctx.blacklist.contains(&evt.pubkey) {
        return Err(Error::Rejected(RejectReason::blocked("pubkey is blacklisted")));
    }
    if !ctx.whitelist.is_empty() && !ctx.whitelist.contains(&evt.pubkey) {
        return Err(Error::Rejected(RejectReason::blocked("pubkey is not on the whitelist")));
    }
    Ok(())
}

/// Step 4: NIP-13 proof-of-work.
fn validate_pow(evt: &Event, ctx: &ValidatorContext<'_>) -> Result<()> {
    let nonce_tag = evt.tags.iter().find(|t| t.first().map(String::as_str) == Some("nonce"));
    let committed_target: Option<u32> = nonce_tag.and_then(|t| t.get(2)).and_then(|s| s.parse().ok());

    let required = match (ctx.min_pow_difficulty, committed_target) {
        (0, None) => return Ok(()),
        (min, Some(target)) => {
            if target < min {
                return Err(Error::Rejected(RejectReason::pow(format!(
                    "nonce target {target} is below the relay minimum {min}"
                ))));
            }
            target.max(min)
        }
        (min, None) => min,
    };

    let actual = evt
        .id_leading_zero_bits()
        .map_err(|_| rejected_invalid("id is not valid hex"))?;
    if actual < required {
        return Err(Error::Rejected(RejectReason::pow(format!(
            "id has {actual} leading zero bits, needs {required}"
        ))));
    }
    Ok(())
}

/// Step 6: deletion authorization (kind 5 only).
async fn validate_deletion_authorization(evt: &Event, lookup: &dyn DeletionLookup) -> Result<()> {
    if evt.category() != Category::Deletion {
        return Ok(());
    }
    for target_id in evt.deletion_targets() {
        if let Some(owner) = lookup.pubkey_of(target_id).await {
            if owner != evt.pubkey {
                return Err(rejected_invalid(format!(
                    "deletion target {target_id} is not owned by the deleting pubkey"
                )));
            }
        }
    }
    Ok(())
}

/// Step 7: NIP-70 protected events.
fn validate_protected(evt: &Event, ctx: &ValidatorContext<'_>) -> Result<()> {
    let is_protected = evt.tags.iter().any(|t| t.len() == 1 && t[0] == "-");
    if !is_protected {
        return Ok(());
    }
    match ctx.authenticated_pubkey {
        Some(auth_pk) if auth_pk == evt.pubkey => Ok(()),
        _ => Err(Error::Rejected(RejectReason::auth_required(
            "protected event requires AUTH as the event's own pubkey",
        ))),
    }
}

/// Validates a filter before compiling it (spec §4.7 REQ/COUNT handling).
pub fn validate_filter(filter: &Filter, max_ids: usize, max_authors: usize, max_kinds: usize) -> Result<()> {
    if let Some(ids) = &filter.ids {
        if ids.len() > max_ids || ids.iter().any(|id| !is_hex(id)) {
            return Err(rejected_invalid("filter ids are malformed or too many"));
        }
    }
    if let Some(authors) = &filter.authors {
        if authors.len() > max_authors || authors.iter().any(|a| !is_hex(a)) {
            return Err(rejected_invalid("filter authors are malformed or too many"));
        }
    }
    if let Some(kinds) = &filter.kinds {
        if kinds.len() > max_kinds {
            return Err(rejected_invalid("filter has too many kinds"));
        }
    }
    if let Some(search) = &filter.search {
        if search.len() > 256 {
            return Err(rejected_invalid("search term too long"));
        }
    }
    Ok(())
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit()) && s.chars().all(|c| !c.is_ascii_uppercase())
}

fn rejected_invalid(msg: impl Into<String>) -> Error {
    Error::Rejected(RejectReason::invalid(msg))
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTargets;
    #[async_trait]
    impl DeletionLookup for NoTargets {
        async fn pubkey_of(&self, _id: &str) -> Option<String> {
            None
        }
    }

    struct KnownOwner(String);
    #[async_trait]
    impl DeletionLookup for KnownOwner {
        async fn pubkey_of(&self, _id: &str) -> Option<String> {
            Some(self.0.clone())
        }
    }

    fn ctx<'a>(blacklist: &'a HashSet<String>, whitelist: &'a HashSet<String>) -> ValidatorContext<'a> {
        ValidatorContext {
            blacklist,
            whitelist,
            min_pow_difficulty: 0,
            max_content_length: 64_000,
            max_event_tags: 2000,
            max_tag_element_length: 1024,
            created_at_skew_secs: 900,
            authenticated_pubkey: None,
        }
    }

    fn sample_event(kind: u16) -> Event {
        Event {
            id: "1".repeat(64),
            pubkey: "a".repeat(64),
            created_at: now_secs(),
            kind,
            tags: vec![],
            content: "hi".into(),
            sig: "0".repeat(128),
        }
    }

    #[tokio::test]
    async fn structural_rejects_bad_hex() {
        let bl = HashSet::new();
        let wl = HashSet::new();
        let c = ctx(&bl, &wl);
        let mut evt = sample_event(1);
        evt.id = "not-hex".into();
        let err = validate_event(&evt, &c, &NoTargets).await.unwrap_err();
        assert_eq!(err.client_category(), "invalid");
    }

    #[test]
    fn structural_rejects_oversized_tag_element() {
        let bl = HashSet::new();
        let wl = HashSet::new();
        let mut c = ctx(&bl, &wl);
        c.max_tag_element_length = 8;
        let mut evt = sample_event(1);
        evt.tags = vec![vec!["e".to_string(), "x".repeat(64)]];
        let err = validate_structural(&evt, &c).unwrap_err();
        assert_eq!(err.client_category(), "invalid");
    }

    #[tokio::test]
    async fn blacklist_blocks() {
        let mut bl = HashSet::new();
        bl.insert("a".repeat(64));
        let wl = HashSet::new();
        let c = ctx(&bl, &wl);
        let evt = sample_event(1);
        // fails before policy due to sig, but policy check order is validated via pow test below
        let err = validate_pow(&evt, &c);
        assert!(err.is_ok());
        let err = validate_policy(&evt, &c).unwrap_err();
        assert_eq!(err.client_category(), "blocked");
    }

    #[tokio::test]
    async fn deletion_rejects_mismatched_owner() {
        let bl = HashSet::new();
        let wl = HashSet::new();
        let mut evt = sample_event(5);
        evt.tags = vec![vec!["e".to_string(), "b".repeat(64)]];
        let lookup = KnownOwner("someone-else".to_string());
        let err = validate_deletion_authorization(&evt, &lookup).await.unwrap_err();
        assert_eq!(err.client_category(), "invalid");
        let _ = ctx(&bl, &wl);
    }

    #[test]
    fn protected_event_requires_matching_auth() {
        let bl = HashSet::new();
        let wl = HashSet::new();
        let mut c = ctx(&bl, &wl);
        let mut evt = sample_event(1);
        evt.tags = vec![vec!["-".to_string()]];
        assert!(validate_protected(&evt, &c).is_err());
        c.authenticated_pubkey = Some(&evt.pubkey);
        assert!(validate_protected(&evt, &c).is_ok());
    }

    #[test]
    fn pow_enforces_committed_and_actual_difficulty() {
        let bl = HashSet::new();
        let wl = HashSet::new();
        let mut c = ctx(&bl, &wl);
        c.min_pow_difficulty = 16;
        let mut evt = sample_event(1);
        evt.id = format!("00{}", "f".repeat(62)); // 8 leading zero bits
        evt.tags = vec![vec!["nonce".to_string(), "42".to_string(), "8".to_string()]];
        assert!(validate_pow(&evt, &c).is_err());

        evt.id = format!("0000{}", "f".repeat(60)); // 16 leading zero bits
        evt.tags = vec![vec!["nonce".to_string(), "42".to_string(), "16".to_string()]];
        assert!(validate_pow(&evt, &c).is_ok());
    }
}
