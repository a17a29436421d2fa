//! Kind-specific validator registry (spec §4.5 step 5, §9 "NIP validators
//! as a registry"). Each leaf validator has the uniform signature
//! `(event) -> Result<()>` and is looked up by exact kind or kind range.

use crate::common::error::{Error, RejectReason};
use crate::event::{Category, Event};

type LeafResult = Result<(), Error>;

/// Dispatches to the leaf validator for `evt.kind`, if one is registered.
/// Kinds with no specific validator pass through unchanged.
pub fn validate_kind(evt: &Event) -> LeafResult {
    match evt.kind {
        4 => encrypted_dm(evt),
        5 => deletion_shape(evt),
        7 => reaction(evt),
        1040 => opentimestamps(evt),
        30023 => long_form_content(evt),
        10002 => relay_list(evt),
        k if matches!(crate::event::category_of(k), Category::Addressable) => addressable(evt),
        _ => Ok(()),
    }
}

fn encrypted_dm(evt: &Event) -> LeafResult {
    if evt.tag_value("p").is_none() {
        return Err(invalid("encrypted DM (kind 4) requires a \"p\" tag"));
    }
    if evt.content.is_empty() {
        return Err(invalid("encrypted DM content must not be empty"));
    }
    Ok(())
}

fn deletion_shape(evt: &Event) -> LeafResult {
    if evt.deletion_targets().is_empty() {
        return Err(invalid("deletion event (kind 5) requires at least one \"e\" tag"));
    }
    for id in evt.deletion_targets() {
        if id.len() != 64 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("deletion target is not a 64-hex event id"));
        }
    }
    Ok(())
}

fn addressable(evt: &Event) -> LeafResult {
    if evt.d_tag().is_none() {
        return Err(invalid("addressable event requires a \"d\" tag"));
    }
    Ok(())
}

fn opentimestamps(evt: &Event) -> LeafResult {
    use base64::Engine;
    if evt.content.len() > 2 * 1024 {
        return Err(invalid("OpenTimestamps attestation exceeds 2 KB"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(&evt.content)
        .map_err(|_| invalid("OpenTimestamps content is not valid base64"))?;
    Ok(())
}

fn long_form_content(evt: &Event) -> LeafResult {
    if evt.d_tag().is_none() {
        return Err(invalid("long-form content (kind 30023) requires a \"d\" tag"));
    }
    if evt.tag_value("title").is_none() {
        return Err(invalid("long-form content requires a \"title\" tag"));
    }
    if evt.content.is_empty() {
        return Err(invalid("long-form content must not be empty"));
    }
    Ok(())
}

fn reaction(evt: &Event) -> LeafResult {
    if evt.tag_value("e").is_none() {
        return Err(invalid("reaction (kind 7) requires an \"e\" tag"));
    }
    if evt.tag_value("p").is_none() {
        return Err(invalid("reaction (kind 7) requires a \"p\" tag"));
    }
    Ok(())
}

fn relay_list(evt: &Event) -> LeafResult {
    let r_tags: Vec<_> = evt.tags.iter().filter(|t| t.first().map(String::as_str) == Some("r")).collect();
    if r_tags.is_empty() {
        return Err(invalid("relay list (kind 10002) requires at least one \"r\" tag"));
    }
    for tag in r_tags {
        let Some(raw_url) = tag.get(1) else {
            return Err(invalid("\"r\" tag missing a URL"));
        };
        let parsed = url::Url::parse(raw_url).map_err(|_| invalid("\"r\" tag URL is malformed"))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(invalid("\"r\" tag URL must be ws:// or wss://"));
        }
        if let Some(marker) = tag.get(2) {
            if marker != "read" && marker != "write" {
                return Err(invalid("\"r\" tag marker must be \"read\" or \"write\""));
            }
        }
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Rejected(RejectReason::invalid(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(kind: u16, tags: Vec<Vec<&str>>, content: &str) -> Event {
        Event {
            id: "0".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 1,
            kind,
            tags: tags.into_iter().map(|t| t.into_iter().map(String::from).collect()).collect(),
            content: content.to_string(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn reaction_requires_e_and_p() {
        assert!(validate_kind(&evt(7, vec![], "+")).is_err());
        assert!(validate_kind(&evt(7, vec![vec!["e", "id"], vec!["p", "pk"]], "+")).is_ok());
    }

    #[test]
    fn relay_list_requires_ws_scheme() {
        assert!(validate_kind(&evt(10002, vec![vec!["r", "https://example.com"]], "")).is_err());
        assert!(validate_kind(&evt(10002, vec![vec!["r", "wss://example.com", "write"]], "")).is_ok());
    }

    #[test]
    fn long_form_requires_d_title_content() {
        assert!(validate_kind(&evt(30023, vec![vec!["d", "x"]], "")).is_err());
        assert!(validate_kind(&evt(30023, vec![vec!["d", "x"], vec!["title", "T"]], "body")).is_ok());
    }

    #[test]
    fn opentimestamps_validates_base64_and_size() {
        assert!(validate_kind(&evt(1040, vec![], "not base64!!")).is_err());
        assert!(validate_kind(&evt(1040, vec![], "aGVsbG8=")).is_ok());
    }
}
