//! SessionFSM (spec §4.7): per-connection state machine, frame router, and
//! the AUTH/REQ/COUNT/EVENT/CLOSE command handling.

mod hll;

use crate::common::config::RelayConfig;
use crate::common::error::{Error, RejectReason};
use crate::db::Store;
use crate::dispatcher::{Dispatcher, SubscriptionHandle};
use crate::event::Event;
use crate::filter::Filter;
use crate::processor::ProcessorHandle;
use crate::ratelimit::{Kind as BucketKind, RateLimiter};
use crate::validate::{self, ValidatorContext};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything a session needs that is shared across connections (spec §3.6).
#[derive(Clone)]
pub struct SharedState {
    pub store: Store,
    pub processor: ProcessorHandle,
    pub dispatcher: Dispatcher,
    pub ratelimiter: Arc<RateLimiter>,
    pub relay_config: Arc<RelayConfig>,
    pub blacklist: Arc<HashSet<String>>,
    pub whitelist: Arc<HashSet<String>>,
    pub shutdown: CancellationToken,
}

enum ClientFrame {
    Event(Event),
    Req(String, Vec<Filter>),
    Close(String),
    Count(String, Filter),
    Auth(Event),
}

struct Subscription {
    handle: SubscriptionHandle,
}

/// Drives one WebSocket connection end to end: challenge issuance, frame
/// routing, idle/write timeouts, and graceful close (spec §4.7).
pub async fn run(ws: WebSocket, remote: String, state: SharedState) {
    let (mut sink, mut stream) = ws.split();
    let challenge = random_hex(32);

    if sink
        .send(Message::Text(json!(["AUTH", challenge]).to_string()))
        .await
        .is_err()
    {
        return;
    }

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(state.relay_config.send_buffer_size.min(4096).max(16));
    let write_timeout = Duration::from_secs(state.relay_config.write_timeout_secs);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if tokio::time::timeout(write_timeout, sink.send(msg)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut authenticated_pubkey: Option<String> = None;
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();
    let idle_timeout = Duration::from_secs(state.relay_config.idle_timeout_secs);
    let mut shutting_down = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => {
                shutting_down = true;
                break;
            }
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };
        let frame = match next {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => break,
            Err(_) => {
                let _ = out_tx.send(Message::Text(json!(["NOTICE", "idle timeout"]).to_string())).await;
                break;
            }
        };

        if !state.ratelimiter.check(&remote, BucketKind::Request) {
            let _ = out_tx
                .send(Message::Text(json!(["NOTICE", "rate-limited: too many requests"]).to_string()))
                .await;
            continue;
        }

        match parse_frame(&frame) {
            Ok(ClientFrame::Event(evt)) => {
                handle_event(&state, &remote, &authenticated_pubkey, evt, &out_tx).await;
            }
            Ok(ClientFrame::Req(sub_id, filters)) => {
                handle_req(&state, &mut subscriptions, sub_id, filters, &out_tx).await;
            }
            Ok(ClientFrame::Close(sub_id)) => {
                subscriptions.remove(&sub_id);
            }
            Ok(ClientFrame::Count(sub_id, filter)) => {
                handle_count(&state, sub_id, filter, &out_tx).await;
            }
            Ok(ClientFrame::Auth(evt)) => {
                handle_auth(&state, &challenge, evt, &mut authenticated_pubkey, &out_tx).await;
            }
            Err(e) => {
                let _ = out_tx
                    .send(Message::Text(json!(["NOTICE", format!("invalid: {}", e.client_message())]).to_string()))
                    .await;
            }
        }
    }

    subscriptions.clear();
    state.ratelimiter.drop_connection(&remote);
    // Only a real server shutdown gets this NOTICE (spec §4.7); idle
    // timeouts, client disconnects, and read errors close silently.
    if shutting_down {
        let _ = out_tx
            .send(Message::Text(json!(["NOTICE", "shutting down"]).to_string()))
            .await;
    }
    drop(out_tx);
    let _ = writer.await;
}

async fn handle_event(
    state: &SharedState,
    remote: &str,
    authenticated_pubkey: &Option<String>,
    evt: Event,
    out_tx: &mpsc::Sender<Message>,
) {
    if !state.ratelimiter.check(remote, BucketKind::Event) {
        let _ = send_ok(out_tx, &evt.id, false, "rate-limited: slow down").await;
        return;
    }

    let ctx = ValidatorContext {
        blacklist: &state.blacklist,
        whitelist: &state.whitelist,
        min_pow_difficulty: state.relay_config.min_pow_difficulty as u32,
        max_content_length: state.relay_config.throttling.max_content_length,
        max_event_tags: state.relay_config.max_event_tags,
        max_tag_element_length: state.relay_config.max_tag_element_length,
        created_at_skew_secs: state.relay_config.created_at_skew_secs,
        authenticated_pubkey: authenticated_pubkey.as_deref(),
    };

    if let Err(e) = validate::validate_event(&evt, &ctx, &state.store).await {
        let _ = send_ok(out_tx, &evt.id, false, &format!("{}: {}", e.client_category(), e.client_message())).await;
        return;
    }

    let accepted = state.processor.enqueue(evt.clone());
    if accepted {
        let _ = send_ok(out_tx, &evt.id, true, "").await;
    } else {
        let _ = send_ok(out_tx, &evt.id, false, "error: relay busy").await;
    }
}

async fn handle_req(
    state: &SharedState,
    subscriptions: &mut HashMap<String, Subscription>,
    sub_id: String,
    filters: Vec<Filter>,
    out_tx: &mpsc::Sender<Message>,
) {
    let cfg = &state.relay_config;
    if subscriptions.len() >= cfg.max_subscriptions && !subscriptions.contains_key(&sub_id) {
        let _ = out_tx.send(Message::Text(json!(["NOTICE", "too many subscriptions"]).to_string())).await;
        return;
    }
    if filters.len() > cfg.max_filters {
        let _ = out_tx.send(Message::Text(json!(["NOTICE", "too many filters"]).to_string())).await;
        return;
    }
    for f in &filters {
        if let Err(e) = validate::validate_filter(f, 500, 500, 20) {
            let _ = out_tx.send(Message::Text(json!(["NOTICE", e.client_message()]).to_string())).await;
            return;
        }
    }

    for f in &filters {
        match state.store.query(f).await {
            Ok(events) => {
                for evt in events {
                    let _ = out_tx
                        .send(Message::Text(json!(["EVENT", sub_id, evt]).to_string()))
                        .await;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "query failed while serving REQ backlog");
            }
        }
    }
    let _ = out_tx.send(Message::Text(json!(["EOSE", sub_id]).to_string())).await;

    // REQ for an existing subId replaces the prior subscription (spec §4.7).
    subscriptions.remove(&sub_id);
    let (handle, mut rx) = state.dispatcher.subscribe(filters);
    subscriptions.insert(sub_id.clone(), Subscription { handle });

    let forward_tx = out_tx.clone();
    let forward_sub_id = sub_id.clone();
    tokio::spawn(async move {
        while let Some(evt) = rx.recv().await {
            if forward_tx
                .send(Message::Text(json!(["EVENT", forward_sub_id, evt]).to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

async fn handle_count(state: &SharedState, sub_id: String, filter: Filter, out_tx: &mpsc::Sender<Message>) {
    if let Err(e) = validate::validate_filter(&filter, 500, 500, 20) {
        let _ = out_tx.send(Message::Text(json!(["NOTICE", e.client_message()]).to_string())).await;
        return;
    }

    let count = match state.store.count(&filter).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "count query failed");
            let _ = out_tx.send(Message::Text(json!(["NOTICE", "error: internal"]).to_string())).await;
            return;
        }
    };

    let mut payload = json!({ "count": count });

    // HLL approximation when the filter has exactly one tag attribute with
    // a single value (spec §4.7).
    if filter.tags.len() == 1 {
        if let Some((_, values)) = filter.tags.iter().next() {
            if values.len() == 1 {
                if let Ok(events) = state.store.query(&filter).await {
                    let offset = hll::derive_offset(&values[0]);
                    let mut registers = [0u8; hll::REGISTER_COUNT];
                    for evt in &events {
                        hll::update_registers(&mut registers, &evt.pubkey, offset);
                    }
                    payload["approximate"] = Value::Bool(true);
                    payload["hll"] = Value::String(hll::encode_registers(&registers));
                }
            }
        }
    }

    let _ = out_tx.send(Message::Text(json!(["COUNT", sub_id, payload]).to_string())).await;
}

async fn handle_auth(
    state: &SharedState,
    challenge: &str,
    evt: Event,
    authenticated_pubkey: &mut Option<String>,
    out_tx: &mpsc::Sender<Message>,
) {
    let result = verify_auth_event(&evt, challenge, &state.relay_config.public_url);
    match result {
        Ok(()) => {
            *authenticated_pubkey = Some(evt.pubkey.clone());
            let _ = send_ok(out_tx, &evt.id, true, "").await;
        }
        Err(e) => {
            let _ = send_ok(out_tx, &evt.id, false, &format!("{}: {}", e.client_category(), e.client_message())).await;
        }
    }
}

/// NIP-42: kind 22242, `challenge` and `relay` tags, valid signature, fresh `created_at`.
fn verify_auth_event(evt: &Event, challenge: &str, relay_url: &str) -> Result<(), Error> {
    if evt.kind != 22242 {
        return Err(Error::Rejected(RejectReason::invalid("AUTH event must be kind 22242")));
    }
    if evt.tag_value("challenge") != Some(challenge) {
        return Err(Error::Rejected(RejectReason::invalid("AUTH challenge does not match")));
    }
    if evt.tag_value("relay") != Some(relay_url) {
        return Err(Error::Rejected(RejectReason::invalid("AUTH relay tag does not match")));
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    if (evt.created_at - now).abs() > 600 {
        return Err(Error::Rejected(RejectReason::invalid("AUTH event created_at too far from now")));
    }
    evt.verify_id_and_sig()
        .map_err(|_| Error::Rejected(RejectReason::invalid("AUTH signature invalid")))
}

async fn send_ok(out_tx: &mpsc::Sender<Message>, id: &str, ok: bool, reason: &str) -> Result<(), ()> {
    out_tx
        .send(Message::Text(json!(["OK", id, ok, reason]).to_string()))
        .await
        .map_err(|_| ())
}

fn parse_frame(text: &str) -> Result<ClientFrame, Error> {
    let value: Value = serde_json::from_str(text)?;
    let arr = value.as_array().ok_or_else(|| invalid("frame must be a JSON array"))?;
    let cmd = arr.first().and_then(Value::as_str).ok_or_else(|| invalid("missing command"))?;

    match cmd {
        "EVENT" => {
            let evt_val = arr.get(1).ok_or_else(|| invalid("EVENT requires an event"))?;
            let evt: Event = serde_json::from_value(evt_val.clone())?;
            Ok(ClientFrame::Event(evt))
        }
        "REQ" => {
            if arr.len() < 3 {
                return Err(invalid("REQ requires a subId and at least one filter"));
            }
            let sub_id = arr[1].as_str().ok_or_else(|| invalid("subId must be a string"))?.to_string();
            let filters = arr[2..]
                .iter()
                .map(|v| serde_json::from_value::<Filter>(v.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ClientFrame::Req(sub_id, filters))
        }
        "CLOSE" => {
            let sub_id = arr.get(1).and_then(Value::as_str).ok_or_else(|| invalid("CLOSE requires a subId"))?;
            Ok(ClientFrame::Close(sub_id.to_string()))
        }
        "COUNT" => {
            if arr.len() != 3 {
                return Err(invalid("COUNT requires a subId and exactly one filter"));
            }
            let sub_id = arr[1].as_str().ok_or_else(|| invalid("subId must be a string"))?.to_string();
            let filter: Filter = serde_json::from_value(arr[2].clone())?;
            Ok(ClientFrame::Count(sub_id, filter))
        }
        "AUTH" => {
            let evt_val = arr.get(1).ok_or_else(|| invalid("AUTH requires an event"))?;
            let evt: Event = serde_json::from_value(evt_val.clone())?;
            Ok(ClientFrame::Auth(evt))
        }
        other => Err(invalid(format!("unknown command {other}"))),
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Rejected(RejectReason::invalid(msg))
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
