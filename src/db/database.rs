//! Store (spec §4.1): the SQL connection pool, the Bloom filter, and every
//! durable operation the rest of the relay needs.

use super::entities::prelude::{
    ClusterSyncStateActiveModel, ClusterSyncStateEntity, EventActiveModel, EventColumn, EventEntity,
    EventModel,
};
use super::migration::Migrator;
use crate::bloom::BloomFilter;
use crate::common::config::DatabaseConfig;
use crate::common::consts;
use crate::common::error;
use crate::event::{Category, Event};
use crate::filter::{Filter, SortOrder};
use crate::validate::DeletionLookup;
use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of `Store::insert` (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,
    Duplicate,
    Rejected(String),
}

/// Best-effort cluster health summary (spec §4.1, §9 "Global mutable state").
#[derive(Debug, Clone)]
pub struct ClusterHealth {
    pub nodes: u32,
    pub live: u32,
    pub status: String,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<DatabaseConnection>,
    bloom: Arc<BloomFilter>,
    node_id: String,
}

/// Applies pending migrations against `url`. Used by `relay migrate` and at
/// startup by `Node::new`.
pub async fn run_migrations(url: &str) -> Result<(), DbErr> {
    let db = Database::connect(url).await?;
    Migrator::up(&db, None).await
}

impl Store {
    pub async fn new(config: &DatabaseConfig, node_id: &str, max_ws_connections: usize) -> error::Result<Self> {
        let url = config.resolved_url()?;
        let (pool_max, pool_min) = DatabaseConfig::pool_bounds_for(max_ws_connections);

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(pool_max.max(config.max_connect_pool))
            .min_connections(pool_min.max(config.min_connect_pool))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .max_lifetime(Duration::from_secs(consts::DB_CONN_MAX_LIFETIME_SECS))
            .idle_timeout(Duration::from_secs(consts::DB_CONN_IDLE_TIMEOUT_SECS));

        let conn = connect_with_retry(opt).await?;
        let bloom = Arc::new(BloomFilter::new_default());

        let store = Self {
            conn: Arc::new(conn),
            bloom,
            node_id: node_id.to_string(),
        };
        store.rebuild_bloom().await?;
        Ok(store)
    }

    /// Rebuilds the bloom filter from `SELECT id FROM events` (spec §3.2).
    async fn rebuild_bloom(&self) -> error::Result<()> {
        let ids: Vec<String> = EventEntity::find()
            .select_only()
            .column(EventColumn::Id)
            .into_tuple()
            .all(self.conn.as_ref())
            .await?;
        for id in ids {
            self.bloom.insert(&id);
        }
        Ok(())
    }

    /// Dispatches on category (spec §3.3, §4.1). Bound by the write deadline
    /// (spec §5).
    pub async fn insert(&self, evt: &Event) -> error::Result<InsertOutcome> {
        with_timeout(consts::SQL_WRITE_TIMEOUT_SECS, self.insert_inner(evt)).await
    }

    async fn insert_inner(&self, evt: &Event) -> error::Result<InsertOutcome> {
        if self.bloom.may_contain(&evt.id) && self.exists_inner(&evt.id).await? {
            return Ok(InsertOutcome::Duplicate);
        }

        let result = match evt.category() {
            Category::Ephemeral => {
                // Never stored, but `Stored` tells the caller to forward it
                // to the dispatcher for live fan-out (spec §3.3, P7).
                return Ok(InsertOutcome::Stored);
            }
            Category::Replaceable => {
                let cond = sea_orm::Condition::all()
                    .add(EventColumn::Pubkey.eq(evt.pubkey.clone()))
                    .add(EventColumn::Kind.eq(evt.kind as i32));
                self.replace_then_insert(evt, cond).await
            }
            Category::Addressable => match evt.d_tag() {
                Some(d) => self.replace_addressable_then_insert(evt, d).await,
                None => Ok(InsertOutcome::Rejected("addressable event missing d tag".into())),
            },
            Category::Deletion => self.insert_deletion(evt).await,
            Category::Regular => self.plain_insert(evt).await,
        };

        if let Ok(InsertOutcome::Stored) = &result {
            self.bloom.insert(&evt.id);
        }
        result
    }

    async fn plain_insert(&self, evt: &Event) -> error::Result<InsertOutcome> {
        match model_for(evt).insert(self.conn.as_ref()).await {
            Ok(_) => Ok(InsertOutcome::Stored),
            Err(e) if is_duplicate_key(&e) => {
                self.bloom.insert(&evt.id);
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replaceable kinds (spec §3.3, §4.1, P4): delete-then-insert in a transaction.
    async fn replace_then_insert(&self, evt: &Event, cond: sea_orm::Condition) -> error::Result<InsertOutcome> {
        let txn = self.conn.begin().await?;
        if let Some(existing) = EventEntity::find().filter(cond.clone()).one(&txn).await? {
            if supersedes(&existing, evt) {
                txn.rollback().await?;
                return Ok(InsertOutcome::Duplicate);
            }
        }
        EventEntity::delete_many().filter(cond).exec(&txn).await?;
        self.finish_insert(txn, evt).await
    }

    /// Addressable kinds (spec §3.3, §4.1, P5): keyed by `(pubkey, kind, d)`.
    /// `d` lives inside the `tags` jsonb column, so the match on `d` is done
    /// in application code rather than a SQL predicate.
    async fn replace_addressable_then_insert(&self, evt: &Event, d: &str) -> error::Result<InsertOutcome> {
        let cond = EventColumn::Pubkey
            .eq(evt.pubkey.clone())
            .and(EventColumn::Kind.eq(evt.kind as i32));
        let txn = self.conn.begin().await?;
        let candidates = EventEntity::find().filter(cond).all(&txn).await?;
        for existing in candidates.iter().filter(|row| d_tag_of(row).as_deref() == Some(d)) {
            if supersedes(existing, evt) {
                txn.rollback().await?;
                return Ok(InsertOutcome::Duplicate);
            }
            EventEntity::delete_by_id(existing.id.clone()).exec(&txn).await?;
        }
        self.finish_insert(txn, evt).await
    }

    /// `InsertDeletion` (spec §4.1, §4.5 step 6, P6): deletes author-owned
    /// targets, then stores the deletion event itself, in one transaction.
    async fn insert_deletion(&self, evt: &Event) -> error::Result<InsertOutcome> {
        let targets: Vec<String> = evt.deletion_targets().into_iter().map(str::to_string).collect();
        let txn = self.conn.begin().await?;
        if !targets.is_empty() {
            EventEntity::delete_many()
                .filter(EventColumn::Pubkey.eq(evt.pubkey.clone()))
                .filter(EventColumn::Id.is_in(targets))
                .exec(&txn)
                .await?;
        }
        self.finish_insert(txn, evt).await
    }

    async fn finish_insert(&self, txn: DatabaseTransaction, evt: &Event) -> error::Result<InsertOutcome> {
        match model_for(evt).insert(&txn).await {
            Ok(_) => {
                txn.commit().await?;
                Ok(InsertOutcome::Stored)
            }
            Err(e) if is_duplicate_key(&e) => {
                txn.rollback().await?;
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => {
                txn.rollback().await?;
                Err(e.into())
            }
        }
    }

    /// Bound by the read deadline (spec §5).
    pub async fn query(&self, filter: &Filter) -> error::Result<Vec<Event>> {
        with_timeout(consts::SQL_READ_TIMEOUT_SECS, async {
            let mut select = EventEntity::find();
            select = apply_filter_predicates(select, filter);

            let limit = filter.effective_limit();
            let desc = matches!(filter.sort_order(), SortOrder::Descending);
            select = if desc {
                select.order_by_desc(EventColumn::CreatedAt).order_by_desc(EventColumn::Id)
            } else {
                select.order_by_asc(EventColumn::CreatedAt).order_by_asc(EventColumn::Id)
            };

            let rows = select.limit(limit as u64).all(self.conn.as_ref()).await?;
            let mut events: Vec<Event> = rows.iter().map(event_of).collect();
            if desc {
                // Backlog is always delivered oldest-first (spec §4.4).
                events.reverse();
            }
            Ok(events)
        })
        .await
    }

    /// Bound by the read deadline (spec §5).
    pub async fn count(&self, filter: &Filter) -> error::Result<i64> {
        with_timeout(consts::SQL_READ_TIMEOUT_SECS, async {
            let mut select = EventEntity::find();
            select = apply_filter_predicates(select, filter);
            Ok(select.count(self.conn.as_ref()).await? as i64)
        })
        .await
    }

    /// SQL-authoritative existence check (spec §4.1, used only on bloom
    /// hit). Bound by the read deadline (spec §5).
    pub async fn exists(&self, id: &str) -> error::Result<bool> {
        with_timeout(consts::SQL_READ_TIMEOUT_SECS, self.exists_inner(id)).await
    }

    async fn exists_inner(&self, id: &str) -> error::Result<bool> {
        Ok(EventEntity::find_by_id(id.to_string()).one(self.conn.as_ref()).await?.is_some())
    }

    /// Deletes rows whose `["expiration", t]` tag has `t <= now` (spec §4.1).
    /// Runs hourly; a full scan is acceptable at that cadence. Bound by the
    /// write deadline (spec §5).
    pub async fn clean_expired(&self) -> error::Result<u64> {
        with_timeout(consts::SQL_WRITE_TIMEOUT_SECS, async {
            let now = now_secs();
            let rows = EventEntity::find().all(self.conn.as_ref()).await?;
            let mut deleted = 0u64;
            for row in rows {
                let expired = expiration_of(&row).is_some_and(|t| t <= now);
                if expired {
                    EventEntity::delete_by_id(row.id).exec(self.conn.as_ref()).await?;
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
        .await
    }

    /// Best-effort cluster health probe (spec §4.1, §B supplemented features).
    pub async fn cluster_health(&self) -> ClusterHealth {
        match ClusterSyncStateEntity::find().all(self.conn.as_ref()).await {
            Ok(rows) => {
                let stale_after = consts::CROSS_NODE_POLL_INTERVAL_SECS as i64 * 10;
                let live = rows
                    .iter()
                    .filter(|r| now_secs() - r.updated_at.timestamp() < stale_after)
                    .count() as u32;
                ClusterHealth {
                    nodes: rows.len().max(1) as u32,
                    live: live.max(1),
                    status: "ok".to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cluster health probe failed");
                ClusterHealth { nodes: 1, live: 1, status: "degraded".to_string() }
            }
        }
    }

    /// True when more than one node has recently touched `cluster_sync_state`
    /// — the dispatcher's signal to run the cross-node poller (spec §4.3).
    pub async fn is_cluster_mode(&self) -> bool {
        self.cluster_health().await.nodes > 1
    }

    pub async fn last_seen(&self) -> error::Result<i64> {
        match ClusterSyncStateEntity::find_by_id(self.node_id.clone()).one(self.conn.as_ref()).await? {
            Some(row) => Ok(row.last_seen),
            None => {
                let init = now_secs();
                ClusterSyncStateActiveModel {
                    node_id: Set(self.node_id.clone()),
                    last_seen: Set(init),
                    updated_at: Set(chrono::Utc::now().into()),
                }
                .insert(self.conn.as_ref())
                .await?;
                Ok(init)
            }
        }
    }

    pub async fn advance_last_seen(&self, last_seen: i64) -> error::Result<()> {
        ClusterSyncStateActiveModel {
            node_id: Set(self.node_id.clone()),
            last_seen: Set(last_seen),
            updated_at: Set(chrono::Utc::now().into()),
        }
        .save(self.conn.as_ref())
        .await?;
        Ok(())
    }

    /// Events authored elsewhere since `last_seen`, ordered `(created_at, id)`
    /// ascending so polling is deterministic across ties (spec §5).
    pub async fn events_since(&self, last_seen: i64, now: i64) -> error::Result<Vec<Event>> {
        let rows = EventEntity::find()
            .filter(EventColumn::CreatedAt.gt(last_seen))
            .filter(EventColumn::CreatedAt.lte(now))
            .order_by_asc(EventColumn::CreatedAt)
            .order_by_asc(EventColumn::Id)
            .all(self.conn.as_ref())
            .await?;
        Ok(rows.iter().map(event_of).collect())
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }
}

#[async_trait]
impl DeletionLookup for Store {
    async fn pubkey_of(&self, id: &str) -> Option<String> {
        with_timeout(consts::SQL_READ_TIMEOUT_SECS, async {
            Ok(EventEntity::find_by_id(id.to_string()).one(self.conn.as_ref()).await?)
        })
        .await
        .ok()
        .flatten()
        .map(|row| row.pubkey)
    }
}

/// Whether `existing` should be kept over `incoming` under replaceable /
/// addressable idempotence: greater `created_at` wins, ties broken by the
/// lexicographically greater `id` (spec P4, P5).
fn supersedes(existing: &EventModel, incoming: &Event) -> bool {
    existing.created_at > incoming.created_at
        || (existing.created_at == incoming.created_at && existing.id > incoming.id)
}

fn apply_filter_predicates(mut select: Select<EventEntity>, filter: &Filter) -> Select<EventEntity> {
    if let Some(ids) = &filter.ids {
        select = select.filter(EventColumn::Id.is_in(ids.clone()));
    }
    if let Some(authors) = &filter.authors {
        select = select.filter(EventColumn::Pubkey.is_in(authors.clone()));
    }
    if let Some(kinds) = &filter.kinds {
        select = select.filter(EventColumn::Kind.is_in(kinds.iter().map(|k| *k as i32)));
    }
    if let Some(since) = filter.since {
        select = select.filter(EventColumn::CreatedAt.gte(since));
    }
    if let Some(until) = filter.until {
        select = select.filter(EventColumn::CreatedAt.lte(until));
    }
    if let Some(search) = &filter.search {
        let escaped = search.replace('%', "\\%").replace('_', "\\_").to_lowercase();
        select = select.filter(Expr::expr(Func::lower(Expr::col(EventColumn::Content))).like(format!("%{escaped}%")));
    }
    // Tag containment; the production planner (§4.4) would instead route
    // through the inverted `(kind, tags)` / `(pubkey, tags)` indexes.
    for (key, values) in &filter.tags {
        if let Some(name) = key.strip_prefix('#') {
            let options: Vec<String> = values
                .iter()
                .map(|v| format!("[\"{}\",\"{}\"]", name.replace('"', "\\\""), v.replace('"', "\\\"")))
                .collect();
            select = select.filter(Expr::cust(format!("tags @> '[{}]'::jsonb", options.join(","))));
        }
    }
    select
}

/// Races `fut` against `secs`, mapping an overrun to `Error::DbTimeout`
/// (spec §5: "a per-call deadline").
async fn with_timeout<T, Fut>(secs: u64, fut: Fut) -> error::Result<T>
where
    Fut: std::future::Future<Output = error::Result<T>>,
{
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| error::Error::DbTimeout)?
}

async fn connect_with_retry(opt: ConnectOptions) -> Result<DatabaseConnection, DbErr> {
    let mut attempt = 0u32;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < 5 => {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                tracing::warn!(attempt, error = %e, "database connection failed, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn model_for(evt: &Event) -> EventActiveModel {
    EventActiveModel {
        id: Set(evt.id.clone()),
        pubkey: Set(evt.pubkey.clone()),
        created_at: Set(evt.created_at),
        kind: Set(evt.kind as i32),
        tags: Set(serde_json::to_value(&evt.tags).unwrap_or(serde_json::Value::Array(vec![]))),
        content: Set(evt.content.clone()),
        sig: Set(evt.sig.clone()),
    }
}

fn event_of(row: &EventModel) -> Event {
    Event {
        id: row.id.clone(),
        pubkey: row.pubkey.clone(),
        created_at: row.created_at,
        kind: row.kind as u16,
        tags: serde_json::from_value(row.tags.clone()).unwrap_or_default(),
        content: row.content.clone(),
        sig: row.sig.clone(),
    }
}

fn d_tag_of(row: &EventModel) -> Option<String> {
    tag_value_of(row, "d")
}

fn expiration_of(row: &EventModel) -> Option<i64> {
    tag_value_of(row, "expiration").and_then(|v| v.parse().ok())
}

fn tag_value_of(row: &EventModel, name: &str) -> Option<String> {
    row.tags
        .as_array()?
        .iter()
        .filter_map(|t| t.as_array())
        .find(|t| t.first().and_then(|v| v.as_str()) == Some(name))
        .and_then(|t| t.get(1))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn is_duplicate_key(err: &DbErr) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("duplicate") || msg.contains("unique") || msg.contains("already exists")
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
