//! `Node` (spec §2, §3.6): the composition root. Owns `Store`,
//! `EventProcessor`, `EventDispatcher`, the rate limiter, and the identity
//! keypair; wires them to the HTTP/WebSocket server.

use crate::common::config::Config;
use crate::common::consts;
use crate::common::error::Result;
use crate::db::Store;
use crate::dispatcher::Dispatcher;
use crate::identity::IdentityStore;
use crate::processor::EventProcessor;
use crate::ratelimit::RateLimiter;
use crate::server::{self, RelayInfo};
use crate::session::SharedState;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Node {
    config: Config,
    shared: SharedState,
    identity: IdentityStore,
    shutdown: CancellationToken,
    _processor: EventProcessor,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let identity = IdentityStore::load(config.relay.public_key.as_deref())?;

        let store = Store::new(
            &config.database,
            &config.general.instance_name,
            config.relay.throttling.max_connections,
        )
        .await?;

        let dispatcher = Dispatcher::spawn(store.clone(), shutdown.clone());
        let processor = EventProcessor::spawn(
            store.clone(),
            dispatcher.clone(),
            consts::DEFAULT_QUEUE_CAPACITY,
            shutdown.clone(),
        );
        let ratelimiter = Arc::new(RateLimiter::new(config.relay.throttling.rate_limit.clone()));

        let blacklist: HashSet<String> = config.relay_policy.blacklist.pubkeys.iter().cloned().collect();
        let whitelist: HashSet<String> = config.relay_policy.whitelist.pubkeys.iter().cloned().collect();

        let shared = SharedState {
            store: store.clone(),
            processor: processor.handle(),
            dispatcher,
            ratelimiter,
            relay_config: Arc::new(config.relay.clone()),
            blacklist: Arc::new(blacklist),
            whitelist: Arc::new(whitelist),
            shutdown: shutdown.clone(),
        };

        spawn_sweepers(store, shared.ratelimiter.clone(), shutdown.clone());

        Ok(Self { config, shared, identity, shutdown, _processor: processor })
    }

    /// Runs the relay server until a shutdown signal arrives (spec §5, §6.5).
    pub async fn run(self) -> Result<()> {
        let addr = self
            .config
            .relay
            .ws_addr
            .parse()
            .map_err(|_| crate::common::error::Error::custom("relay.ws_addr is not a valid socket address"))?;

        let info = RelayInfo::from_config(&self.config.relay, self.identity.public_key_hex());
        let router = server::build_router(self.shared, info);

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        });

        server::serve(router, addr, self.shutdown).await
    }
}

fn spawn_sweepers(store: Store, ratelimiter: Arc<RateLimiter>, shutdown: CancellationToken) {
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(consts::EXPIRED_SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match store.clean_expired().await {
                            Ok(n) if n > 0 => tracing::info!(deleted = n, "expired-event sweep"),
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "expired-event sweep failed"),
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(consts::BAN_SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => ratelimiter.sweep_expired_bans(),
                _ = shutdown.cancelled() => return,
            }
        }
    });
}
