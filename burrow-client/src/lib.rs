//! burrow-client - client side of the burrow DNS tunnel
//!
//! Answers standard DNS queries on a local UDP socket and resolves them
//! through an AEAD-encrypted WebSocket tunnel to the upstream peer.
//! Many concurrent queries share one tunnel connection, correlated by
//! request id; a supervisor keeps redialing the tunnel after failures,
//! and successful responses can be cached locally.
//!
//! # Example
//!
//! ```no_run
//! use burrow_client::{ClientCore, Config};
//!
//! # async fn example() -> burrow_client::Result<()> {
//! let config = Config::load("burrow-client.toml")?;
//! let core = ClientCore::new(config)?;
//!
//! let shutdown = core.shutdown_handle();
//! // ... send on `shutdown` to stop ...
//! core.run().await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod error;
mod pending;
mod resolver;
mod tunnel;

pub use cache::{CacheStats, ResponseCache};
pub use config::{CacheConfig, ClientConfig, Config};
pub use error::{Error, Result};
pub use pending::PendingTable;
pub use tunnel::{LinkSender, TunnelLink};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use burrow_protocol::{Envelope, Frame};
use tokio::sync::broadcast;

/// Pending-table sweep cadence
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Pending entries older than this are reaped by the sweeper
const PENDING_MAX_AGE: Duration = Duration::from_secs(15);

/// Cache sweep cadence
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything the client owns, constructed once at startup
///
/// The UDP handler tasks, the tunnel supervisor, and the sweepers all
/// share one `Arc<ClientCore>`; the envelope is immutable and the
/// remaining fields guard themselves.
pub struct ClientCore {
    pub(crate) config: Config,
    pub(crate) envelope: Envelope,
    pub(crate) link: TunnelLink,
    pub(crate) pending: PendingTable,
    pub(crate) cache: Option<ResponseCache>,
    next_request_id: AtomicU32,
    shutdown_tx: broadcast::Sender<()>,
}

impl ClientCore {
    /// Build the client core from a validated configuration
    ///
    /// Fails on configuration or salt errors; those are fatal at
    /// startup.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        config.validate()?;

        let salt = config.client.salt_bytes()?;
        let envelope = Envelope::new(&config.client.password, &salt);

        let cache = config
            .cache
            .enabled
            .then(|| ResponseCache::new(config.cache.max_size, config.cache.ttl()));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            config,
            envelope,
            link: TunnelLink::new(),
            pending: PendingTable::new(),
            cache,
            next_request_id: AtomicU32::new(0),
            shutdown_tx,
        }))
    }

    /// Handle that stops [`ClientCore::run`] when sent to
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Whether the tunnel is currently up
    pub async fn tunnel_up(&self) -> bool {
        self.link.is_up().await
    }

    /// Run the resolver, tunnel supervisor, and sweepers until shutdown
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let supervisor = tokio::spawn(tunnel::run_supervisor(
            self.clone(),
            self.shutdown_tx.subscribe(),
        ));
        let pending_sweeper = tokio::spawn(run_pending_sweeper(
            self.clone(),
            self.shutdown_tx.subscribe(),
        ));
        let cache_sweeper = self.cache.is_some().then(|| {
            tokio::spawn(run_cache_sweeper(
                self.clone(),
                self.shutdown_tx.subscribe(),
            ))
        });

        let result = resolver::run(self.clone(), self.shutdown_tx.subscribe()).await;

        supervisor.abort();
        pending_sweeper.abort();
        if let Some(task) = cache_sweeper {
            task.abort();
        }

        result
    }

    /// Allocate a fresh request id
    ///
    /// Monotonic and wrapping; id 0 is reserved for heartbeat traffic
    /// and skipped.
    pub(crate) fn next_request_id(&self) -> u32 {
        loop {
            let id = self
                .next_request_id
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    /// Encode, seal, and write a frame through the given link
    pub(crate) async fn send_frame(&self, link: &LinkSender, frame: &Frame) -> Result<()> {
        let sealed = self.envelope.seal(&frame.encode())?;
        link.send(sealed).await
    }
}

async fn run_pending_sweeper(core: Arc<ClientCore>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(PENDING_SWEEP_INTERVAL);
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let reaped = core.pending.sweep(PENDING_MAX_AGE).await;
                if reaped > 0 {
                    log::debug!("reaped {} stale pending requests", reaped);
                }
            }
        }
    }
}

async fn run_cache_sweeper(core: Arc<ClientCore>, mut shutdown: broadcast::Receiver<()>) {
    let Some(cache) = &core.cache else {
        return;
    };

    let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let swept = cache.sweep().await;
                if swept > 0 {
                    log::debug!("swept {} expired cache entries", swept);
                }
            }
        }
    }
}
