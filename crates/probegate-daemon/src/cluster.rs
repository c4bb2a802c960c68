//! Process-wide cluster context.
//!
//! [`ClusterConnection`] owns the handles every gateway component shares:
//! the message bus, the shared state store, the multi-protocol listener
//! and the bounded worker pool. It is built exactly once per process via
//! [`ClusterConnection::establish`]; later callers receive the same
//! `Arc`. Components never build their own bus or store.
//!
//! # Modes
//!
//! - **Standalone** (`selector = "memory"`): in-process bus plus
//!   [`MemoryStorage`](crate::storage::MemoryStorage). No network
//!   dependencies.
//! - **Clustered** (any other selector): the selector is resolved through
//!   a [`BackendRegistry`] of externally supplied backend constructors,
//!   after a TCP reachability probe of the configured coordinator. An
//!   unreachable coordinator or unknown selector is fatal at startup;
//!   there is no degraded mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tracing::info;

use crate::bus::EventBus;
use crate::config::GatewayConfig;
use crate::listener::MultiUseNetServer;
use crate::storage::{SharedStorage, StorageBackend};
use crate::worker::BoundedWorkerPool;

/// How long the coordinator reachability probe waits before failing.
pub const COORDINATOR_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

static CONTEXT: OnceCell<Arc<ClusterConnection>> = OnceCell::const_new();

/// Errors establishing the cluster context.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The storage selector matches no registered backend.
    #[error("unknown storage backend '{selector}'")]
    UnknownBackend {
        /// The configured selector.
        selector: String,
    },

    /// The configured coordinator did not accept a TCP connection.
    #[error("cluster coordinator {host}:{port} unreachable: {reason}")]
    CoordinatorUnreachable {
        /// Coordinator host.
        host: String,
        /// Coordinator port.
        port: u16,
        /// Connect failure or timeout description.
        reason: String,
    },

    /// A clustered selector is configured without a coordinator address.
    /// Normally caught by config validation.
    #[error("storage selector '{selector}' requires a coordinator host and port")]
    MissingCoordinator {
        /// The configured selector.
        selector: String,
    },

    /// A registered backend constructor failed.
    #[error("backend '{selector}' failed to initialize: {reason}")]
    BackendInit {
        /// The configured selector.
        selector: String,
        /// Constructor-reported reason.
        reason: String,
    },

    /// The shared listener could not bind.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        /// Configured listen address.
        addr: String,
        /// Underlying bind error.
        #[source]
        source: std::io::Error,
    },
}

/// Constructor for an externally supplied clustered storage backend.
///
/// Receives the validated coordinator `host:port`.
pub type BackendConstructor = Arc<
    dyn Fn(&str, u16) -> Result<Arc<dyn StorageBackend>, String> + Send + Sync,
>;

/// Registry of clustered storage backend constructors.
///
/// Backend implementations live outside this crate; they register a
/// constructor under their selector id and the cluster context resolves
/// it at startup.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// Empty registry (only the built-in `memory` selector resolves).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `selector`, replacing any previous one.
    pub fn register(&mut self, selector: impl Into<String>, constructor: BackendConstructor) {
        self.constructors.insert(selector.into(), constructor);
    }

    fn resolve(&self, selector: &str) -> Result<&BackendConstructor, ClusterError> {
        self.constructors
            .get(selector)
            .ok_or_else(|| ClusterError::UnknownBackend {
                selector: selector.to_string(),
            })
    }
}

/// Shared handles for one gateway process.
pub struct ClusterConnection {
    bus: Arc<EventBus>,
    storage: SharedStorage,
    server: Arc<MultiUseNetServer>,
    workers: BoundedWorkerPool,
    clustered: bool,
}

impl ClusterConnection {
    /// Build the context from configuration.
    ///
    /// Prefer [`ClusterConnection::establish`] in the daemon; this
    /// constructor exists for embedding and tests, where process-wide
    /// state is unwanted.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError`] if the listener cannot bind, the
    /// coordinator is unreachable, or the selector cannot be resolved.
    pub async fn initialize(
        config: &GatewayConfig,
        registry: &BackendRegistry,
    ) -> Result<Self, ClusterError> {
        let storage = if config.is_clustered() {
            Self::clustered_storage(config, registry).await?
        } else {
            info!("standalone mode, using in-memory shared state");
            SharedStorage::memory()
        };

        let server = MultiUseNetServer::bind(&config.gateway.listen)
            .await
            .map_err(|source| ClusterError::Bind {
                addr: config.gateway.listen.clone(),
                source,
            })?;

        Ok(Self {
            bus: Arc::new(EventBus::new()),
            storage,
            server: Arc::new(server),
            workers: BoundedWorkerPool::default(),
            clustered: config.is_clustered(),
        })
    }

    async fn clustered_storage(
        config: &GatewayConfig,
        registry: &BackendRegistry,
    ) -> Result<SharedStorage, ClusterError> {
        let selector = &config.storage.selector;
        let (Some(host), Some(port)) = (&config.storage.host, config.storage.port) else {
            return Err(ClusterError::MissingCoordinator {
                selector: selector.clone(),
            });
        };

        probe_coordinator(host, port).await?;
        info!(selector, host, port, "cluster coordinator reachable");

        let constructor = registry.resolve(selector)?;
        let backend = constructor(host, port).map_err(|reason| ClusterError::BackendInit {
            selector: selector.clone(),
            reason,
        })?;
        Ok(SharedStorage::new(backend))
    }

    /// Establish the process-wide context, building it on first call.
    ///
    /// Subsequent calls return the already-established context and ignore
    /// their arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError`] from the first (building) call; a failed
    /// establish leaves the slot empty so a retry can succeed.
    pub async fn establish(
        config: &GatewayConfig,
        registry: &BackendRegistry,
    ) -> Result<Arc<Self>, ClusterError> {
        CONTEXT
            .get_or_try_init(|| async { Self::initialize(config, registry).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// The established process-wide context, if any.
    #[must_use]
    pub fn connect() -> Option<Arc<Self>> {
        CONTEXT.get().cloned()
    }

    /// Message bus handle.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Shared state store handle.
    #[must_use]
    pub fn storage(&self) -> SharedStorage {
        self.storage.clone()
    }

    /// The shared multi-protocol listener.
    #[must_use]
    pub fn server(&self) -> Arc<MultiUseNetServer> {
        Arc::clone(&self.server)
    }

    /// Bounded pool for offloaded long-running work.
    #[must_use]
    pub fn workers(&self) -> &BoundedWorkerPool {
        &self.workers
    }

    /// Whether this context runs against a clustered backend.
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        self.clustered
    }
}

async fn probe_coordinator(host: &str, port: u16) -> Result<(), ClusterError> {
    let attempt = TcpStream::connect((host, port));
    match tokio::time::timeout(COORDINATOR_PROBE_TIMEOUT, attempt).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(error)) => Err(ClusterError::CoordinatorUnreachable {
            host: host.to_string(),
            port,
            reason: error.to_string(),
        }),
        Err(_) => Err(ClusterError::CoordinatorUnreachable {
            host: host.to_string(),
            port,
            reason: format!("connect timed out after {COORDINATOR_PROBE_TIMEOUT:?}"),
        }),
    }
}
