//! Top-level wiring for session-sync.
//!
//! [`SyncRuntime`] owns one of each component and connects them in order:
//! token store, session manager, subscription registry, dashboard
//! aggregator. The session manager is the only writer of the token; the
//! registry and the aggregator follow it through state listeners.

mod error;

pub use error::{RuntimeError, RuntimeResult};

use api_transport::{HttpTransport, Transport};
use dashboard_aggregator::{AggregatorConfig, DashboardAggregator};
use live_subscriptions::{LiveFeedTransport, MemoryFeedHub, PollingFeedTransport, SubscriptionRegistry};
use session_auth::{SessionManager, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::{Config, Paths};
use token_store::{FileStorage, SecureStorage, TokenReader, TokenStore};
use tracing::{info, warn};

/// Where live feeds come from.
pub enum FeedBackend {
    /// Re-fetch feeds over the REST API at this interval.
    Polling { interval: Duration },
    /// In-process hub, mostly for tests and demos.
    Memory(MemoryFeedHub),
    Custom(Arc<dyn LiveFeedTransport>),
}

impl FeedBackend {
    pub fn polling_from(config: &Config) -> Self {
        FeedBackend::Polling {
            interval: config.feed_poll_interval(),
        }
    }
}

/// Build the aggregator's settings from the file configuration.
pub fn aggregator_config(config: &Config) -> AggregatorConfig {
    AggregatorConfig {
        mutation_settle_delay: config.mutation_settle_delay(),
        poll_interval: config.poll_interval(),
        ..AggregatorConfig::default()
    }
}

pub struct SyncRuntime {
    config: Config,
    session: Arc<SessionManager>,
    subscriptions: SubscriptionRegistry,
    dashboard: DashboardAggregator,
}

impl SyncRuntime {
    /// Wire all components. Nothing talks to the network until
    /// [`start`](Self::start).
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: Config,
        storage: Box<dyn SecureStorage>,
        transport: Arc<dyn Transport>,
        feeds: FeedBackend,
    ) -> Self {
        Self::with_shared_storage(config, Arc::from(storage), transport, feeds)
    }

    fn with_shared_storage(
        config: Config,
        storage: Arc<dyn SecureStorage>,
        transport: Arc<dyn Transport>,
        feeds: FeedBackend,
    ) -> Self {
        let session = Arc::new(SessionManager::new(
            TokenStore::from_shared(storage),
            Arc::clone(&transport),
        ));

        let feeds: Arc<dyn LiveFeedTransport> = match feeds {
            FeedBackend::Polling { interval } => Arc::new(PollingFeedTransport::new(
                Arc::clone(&transport),
                session.token_reader(),
                interval,
            )),
            FeedBackend::Memory(hub) => Arc::new(hub),
            FeedBackend::Custom(feeds) => feeds,
        };

        let subscriptions = SubscriptionRegistry::new(
            Arc::clone(&session),
            feeds,
            config.subscription_settle_delay(),
        );
        let dashboard = DashboardAggregator::new(
            Arc::clone(&session),
            transport,
            aggregator_config(&config),
        );

        Self {
            config,
            session,
            subscriptions,
            dashboard,
        }
    }

    /// Runtime backed by the credentials file under `paths` and the HTTP
    /// transport at the configured base URL.
    pub fn from_config(config: Config, paths: &Paths) -> RuntimeResult<Self> {
        paths.ensure_dirs()?;
        let storage: Arc<dyn SecureStorage> =
            Arc::new(FileStorage::new(paths.credentials_file()));

        // The transport is built before the session; it reads the token the
        // session's store will write, through the same backend.
        let transport = HttpTransport::from_config(&config)?
            .with_token_reader(TokenReader::from_storage(Arc::clone(&storage)));
        info!(base_url = %transport.base_url(), "Using HTTP transport");

        let feeds = FeedBackend::polling_from(&config);
        Ok(Self::with_shared_storage(
            config,
            storage,
            Arc::new(transport),
            feeds,
        ))
    }

    /// Verify the stored session and start dashboard polling.
    ///
    /// A failed check leaves the runtime signed out; it is logged, not
    /// returned.
    pub async fn start(&self) -> SessionStatus {
        let status = match self.session.check_auth_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Startup session check failed");
                self.session.status()
            }
        };
        self.dashboard.start();
        info!(status = %status, "Sync runtime started");
        status
    }

    /// Stop background work. Listeners and the session stay as they are.
    pub fn shutdown(&self) {
        self.dashboard.stop();
        info!("Sync runtime stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn dashboard(&self) -> &DashboardAggregator {
        &self.dashboard
    }
}
