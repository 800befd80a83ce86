use anyhow::{Context, Result};
use std::sync::Arc;

use crate::{
    clock::{SharedClock, SystemClock},
    config::{Config, PipelineConfig},
    crypto::password::PasswordHasher,
    middleware_layer::{
        auth::IdentityResolver,
        csrf::CsrfGuard,
        guards::RoleGuard,
        rate_limit::{RateLimitStage, RateLimiter, SweeperHandle},
        responder::{HtmlResponder, JsonResponder, SharedResponder},
        trace::RequestTrace,
    },
    repositories::{postgres::PgStore, store::Store},
};

/// Path of the login view that unauthenticated page requests are sent to.
pub const LOGIN_PATH: &str = "/login";

/// The stage instances for one request pipeline.
///
/// Both pipelines run the same stage code; they differ in limits and responder.
#[derive(Clone)]
pub struct Pipeline {
    pub trace: RequestTrace,
    pub rate_limit: RateLimitStage,
    pub csrf: CsrfGuard,
    pub responder: SharedResponder,
    pub max_body_bytes: usize,
}

impl Pipeline {
    fn new(
        limits: &PipelineConfig,
        trace: RequestTrace,
        csrf: CsrfGuard,
        responder: SharedResponder,
        clock: SharedClock,
    ) -> Result<Self> {
        let limiter = RateLimiter::new(limits.rate_limit, limits.rate_window, clock)?;
        Ok(Self {
            trace,
            rate_limit: RateLimitStage {
                limiter,
                responder: responder.clone(),
            },
            csrf,
            responder,
            max_body_bytes: limits.max_body_bytes,
        })
    }
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Sessions, API tokens and users.
    pub store: Arc<dyn Store>,
    pub clock: SharedClock,
    pub hasher: PasswordHasher,
    pub identity: IdentityResolver,
    /// Browser traffic.
    pub web: Pipeline,
    /// Machine API traffic.
    pub api: Pipeline,
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = crate::db::create_pool(&config.database_url)?;
        crate::db::apply_schema(&pool).await?;
        tracing::info!("✅ PostgreSQL pool initialized and schema applied");

        Self::from_parts(config.clone(), Arc::new(PgStore::new(pool)), Arc::new(SystemClock))
    }

    /// Assembles the state around an arbitrary store and clock.
    pub fn from_parts(config: Config, store: Arc<dyn Store>, clock: SharedClock) -> Result<Self> {
        let hasher = PasswordHasher::new(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
        )
        .context("Invalid ARGON2_* settings")?;

        let identity = IdentityResolver::new(store.clone(), clock.clone(), config.lookup_timeout);
        let trace = RequestTrace {
            trust_inbound: config.trust_request_id_header,
        };

        let html: SharedResponder = Arc::new(HtmlResponder::new(LOGIN_PATH));
        let json: SharedResponder = Arc::new(JsonResponder);

        let web = Pipeline::new(
            &config.web,
            trace,
            CsrfGuard::new(config.csrf.clone(), html.clone()),
            html,
            clock.clone(),
        )
        .context("Invalid WEB_* settings")?;
        tracing::info!(
            "✅ Web pipeline: {} req / {:?}, body ≤ {} bytes",
            config.web.rate_limit,
            config.web.rate_window,
            config.web.max_body_bytes
        );

        let api = Pipeline::new(
            &config.api,
            trace,
            CsrfGuard::new(config.csrf.clone(), json.clone()),
            json,
            clock.clone(),
        )
        .context("Invalid API_* settings")?;
        tracing::info!(
            "✅ API pipeline: {} req / {:?}, body ≤ {} bytes",
            config.api.rate_limit,
            config.api.rate_window,
            config.api.max_body_bytes
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            clock,
            hasher,
            identity,
            web,
            api,
        })
    }

    /// A role guard answering through `responder`.
    pub fn role_guard(&self, role: &str, responder: SharedResponder) -> RoleGuard {
        RoleGuard::new(role, self.store.clone(), responder, self.config.lookup_timeout)
    }

    /// Starts the idle-key sweepers for both rate limiters.
    pub fn spawn_sweepers(&self) -> Vec<SweeperHandle> {
        vec![
            self.web.rate_limit.limiter.spawn_sweeper(),
            self.api.rate_limit.limiter.spawn_sweeper(),
        ]
    }
}
