//! Server action: build the configuration, construct the core services,
//! and serve.

use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::api::{self, AppState};
use crate::auth::credentials::CredentialVerifier;
use crate::auth::rate_limit::RateLimiter;
use crate::auth::session::SessionService;
use crate::auth::tokens::TokenService;
use crate::authz::engine::AuthorizationEngine;
use crate::cli::commands;
use crate::config::FieldgateConfig;
use crate::policy::issuer::PolicyIssuer;
use crate::signer::Signer;
use crate::store::{Store, memory::MemoryStore, postgres::PgStore};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub signing_key: SecretString,
    pub access_ttl: String,
    pub refresh_ttl: String,
    pub session_ttl: String,
    pub override_minutes: u32,
    pub cache_ttl_seconds: u64,
}

impl Args {
    /// # Errors
    ///
    /// Returns an error if a required argument is missing.
    pub fn from_matches(matches: &clap::ArgMatches) -> Result<Self> {
        let required = |name: &str| -> Result<String> {
            matches
                .get_one::<String>(name)
                .cloned()
                .ok_or_else(|| anyhow!("missing required argument: --{name}"))
        };
        Ok(Self {
            port: matches
                .get_one::<u16>(commands::ARG_PORT)
                .copied()
                .unwrap_or(8080),
            dsn: matches.get_one::<String>(commands::ARG_DSN).cloned(),
            signing_key: SecretString::from(required(commands::ARG_SIGNING_KEY)?),
            access_ttl: required(commands::ARG_ACCESS_TTL)?,
            refresh_ttl: required(commands::ARG_REFRESH_TTL)?,
            session_ttl: required(commands::ARG_SESSION_TTL)?,
            override_minutes: matches
                .get_one::<u32>(commands::ARG_OVERRIDE_MINUTES)
                .copied()
                .unwrap_or(120),
            cache_ttl_seconds: matches
                .get_one::<u64>(commands::ARG_CACHE_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }

    /// Run the server. Signer or TTL misconfiguration aborts startup here;
    /// nothing is served with a broken core.
    ///
    /// # Errors
    ///
    /// Returns an error on configuration, database or bind failures.
    pub async fn execute(self) -> Result<()> {
        let config = FieldgateConfig::new()
            .with_token_ttls(self.access_ttl.clone(), self.refresh_ttl.clone())
            .with_session_ttl(self.session_ttl.clone())
            .with_override_minutes(self.override_minutes)
            .with_permission_cache_ttl(Duration::from_secs(self.cache_ttl_seconds))
            .with_signing_key(self.signing_key.clone());

        let signer =
            Arc::new(Signer::from_config(&config).context("signing key configuration is fatal")?);

        let store: Arc<dyn Store> = if let Some(dsn) = &self.dsn {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            Arc::new(PgStore::new(pool))
        } else {
            info!("No DSN configured; using the in-memory store");
            Arc::new(MemoryStore::new())
        };

        let tokens = Arc::new(
            TokenService::new(signer.clone(), store.clone(), &config)
                .context("token ttl configuration is fatal")?,
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            config.login_limit(),
            config.user_pin_limit(),
            config.supervisor_pin_limit(),
        ));
        let sessions = SessionService::new(
            store.clone(),
            CredentialVerifier::new(config.kdf()),
            rate_limiter,
            tokens.clone(),
            &config,
        )
        .context("session ttl configuration is fatal")?;
        let authz = AuthorizationEngine::new(store.clone(), &config);
        let policy = PolicyIssuer::new(store.clone(), signer, &config);

        let state = Arc::new(AppState {
            store,
            sessions,
            tokens,
            authz,
            policy,
        });
        api::serve(self.port, state).await
    }
}
