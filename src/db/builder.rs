//! Gateway construction from credentials and a database location.
//!
//! The location is given either as a full URL ([`GatewayBuilder::with_url`])
//! or as driver parts ([`GatewayBuilder::with_driver`]), never both.
//!
//! Pool settings are layered: URL query options first, then
//! [`GatewayBuilder::with_pool_options`], then the pool size and lifetime
//! passed to [`GatewayBuilder::new`], then the statement cache capacity.

use crate::config::{DatabaseConfig, PoolOptions, ReleasePolicy};
use crate::db::DatabaseType;
use crate::db::gateway::Gateway;
use crate::db::pool::SqlxPool;
use crate::error::{DbError, DbResult};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
enum Target {
    Url(String),
    Driver {
        db_type: DatabaseType,
        host: String,
        port: Option<u16>,
        database: String,
    },
}

/// Builder for a [`Gateway`] over a sqlx pool.
#[derive(Clone)]
pub struct GatewayBuilder {
    username: String,
    password: String,
    max_lifetime: Duration,
    max_pool_size: u32,
    target: Option<Target>,
    conflicting_target: bool,
    properties: BTreeMap<String, String>,
    statement_cache: Option<usize>,
    pool_options: PoolOptions,
    release_policy: Option<ReleasePolicy>,
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("username", &self.username)
            .field("password", &"***")
            .field("max_lifetime", &self.max_lifetime)
            .field("max_pool_size", &self.max_pool_size)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("statement_cache", &self.statement_cache)
            .field("release_policy", &self.release_policy)
            .finish_non_exhaustive()
    }
}

impl GatewayBuilder {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        max_lifetime: Duration,
        max_pool_size: u32,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            max_lifetime,
            max_pool_size,
            target: None,
            conflicting_target: false,
            properties: BTreeMap::new(),
            statement_cache: None,
            pool_options: PoolOptions::default(),
            release_policy: None,
        }
    }

    /// Connect with a full database URL. Credentials from [`Self::new`] fill
    /// in a URL that carries none.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.set_target(Target::Url(url.into()));
        self
    }

    /// Connect by backend, host, port and database name. For SQLite the
    /// database is the file path and host and port are ignored.
    pub fn with_driver(
        mut self,
        db_type: DatabaseType,
        host: impl Into<String>,
        port: Option<u16>,
        database: impl Into<String>,
    ) -> Self {
        self.set_target(Target::Driver {
            db_type,
            host: host.into(),
            port,
            database: database.into(),
        });
        self
    }

    /// Extra driver properties, passed as URL query parameters.
    pub fn with_properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Prepared statements cached per connection.
    pub fn with_statement_cache(mut self, capacity: usize) -> Self {
        self.statement_cache = Some(capacity);
        self
    }

    pub fn with_pool_options(mut self, options: PoolOptions) -> Self {
        self.pool_options = options;
        self
    }

    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = Some(policy);
        self
    }

    /// Repeating the same kind of call replaces the target; mixing URL and
    /// driver modes is rejected when the config is resolved.
    fn set_target(&mut self, target: Target) {
        if let Some(current) = &self.target {
            if std::mem::discriminant(current) != std::mem::discriminant(&target) {
                self.conflicting_target = true;
            }
        }
        self.target = Some(target);
    }

    /// Resolve the connection URL and the layered pool configuration.
    pub fn database_config(&self) -> DbResult<DatabaseConfig> {
        let url = self.connection_url()?;
        let mut config = DatabaseConfig::parse(url.as_str()).map_err(DbError::invalid_input)?;

        let opts = merge_options(config.pool_options, &self.pool_options);
        config.pool_options = PoolOptions {
            max_connections: Some(self.max_pool_size),
            max_lifetime_secs: Some(lifetime_secs(self.max_lifetime)),
            statement_cache_capacity: self.statement_cache.or(opts.statement_cache_capacity),
            ..opts
        };
        config
            .pool_options
            .validate()
            .map_err(DbError::invalid_input)?;

        if let Some(policy) = self.release_policy {
            config.release_policy = policy;
        }
        Ok(config)
    }

    /// Create the pool and wrap it in a gateway.
    pub async fn build(self) -> DbResult<Gateway<SqlxPool>> {
        let config = self.database_config()?;
        let pool = SqlxPool::connect(&config).await?;
        Ok(Gateway::with_policy(pool, config.release_policy))
    }

    fn connection_url(&self) -> DbResult<Url> {
        if self.conflicting_target {
            return Err(DbError::invalid_input(
                "Configure either a URL or a driver, not both",
            ));
        }

        let mut url = match &self.target {
            None => {
                return Err(DbError::invalid_input(
                    "No database configured; call with_url or with_driver",
                ));
            }
            Some(Target::Url(raw)) => {
                let mut url = Url::parse(raw)
                    .map_err(|e| DbError::invalid_input(format!("Invalid URL: {}", e)))?;
                if url.username().is_empty() {
                    self.apply_credentials(&mut url)?;
                }
                url
            }
            Some(Target::Driver {
                db_type: DatabaseType::SQLite,
                database,
                ..
            }) => Url::parse(&format!("sqlite:{}", database))
                .map_err(|e| DbError::invalid_input(format!("Invalid SQLite path: {}", e)))?,
            Some(Target::Driver {
                db_type,
                host,
                port,
                database,
            }) => {
                let mut url = Url::parse(&format!("{}://{}", db_type.scheme(), host))
                    .map_err(|e| DbError::invalid_input(format!("Invalid host: {}", e)))?;
                url.set_port(port.or(db_type.default_port()))
                    .map_err(|_| DbError::invalid_input("Cannot set port on URL"))?;
                url.set_path(database);
                self.apply_credentials(&mut url)?;
                url
            }
        };

        if !self.properties.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.properties);
        }
        Ok(url)
    }

    fn apply_credentials(&self, url: &mut Url) -> DbResult<()> {
        // SQLite URLs have no authority section.
        if url.cannot_be_a_base() || url.scheme() == "sqlite" {
            return Ok(());
        }
        if !self.username.is_empty() {
            url.set_username(&self.username)
                .map_err(|_| DbError::invalid_input("Cannot set username on URL"))?;
        }
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| DbError::invalid_input("Cannot set password on URL"))?;
        }
        Ok(())
    }
}

/// Whole seconds, rounded up so a sub-second lifetime does not become zero.
fn lifetime_secs(lifetime: Duration) -> u64 {
    let secs = lifetime.as_secs();
    if lifetime.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Fields set in `overrides` win over `base`.
fn merge_options(base: PoolOptions, overrides: &PoolOptions) -> PoolOptions {
    PoolOptions {
        max_connections: overrides.max_connections.or(base.max_connections),
        min_connections: overrides.min_connections.or(base.min_connections),
        idle_timeout_secs: overrides.idle_timeout_secs.or(base.idle_timeout_secs),
        acquire_timeout_secs: overrides.acquire_timeout_secs.or(base.acquire_timeout_secs),
        max_lifetime_secs: overrides.max_lifetime_secs.or(base.max_lifetime_secs),
        test_before_acquire: overrides.test_before_acquire.or(base.test_before_acquire),
        statement_cache_capacity: overrides
            .statement_cache_capacity
            .or(base.statement_cache_capacity),
    }
}
