//! Connection resolution: backend description in, connection URL out.
//!
//! SQLite is the default engine and needs only a file path. Networked engines
//! need credentials and a host; each has a default URL scheme that the
//! `driver` setting can override.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use configs::{DatabaseConfig, PoolConfig};
use sea_orm::sqlx::sqlite::SqlitePoolOptions;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, RuntimeErr, SqlxSqliteConnector};
use tracing::info;
use url::Url;

use crate::errors::ConfigurationError;

pub const SQLITE_MEMORY: &str = ":memory:";

/// Networked engines known to the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Mysql,
    Postgres,
    Mssql,
    Oracle,
    Firebird,
    Sybase,
}

impl Engine {
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Mysql => "mysql",
            Engine::Postgres => "postgres",
            Engine::Mssql => "mssql",
            Engine::Oracle => "oracle",
            Engine::Firebird => "firebird",
            Engine::Sybase => "sybase",
        }
    }

    /// URL scheme used when no driver override is configured.
    pub fn default_driver(&self) -> &'static str {
        match self {
            Engine::Mysql => "mysql",
            Engine::Postgres => "postgresql",
            Engine::Mssql => "mssql",
            Engine::Oracle => "oracle",
            Engine::Firebird => "firebird",
            Engine::Sybase => "sybase",
        }
    }

    /// Engine-specific query parameters appended to the URL.
    pub fn params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Engine::Mysql => &[("charset", "utf8mb4")],
            _ => &[],
        }
    }
}

/// Parsed backend description. Each variant carries only what its URL needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Sqlite { path: String },
    Network { engine: Engine, creds: NetworkCredentials },
}

#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub user: String,
    pub pass: String,
    pub host: String,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub driver: Option<String>,
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("user", &self.user)
            .field("pass", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("driver", &self.driver)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    EmbeddedFile,
    Networked,
}

/// Engine a descriptor targets; `Sqlite` or one of the networked engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Sqlite,
    Network(Engine),
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Sqlite => "sqlite",
            EngineKind::Network(e) => e.name(),
        }
    }

    /// Whether this build ships an sqlx driver for the engine.
    pub fn has_driver(&self) -> bool {
        matches!(
            self,
            EngineKind::Sqlite | EngineKind::Network(Engine::Mysql) | EngineKind::Network(Engine::Postgres)
        )
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub kind: ConnectionKind,
    pub engine: EngineKind,
    url: String,
    file: Option<PathBuf>,
}

impl ConnectionDescriptor {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Database file for sqlite; `None` for networked engines and in-memory sqlite.
    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn is_sqlite(&self) -> bool {
        self.engine == EngineKind::Sqlite
    }

    /// URL with the password masked, for logs.
    pub fn redacted(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("***"));
                url.to_string()
            }
            _ => self.url.clone(),
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("kind", &self.kind)
            .field("engine", &self.engine)
            .field("url", &self.redacted())
            .finish()
    }
}

fn required(value: &Option<String>, kind: &'static str, field: &'static str) -> Result<String, ConfigurationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigurationError::MissingField { kind, field }),
    }
}

impl Backend {
    /// Parse the raw `[database]` section.
    pub fn from_config(cfg: &DatabaseConfig) -> Result<Self, ConfigurationError> {
        let kind = cfg.kind.trim().to_ascii_lowercase();
        let engine = match kind.as_str() {
            "sqlite" => return Ok(Backend::Sqlite { path: cfg.path.clone() }),
            "mysql" => Engine::Mysql,
            "postgres" => Engine::Postgres,
            "mssql" => Engine::Mssql,
            "oracle" => Engine::Oracle,
            "firebird" => Engine::Firebird,
            "sybase" => Engine::Sybase,
            _ => return Err(ConfigurationError::UnsupportedBackend(cfg.kind.clone())),
        };
        let name = engine.name();
        let creds = NetworkCredentials {
            user: required(&cfg.user, name, "user")?,
            pass: required(&cfg.pass, name, "pass")?,
            host: required(&cfg.host, name, "host")?,
            port: cfg.port,
            database: cfg.name.clone().filter(|n| !n.trim().is_empty()),
            driver: cfg.driver.clone().filter(|d| !d.trim().is_empty()),
        };
        Ok(Backend::Network { engine, creds })
    }

    pub fn resolve(&self) -> Result<ConnectionDescriptor, ConfigurationError> {
        match self {
            Backend::Sqlite { path } => resolve_sqlite(path),
            Backend::Network { engine, creds } => resolve_network(*engine, creds),
        }
    }
}

/// Turn a `[database]` section into a connection descriptor. No I/O.
pub fn resolve(cfg: &DatabaseConfig) -> Result<ConnectionDescriptor, ConfigurationError> {
    Backend::from_config(cfg)?.resolve()
}

/// Expand a leading `~` and anchor relative paths at the working directory.
pub fn expand_path(raw: &str) -> Result<PathBuf, ConfigurationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigurationError::InvalidPath(raw.to_string()));
    }
    let expanded = if trimmed == "~" {
        dirs::home_dir().ok_or_else(|| ConfigurationError::InvalidPath(raw.to_string()))?
    } else if let Some(rest) = trimmed.strip_prefix("~/") {
        dirs::home_dir()
            .ok_or_else(|| ConfigurationError::InvalidPath(raw.to_string()))?
            .join(rest)
    } else {
        PathBuf::from(trimmed)
    };
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir().map_err(|_| ConfigurationError::InvalidPath(raw.to_string()))?;
    Ok(cwd.join(expanded))
}

fn resolve_sqlite(path: &str) -> Result<ConnectionDescriptor, ConfigurationError> {
    if path.trim() == SQLITE_MEMORY {
        return Ok(ConnectionDescriptor {
            kind: ConnectionKind::EmbeddedFile,
            engine: EngineKind::Sqlite,
            url: "sqlite::memory:".to_string(),
            file: None,
        });
    }
    let file = expand_path(path)?;
    Ok(ConnectionDescriptor {
        kind: ConnectionKind::EmbeddedFile,
        engine: EngineKind::Sqlite,
        url: format!("sqlite://{}?mode=rwc", file.display()),
        file: Some(file),
    })
}

fn resolve_network(engine: Engine, creds: &NetworkCredentials) -> Result<ConnectionDescriptor, ConfigurationError> {
    let scheme = creds.driver.as_deref().unwrap_or(engine.default_driver());
    let invalid = |what: &str| ConfigurationError::InvalidUrl(format!("{what} rejected for {scheme}://{}", creds.host));

    let mut url = Url::parse(&format!("{scheme}://{}", creds.host))
        .map_err(|e| ConfigurationError::InvalidUrl(e.to_string()))?;
    url.set_username(&creds.user).map_err(|_| invalid("user"))?;
    url.set_password(Some(&creds.pass)).map_err(|_| invalid("password"))?;
    if creds.port.is_some() {
        url.set_port(creds.port).map_err(|_| invalid("port"))?;
    }
    url.set_path(&format!("/{}", creds.database.as_deref().unwrap_or_default()));
    if !engine.params().is_empty() {
        url.query_pairs_mut().extend_pairs(engine.params());
    }

    Ok(ConnectionDescriptor {
        kind: ConnectionKind::Networked,
        engine: EngineKind::Network(engine),
        url: url.to_string(),
        file: None,
    })
}

/// Open a connection pool for `descriptor`.
pub async fn connect(descriptor: &ConnectionDescriptor, pool: &PoolConfig) -> Result<DatabaseConnection, DbErr> {
    if !descriptor.engine.has_driver() {
        return Err(DbErr::Custom(format!(
            "no database driver available for {}",
            descriptor.engine.name()
        )));
    }
    if descriptor.is_sqlite() && descriptor.file_path().is_none() {
        return connect_sqlite_memory(descriptor, pool).await;
    }
    let mut opts = ConnectOptions::new(descriptor.url().to_owned());
    opts.max_connections(pool.max_connections)
        .min_connections(pool.min_connections)
        .connect_timeout(Duration::from_secs(pool.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(pool.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(pool.max_lifetime_secs))
        .sqlx_logging(pool.sqlx_logging);
    info!(engine = descriptor.engine.name(), url = %descriptor, "connecting to database");
    Database::connect(opts).await
}

/// Each connection to `sqlite::memory:` owns a private database, so the pool
/// keeps exactly one connection and never recycles it.
async fn connect_sqlite_memory(descriptor: &ConnectionDescriptor, pool: &PoolConfig) -> Result<DatabaseConnection, DbErr> {
    info!(engine = descriptor.engine.name(), url = %descriptor, "opening in-memory database");
    let sqlx_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(pool.acquire_timeout_secs))
        .idle_timeout(None)
        .max_lifetime(None)
        .connect(descriptor.url())
        .await
        .map_err(|e| DbErr::Conn(RuntimeErr::SqlxError(e)))?;
    Ok(SqlxSqliteConnector::from_sqlx_sqlite_pool(sqlx_pool))
}
