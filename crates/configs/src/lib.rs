use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "ROLLAR_CONFIG";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// Where the application's own web API listens; background jobs call back into it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8789,
            request_timeout_secs: default_request_timeout(),
            worker_threads: None,
        }
    }
}

/// Backend description consumed by the connection resolver.
///
/// `kind` selects the engine; `path` is used by sqlite, the remaining fields
/// by networked engines.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            path: default_path(),
            host: None,
            port: None,
            user: None,
            pass: None,
            name: None,
            driver: None,
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_lifetime_secs: default_max_lifetime(),
            acquire_timeout_secs: default_acquire_timeout(),
            sqlx_logging: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level(), json: false }
    }
}

/// The paired front-end component.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_version")]
    pub version: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { version: default_web_version() }
    }
}

fn default_kind() -> String { "sqlite".into() }
fn default_path() -> String { "~/.rollar/rollar.db".into() }
fn default_request_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 600 }
fn default_max_lifetime() -> u64 { 3600 }
fn default_acquire_timeout() -> u64 { 30 }
fn default_level() -> String { "info".into() }
fn default_web_version() -> String { "v0.9.0-beta".into() }

/// Path from `ROLLAR_CONFIG`, or `config.toml` in the working directory.
pub fn default_path_from_env() -> String {
    let _ = dotenvy::dotenv();
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Config path given as `-c <path>`, `--config <path>` or `--config=<path>`.
pub fn path_from_args<I, S>(args: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    while let Some(arg) = args.next() {
        if arg == "-c" || arg == "--config" {
            return args.next().filter(|p| !p.trim().is_empty());
        }
        if let Some(p) = arg.strip_prefix("--config=") {
            return Some(p.to_string()).filter(|p| !p.trim().is_empty());
        }
    }
    None
}

/// Command-line path if given, otherwise [`default_path_from_env`].
pub fn resolve_path<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    path_from_args(args).unwrap_or_else(default_path_from_env)
}

pub fn load_default() -> Result<AppConfig> {
    load_from_file(&default_path_from_env())
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read config file {path}: {e}"))?;
    from_toml(&content)
}

pub fn from_toml(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    pub fn load_and_validate(path: &str) -> Result<Self> {
        let mut cfg = load_from_file(path)?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.database.normalize();
        self.database.pool.validate()?;
        Ok(())
    }

    /// Base URL of the application's own API.
    pub fn api_base(&self) -> String {
        format!("http://{}:{}", self.server.host, self.server.port)
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() || self.host == "0.0.0.0" {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout();
        }
        if self.worker_threads == Some(0) {
            self.worker_threads = None;
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Lower-case the kind and treat blank optional strings as absent.
    pub fn normalize(&mut self) {
        self.kind = self.kind.trim().to_ascii_lowercase();
        for field in [&mut self.host, &mut self.user, &mut self.pass, &mut self.name, &mut self.driver] {
            if field.as_deref().map(|s| s.trim().is_empty()).unwrap_or(false) {
                *field = None;
            }
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_connections == 0 {
            return Err(anyhow!("database.pool.min_connections must be >= 1"));
        }
        if self.max_connections < self.min_connections {
            return Err(anyhow!("database.pool.max_connections must be >= min_connections"));
        }
        if self.connect_timeout_secs == 0 || self.acquire_timeout_secs == 0 {
            return Err(anyhow!("database.pool timeouts must be positive seconds"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg.database.kind, "sqlite");
        assert_eq!(cfg.database.path, "~/.rollar/rollar.db");
        assert_eq!(cfg.server.port, 8789);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.database.pool.max_lifetime_secs, 3600);
    }

    #[test]
    fn networked_database_section() {
        let mut cfg = from_toml(
            r#"
            [database]
            type = "MySQL"
            host = "db.local"
            port = 3306
            user = "rollar"
            pass = "s3cret"
            name = ""
            "#,
        )
        .unwrap();
        cfg.normalize_and_validate().unwrap();
        assert_eq!(cfg.database.kind, "mysql");
        assert_eq!(cfg.database.port, Some(3306));
        assert_eq!(cfg.database.name, None);
        assert_eq!(cfg.database.driver, None);
    }

    #[test]
    fn rejects_bad_pool_and_port() {
        let mut cfg = from_toml("[database.pool]\nmin_connections = 5\nmax_connections = 2\n").unwrap();
        assert!(cfg.normalize_and_validate().is_err());

        let mut cfg = from_toml("[server]\nhost = \"\"\nport = 0\n").unwrap();
        assert!(cfg.normalize_and_validate().is_err());
    }

    #[test]
    fn api_base_uses_loopback_for_wildcard_host() {
        let mut cfg = from_toml("[server]\nhost = \"0.0.0.0\"\nport = 9000\n").unwrap();
        cfg.normalize_and_validate().unwrap();
        assert_eq!(cfg.api_base(), "http://127.0.0.1:9000");
    }

    #[test]
    fn config_path_from_command_line() {
        assert_eq!(path_from_args(["-c", "/etc/rollar.toml"]), Some("/etc/rollar.toml".into()));
        assert_eq!(path_from_args(["--verbose", "--config", "a.toml"]), Some("a.toml".into()));
        assert_eq!(path_from_args(["--config=b.toml"]), Some("b.toml".into()));
        assert_eq!(path_from_args(["-c"]), None);
        assert_eq!(path_from_args(["--config="]), None);
        assert_eq!(path_from_args(Vec::<String>::new()), None);
        assert_eq!(resolve_path(["-c", "x.toml"]), "x.toml");
    }

    #[test]
    fn load_from_file_reads_toml() {
        let path = std::env::temp_dir().join(format!("rollar_cfg_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[web]\nversion = \"v1.2.3\"\n").unwrap();
        let cfg = AppConfig::load_and_validate(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.web.version, "v1.2.3");
        let _ = std::fs::remove_file(&path);
        assert!(load_from_file("/nonexistent/rollar.toml").is_err());
    }
}
