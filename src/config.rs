//! Configuration for the Talio server, read from `.talio/talio.toml`.
//!
//! Values are layered: file → environment → CLI.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".talio/talio.db"
//! dev_mode = false
//!
//! [longpoll]
//! default_timeout_ms = 5000
//! max_timeout_ms = 60000
//!
//! [security]
//! admin_password = "change-me"
//! session_idle_secs = 86400
//!
//! [logging]
//! level = "info"
//! json = false
//! log_dir = ".talio/logs"
//! ```
//!
//! Environment overrides: `TALIO_PORT`, `TALIO_DB_PATH`, `TALIO_ADMIN_PASSWORD`.
//! `RUST_LOG` takes precedence over `logging.level`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".talio";
pub const CONFIG_FILE: &str = "talio.toml";

/// HTTP listener and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS for a locally served UI
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("talio.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

/// Long-poll wait bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongPollSection {
    /// Wait used when a client does not ask for one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound on client-requested waits
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_timeout_ms() -> u64 {
    60_000
}

impl Default for LongPollSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySection {
    /// Password required to delete boards. Generated per run when unset.
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Sessions unused for this long are forgotten
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_session_idle_secs() -> u64 {
    86_400
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            admin_password: None,
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Daily-rolling log files are written here when set
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            log_dir: None,
        }
    }
}

/// Contents of `talio.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TalioToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub longpoll: LongPollSection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TalioToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse talio.toml")
    }

    /// Load `talio.toml` from `talio_dir`, or defaults if there is none.
    pub fn load_or_default(talio_dir: &Path) -> Result<Self> {
        let config_path = talio_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize talio.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Port, with `TALIO_PORT` overriding the file.
    pub fn port(&self) -> Result<u16> {
        match std::env::var("TALIO_PORT") {
            Ok(val) => val
                .trim()
                .parse()
                .with_context(|| format!("Invalid TALIO_PORT '{}'", val)),
            Err(_) => Ok(self.server.port),
        }
    }

    /// Database path, with `TALIO_DB_PATH` overriding the file.
    pub fn db_path(&self) -> PathBuf {
        std::env::var("TALIO_DB_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.server.db_path.clone())
    }

    /// Admin password, with `TALIO_ADMIN_PASSWORD` overriding the file.
    pub fn admin_password(&self) -> Option<String> {
        std::env::var("TALIO_ADMIN_PASSWORD")
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.security.admin_password.clone())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port must be between 1 and 65535".to_string());
        }
        if self.server.host.trim().is_empty() {
            warnings.push("server.host cannot be empty".to_string());
        }
        if self.server.db_path.as_os_str().is_empty() {
            warnings.push("server.db_path cannot be empty".to_string());
        }
        if self.longpoll.max_timeout_ms == 0 {
            warnings.push("longpoll.max_timeout_ms must be at least 1".to_string());
        }
        if self.longpoll.default_timeout_ms == 0
            || self.longpoll.default_timeout_ms > self.longpoll.max_timeout_ms
        {
            warnings.push(format!(
                "longpoll.default_timeout_ms ({}) must be between 1 and max_timeout_ms ({})",
                self.longpoll.default_timeout_ms, self.longpoll.max_timeout_ms
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a level (e.g. 'info') or filter directive",
                self.logging.level
            ));
        }
        if self.security.session_idle_secs == 0 {
            warnings.push("security.session_idle_secs must be at least 1".to_string());
        }
        if self.security.admin_password.as_deref() == Some("") {
            warnings.push(
                "security.admin_password is empty; remove it to generate one at start-up"
                    .to_string(),
            );
        }

        warnings
    }
}

/// Resolved configuration: file and environment plus CLI overrides.
#[derive(Debug, Clone)]
pub struct TalioConfig {
    pub project_dir: PathBuf,
    pub talio_dir: PathBuf,
    pub toml: TalioToml,
    pub cli_port: Option<u16>,
    pub cli_db_path: Option<PathBuf>,
    pub cli_dev: bool,
    pub verbose: bool,
}

impl TalioConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let talio_dir = project_dir.join(CONFIG_DIR);
        let toml = TalioToml::load_or_default(&talio_dir)?;

        Ok(Self {
            project_dir,
            talio_dir,
            toml,
            cli_port: None,
            cli_db_path: None,
            cli_dev: false,
            verbose: false,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        port: Option<u16>,
        db_path: Option<PathBuf>,
        dev: bool,
        verbose: bool,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_port = port;
        config.cli_db_path = db_path;
        config.cli_dev = dev;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_path(&self) -> PathBuf {
        self.talio_dir.join(CONFIG_FILE)
    }

    /// Port (CLI → env → file → default).
    pub fn port(&self) -> Result<u16> {
        match self.cli_port {
            Some(port) => Ok(port),
            None => self.toml.port(),
        }
    }

    /// Database path (CLI → env → file → default), relative to the project.
    pub fn db_path(&self) -> PathBuf {
        let path = self.cli_db_path.clone().unwrap_or_else(|| self.toml.db_path());
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn dev_mode(&self) -> bool {
        self.cli_dev || self.toml.server.dev_mode
    }

    pub fn host(&self) -> &str {
        &self.toml.server.host
    }

    pub fn admin_password(&self) -> Option<String> {
        self.toml.admin_password()
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.toml.longpoll.default_timeout_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.toml.longpoll.max_timeout_ms)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.toml.security.session_idle_secs)
    }

    /// Log directory, relative to the project when configured relatively.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.log_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_dir.join(dir)
            }
        })
    }

    /// Filter directive for the subscriber; `--verbose` raises it to debug.
    pub fn log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.toml.logging.level
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
