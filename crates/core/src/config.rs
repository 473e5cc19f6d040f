use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub crm: CrmConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Outbound WhatsApp gateway. An empty base URL selects the no-op transport
/// (useful for local development and tests).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub base_url: String,
    pub api_token: SecretString,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// How often the queue scheduler re-evaluates deferred entries.
    pub drain_interval_secs: u64,
    /// Pause between bubbles of a multi-part message.
    pub inter_bubble_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub transport_base_url: Option<String>,
    pub transport_api_token: Option<String>,
    pub crm_enabled: Option<bool>,
    pub crm_base_url: Option<String>,
    pub crm_api_token: Option<String>,
    pub drain_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cadence.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8700,
                health_check_port: 8701,
                graceful_shutdown_secs: 15,
            },
            transport: TransportConfig {
                base_url: String::new(),
                api_token: String::new().into(),
                timeout_secs: 30,
            },
            crm: CrmConfig { enabled: false, base_url: None, api_token: None },
            scheduler: SchedulerConfig { drain_interval_secs: 900, inter_bubble_delay_ms: 1_500 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cadence.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(transport) = patch.transport {
            if let Some(base_url) = transport.base_url {
                self.transport.base_url = base_url;
            }
            if let Some(api_token) = transport.api_token {
                self.transport.api_token = secret_value(api_token);
            }
            if let Some(timeout_secs) = transport.timeout_secs {
                self.transport.timeout_secs = timeout_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(enabled) = crm.enabled {
                self.crm.enabled = enabled;
            }
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = Some(base_url);
            }
            if let Some(api_token) = crm.api_token {
                self.crm.api_token = Some(secret_value(api_token));
            }
        }

        if let Some(scheduler) = patch.scheduler {
            if let Some(drain_interval_secs) = scheduler.drain_interval_secs {
                self.scheduler.drain_interval_secs = drain_interval_secs;
            }
            if let Some(inter_bubble_delay_ms) = scheduler.inter_bubble_delay_ms {
                self.scheduler.inter_bubble_delay_ms = inter_bubble_delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CADENCE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CADENCE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CADENCE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CADENCE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CADENCE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CADENCE_SERVER_PORT") {
            self.server.port = parse_u16("CADENCE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CADENCE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CADENCE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        if let Some(value) = read_env("CADENCE_TRANSPORT_BASE_URL") {
            self.transport.base_url = value;
        }
        if let Some(value) = read_env("CADENCE_TRANSPORT_API_TOKEN") {
            self.transport.api_token = secret_value(value);
        }
        if let Some(value) = read_env("CADENCE_TRANSPORT_TIMEOUT_SECS") {
            self.transport.timeout_secs = parse_u64("CADENCE_TRANSPORT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CADENCE_CRM_ENABLED") {
            self.crm.enabled = parse_bool("CADENCE_CRM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CADENCE_CRM_BASE_URL") {
            self.crm.base_url = Some(value);
        }
        if let Some(value) = read_env("CADENCE_CRM_API_TOKEN") {
            self.crm.api_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("CADENCE_SCHEDULER_DRAIN_INTERVAL_SECS") {
            self.scheduler.drain_interval_secs =
                parse_u64("CADENCE_SCHEDULER_DRAIN_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_SCHEDULER_INTER_BUBBLE_DELAY_MS") {
            self.scheduler.inter_bubble_delay_ms =
                parse_u64("CADENCE_SCHEDULER_INTER_BUBBLE_DELAY_MS", &value)?;
        }

        let log_level = read_env("CADENCE_LOGGING_LEVEL").or_else(|| read_env("CADENCE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CADENCE_LOGGING_FORMAT").or_else(|| read_env("CADENCE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.transport_base_url {
            self.transport.base_url = base_url;
        }
        if let Some(api_token) = overrides.transport_api_token {
            self.transport.api_token = secret_value(api_token);
        }
        if let Some(enabled) = overrides.crm_enabled {
            self.crm.enabled = enabled;
        }
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = Some(base_url);
        }
        if let Some(api_token) = overrides.crm_api_token {
            self.crm.api_token = Some(secret_value(api_token));
        }
        if let Some(drain_interval_secs) = overrides.drain_interval_secs {
            self.scheduler.drain_interval_secs = drain_interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_transport(&self.transport)?;
        validate_crm(&self.crm)?;
        validate_scheduler(&self.scheduler)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cadence.toml"), PathBuf::from("config/cadence.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_transport(transport: &TransportConfig) -> Result<(), ConfigError> {
    let base_url = transport.base_url.trim();
    if !base_url.is_empty() {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "transport.base_url must start with http:// or https://".to_string(),
            ));
        }
        if transport.api_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "transport.api_token is required when transport.base_url is set".to_string(),
            ));
        }
    }

    if transport.timeout_secs == 0 || transport.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "transport.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.enabled {
        let base_url = crm.base_url.as_deref().map(str::trim).unwrap_or_default();
        if base_url.is_empty() {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.base_url is not configured".to_string(),
            ));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "crm.base_url must start with http:// or https://".to_string(),
            ));
        }
        let missing_token = crm
            .api_token
            .as_ref()
            .map(|token| token.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.api_token is missing".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), ConfigError> {
    if scheduler.drain_interval_secs == 0 || scheduler.drain_interval_secs > 86_400 {
        return Err(ConfigError::Validation(
            "scheduler.drain_interval_secs must be in range 1..=86400".to_string(),
        ));
    }

    if scheduler.inter_bubble_delay_ms > 60_000 {
        return Err(ConfigError::Validation(
            "scheduler.inter_bubble_delay_ms must be at most 60000".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    transport: Option<TransportPatch>,
    crm: Option<CrmPatch>,
    scheduler: Option<SchedulerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TransportPatch {
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    drain_interval_secs: Option<u64>,
    inter_bubble_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
