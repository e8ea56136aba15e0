use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub screening: ScreeningConfig,
    pub finnhub: FinnhubConfig,
    pub serper: SerperConfig,
    pub tool_servers: ToolServersConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ScreeningConfig {
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct FinnhubConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct SerperConfig {
    pub api_key: Option<SecretString>,
    pub search_url: String,
    pub scrape_url: String,
}

#[derive(Clone, Debug)]
pub struct ToolServersConfig {
    pub search_url: String,
    pub stock_url: String,
    pub health_check_url: String,
    pub server_command: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
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
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub llm_max_attempts: Option<u32>,
    pub llm_retry_delay_secs: Option<u64>,
    pub search_url: Option<String>,
    pub stock_url: Option<String>,
    pub health_check_url: Option<String>,
    pub server_command: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub load_dotenv: bool,
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
    #[error("{key} is not configured (set {env_hint})")]
    MissingCredential { key: &'static str, env_hint: &'static str },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro-preview-03-25";
pub const DEFAULT_SCREENING_MODEL: &str = "gemini-1.5-flash-latest";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_key: None,
                base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
                model: DEFAULT_MODEL.to_string(),
                timeout_secs: 60,
                max_attempts: 3,
                retry_delay_secs: 7,
            },
            screening: ScreeningConfig { model: DEFAULT_SCREENING_MODEL.to_string() },
            finnhub: FinnhubConfig {
                api_key: None,
                base_url: "https://finnhub.io/api/v1".to_string(),
            },
            serper: SerperConfig {
                api_key: None,
                search_url: "https://google.serper.dev/search".to_string(),
                scrape_url: "https://scrape.serper.dev".to_string(),
            },
            tool_servers: ToolServersConfig {
                search_url: "http://localhost:8080/sse".to_string(),
                stock_url: "http://localhost:8181/sse".to_string(),
                health_check_url: "http://localhost:8182/sse".to_string(),
                server_command: None,
                request_timeout_secs: 60,
            },
            session: SessionConfig {
                app_name: "enterprise_assistant".to_string(),
                user_id: "user".to_string(),
                session_id: "session".to_string(),
            },
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

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl ToolServersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        if options.load_dotenv {
            // a missing .env file is the common case
            let _ = dotenv::dotenv();
        }

        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn require_llm_api_key(&self) -> Result<&SecretString, ConfigError> {
        require(
            self.llm.api_key.as_ref(),
            "llm.api_key",
            "CONCIERGE_LLM_API_KEY or API_KEY_GOOGLE",
        )
    }

    pub fn require_finnhub_api_key(&self) -> Result<&SecretString, ConfigError> {
        require(
            self.finnhub.api_key.as_ref(),
            "finnhub.api_key",
            "CONCIERGE_FINNHUB_API_KEY or API_KEY_FINNHUB",
        )
    }

    pub fn require_serper_api_key(&self) -> Result<&SecretString, ConfigError> {
        require(
            self.serper.api_key.as_ref(),
            "serper.api_key",
            "CONCIERGE_SERPER_API_KEY or API_KEY_SERPER",
        )
    }

    /// Effective configuration with every secret replaced by a marker.
    pub fn redacted(&self) -> Value {
        json!({
            "llm": {
                "api_key": redact(self.llm.api_key.as_ref()),
                "base_url": self.llm.base_url,
                "model": self.llm.model,
                "timeout_secs": self.llm.timeout_secs,
                "max_attempts": self.llm.max_attempts,
                "retry_delay_secs": self.llm.retry_delay_secs,
            },
            "screening": { "model": self.screening.model },
            "finnhub": {
                "api_key": redact(self.finnhub.api_key.as_ref()),
                "base_url": self.finnhub.base_url,
            },
            "serper": {
                "api_key": redact(self.serper.api_key.as_ref()),
                "search_url": self.serper.search_url,
                "scrape_url": self.serper.scrape_url,
            },
            "tool_servers": {
                "search_url": self.tool_servers.search_url,
                "stock_url": self.tool_servers.stock_url,
                "health_check_url": self.tool_servers.health_check_url,
                "server_command": self.tool_servers.server_command.as_ref().map(|path| path.display().to_string()),
                "request_timeout_secs": self.tool_servers.request_timeout_secs,
            },
            "session": {
                "app_name": self.session.app_name,
                "user_id": self.session.user_id,
                "session_id": self.session.session_id,
            },
            "logging": {
                "level": self.logging.level,
                "format": self.logging.format,
            },
        })
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_attempts) = llm.max_attempts {
                self.llm.max_attempts = max_attempts;
            }
            if let Some(retry_delay_secs) = llm.retry_delay_secs {
                self.llm.retry_delay_secs = retry_delay_secs;
            }
        }

        if let Some(screening) = patch.screening {
            if let Some(model) = screening.model {
                self.screening.model = model;
            }
        }

        if let Some(finnhub) = patch.finnhub {
            if let Some(finnhub_api_key_value) = finnhub.api_key {
                self.finnhub.api_key = Some(secret_value(finnhub_api_key_value));
            }
            if let Some(base_url) = finnhub.base_url {
                self.finnhub.base_url = base_url;
            }
        }

        if let Some(serper) = patch.serper {
            if let Some(serper_api_key_value) = serper.api_key {
                self.serper.api_key = Some(secret_value(serper_api_key_value));
            }
            if let Some(search_url) = serper.search_url {
                self.serper.search_url = search_url;
            }
            if let Some(scrape_url) = serper.scrape_url {
                self.serper.scrape_url = scrape_url;
            }
        }

        if let Some(tool_servers) = patch.tool_servers {
            if let Some(search_url) = tool_servers.search_url {
                self.tool_servers.search_url = search_url;
            }
            if let Some(stock_url) = tool_servers.stock_url {
                self.tool_servers.stock_url = stock_url;
            }
            if let Some(health_check_url) = tool_servers.health_check_url {
                self.tool_servers.health_check_url = health_check_url;
            }
            if let Some(server_command) = tool_servers.server_command {
                self.tool_servers.server_command = Some(server_command);
            }
            if let Some(request_timeout_secs) = tool_servers.request_timeout_secs {
                self.tool_servers.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(app_name) = session.app_name {
                self.session.app_name = app_name;
            }
            if let Some(user_id) = session.user_id {
                self.session.user_id = user_id;
            }
            if let Some(session_id) = session.session_id {
                self.session.session_id = session_id;
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
        let llm_api_key = read_env("CONCIERGE_LLM_API_KEY")
            .or_else(|| read_env("API_KEY_GOOGLE"))
            .or_else(|| read_env("GOOGLE_API_KEY"));
        if let Some(value) = llm_api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MAX_ATTEMPTS") {
            self.llm.max_attempts = parse_u32("CONCIERGE_LLM_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_RETRY_DELAY_SECS") {
            self.llm.retry_delay_secs = parse_u64("CONCIERGE_LLM_RETRY_DELAY_SECS", &value)?;
        }

        let screening_model =
            read_env("CONCIERGE_SCREENING_MODEL").or_else(|| read_env("HEALTH_CHECK_MODEL_NAME"));
        if let Some(value) = screening_model {
            self.screening.model = value;
        }

        let finnhub_api_key =
            read_env("CONCIERGE_FINNHUB_API_KEY").or_else(|| read_env("API_KEY_FINNHUB"));
        if let Some(value) = finnhub_api_key {
            self.finnhub.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_FINNHUB_BASE_URL") {
            self.finnhub.base_url = value;
        }

        let serper_api_key =
            read_env("CONCIERGE_SERPER_API_KEY").or_else(|| read_env("API_KEY_SERPER"));
        if let Some(value) = serper_api_key {
            self.serper.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_SERPER_SEARCH_URL") {
            self.serper.search_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERPER_SCRAPE_URL") {
            self.serper.scrape_url = value;
        }

        if let Some(value) = read_env("CONCIERGE_SEARCH_MCP_URL") {
            self.tool_servers.search_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_STOCK_MCP_URL") {
            self.tool_servers.stock_url = value;
        }
        let health_check_url =
            read_env("CONCIERGE_HEALTH_CHECK_MCP_URL").or_else(|| read_env("HEALTH_CHECK_MCP_URL"));
        if let Some(value) = health_check_url {
            self.tool_servers.health_check_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_COMMAND") {
            self.tool_servers.server_command = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("CONCIERGE_MCP_REQUEST_TIMEOUT_SECS") {
            self.tool_servers.request_timeout_secs =
                parse_u64("CONCIERGE_MCP_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_APP_NAME") {
            self.session.app_name = value;
        }
        if let Some(value) = read_env("CONCIERGE_USER_ID") {
            self.session.user_id = value;
        }
        if let Some(value) = read_env("CONCIERGE_SESSION_ID") {
            self.session.session_id = value;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(max_attempts) = overrides.llm_max_attempts {
            self.llm.max_attempts = max_attempts;
        }
        if let Some(retry_delay_secs) = overrides.llm_retry_delay_secs {
            self.llm.retry_delay_secs = retry_delay_secs;
        }
        if let Some(search_url) = overrides.search_url {
            self.tool_servers.search_url = search_url;
        }
        if let Some(stock_url) = overrides.stock_url {
            self.tool_servers.stock_url = stock_url;
        }
        if let Some(health_check_url) = overrides.health_check_url {
            self.tool_servers.health_check_url = health_check_url;
        }
        if let Some(server_command) = overrides.server_command {
            self.tool_servers.server_command = Some(server_command);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_services(&self.finnhub, &self.serper)?;
        validate_tool_servers(&self.tool_servers)?;
        validate_session(&self.session)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn require<'a>(
    value: Option<&'a SecretString>,
    key: &'static str,
    env_hint: &'static str,
) -> Result<&'a SecretString, ConfigError> {
    value
        .filter(|secret| !secret.expose_secret().trim().is_empty())
        .ok_or(ConfigError::MissingCredential { key, env_hint })
}

fn redact(value: Option<&SecretString>) -> Value {
    match value {
        Some(secret) if !secret.expose_secret().is_empty() => Value::String("<redacted>".into()),
        _ => Value::Null,
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    validate_http_url("llm.base_url", &llm.base_url)?;

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "llm.max_attempts must be greater than zero".to_string(),
        ));
    }

    if llm.retry_delay_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.retry_delay_secs must be in range 0..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_services(finnhub: &FinnhubConfig, serper: &SerperConfig) -> Result<(), ConfigError> {
    validate_http_url("finnhub.base_url", &finnhub.base_url)?;
    validate_http_url("serper.search_url", &serper.search_url)?;
    validate_http_url("serper.scrape_url", &serper.scrape_url)?;
    Ok(())
}

fn validate_tool_servers(tool_servers: &ToolServersConfig) -> Result<(), ConfigError> {
    validate_http_url("tool_servers.search_url", &tool_servers.search_url)?;
    validate_http_url("tool_servers.stock_url", &tool_servers.stock_url)?;
    validate_http_url("tool_servers.health_check_url", &tool_servers.health_check_url)?;

    if tool_servers.request_timeout_secs == 0 || tool_servers.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "tool_servers.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    for (key, value) in [
        ("session.app_name", &session.app_name),
        ("session.user_id", &session.user_id),
        ("session.session_id", &session.session_id),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{key} must not be empty")));
        }
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

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
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

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    screening: Option<ScreeningPatch>,
    finnhub: Option<FinnhubPatch>,
    serper: Option<SerperPatch>,
    tool_servers: Option<ToolServersPatch>,
    session: Option<SessionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScreeningPatch {
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FinnhubPatch {
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SerperPatch {
    api_key: Option<String>,
    search_url: Option<String>,
    scrape_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolServersPatch {
    search_url: Option<String>,
    stock_url: Option<String>,
    health_check_url: Option<String>,
    server_command: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    app_name: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    const MANAGED_VARS: &[&str] = &[
        "CONCIERGE_LLM_API_KEY",
        "API_KEY_GOOGLE",
        "GOOGLE_API_KEY",
        "CONCIERGE_LLM_MODEL",
        "CONCIERGE_LLM_MAX_ATTEMPTS",
        "CONCIERGE_LLM_RETRY_DELAY_SECS",
        "HEALTH_CHECK_MCP_URL",
        "CONCIERGE_HEALTH_CHECK_MCP_URL",
        "HEALTH_CHECK_MODEL_NAME",
        "CONCIERGE_LOG_FORMAT",
        "CONCIERGE_TEST_SERPER_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env(vars: &[(&str, &str)], test: impl FnOnce()) {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in MANAGED_VARS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        test();
        for key in MANAGED_VARS {
            env::remove_var(key);
        }
    }

    fn missing_file_options() -> LoadOptions {
        LoadOptions {
            config_path: Some("does/not/exist/concierge.toml".into()),
            ..LoadOptions::default()
        }
    }

    #[test]
    fn defaults_follow_the_published_ports_and_retry_contract() {
        with_env(&[], || {
            let config = AppConfig::load(missing_file_options()).expect("defaults are valid");

            assert_eq!(config.llm.max_attempts, 3);
            assert_eq!(config.llm.retry_delay_secs, 7);
            assert_eq!(config.tool_servers.search_url, "http://localhost:8080/sse");
            assert_eq!(config.tool_servers.stock_url, "http://localhost:8181/sse");
            assert_eq!(config.tool_servers.health_check_url, "http://localhost:8182/sse");
            assert_eq!(config.session.app_name, "enterprise_assistant");
            assert!(config.llm.api_key.is_none());
        });
    }

    #[test]
    fn legacy_environment_names_are_honoured() {
        with_env(
            &[
                ("API_KEY_GOOGLE", "google-key"),
                ("HEALTH_CHECK_MCP_URL", "http://health.internal:9000/sse"),
                ("HEALTH_CHECK_MODEL_NAME", "gemini-flash-test"),
            ],
            || {
                let config = AppConfig::load(missing_file_options()).expect("config loads");

                let key = config.require_llm_api_key().expect("api key present");
                assert_eq!(key.expose_secret(), "google-key");
                assert_eq!(config.tool_servers.health_check_url, "http://health.internal:9000/sse");
                assert_eq!(config.screening.model, "gemini-flash-test");
            },
        );
    }

    #[test]
    fn prefixed_variables_win_over_legacy_names() {
        with_env(
            &[("API_KEY_GOOGLE", "legacy"), ("CONCIERGE_LLM_API_KEY", "preferred")],
            || {
                let config = AppConfig::load(missing_file_options()).expect("config loads");
                assert_eq!(
                    config.require_llm_api_key().expect("key").expose_secret(),
                    "preferred"
                );
            },
        );
    }

    #[test]
    fn invalid_numeric_override_is_reported_with_its_key() {
        with_env(&[("CONCIERGE_LLM_MAX_ATTEMPTS", "three")], || {
            let error = AppConfig::load(missing_file_options()).expect_err("must fail");
            assert!(matches!(
                error,
                ConfigError::InvalidEnvOverride { ref key, .. } if key == "CONCIERGE_LLM_MAX_ATTEMPTS"
            ));
        });
    }

    #[test]
    fn zero_attempts_is_rejected() {
        with_env(&[("CONCIERGE_LLM_MAX_ATTEMPTS", "0")], || {
            let error = AppConfig::load(missing_file_options()).expect_err("must fail");
            assert!(error.to_string().contains("llm.max_attempts"));
        });
    }

    #[test]
    fn file_values_are_interpolated_and_overrides_apply_last() {
        with_env(&[("CONCIERGE_TEST_SERPER_KEY", "serper-from-env")], || {
            let mut file = tempfile::NamedTempFile::new().expect("temp file");
            writeln!(
                file,
                r#"
[llm]
model = "gemini-from-file"
retry_delay_secs = 2

[serper]
api_key = "${{CONCIERGE_TEST_SERPER_KEY}}"

[logging]
format = "json"
"#
            )
            .expect("write config");

            let config = AppConfig::load(LoadOptions {
                config_path: Some(file.path().to_path_buf()),
                require_file: true,
                overrides: ConfigOverrides {
                    llm_model: Some("gemini-from-flag".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .expect("config loads");

            assert_eq!(config.llm.model, "gemini-from-flag");
            assert_eq!(config.llm.retry_delay_secs, 2);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(
                config.require_serper_api_key().expect("serper key").expose_secret(),
                "serper-from-env"
            );
        });
    }

    #[test]
    fn missing_interpolation_variable_fails() {
        with_env(&[], || {
            let mut file = tempfile::NamedTempFile::new().expect("temp file");
            writeln!(file, "[finnhub]\napi_key = \"${{CONCIERGE_DEFINITELY_UNSET_VAR}}\"")
                .expect("write config");

            let error = AppConfig::load(LoadOptions {
                config_path: Some(file.path().to_path_buf()),
                ..LoadOptions::default()
            })
            .expect_err("must fail");

            assert!(matches!(
                error,
                ConfigError::MissingEnvInterpolation { ref var } if var == "CONCIERGE_DEFINITELY_UNSET_VAR"
            ));
        });
    }

    #[test]
    fn required_file_must_exist() {
        with_env(&[], || {
            let error = AppConfig::load(LoadOptions {
                require_file: true,
                ..missing_file_options()
            })
            .expect_err("must fail");
            assert!(matches!(error, ConfigError::MissingConfigFile(_)));
        });
    }

    #[test]
    fn missing_credentials_name_the_environment_variable() {
        let config = AppConfig::default();
        let error = config.require_finnhub_api_key().expect_err("no key by default");
        assert!(error.to_string().contains("API_KEY_FINNHUB"));
    }

    #[test]
    fn redacted_view_hides_secrets() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("super-secret".to_string().into());

        let rendered = config.redacted().to_string();
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
        assert_eq!(config.redacted()["finnhub"]["api_key"], serde_json::Value::Null);
    }
}
