use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Sample rate the hosted pipeline consumes and produces (16-bit mono PCM).
pub const PIPELINE_SAMPLE_RATE: u32 = 24_000;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_VOICE: &str = "alloy";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Runtime configuration, read from the environment (and `.env` in development)
#[derive(Debug)]
pub struct AppConfig {
    pub openai_key: SecretBox<String>,
    pub base_url: String,
    /// Tool connector endpoint. `None` runs the agent without a connector.
    pub connector_url: Option<String>,
    pub model: String,
    pub voice: String,
    /// Upper bound on a single connector connect attempt. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let openai_key = Self::load_api_key("OPENAI_API_KEY", "OpenAI")?;

        let connector_url = optional_var("CONNECTOR_URL").or_else(|| {
            let legacy = optional_var("ZAPIER_MCP_URL");
            if legacy.is_some() {
                log::warn!("ZAPIER_MCP_URL is deprecated, use CONNECTOR_URL instead");
            }
            legacy
        });

        let connect_timeout = match optional_var("CONNECTOR_CONNECT_TIMEOUT_SECS") {
            Some(raw) => Some(parse_timeout("CONNECTOR_CONNECT_TIMEOUT_SECS", &raw)?),
            None => None,
        };

        Ok(Self {
            openai_key,
            base_url: optional_var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            connector_url,
            model: optional_var("AGENT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: optional_var("AGENT_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            connect_timeout,
        })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }

        Self::validate_key_format(&key, service_name)?;

        Ok(SecretBox::new(Box::new(key)))
    }

    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        if service == "OpenAI" && !key.starts_with("sk-") {
            return Err(ConfigError::InvalidKeyFormat {
                service: service.to_string(),
                reason: "OpenAI keys should start with 'sk-'".to_string(),
            });
        }
        Ok(())
    }

    /// Get the OpenAI API key (use only when making API calls)
    pub fn openai_key(&self) -> &str {
        self.openai_key.expose_secret()
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_timeout(var: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        reason: format!("'{}' is not a number of seconds", raw),
    })?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidValue {
            var: var.to_string(),
            reason: "timeout must be positive".to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<AppConfig, ConfigError> {
    match AppConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded configuration");
            match &config.connector_url {
                Some(_) => log::info!("Tool connector endpoint configured"),
                None => log::info!("No tool connector endpoint configured"),
            }
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
