use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub server: ServerConfig,
    pub insights: InsightsConfig,
    pub pricing: PricingConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration for the provider client.
///
/// Retries are owned by the provider client; the pipeline and the
/// comparison service never retry on their own.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe used for the three analysis stages.
    pub analysis: String,
    /// Pipe used for blind judging.
    pub judge: String,
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Pipeline and comparison behaviour
#[derive(Debug, Clone)]
pub struct InsightsConfig {
    /// Model used for a stage that does not name one.
    pub default_model: String,
    /// Judge model used when a comparison request does not name one.
    pub judge_model: String,
    /// Deadline for one pipeline run or one comparison creation.
    pub operation_timeout_ms: u64,
    /// Whether PII redaction is applied when a request does not say.
    pub pii_redaction_default: bool,
}

/// Fallback token pricing for models missing from the built-in table
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub fallback_input_per_1k: f64,
    pub fallback_output_per_1k: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/insights.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_env("MAX_RETRIES", 3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            analysis: env::var("PIPE_ANALYSIS").unwrap_or_else(|_| "dta-analysis-v1".to_string()),
            judge: env::var("PIPE_JUDGE").unwrap_or_else(|_| "blind-judge-v1".to_string()),
        };

        let server = ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("SERVER_PORT", 8080),
        };

        let insights = InsightsConfig {
            default_model: env::var("ANALYSIS_MODEL")
                .ok()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| InsightsConfig::default().default_model),
            judge_model: env::var("JUDGE_MODEL")
                .ok()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| InsightsConfig::default().judge_model),
            operation_timeout_ms: parse_env("OPERATION_TIMEOUT_MS", 120_000),
            pii_redaction_default: env::var("PII_REDACTION_DEFAULT")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
        };

        let fallback = PricingConfig::default();
        let pricing = PricingConfig {
            fallback_input_per_1k: parse_env(
                "PRICE_FALLBACK_INPUT_PER_1K",
                fallback.fallback_input_per_1k,
            ),
            fallback_output_per_1k: parse_env(
                "PRICE_FALLBACK_OUTPUT_PER_1K",
                fallback.fallback_output_per_1k,
            ),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            server,
            insights,
            pricing,
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Socket address to bind, if host and port form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config {
                message: format!("Invalid bind address {}:{}: {}", self.host, self.port, e),
            })
    }
}

impl Default for LangbaseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.langbase.com".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/insights.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            analysis: "dta-analysis-v1".to_string(),
            judge: "blind-judge-v1".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            judge_model: "claude-sonnet-4.5".to_string(),
            operation_timeout_ms: 120_000,
            pii_redaction_default: false,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            fallback_input_per_1k: 0.001,
            fallback_output_per_1k: 0.002,
        }
    }
}
