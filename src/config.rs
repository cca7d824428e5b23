//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub mpesa: MpesaConfig,
    pub bsc: BscConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// M-Pesa (Daraja) configuration
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub base_url: String,
    pub callback_url: String,
    pub kes_per_usd: f64,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
}

/// BSC chain configuration
#[derive(Debug, Clone)]
pub struct BscConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub package_manager_address: String,
    pub usdt_address: String,
    pub treasury_private_key: String,
    pub request_timeout: u64,      // seconds
    pub confirmation_timeout: u64, // seconds
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
            bsc: BscConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.mpesa.validate()?;
        self.bsc.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost,http://127.0.0.1".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/mpesa_bridge.db?mode=rwc".to_string()),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(MpesaConfig {
            consumer_key: env::var("MPESA_CONSUMER_KEY")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CONSUMER_KEY".to_string()))?,
            consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CONSUMER_SECRET".to_string()))?,
            shortcode: env::var("MPESA_SHORTCODE")
                .map_err(|_| ConfigError::MissingVariable("MPESA_SHORTCODE".to_string()))?,
            passkey: env::var("MPESA_PASSKEY")
                .map_err(|_| ConfigError::MissingVariable("MPESA_PASSKEY".to_string()))?,
            base_url: env::var("MPESA_BASE_URL").unwrap_or_else(|_| {
                if env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string())
                    == "production"
                {
                    "https://api.safaricom.co.ke".to_string()
                } else {
                    "https://sandbox.safaricom.co.ke".to_string()
                }
            }),
            callback_url: env::var("MPESA_CALLBACK_URL")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CALLBACK_URL".to_string()))?,
            kes_per_usd: env::var("KES_PER_USD")
                .unwrap_or_else(|_| "129.0".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("KES_PER_USD".to_string()))?,
            request_timeout: env::var("MPESA_REQUEST_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_REQUEST_TIMEOUT".to_string()))?,
            max_retries: env::var("MPESA_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_MAX_RETRIES".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MPESA_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if !self.callback_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MPESA_CALLBACK_URL must be an https URL".to_string(),
            ));
        }

        if self.kes_per_usd <= 0.0 {
            return Err(ConfigError::InvalidValue("KES_PER_USD".to_string()));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "MPESA_REQUEST_TIMEOUT".to_string(),
            ));
        }

        Ok(())
    }
}

impl BscConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(BscConfig {
            rpc_url: env::var("BSC_RPC_URL")
                .unwrap_or_else(|_| "https://bsc-dataseed.binance.org".to_string()),
            chain_id: env::var("BSC_CHAIN_ID")
                .unwrap_or_else(|_| "56".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BSC_CHAIN_ID".to_string()))?,
            package_manager_address: env::var("PACKAGE_MANAGER_ADDRESS")
                .map_err(|_| ConfigError::MissingVariable("PACKAGE_MANAGER_ADDRESS".to_string()))?,
            usdt_address: env::var("USDT_ADDRESS")
                .unwrap_or_else(|_| "0x55d398326f99059fF775485246999027B3197955".to_string()),
            treasury_private_key: env::var("TREASURY_PRIVATE_KEY")
                .map_err(|_| ConfigError::MissingVariable("TREASURY_PRIVATE_KEY".to_string()))?,
            request_timeout: env::var("BSC_REQUEST_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BSC_REQUEST_TIMEOUT".to_string()))?,
            confirmation_timeout: env::var("BSC_CONFIRMATION_TIMEOUT")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BSC_CONFIRMATION_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rpc_url.starts_with("http://") && !self.rpc_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "BSC_RPC_URL must be a valid URL".to_string(),
            ));
        }

        if !self.package_manager_address.starts_with("0x")
            || self.package_manager_address.len() != 42
        {
            return Err(ConfigError::InvalidValue(
                "PACKAGE_MANAGER_ADDRESS must be a 0x-prefixed 20-byte address".to_string(),
            ));
        }

        if !self.usdt_address.starts_with("0x") || self.usdt_address.len() != 42 {
            return Err(ConfigError::InvalidValue(
                "USDT_ADDRESS must be a 0x-prefixed 20-byte address".to_string(),
            ));
        }

        if self.treasury_private_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "TREASURY_PRIVATE_KEY cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}

impl From<std::num::ParseFloatError> for ConfigError {
    fn from(_: std::num::ParseFloatError) -> Self {
        ConfigError::InvalidValue("Failed to parse float value".to_string())
    }
}
