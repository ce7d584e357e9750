// src/config.rs

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{key} must be set"),
            ConfigError::Invalid { key, value } => write!(f, "{key} has invalid value {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Gemini,
    Placeholder,
}

impl FromStr for EngineKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "placeholder" => Ok(Self::Placeholder),
            _ => Err(()),
        }
    }
}

/// Pricing and pacing of generation jobs.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub cost: i32,
    pub images_per_job: u32,
    pub job_timeout: Duration,
    pub recovery_interval: Duration,
    /// Pause before the single retry allowed after a transient vendor error.
    pub retry_backoff: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            cost: 4,
            images_per_job: 4,
            job_timeout: Duration::from_secs(15 * 60),
            recovery_interval: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Per-request deadlines for outbound HTTP. Image generation is slow, Stripe is not.
pub const DEFAULT_GEMINI_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_STRIPE_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub signup_credits: i32,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub auth: AuthSettings,
    pub generation: GenerationSettings,
    pub engine: EngineKind,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub gemini_model: String,
    pub gemini_timeout: Duration,
    pub stripe_api_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub stripe_timeout: Duration,
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub s3_public_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let engine = match env::var("IMAGE_ENGINE") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "IMAGE_ENGINE",
                value: raw,
            })?,
            Err(_) => EngineKind::Gemini,
        };

        let gemini_api_key = env::var("GOOGLE_AI_API_KEY").ok();
        if engine == EngineKind::Gemini && gemini_api_key.is_none() {
            return Err(ConfigError::Missing("GOOGLE_AI_API_KEY"));
        }

        let s3_bucket = required("S3_BUCKET")?;
        let s3_public_base_url = env::var("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("https://{}.s3.amazonaws.com", s3_bucket));

        let defaults = GenerationSettings::default();
        let generation = GenerationSettings {
            cost: parsed("GENERATION_COST", defaults.cost)?,
            images_per_job: parsed("IMAGES_PER_JOB", defaults.images_per_job)?,
            job_timeout: Duration::from_secs(parsed(
                "JOB_TIMEOUT_SECS",
                defaults.job_timeout.as_secs(),
            )?),
            recovery_interval: Duration::from_secs(parsed(
                "RECOVERY_INTERVAL_SECS",
                defaults.recovery_interval.as_secs(),
            )?),
            retry_backoff: Duration::from_millis(parsed(
                "VENDOR_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
        };
        if generation.cost <= 0 || generation.images_per_job == 0 {
            return Err(ConfigError::Invalid {
                key: "GENERATION_COST/IMAGES_PER_JOB",
                value: format!("{}/{}", generation.cost, generation.images_per_job),
            });
        }

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8001".to_string()),
            database_url: required("DATABASE_URL")?,
            auth: AuthSettings {
                jwt_secret: required("JWT_SECRET")?,
                token_ttl: chrono::Duration::minutes(parsed("JWT_TTL_MINUTES", 30)?),
                signup_credits: parsed("SIGNUP_CREDITS", 12)?,
                bcrypt_cost: parsed("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            },
            generation,
            engine,
            gemini_api_key,
            gemini_api_base: env::var("GEMINI_API_BASE")
                .unwrap_or_else(|_| crate::engine::gemini::API_URL.to_string()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| crate::engine::gemini::DEFAULT_MODEL.to_string()),
            gemini_timeout: Duration::from_secs(parsed(
                "GEMINI_TIMEOUT_SECS",
                DEFAULT_GEMINI_TIMEOUT_SECS,
            )?),
            stripe_api_key: required("STRIPE_API_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| crate::payments::stripe::API_URL.to_string()),
            stripe_timeout: Duration::from_secs(parsed(
                "STRIPE_TIMEOUT_SECS",
                DEFAULT_STRIPE_TIMEOUT_SECS,
            )?),
            s3_bucket,
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_public_base_url,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}
