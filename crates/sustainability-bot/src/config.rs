use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model_runtime::{CompletionOptions, ModelPricing};
use crate::scheduler::{Cadence, TraitMinerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub api_host: String,
    pub api_port: u16,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub chat_model: String,
    pub chat_temperature: f32,
    pub trait_model: String,
    pub trait_temperature: f32,
    pub prompt_cost_per_1k_usd: f64,
    pub completion_cost_per_1k_usd: f64,
    pub usd_inr_rate: f64,
    pub llm_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub prompt_file: String,
    pub history_limit: usize,
    pub api_key: String,
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub trait_mining_enabled: bool,
    pub trait_mining_hour: u32,
    pub trait_mining_day_step: u32,
    pub trait_mining_window_days: i64,
    pub trait_mining_pacing_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source. Unset keys fall back to defaults,
    /// except `API_KEY` and `TOKEN_SECRET` which are required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} environment variable not set. Please set it in your .env file", key))
        };
        macro_rules! parsed {
            ($key:expr, $default:expr) => {
                get($key, $default)
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid value for {}", $key))?
            };
        }

        let llm_api_key = lookup("LLM_API_KEY").filter(|v| !v.trim().is_empty());
        if llm_api_key.is_none() {
            warn!("LLM_API_KEY not set, model requests will be sent without credentials");
        }

        Ok(Self {
            database_path: get("DATABASE_PATH", "./data/chat.db"),
            api_host: get("API_HOST", "127.0.0.1"),
            api_port: parsed!("API_PORT", "8000"),
            llm_base_url: get("LLM_BASE_URL", "https://api.openai.com"),
            llm_api_key,
            chat_model: get("CHAT_MODEL", "gpt-4o-mini"),
            chat_temperature: parsed!("CHAT_TEMPERATURE", "0.2"),
            trait_model: get("TRAIT_MODEL", "gpt-4o-mini"),
            trait_temperature: parsed!("TRAIT_TEMPERATURE", "0.2"),
            prompt_cost_per_1k_usd: parsed!("PROMPT_COST_PER_1K_USD", "0.00015"),
            completion_cost_per_1k_usd: parsed!("COMPLETION_COST_PER_1K_USD", "0.0006"),
            usd_inr_rate: parsed!("USD_INR_RATE", "90"),
            llm_timeout_seconds: parsed!("LLM_TIMEOUT_SECONDS", "120"),
            request_timeout_seconds: parsed!("REQUEST_TIMEOUT_SECONDS", "600"),
            prompt_file: get("PROMPT_FILE", "./prompt.json"),
            history_limit: parsed!("HISTORY_LIMIT", "3"),
            api_key: required("API_KEY")?,
            token_secret: required("TOKEN_SECRET")?,
            token_ttl_minutes: parsed!("TOKEN_TTL_MINUTES", "30"),
            trait_mining_enabled: parsed!("TRAIT_MINING_ENABLED", "true"),
            trait_mining_hour: parsed!("TRAIT_MINING_HOUR", "2"),
            trait_mining_day_step: parsed!("TRAIT_MINING_DAY_STEP", "3"),
            trait_mining_window_days: parsed!("TRAIT_MINING_WINDOW_DAYS", "3"),
            trait_mining_pacing_ms: parsed!("TRAIT_MINING_PACING_MS", "1000"),
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.database_path);
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Model backend: {}", self.llm_base_url);
        info!("- Model API key: {}", redact(self.llm_api_key.as_deref()));
        info!("- Chat model: {} (temperature {})", self.chat_model, self.chat_temperature);
        info!("- Trait model: {} (temperature {})", self.trait_model, self.trait_temperature);
        info!(
            "- Pricing per 1K tokens: ${} prompt, ${} completion, {} INR/USD",
            self.prompt_cost_per_1k_usd, self.completion_cost_per_1k_usd, self.usd_inr_rate
        );
        info!("- Prompt file: {}", self.prompt_file);
        info!("- History limit: {} exchanges", self.history_limit);
        info!("- API key: {}", redact(Some(&self.api_key)));
        info!("- Token lifetime: {} min", self.token_ttl_minutes);
        if self.trait_mining_enabled {
            info!(
                "- Trait mining: {:02}:00 every {} days, {} day window",
                self.trait_mining_hour, self.trait_mining_day_step, self.trait_mining_window_days
            );
        } else {
            info!("- Trait mining: disabled");
        }
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.api_host, self.api_port))
    }

    pub fn chat_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.chat_model.clone(),
            temperature: self.chat_temperature,
            max_tokens: None,
        }
    }

    pub fn pricing(&self) -> ModelPricing {
        ModelPricing {
            prompt_per_1k_usd: self.prompt_cost_per_1k_usd,
            completion_per_1k_usd: self.completion_cost_per_1k_usd,
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    pub fn cadence(&self) -> Result<Cadence> {
        Ok(Cadence::new(self.trait_mining_hour, 0, self.trait_mining_day_step)?)
    }

    /// The read window gets one hour of slack so consecutive passes overlap.
    pub fn miner_config(&self) -> TraitMinerConfig {
        TraitMinerConfig {
            window: chrono::Duration::days(self.trait_mining_window_days) + chrono::Duration::hours(1),
            pacing: Duration::from_millis(self.trait_mining_pacing_ms),
            options: CompletionOptions {
                model: self.trait_model.clone(),
                temperature: self.trait_temperature,
                max_tokens: None,
            },
            usd_to_inr: self.usd_inr_rate,
        }
    }
}

fn redact(secret: Option<&str>) -> String {
    match secret {
        None | Some("") => "<not set>".to_string(),
        Some(s) if s.chars().count() <= 4 => "****".to_string(),
        Some(s) => format!("{}****", s.chars().take(2).collect::<String>()),
    }
}
