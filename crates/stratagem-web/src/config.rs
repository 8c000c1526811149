//! Gateway configuration.
//!
//! Settings are layered, later layers winning:
//!
//! | Layer | Source |
//! |-------|--------|
//! | defaults | [`GatewayConfig::default`] |
//! | file | YAML passed with `--config` |
//! | environment | `STRATAGEM_<NAME>`, falling back to `<NAME>` |
//! | flags | [`GatewayArgs`] |
//!
//! Secrets (provider key, webhook secret, caller tokens) are read from the
//! file or the environment only.
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `BIND_ADDR` | listen address |
//! | `PROVIDER_BASE_URL` | language-model REST base URL |
//! | `PROVIDER_API_KEY` | language-model API key |
//! | `MODEL_FAST`, `MODEL_DEEP`, `MODEL_GROUNDED` | model name per class |
//! | `WEBHOOK_SECRET` | webhook signing secret |
//! | `WEBHOOK_SIGNATURE_HEADER` | header carrying the signature |
//! | `REFERENCE_PREFIX` | first segment of purchase references |
//! | `ACCEPTED_EVENTS` | comma-separated settlement event prefixes |
//! | `CALLER_TOKENS` | comma-separated `token=user_id` pairs |
//! | `LEDGER_PATH` | DuckDB file, or `:memory:` |
//! | `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY_MS` | provider retry budget |

use std::collections::HashMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use stratagem_billing::{PriceEntry, PriceTable, SettlementPolicy};
use stratagem_core::{Backoff, HttpLanguageModel, ModelNames, RetryConfig};

use crate::error::GatewayError;

const ENV_PREFIX: &str = "STRATAGEM_";
const IN_MEMORY_LEDGER: &str = ":memory:";

/// Command-line flags for `stratagem-gateway`.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "stratagem-gateway",
    version,
    about = "Agent gateway: agent execution, chat streaming and payment webhooks"
)]
pub struct GatewayArgs {
    /// YAML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    /// Language-model REST base URL.
    #[arg(long, value_name = "URL")]
    pub provider_base_url: Option<String>,

    /// Ledger database file, or `:memory:`.
    #[arg(long, value_name = "PATH")]
    pub ledger_path: Option<String>,

    /// Header carrying the webhook signature.
    #[arg(long, value_name = "NAME")]
    pub webhook_signature_header: Option<String>,

    /// First segment of purchase references.
    #[arg(long, value_name = "PREFIX")]
    pub reference_prefix: Option<String>,

    /// Serve deterministic offline model output instead of calling the provider.
    #[arg(long, default_value_t = false)]
    pub mock_provider: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    bind: Option<SocketAddr>,
    provider: Option<ProviderFile>,
    webhook: Option<WebhookFile>,
    prices: Option<Vec<PriceEntry>>,
    callers: Option<HashMap<String, String>>,
    ledger_path: Option<String>,
    retry: Option<RetryFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderFile {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    models: Option<ModelsFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelsFile {
    fast: Option<String>,
    deep: Option<String>,
    grounded: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WebhookFile {
    secret: Option<String>,
    signature_header: Option<String>,
    reference_prefix: Option<String>,
    accepted_events: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryFile {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
}

/// Language-model provider settings.
#[derive(Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub models: ModelNames,
}

/// Payment webhook settings.
#[derive(Clone)]
pub struct WebhookSettings {
    pub secret: Option<String>,
    pub signature_header: String,
    pub policy: SettlementPolicy,
}

/// Where the account ledger lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerLocation {
    File(PathBuf),
    InMemory,
}

impl LedgerLocation {
    fn parse(value: &str) -> Self {
        if value.trim() == IN_MEMORY_LEDGER {
            Self::InMemory
        } else {
            Self::File(PathBuf::from(value.trim()))
        }
    }
}

/// Fully resolved gateway configuration.
#[derive(Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub provider: ProviderSettings,
    pub webhook: WebhookSettings,
    pub prices: PriceTable,
    /// Bearer token to user id.
    pub callers: HashMap<String, String>,
    pub ledger: LedgerLocation,
    pub retry: RetryConfig,
    pub mock_provider: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            provider: ProviderSettings {
                base_url: HttpLanguageModel::DEFAULT_BASE_URL.to_string(),
                api_key: None,
                timeout_ms: 120_000,
                models: ModelNames::default(),
            },
            webhook: WebhookSettings {
                secret: None,
                signature_header: String::from("x-paystack-signature"),
                policy: SettlementPolicy::default(),
            },
            prices: PriceTable::default(),
            callers: HashMap::new(),
            ledger: LedgerLocation::File(PathBuf::from("data/stratagem.duckdb")),
            retry: RetryConfig::exponential(3, Duration::from_millis(500)),
            mock_provider: false,
        }
    }
}

impl GatewayConfig {
    /// Resolve configuration from every layer.
    pub fn load(args: &GatewayArgs) -> Result<Self, GatewayError> {
        let mut config = Self::default();
        if let Some(path) = &args.config {
            config.apply_file(path)?;
        }
        config.apply_env(env_lookup)?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), GatewayError> {
        let source = fs::read_to_string(path).map_err(|error| {
            GatewayError::Config(format!("cannot read {}: {error}", path.display()))
        })?;
        self.apply_yaml(&source)
    }

    /// Overlay settings from a YAML document.
    pub fn apply_yaml(&mut self, source: &str) -> Result<(), GatewayError> {
        let file: ConfigFile = serde_yaml::from_str(source)
            .map_err(|error| GatewayError::Config(format!("invalid config file: {error}")))?;

        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(provider) = file.provider {
            assign(&mut self.provider.base_url, provider.base_url);
            if provider.api_key.is_some() {
                self.provider.api_key = provider.api_key;
            }
            if let Some(timeout_ms) = provider.timeout_ms {
                self.provider.timeout_ms = timeout_ms;
            }
            if let Some(models) = provider.models {
                assign(&mut self.provider.models.fast, models.fast);
                assign(&mut self.provider.models.deep, models.deep);
                assign(&mut self.provider.models.grounded, models.grounded);
            }
        }
        if let Some(webhook) = file.webhook {
            if webhook.secret.is_some() {
                self.webhook.secret = webhook.secret;
            }
            assign(&mut self.webhook.signature_header, webhook.signature_header);
            assign(&mut self.webhook.policy.reference_prefix, webhook.reference_prefix);
            if let Some(events) = webhook.accepted_events {
                self.webhook.policy.accepted_event_prefixes = events;
            }
        }
        if let Some(prices) = file.prices {
            self.prices = PriceTable::new(prices)
                .map_err(|error| GatewayError::Config(error.to_string()))?;
        }
        if let Some(callers) = file.callers {
            self.callers.extend(callers);
        }
        if let Some(ledger_path) = file.ledger_path {
            self.ledger = LedgerLocation::parse(&ledger_path);
        }
        if let Some(retry) = file.retry {
            self.apply_retry(retry.max_attempts, retry.base_delay_ms);
        }
        Ok(())
    }

    /// Overlay settings from environment variables resolved by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("BIND_ADDR") {
            self.bind = bind
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid BIND_ADDR '{bind}'")))?;
        }
        assign(&mut self.provider.base_url, lookup("PROVIDER_BASE_URL"));
        if let Some(key) = lookup("PROVIDER_API_KEY") {
            self.provider.api_key = Some(key);
        }
        assign(&mut self.provider.models.fast, lookup("MODEL_FAST"));
        assign(&mut self.provider.models.deep, lookup("MODEL_DEEP"));
        assign(&mut self.provider.models.grounded, lookup("MODEL_GROUNDED"));
        if let Some(secret) = lookup("WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        assign(
            &mut self.webhook.signature_header,
            lookup("WEBHOOK_SIGNATURE_HEADER"),
        );
        assign(
            &mut self.webhook.policy.reference_prefix,
            lookup("REFERENCE_PREFIX"),
        );
        if let Some(events) = lookup("ACCEPTED_EVENTS") {
            self.webhook.policy.accepted_event_prefixes = split_list(&events);
        }
        if let Some(tokens) = lookup("CALLER_TOKENS") {
            for pair in split_list(&tokens) {
                let (token, user_id) = pair.split_once('=').ok_or_else(|| {
                    GatewayError::Config(String::from(
                        "CALLER_TOKENS entries must look like token=user_id",
                    ))
                })?;
                self.callers
                    .insert(token.trim().to_string(), user_id.trim().to_string());
            }
        }
        if let Some(path) = lookup("LEDGER_PATH") {
            self.ledger = LedgerLocation::parse(&path);
        }

        let max_attempts = parse_env(&lookup, "RETRY_MAX_ATTEMPTS")?;
        let base_delay_ms = parse_env(&lookup, "RETRY_BASE_DELAY_MS")?;
        self.apply_retry(max_attempts, base_delay_ms);
        Ok(())
    }

    /// Overlay explicit command-line flags.
    pub fn apply_args(&mut self, args: &GatewayArgs) {
        if let Some(bind) = args.bind {
            self.bind = bind;
        }
        assign(&mut self.provider.base_url, args.provider_base_url.clone());
        if let Some(path) = &args.ledger_path {
            self.ledger = LedgerLocation::parse(path);
        }
        assign(
            &mut self.webhook.signature_header,
            args.webhook_signature_header.clone(),
        );
        assign(
            &mut self.webhook.policy.reference_prefix,
            args.reference_prefix.clone(),
        );
        self.mock_provider |= args.mock_provider;
    }

    fn apply_retry(&mut self, max_attempts: Option<u32>, base_delay_ms: Option<u64>) {
        if max_attempts.is_none() && base_delay_ms.is_none() {
            return;
        }
        let current_base = match self.retry.backoff {
            Backoff::Exponential { base, .. } => base,
            Backoff::Fixed { delay } => delay,
        };
        self.retry = RetryConfig::exponential(
            max_attempts.unwrap_or(self.retry.max_attempts),
            base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(current_base),
        );
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if !self.mock_provider && self.provider.api_key.is_none() {
            return Err(GatewayError::Config(String::from(
                "provider API key missing: set STRATAGEM_PROVIDER_API_KEY or pass --mock-provider",
            )));
        }
        if self.webhook.policy.reference_prefix.contains('_') {
            return Err(GatewayError::Config(String::from(
                "reference prefix must not contain '_'",
            )));
        }
        if self.prices.is_empty() {
            return Err(GatewayError::Config(String::from("price table is empty")));
        }
        Ok(())
    }
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .or_else(|_| env::var(name))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env<F, T>(lookup: &F, name: &str) -> Result<Option<T>, GatewayError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid {name} '{value}'")))
        })
        .transpose()
}

fn assign(target: &mut String, value: Option<String>) {
    if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
        *target = value;
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn flags_beat_environment_beats_file() {
        let mut config = GatewayConfig::default();
        config
            .apply_yaml("bind: 0.0.0.0:9000\nwebhook:\n  reference_prefix: FILE\n  secret: from-file\n")
            .expect("yaml");
        config
            .apply_env(env_of(&[
                ("REFERENCE_PREFIX", "ENV"),
                ("WEBHOOK_SECRET", "from-env"),
            ]))
            .expect("env");
        config.apply_args(&GatewayArgs {
            reference_prefix: Some(String::from("FLAG")),
            ..GatewayArgs::default()
        });

        assert_eq!(config.bind, SocketAddr::from(([0, 0, 0, 0], 9000)));
        assert_eq!(config.webhook.policy.reference_prefix, "FLAG");
        assert_eq!(config.webhook.secret.as_deref(), Some("from-env"));
    }

    #[test]
    fn flags_parse_and_override_the_environment() {
        let args = GatewayArgs::try_parse_from([
            "stratagem-gateway",
            "--bind",
            "127.0.0.1:7070",
            "--ledger-path",
            ":memory:",
            "--mock-provider",
        ])
        .expect("flags");

        let mut config = GatewayConfig::default();
        config
            .apply_env(env_of(&[("BIND_ADDR", "0.0.0.0:9000")]))
            .expect("env");
        config.apply_args(&args);

        assert_eq!(config.bind, SocketAddr::from(([127, 0, 0, 1], 7070)));
        assert_eq!(config.ledger, LedgerLocation::InMemory);
        assert!(config.mock_provider);
    }

    #[test]
    fn caller_tokens_and_retry_come_from_env() {
        let mut config = GatewayConfig::default();
        config
            .apply_env(env_of(&[
                ("CALLER_TOKENS", "tok-a=u1, tok-b=u2"),
                ("RETRY_MAX_ATTEMPTS", "5"),
                ("LEDGER_PATH", ":memory:"),
            ]))
            .expect("env");

        assert_eq!(config.callers.get("tok-b").map(String::as_str), Some("u2"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.ledger, LedgerLocation::InMemory);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let mut config = GatewayConfig::default();
        assert!(config
            .apply_env(env_of(&[("RETRY_MAX_ATTEMPTS", "many")]))
            .is_err());
        assert!(config
            .apply_env(env_of(&[("CALLER_TOKENS", "no-separator")]))
            .is_err());
        assert!(config.apply_yaml("unknown_key: 1\n").is_err());
    }

    #[test]
    fn yaml_price_table_replaces_the_default() {
        let mut config = GatewayConfig::default();
        config
            .apply_yaml(
                "prices:\n  - purchase_type: pro\n    amount: 2500\n    currency: USD\n    kind: { type: plan, tier: pro, period_days: 30 }\n",
            )
            .expect("yaml");

        assert_eq!(config.prices.len(), 1);
        assert_eq!(config.prices.get("pro").map(|entry| entry.amount), Some(2500));
    }

    #[test]
    fn real_provider_requires_an_api_key() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_err());

        let mock = GatewayConfig {
            mock_provider: true,
            ..GatewayConfig::default()
        };
        assert!(mock.validate().is_ok());
    }
}
