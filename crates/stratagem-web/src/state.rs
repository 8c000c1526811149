use std::sync::Arc;

use stratagem_agent::{AgentRegistry, ChatSession};
use stratagem_billing::{SettlementVerifier, SignatureVerifier};
use stratagem_core::{HttpLanguageModel, LanguageModel, ReqwestHttpClient, ScriptedLanguageModel};
use stratagem_ledger::AccountLedger;
use tracing::{info, warn};

use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::config::{GatewayConfig, LedgerLocation};
use crate::error::GatewayError;

/// Shared handles every request handler sees.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub chat: ChatSession,
    pub settlement: Arc<SettlementVerifier<AccountLedger>>,
    pub authenticator: Arc<dyn Authenticator>,
    pub signature_header: String,
}

impl AppState {
    pub fn from_config(
        config: &GatewayConfig,
        model: Arc<dyn LanguageModel>,
        ledger: AccountLedger,
    ) -> Self {
        let registry = AgentRegistry::new(Arc::clone(&model)).with_retry(config.retry.clone());
        let chat = ChatSession::new(model).with_retry(config.retry.clone());

        let secret = config.webhook.secret.clone().unwrap_or_default();
        let settlement = SettlementVerifier::new(
            SignatureVerifier::new(secret),
            config.prices.clone(),
            ledger,
        )
        .with_policy(config.webhook.policy.clone());

        Self {
            registry: Arc::new(registry),
            chat,
            settlement: Arc::new(settlement),
            authenticator: Arc::new(StaticTokenAuthenticator::new(config.callers.clone())),
            signature_header: config.webhook.signature_header.to_ascii_lowercase(),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }
}

/// Provider selected by configuration.
pub fn build_model(config: &GatewayConfig) -> Result<Arc<dyn LanguageModel>, GatewayError> {
    if config.mock_provider {
        warn!("serving offline model output; provider calls are disabled");
        return Ok(Arc::new(ScriptedLanguageModel::new()));
    }

    let api_key = config
        .provider
        .api_key
        .clone()
        .ok_or_else(|| GatewayError::Config(String::from("PROVIDER_API_KEY is not set")))?;

    let model = HttpLanguageModel::new(
        Arc::new(ReqwestHttpClient::new()),
        config.provider.base_url.clone(),
        api_key,
    )
    .with_models(config.provider.models.clone())
    .with_timeout_ms(config.provider.timeout_ms);

    info!(base_url = %config.provider.base_url, "language model provider configured");
    Ok(Arc::new(model))
}

pub fn open_ledger(location: &LedgerLocation) -> Result<AccountLedger, GatewayError> {
    let ledger = match location {
        LedgerLocation::InMemory => AccountLedger::open_in_memory()?,
        LedgerLocation::File(path) => AccountLedger::open(path.clone())?,
    };
    info!(path = ?ledger.db_path(), "account ledger ready");
    Ok(ledger)
}
