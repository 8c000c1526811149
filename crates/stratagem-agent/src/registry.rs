use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use stratagem_core::{LanguageModel, ModelClass, RetryConfig, SchemaDescriptor};
use tracing::{info, warn};

use crate::catalog::AgentKind;
use crate::error::AgentError;
use crate::pipeline::{Payload, Pipeline};

/// Authenticated caller on whose behalf an agent runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Immutable description of one agent, built at startup.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub kind: AgentKind,
    pub pipeline: Pipeline,
}

impl AgentDescriptor {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            pipeline: kind.pipeline(),
        }
    }

    pub fn model_class(&self) -> ModelClass {
        self.pipeline.model_class()
    }

    pub fn output_schema(&self) -> Option<&SchemaDescriptor> {
        self.pipeline.output_schema()
    }
}

/// Dispatch point for single-shot generation.
pub struct AgentRegistry {
    model: Arc<dyn LanguageModel>,
    retry: RetryConfig,
    descriptors: HashMap<AgentKind, AgentDescriptor>,
}

impl AgentRegistry {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retry: RetryConfig::default(),
            descriptors: AgentKind::ALL
                .into_iter()
                .map(|kind| (kind, AgentDescriptor::new(kind)))
                .collect(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn descriptor(&self, kind: AgentKind) -> Option<&AgentDescriptor> {
        self.descriptors.get(&kind)
    }

    /// Resolve `agent_id`, run its pipeline and return the decoded result.
    pub async fn execute(
        &self,
        agent_id: &str,
        payload: &Payload,
        caller: &CallerIdentity,
    ) -> Result<Value, AgentError> {
        let kind: AgentKind = agent_id.parse()?;
        let descriptor = self
            .descriptor(kind)
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.to_string()))?;

        let result = descriptor
            .pipeline
            .run(self.model.as_ref(), &self.retry, payload)
            .await;
        match &result {
            Ok(_) => info!(agent = %kind, user = %caller.user_id, "agent completed"),
            Err(error) => warn!(
                agent = %kind,
                user = %caller.user_id,
                code = error.code(),
                %error,
                "agent failed"
            ),
        }
        result
    }
}
