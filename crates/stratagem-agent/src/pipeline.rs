//! Stage pipelines.
//!
//! An agent is an ordered list of provider calls. The first stage renders
//! its prompt from the request payload; every later stage also receives the
//! full raw text of the stage before it. Only the final stage is asked for
//! structured output, and only its text is decoded.
//!
//! ```text
//! payload ──▶ stage 1 ──raw text──▶ stage 2 ──raw text──▶ decode ──▶ validate
//! ```

use serde_json::{Map, Value};
use stratagem_core::{
    decode_value, with_backoff, GenerateRequest, LanguageModel, ModelClass, RetryConfig,
    SchemaDescriptor,
};
use tracing::debug;

use crate::error::AgentError;

/// Request payload: an opaque key-value map supplied by the caller.
pub type Payload = Map<String, Value>;

/// Placeholder rendered for payload fields the caller left out.
pub const NOT_PROVIDED: &str = "(not provided)";

/// How a stage builds its prompt.
#[derive(Debug, Clone, Copy)]
pub enum StagePrompt {
    /// Rendered from the payload alone.
    Initial(fn(&Payload) -> String),
    /// Rendered from the payload and the previous stage's raw output.
    Refine(fn(&Payload, &str) -> String),
}

/// One provider call of a pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    pub model_class: ModelClass,
    pub prompt: StagePrompt,
    pub system_instruction: Option<&'static str>,
}

impl Stage {
    pub fn initial(model_class: ModelClass, build: fn(&Payload) -> String) -> Self {
        Self {
            model_class,
            prompt: StagePrompt::Initial(build),
            system_instruction: None,
        }
    }

    pub fn refine(model_class: ModelClass, build: fn(&Payload, &str) -> String) -> Self {
        Self {
            model_class,
            prompt: StagePrompt::Refine(build),
            system_instruction: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: &'static str) -> Self {
        self.system_instruction = Some(instruction);
        self
    }

    fn render(&self, payload: &Payload, previous: Option<&str>) -> String {
        match self.prompt {
            StagePrompt::Initial(build) => build(payload),
            StagePrompt::Refine(build) => build(payload, previous.unwrap_or_default()),
        }
    }
}

/// Ordered stages plus the shape expected from the last one.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
    output_schema: Option<SchemaDescriptor>,
}

impl Pipeline {
    pub fn new(first: Stage) -> Self {
        Self {
            stages: vec![first],
            output_schema: None,
        }
    }

    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_output_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn output_schema(&self) -> Option<&SchemaDescriptor> {
        self.output_schema.as_ref()
    }

    /// Model class of the stage whose output is returned.
    pub fn model_class(&self) -> ModelClass {
        self.stages
            .last()
            .map(|stage| stage.model_class)
            .unwrap_or(ModelClass::Fast)
    }

    /// Run every stage, then decode and validate the final output.
    ///
    /// Each stage is retried independently; a stage that exhausts its
    /// retries aborts the pipeline.
    pub async fn run(
        &self,
        model: &dyn LanguageModel,
        retry: &RetryConfig,
        payload: &Payload,
    ) -> Result<Value, AgentError> {
        let mut previous: Option<String> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let is_final = index + 1 == self.stages.len();
            let mut request =
                GenerateRequest::prompt(stage.model_class, stage.render(payload, previous.as_deref()));
            if let Some(instruction) = stage.system_instruction {
                request = request.with_system_instruction(instruction);
            }
            if is_final {
                if let Some(schema) = &self.output_schema {
                    request = request.with_response_schema(schema.to_provider_schema());
                }
            }

            let generation = with_backoff(retry, || model.generate(request.clone()))
                .await
                .map_err(AgentError::from_provider)?;
            debug!(
                stage = index + 1,
                model_class = %stage.model_class,
                chars = generation.text.len(),
                citations = generation.citations.len(),
                "stage completed"
            );
            previous = Some(generation.text);
        }

        let raw = previous.unwrap_or_default();
        match &self.output_schema {
            Some(schema) => {
                let value = decode_value(&raw)?;
                schema.validate(&value)?;
                Ok(value)
            }
            None => Ok(Value::String(raw.trim().to_string())),
        }
    }
}

/// Render a payload field for a prompt; strings are inserted bare.
pub fn field(payload: &Payload, key: &str) -> String {
    match payload.get(key) {
        None | Some(Value::Null) => NOT_PROVIDED.to_string(),
        Some(Value::String(text)) if text.trim().is_empty() => NOT_PROVIDED.to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) if items.is_empty() => NOT_PROVIDED.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stratagem_core::{ProviderError, ScriptedLanguageModel, ScriptedReply};

    use super::*;
    use crate::error::AgentErrorKind;

    fn research_prompt(payload: &Payload) -> String {
        format!("research {}", field(payload, "topic"))
    }

    fn structure_prompt(_payload: &Payload, previous: &str) -> String {
        format!("structure this:\n{previous}")
    }

    fn two_stage() -> Pipeline {
        Pipeline::new(Stage::initial(ModelClass::Grounded, research_prompt))
            .then(Stage::refine(ModelClass::Deep, structure_prompt))
            .with_output_schema(SchemaDescriptor::object().field("summary", SchemaDescriptor::String))
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().expect("object payload")
    }

    #[tokio::test]
    async fn second_stage_embeds_first_output_verbatim() {
        let first = "Findings:\n```\nnot json { at all\n```";
        let model = ScriptedLanguageModel::with_replies([
            ScriptedReply::text(first),
            ScriptedReply::text("Sure! {\"summary\": \"ok\"} hope that helps"),
        ]);

        let value = two_stage()
            .run(&model, &RetryConfig::no_retry(), &payload(json!({"topic": "bakeries"})))
            .await
            .expect("pipeline succeeds");

        let requests = model.requests();
        assert_eq!(value, json!({"summary": "ok"}));
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].contents[0].text, "research bakeries");
        assert!(requests[0].response_schema.is_none());
        assert!(requests[1].contents[0].text.contains(first));
        assert!(requests[1].response_schema.is_some());
        assert_eq!(requests[1].model_class, ModelClass::Deep);
    }

    #[tokio::test]
    async fn transient_stage_failures_are_retried_per_stage() {
        let model = ScriptedLanguageModel::with_replies([
            ScriptedReply::Fail(ProviderError::rate_limited("429")),
            ScriptedReply::text("research"),
            ScriptedReply::Fail(ProviderError::unavailable("503")),
            ScriptedReply::text(r#"{"summary": "done"}"#),
        ]);
        let retry = RetryConfig::fixed(std::time::Duration::from_millis(1), 2);

        let value = two_stage()
            .run(&model, &retry, &Payload::new())
            .await
            .expect("recovers");

        assert_eq!(value["summary"], "done");
        assert_eq!(model.requests().len(), 4);
    }

    #[tokio::test]
    async fn fatal_failure_stops_the_pipeline() {
        let model = ScriptedLanguageModel::with_replies([ScriptedReply::Fail(
            ProviderError::invalid_argument("bad prompt"),
        )]);

        let error = two_stage()
            .run(&model, &RetryConfig::default(), &Payload::new())
            .await
            .expect_err("fatal");

        assert_eq!(error.kind(), AgentErrorKind::ProviderRejected);
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn parseable_but_wrong_shape_is_malformed() {
        let model = ScriptedLanguageModel::with_replies([
            ScriptedReply::text("research"),
            ScriptedReply::text(r#"{"headline": "no summary"}"#),
        ]);

        let error = two_stage()
            .run(&model, &RetryConfig::no_retry(), &Payload::new())
            .await
            .expect_err("schema mismatch");

        assert_eq!(error.kind(), AgentErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn text_pipelines_return_a_json_string() {
        let pipeline = Pipeline::new(Stage::initial(ModelClass::Deep, research_prompt));
        let model = ScriptedLanguageModel::with_replies([ScriptedReply::text("  plain words \n")]);

        let value = pipeline
            .run(&model, &RetryConfig::no_retry(), &Payload::new())
            .await
            .expect("text");

        assert_eq!(value, json!("plain words"));
        assert_eq!(model.requests()[0].contents[0].text, "research (not provided)");
    }

    #[test]
    fn field_renders_common_shapes() {
        let payload = payload(json!({
            "name": "Acme",
            "budget": 1200,
            "channels": ["tiktok", "email"],
            "blank": "  ",
        }));

        assert_eq!(field(&payload, "name"), "Acme");
        assert_eq!(field(&payload, "budget"), "1200");
        assert_eq!(field(&payload, "channels"), "tiktok, email");
        assert_eq!(field(&payload, "blank"), NOT_PROVIDED);
        assert_eq!(field(&payload, "missing"), NOT_PROVIDED);
    }
}
