use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::{
    Citation, GenerateRequest, Generation, LanguageModel, ModelClass, ProviderFuture,
    ProviderStream, Role, SseLineDecoder, StreamChunk,
};
use crate::error::ProviderError;
use crate::http_client::{HttpAuth, HttpClient, HttpError, HttpRequest};

/// Concrete model name per [`ModelClass`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelNames {
    pub fast: String,
    pub deep: String,
    pub grounded: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            fast: String::from("gemini-2.5-flash"),
            deep: String::from("gemini-2.5-pro"),
            grounded: String::from("gemini-2.5-flash"),
        }
    }
}

impl ModelNames {
    pub fn resolve(&self, class: ModelClass) -> &str {
        match class {
            ModelClass::Fast => &self.fast,
            ModelClass::Deep => &self.deep,
            ModelClass::Grounded => &self.grounded,
        }
    }
}

/// Generative-language REST adapter.
///
/// Calls `{base_url}/models/{model}:generateContent` for single-shot output
/// and `:streamGenerateContent?alt=sse` for streams. The API key travels in
/// the `x-goog-api-key` header.
#[derive(Clone)]
pub struct HttpLanguageModel {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    auth: HttpAuth,
    models: ModelNames,
    timeout_ms: u64,
}

impl HttpLanguageModel {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: HttpAuth::Header {
                name: String::from("x-goog-api-key"),
                value: api_key.into(),
            },
            models: ModelNames::default(),
            timeout_ms: 120_000,
        }
    }

    pub fn with_models(mut self, models: ModelNames) -> Self {
        self.models = models;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn build_request(&self, request: &GenerateRequest, streaming: bool) -> HttpRequest {
        let model = self.models.resolve(request.model_class);
        let url = if streaming {
            format!("{}/models/{model}:streamGenerateContent?alt=sse", self.base_url)
        } else {
            format!("{}/models/{model}:generateContent", self.base_url)
        };

        HttpRequest::post(url)
            .with_auth(&self.auth)
            .with_header("content-type", "application/json")
            .with_body(request_body(request).to_string())
            .with_timeout_ms(self.timeout_ms)
    }
}

impl LanguageModel for HttpLanguageModel {
    fn generate<'a>(&'a self, request: GenerateRequest) -> ProviderFuture<'a, Generation> {
        Box::pin(async move {
            let http_request = self.build_request(&request, false);
            let response = self
                .http_client
                .execute(http_request)
                .await
                .map_err(transport_error)?;

            if !response.is_success() {
                return Err(ProviderError::from_status(response.status, &response.body));
            }

            let envelope: ResponseEnvelope = serde_json::from_str(&response.body).map_err(|e| {
                ProviderError::invalid_response(format!("unreadable provider response: {e}"))
            })?;
            envelope.into_generation()
        })
    }

    fn stream<'a>(&'a self, request: GenerateRequest) -> ProviderFuture<'a, ProviderStream> {
        Box::pin(async move {
            let http_request = self.build_request(&request, true);
            let response = self
                .http_client
                .execute_stream(http_request)
                .await
                .map_err(transport_error)?;

            if !response.is_success() {
                let status = response.status;
                let body = response.read_to_string().await;
                return Err(ProviderError::from_status(status, &body));
            }

            let mut body = response.body;
            let chunks = async_stream::stream! {
                let mut decoder = SseLineDecoder::new();
                let mut failed = false;
                while let Some(next) = body.next().await {
                    match next {
                        Ok(bytes) => {
                            for payload in decoder.push(&bytes) {
                                if let Some(item) = parse_stream_payload(&payload) {
                                    yield item;
                                }
                            }
                        }
                        Err(error) => {
                            yield Err(transport_error(error));
                            failed = true;
                            break;
                        }
                    }
                }
                if !failed {
                    if let Some(payload) = decoder.finish() {
                        if let Some(item) = parse_stream_payload(&payload) {
                            yield item;
                        }
                    }
                }
            };

            Ok(Box::pin(chunks) as ProviderStream)
        })
    }
}

fn transport_error(error: HttpError) -> ProviderError {
    if error.is_timeout() {
        ProviderError::timeout(format!("provider transport error: {}", error.message()))
    } else {
        ProviderError::unavailable(format!("provider transport error: {}", error.message()))
    }
}

fn request_body(request: &GenerateRequest) -> Value {
    let contents: Vec<Value> = request
        .contents
        .iter()
        .map(|content| {
            let role = match content.role {
                Role::User => "user",
                Role::Model => "model",
            };
            json!({ "role": role, "parts": [{ "text": content.text }] })
        })
        .collect();

    let mut body = json!({ "contents": contents });

    if let Some(instruction) = &request.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }

    if request.grounding {
        // the search tool cannot be combined with a response schema
        body["tools"] = json!([{ "google_search": {} }]);
        if request.response_schema.is_some() {
            warn!(
                model_class = ?request.model_class,
                "grounded request carries a response schema; output shape is only checked after decoding"
            );
        }
    } else if let Some(schema) = &request.response_schema {
        body["generationConfig"] = json!({
            "responseMimeType": "application/json",
            "responseSchema": schema,
        });
    }

    body
}

fn parse_stream_payload(payload: &str) -> Option<Result<StreamChunk, ProviderError>> {
    if payload.trim() == "[DONE]" {
        return None;
    }

    let envelope: ResponseEnvelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(error) => {
            return Some(Err(ProviderError::invalid_response(format!(
                "unreadable stream chunk: {error}"
            ))))
        }
    };

    if let Some(error) = envelope.error {
        return Some(Err(ProviderError::unavailable(format!(
            "provider stream error: {}",
            error.message
        ))));
    }

    let (text, citations) = envelope.first_candidate_parts();
    Some(Ok(StreamChunk { text, citations }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseEnvelope {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<GroundingSource>,
    #[serde(default)]
    maps: Option<GroundingSource>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl ResponseEnvelope {
    fn into_generation(self) -> Result<Generation, ProviderError> {
        if self.candidates.is_empty() {
            if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
                return Err(ProviderError::invalid_request(format!(
                    "prompt blocked by provider: {reason}"
                )));
            }
            return Err(ProviderError::invalid_response(
                "provider response contained no candidates",
            ));
        }

        let (text, citations) = self.first_candidate_parts();
        Ok(Generation { text, citations })
    }

    fn first_candidate_parts(&self) -> (String, Vec<Citation>) {
        let Some(candidate) = self.candidates.first() else {
            return (String::new(), Vec::new());
        };

        let text = candidate
            .content
            .iter()
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
            .collect::<String>();

        let citations = candidate
            .grounding_metadata
            .iter()
            .flat_map(|metadata| metadata.grounding_chunks.iter())
            .filter_map(|chunk| chunk.web.as_ref().or(chunk.maps.as_ref()))
            .filter_map(|source| {
                let uri = source.uri.clone()?;
                let title = source.title.clone().unwrap_or_else(|| uri.clone());
                Some(Citation { uri, title })
            })
            .collect();

        (text, citations)
    }
}
