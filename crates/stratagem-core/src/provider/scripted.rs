use std::collections::VecDeque;
use std::sync::Mutex;

use futures_util::stream;
use serde_json::{json, Map, Value};

use super::{
    Citation, GenerateRequest, Generation, LanguageModel, ProviderFuture, ProviderStream,
    StreamChunk,
};
use crate::error::ProviderError;

/// A queued response for [`ScriptedLanguageModel`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Completed generation.
    Text(Generation),
    /// Provider failure returned from `generate` or from opening a stream.
    Fail(ProviderError),
    /// Stream items delivered in order; an `Err` item ends the stream.
    Stream(Vec<Result<StreamChunk, ProviderError>>),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(Generation {
            text: text.into(),
            citations: Vec::new(),
        })
    }

    pub fn chunks<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream(
            texts
                .into_iter()
                .map(|text| {
                    Ok(StreamChunk {
                        text: text.into(),
                        citations: Vec::new(),
                    })
                })
                .collect(),
        )
    }
}

/// Most recent requests kept by [`ScriptedLanguageModel::requests`].
pub const REQUEST_LOG_CAPACITY: usize = 256;

/// Deterministic provider: replays queued replies in FIFO order and records
/// the last [`REQUEST_LOG_CAPACITY`] requests it receives.
///
/// With an empty queue it falls back to synthetic output: a value shaped
/// like the requested response schema, or an echo of the last user turn.
#[derive(Debug, Default)]
pub struct ScriptedLanguageModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<VecDeque<GenerateRequest>>,
}

impl ScriptedLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .expect("scripted replies lock is not poisoned")
            .push_back(reply);
    }

    /// Retained requests, oldest first.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .expect("scripted requests lock is not poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn next_reply(&self, request: &GenerateRequest) -> Option<ScriptedReply> {
        {
            let mut requests = self
                .requests
                .lock()
                .expect("scripted requests lock is not poisoned");
            if requests.len() == REQUEST_LOG_CAPACITY {
                requests.pop_front();
            }
            requests.push_back(request.clone());
        }
        self.replies
            .lock()
            .expect("scripted replies lock is not poisoned")
            .pop_front()
    }
}

impl LanguageModel for ScriptedLanguageModel {
    fn generate<'a>(&'a self, request: GenerateRequest) -> ProviderFuture<'a, Generation> {
        let reply = self.next_reply(&request);
        Box::pin(async move {
            match reply {
                Some(ScriptedReply::Text(generation)) => Ok(generation),
                Some(ScriptedReply::Fail(error)) => Err(error),
                Some(ScriptedReply::Stream(items)) => {
                    let mut generation = Generation::default();
                    for item in items {
                        let chunk = item?;
                        generation.text.push_str(&chunk.text);
                        generation.citations.extend(chunk.citations);
                    }
                    Ok(generation)
                }
                None => Ok(synthetic_generation(&request)),
            }
        })
    }

    fn stream<'a>(&'a self, request: GenerateRequest) -> ProviderFuture<'a, ProviderStream> {
        let reply = self.next_reply(&request);
        Box::pin(async move {
            let items = match reply {
                Some(ScriptedReply::Stream(items)) => items,
                Some(ScriptedReply::Text(generation)) => vec![Ok(StreamChunk {
                    text: generation.text,
                    citations: generation.citations,
                })],
                Some(ScriptedReply::Fail(error)) => return Err(error),
                None => synthetic_generation(&request)
                    .text
                    .split_inclusive(' ')
                    .map(|word| {
                        Ok(StreamChunk {
                            text: word.to_string(),
                            citations: Vec::new(),
                        })
                    })
                    .collect(),
            };
            Ok(Box::pin(stream::iter(items)) as ProviderStream)
        })
    }
}

fn synthetic_generation(request: &GenerateRequest) -> Generation {
    let text = match &request.response_schema {
        Some(schema) => sample_for_schema(schema).to_string(),
        None => {
            let last = request
                .contents
                .last()
                .map(|content| content.text.as_str())
                .unwrap_or_default();
            format!("[offline {}] {}", request.model_class, last)
        }
    };

    let citations = if request.grounding {
        vec![Citation {
            uri: String::from("https://example.com/offline-source"),
            title: String::from("Offline source"),
        }]
    } else {
        Vec::new()
    };

    Generation { text, citations }
}

/// Build a placeholder value that satisfies a provider-format schema.
fn sample_for_schema(schema: &Value) -> Value {
    match schema.get("type").and_then(Value::as_str).unwrap_or("STRING") {
        "OBJECT" => {
            let mut object = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    object.insert(name.clone(), sample_for_schema(property));
                }
            }
            Value::Object(object)
        }
        "ARRAY" => {
            let item = schema
                .get("items")
                .map(sample_for_schema)
                .unwrap_or(Value::Null);
            json!([item])
        }
        "NUMBER" => json!(1.0),
        "INTEGER" => json!(1),
        "BOOLEAN" => json!(true),
        _ => json!("sample"),
    }
}
