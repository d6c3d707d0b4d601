//! OpenAI-compatible chat completions client.
//!
//! Implements [`LanguageModel`] against `POST {endpoint}/chat/completions`
//! with function-calling tools. Non-streaming; one request per step.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::model::{ChatMessage, LanguageModel, LlmError, ModelRequest, ModelTurn, Role, ToolCall};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiChatModel {
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiChatModel {
    /// `endpoint` is the API base, e.g. `http://localhost:5000/v1`.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Network {
                message: e.to_string(),
            })?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

/// Build request body for the chat completions API.
fn build_request_body(request: &ModelRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_json).collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn message_json(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::System => json!({ "role": "system", "content": msg.content }),
        Role::User => json!({ "role": "user", "content": msg.content }),
        Role::Assistant => {
            let mut out = json!({
                "role": "assistant",
                "content": if msg.content.is_empty() { Value::Null } else { Value::String(msg.content.clone()) },
            });
            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                out["tool_calls"] = Value::Array(calls);
            }
            out
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_completion(body: ChatCompletion) -> Result<ModelTurn, LlmError> {
    let Some(choice) = body.choices.into_iter().next() else {
        return Err(LlmError::MalformedResponse {
            message: "response has no choices".into(),
        });
    };

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| {
            // Unparsable arguments are passed through as a string so the
            // tool layer can report them back to the model.
            let raw = tc.function.arguments;
            let arguments = if raw.trim().is_empty() {
                Value::Null
            } else {
                match serde_json::from_str(&raw) {
                    Ok(value) => value,
                    Err(_) => Value::String(raw),
                }
            };
            ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments,
            }
        })
        .collect();

    Ok(ModelTurn {
        text: choice.message.content.filter(|s| !s.is_empty()),
        tool_calls,
    })
}

fn map_transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::NetworkTimeout {
            duration_ms: REQUEST_TIMEOUT.as_millis() as u64,
        }
    } else {
        LlmError::Network {
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, LlmError> {
        let body = build_request_body(request);
        let mut req = self.http.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status.as_u16(), text));
        }

        let completion: ChatCompletion =
            response
                .json()
                .await
                .map_err(|e| LlmError::MalformedResponse {
                    message: e.to_string(),
                })?;
        parse_completion(completion)
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}
