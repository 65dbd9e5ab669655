//! Anthropic Messages API adapter
//!
//! Streams `/v1/messages` SSE responses. Text deltas arrive as
//! `content_block_delta` events; usage comes from `message_start` (input)
//! and `message_delta` (output); `message_stop` terminates the stream.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::sse::{MAX_SSE_BUFFER_BYTES, drain_next_event, extract_data, read_capped_error_body};
use super::{
    ChatMessage, ChatParams, ChatProvider, ChatRole, ProviderError, ProviderEvent, ProviderKind,
    ProviderStream, Usage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

fn build_request_body(messages: &[ChatMessage], params: &ChatParams) -> Value {
    let api_messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            json!({
                "role": match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                "content": m.content,
            })
        })
        .collect();

    json!({
        "model": params.model_id,
        "max_tokens": params.max_output_tokens,
        "stream": true,
        "messages": api_messages,
    })
}

/// Map a mid-stream `error` event to the taxonomy
fn classify_stream_error(error: &Value) -> ProviderError {
    let message = error["message"].as_str().unwrap_or("stream error").to_string();
    match error["type"].as_str().unwrap_or("") {
        "authentication_error" | "permission_error" => ProviderError::AuthInvalid { message },
        "rate_limit_error" => ProviderError::RateLimited {
            message,
            retry_after_secs: None,
        },
        "overloaded_error" | "api_error" => ProviderError::Unavailable { message },
        "not_found_error" => ProviderError::ModelNotFound { message },
        _ => ProviderError::Internal { message },
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<ProviderStream, ProviderError> {
        let body = build_request_body(messages, params);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &params.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = read_capped_error_body(response).await;
            return Err(ProviderError::from_status(status, &error_text));
        }

        let stream = stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut usage = Usage::default();
            let mut saw_stop = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::from(e));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                if buffer.len() > MAX_SSE_BUFFER_BYTES {
                    yield Err(ProviderError::Internal {
                        message: "SSE buffer exceeded maximum size".to_string(),
                    });
                    return;
                }

                while let Some(event) = drain_next_event(&mut buffer) {
                    if event.is_empty() {
                        continue;
                    }
                    let Ok(event) = std::str::from_utf8(&event) else {
                        yield Err(ProviderError::Internal {
                            message: "invalid UTF-8 in SSE stream".to_string(),
                        });
                        return;
                    };
                    let Some(data) = extract_data(event) else {
                        continue;
                    };
                    let Ok(json) = serde_json::from_str::<Value>(&data) else {
                        continue;
                    };

                    match json["type"].as_str().unwrap_or("") {
                        "message_start" => {
                            usage.input_tokens =
                                json["message"]["usage"]["input_tokens"].as_i64();
                        }
                        "content_block_delta" => {
                            if json["delta"]["type"] == "text_delta"
                                && let Some(text) = json["delta"]["text"].as_str()
                            {
                                yield Ok(ProviderEvent::Delta(text.to_string()));
                            }
                        }
                        "message_delta" => {
                            if let Some(output) = json["usage"]["output_tokens"].as_i64() {
                                usage.output_tokens = Some(output);
                            }
                        }
                        "message_stop" => {
                            saw_stop = true;
                            yield Ok(ProviderEvent::Done(usage));
                            break 'read;
                        }
                        "error" => {
                            yield Err(classify_stream_error(&json["error"]));
                            return;
                        }
                        _ => {}
                    }
                }
            }

            if !saw_stop {
                yield Err(ProviderError::Unavailable {
                    message: "connection closed before stream completed".to_string(),
                });
            }
        };

        Ok(Box::pin(stream))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}
