//! OpenAI Responses API adapter
//!
//! Streams `/v1/responses` SSE events. Text arrives as
//! `response.output_text.delta`; `response.completed` terminates the stream
//! and carries usage. A literal `[DONE]` sentinel is also honored.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::sse::{MAX_SSE_BUFFER_BYTES, drain_next_event, extract_data, read_capped_error_body};
use super::{
    ChatMessage, ChatParams, ChatProvider, ChatRole, ProviderError, ProviderEvent, ProviderKind,
    ProviderStream, Usage,
};

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

fn build_request_body(messages: &[ChatMessage], params: &ChatParams) -> Value {
    let input_items: Vec<Value> = messages
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
        "input": input_items,
        "max_output_tokens": params.max_output_tokens,
        "stream": true,
    })
}

fn extract_error_message(payload: &Value) -> String {
    payload["error"]["message"]
        .as_str()
        .or_else(|| payload["response"]["error"]["message"].as_str())
        .unwrap_or("response failed")
        .to_string()
}

fn extract_usage(payload: &Value) -> Usage {
    let usage = &payload["response"]["usage"];
    Usage {
        input_tokens: usage["input_tokens"].as_i64(),
        output_tokens: usage["output_tokens"].as_i64(),
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<ProviderStream, ProviderError> {
        let body = build_request_body(messages, params);

        let response = self
            .client
            .post(format!("{}/v1/responses", self.base_url))
            .header("Authorization", format!("Bearer {}", params.api_key))
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
            let mut saw_done = false;

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

                    if data == "[DONE]" {
                        saw_done = true;
                        yield Ok(ProviderEvent::Done(Usage::default()));
                        break 'read;
                    }

                    let Ok(json) = serde_json::from_str::<Value>(&data) else {
                        continue;
                    };

                    match json["type"].as_str().unwrap_or("") {
                        "response.output_text.delta" | "response.refusal.delta" => {
                            if let Some(delta) = json["delta"].as_str() {
                                yield Ok(ProviderEvent::Delta(delta.to_string()));
                            }
                        }
                        "response.completed" => {
                            saw_done = true;
                            yield Ok(ProviderEvent::Done(extract_usage(&json)));
                            break 'read;
                        }
                        "response.incomplete" | "response.failed" | "error" => {
                            yield Err(ProviderError::Internal {
                                message: extract_error_message(&json),
                            });
                            return;
                        }
                        _ => {}
                    }
                }
            }

            if !saw_done {
                yield Err(ProviderError::Unavailable {
                    message: "connection closed before stream completed".to_string(),
                });
            }
        };

        Ok(Box::pin(stream))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ChatParams {
        ChatParams {
            model_id: "gpt-4o-mini".to_string(),
            api_key: "sk-test".to_string(),
            max_output_tokens: 512,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::user("hi")];
        let body = build_request_body(&messages, &params());

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_output_tokens"], 512);
        assert_eq!(body["stream"], true);

        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["role"], "user");
        assert_eq!(input[0]["content"], "hi");
    }

    #[test]
    fn test_extract_error_message() {
        let payload = json!({"error": {"message": "top-level"}});
        assert_eq!(extract_error_message(&payload), "top-level");

        let payload = json!({"response": {"error": {"message": "nested"}}});
        assert_eq!(extract_error_message(&payload), "nested");

        assert_eq!(extract_error_message(&json!({})), "response failed");
    }

    #[test]
    fn test_extract_usage() {
        let payload = json!({
            "response": {"usage": {"input_tokens": 12, "output_tokens": 34}}
        });
        let usage = extract_usage(&payload);
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(34));

        assert_eq!(extract_usage(&json!({})), Usage::default());
    }
}
