//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_delta` events

use async_trait::async_trait;
use deckhand_config::ProviderConfig;
use deckhand_core::error::ProviderError;
use deckhand_core::message::ContentBlock;
use deckhand_core::provider::*;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// `timeout` bounds connecting and each read, so a long stream that keeps
    /// producing events is never cut off; one that goes silent is.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Connection(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create from the `[provider]` section of the config.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::AuthenticationFailed(
                "No API key configured (set ANTHROPIC_API_KEY or provider.api_key)".into(),
            )
        })?;
        Ok(Self::new(api_key, Duration::from_secs(config.timeout_secs))?.with_base_url(&config.api_url))
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the JSON body for a streaming Messages API call.
    ///
    /// Conversation turns serialize directly into the API's content-block
    /// shape.
    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
        }

        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(status_error(status, &error_body));
        }

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();
            let mut message = MessageAccumulator::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(transport_error(e))).await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    let event: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match message.apply(&event) {
                        Ok(Some(chunk)) => {
                            let done = matches!(chunk, StreamChunk::Final(_));
                            if tx.send(Ok(chunk)).await.is_err() || done {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx
                .send(Err(ProviderError::Connection(
                    "Stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// Classify a `reqwest` failure.
fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Connection(e.to_string())
    }
}

/// Map a non-200 response to a provider error.
fn status_error(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ProviderError::AuthenticationFailed(message),
        _ => ProviderError::Status {
            status_code: status,
            message,
        },
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across network chunks decodes intact.
#[derive(Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');
            // `event:` lines repeat the `type` field of the data payload.
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

/// Rebuilds the final message from streamed events.
#[derive(Default)]
struct MessageAccumulator {
    blocks: Vec<PartialBlock>,
    stop_reason: Option<StopReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl MessageAccumulator {
    /// Apply one event; returns a chunk to forward, if any.
    fn apply(&mut self, event: &serde_json::Value) -> Result<Option<StreamChunk>, ProviderError> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.input_tokens = token_count(&usage["input_tokens"]);
                self.output_tokens = token_count(&usage["output_tokens"]);
            }
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => self.blocks.push(PartialBlock::ToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        json: String::new(),
                    }),
                    _ => self.blocks.push(PartialBlock::Text(
                        block["text"].as_str().unwrap_or("").to_string(),
                    )),
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match (delta["type"].as_str(), self.blocks.last_mut()) {
                    (Some("text_delta"), Some(PartialBlock::Text(text))) => {
                        let fragment = delta["text"].as_str().unwrap_or("");
                        text.push_str(fragment);
                        if !fragment.is_empty() {
                            return Ok(Some(StreamChunk::Text(fragment.to_string())));
                        }
                    }
                    (Some("input_json_delta"), Some(PartialBlock::ToolUse { json, .. })) => {
                        json.push_str(delta["partial_json"].as_str().unwrap_or(""));
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = serde_json::from_value(serde_json::json!(reason)).ok();
                }
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = u32::try_from(out).unwrap_or(u32::MAX);
                }
            }
            "message_stop" => return self.finish().map(|m| Some(StreamChunk::Final(m))),
            "error" => {
                let error = &event["error"];
                let message = error["message"].as_str().unwrap_or("unknown error").to_string();
                return Err(match error["type"].as_str().unwrap_or("") {
                    "authentication_error" | "permission_error" => {
                        ProviderError::AuthenticationFailed(message)
                    }
                    "overloaded_error" => ProviderError::Status {
                        status_code: 529,
                        message,
                    },
                    "rate_limit_error" => ProviderError::Status {
                        status_code: 429,
                        message,
                    },
                    _ => ProviderError::Status {
                        status_code: 500,
                        message,
                    },
                });
            }
            // ping, content_block_stop
            _ => {}
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<FinalMessage, ProviderError> {
        let mut content = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            match block {
                PartialBlock::Text(text) if text.is_empty() => {}
                PartialBlock::Text(text) => content.push(ContentBlock::text(text)),
                PartialBlock::ToolUse { id, name, json } => {
                    let input = if json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&json).map_err(|e| {
                            ProviderError::Protocol(format!("Invalid tool input for {name}: {e}"))
                        })?
                    };
                    content.push(ContentBlock::tool_use(id, name, input));
                }
            }
        }

        Ok(FinalMessage {
            content,
            stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
            usage: Some(Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            }),
        })
    }
}

fn token_count(value: &serde_json::Value) -> u32 {
    value
        .as_u64()
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::message::Message;

    fn events(raw: &str) -> Vec<serde_json::Value> {
        let mut lines = SseLines::default();
        lines
            .push(raw.as_bytes())
            .into_iter()
            .map(|d| serde_json::from_str(&d).unwrap())
            .collect()
    }

    const TOOL_STREAM: &str = "\
event: message_start
data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":120,\"output_tokens\":1}}}

event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Let me \"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"look.\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":0}

event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"read_file\",\"input\":{}}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\": \"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"a.py\\\"}\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":1}

event: message_delta
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":42}}

event: message_stop
data: {\"type\":\"message_stop\"}

";

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-test", Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:8080/");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, "http://localhost:8080");
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = ProviderConfig::default();
        let err = AnthropicProvider::from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[test]
    fn request_body_shape() {
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![
                Message::user("read a.py"),
                Message::assistant_blocks(vec![ContentBlock::tool_use(
                    "toolu_1",
                    "read_file",
                    serde_json::json!({"path": "a.py"}),
                )]),
                Message::tool_results(vec![ContentBlock::tool_error("toolu_1", "File not found")]),
            ],
            system: "You are helpful.".into(),
            max_tokens: 1024,
            tools: vec![ToolDefinition {
                name: "read_file".into(),
                description: "Read a file".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
        };

        let body = AnthropicProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "You are helpful.");
        assert_eq!(body["messages"][0]["content"], "read a.py");
        assert_eq!(body["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(body["messages"][2]["role"], "user");
        assert_eq!(body["messages"][2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(body["messages"][2]["content"][0]["is_error"], true);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn request_body_omits_empty_tools() {
        let request = ProviderRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            system: String::new(),
            max_tokens: 16,
            tools: vec![],
        };
        let body = AnthropicProvider::request_body(&request);
        assert!(body.get("tools").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn parse_tool_use_stream() {
        let mut message = MessageAccumulator::default();
        let mut text = Vec::new();
        let mut finals = Vec::new();
        for event in events(TOOL_STREAM) {
            match message.apply(&event).unwrap() {
                Some(StreamChunk::Text(t)) => text.push(t),
                Some(StreamChunk::Final(f)) => finals.push(f),
                None => {}
            }
        }

        assert_eq!(text, vec!["Let me ", "look."]);
        assert_eq!(finals.len(), 1);
        let final_message = &finals[0];
        assert_eq!(final_message.stop_reason, StopReason::ToolUse);
        assert_eq!(
            final_message.content,
            vec![
                ContentBlock::text("Let me look."),
                ContentBlock::tool_use("toolu_1", "read_file", serde_json::json!({"path": "a.py"})),
            ]
        );
        assert_eq!(
            final_message.usage,
            Some(Usage {
                input_tokens: 120,
                output_tokens: 42
            })
        );
    }

    #[test]
    fn sse_lines_survive_split_chunks() {
        let mut lines = SseLines::default();
        assert!(lines.push(b"data: {\"type\":").is_empty());
        let payloads = lines.push(b"\"ping\"}\r\n\r\n");
        assert_eq!(payloads, vec!["{\"type\":\"ping\"}"]);
    }

    #[test]
    fn sse_lines_keep_characters_split_across_chunks() {
        let raw = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"日本\"}}\n\n"
            .as_bytes();
        let split = raw.iter().position(|b| *b == 0xE6).unwrap() + 1;

        let mut lines = SseLines::default();
        assert!(lines.push(&raw[..split]).is_empty());
        let payloads = lines.push(&raw[split..]);
        assert_eq!(payloads.len(), 1);

        let event: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(event["delta"]["text"], "日本");
    }

    #[test]
    fn tool_use_without_input_defaults_to_empty_object() {
        let mut message = MessageAccumulator::default();
        message
            .apply(&serde_json::json!({
                "type": "content_block_start",
                "content_block": {"type": "tool_use", "id": "t1", "name": "list_files", "input": {}}
            }))
            .unwrap();
        let Some(StreamChunk::Final(f)) = message
            .apply(&serde_json::json!({"type": "message_stop"}))
            .unwrap()
        else {
            panic!("expected final message");
        };
        assert_eq!(f.tool_uses().next().unwrap().2, &serde_json::json!({}));
    }

    #[test]
    fn error_events_are_classified() {
        let mut message = MessageAccumulator::default();
        let err = message
            .apply(&serde_json::json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            }))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status { status_code: 529, .. }));
    }

    #[test]
    fn status_mapping() {
        let auth = status_error(
            401,
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        );
        assert!(matches!(auth, ProviderError::AuthenticationFailed(ref m) if m == "invalid x-api-key"));

        let other = status_error(500, "upstream exploded");
        assert!(matches!(
            other,
            ProviderError::Status { status_code: 500, ref message } if message == "upstream exploded"
        ));
    }

    fn sse_event(data: serde_json::Value) -> String {
        format!("event: {}\ndata: {data}\n\n", data["type"].as_str().unwrap())
    }

    fn text_events(deltas: &[&str]) -> Vec<String> {
        let mut events = vec![
            sse_event(serde_json::json!({
                "type": "message_start",
                "message": {"usage": {"input_tokens": 10, "output_tokens": 0}}
            })),
            sse_event(serde_json::json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            })),
        ];
        events.extend(deltas.iter().map(|text| {
            sse_event(serde_json::json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": text}
            }))
        }));
        events
    }

    fn closing_events() -> Vec<String> {
        vec![
            sse_event(serde_json::json!({"type": "content_block_stop", "index": 0})),
            sse_event(serde_json::json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn"},
                "usage": {"output_tokens": 5}
            })),
            sse_event(serde_json::json!({"type": "message_stop"})),
        ]
    }

    /// Serve one chunked SSE response, sleeping before each event.
    async fn serve_events(schedule: Vec<(Duration, String)>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 64 * 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for (delay, event) in schedule {
                tokio::time::sleep(delay).await;
                let chunk = format!("{:x}\r\n{event}\r\n", event.len());
                if socket.write_all(chunk.as_bytes()).await.is_err() {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });
        format!("http://{addr}")
    }

    fn hello_request() -> ProviderRequest {
        ProviderRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            system: String::new(),
            max_tokens: 16,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn steady_stream_outlives_the_timeout() {
        let gap = Duration::from_millis(200);
        let mut events = text_events(&["one ", "two ", "three ", "four ", "five"]);
        events.extend(closing_events());
        let url = serve_events(events.into_iter().map(|e| (gap, e)).collect()).await;

        // Ten events 200ms apart take twice as long as the timeout.
        let provider = AnthropicProvider::new("sk-test", Duration::from_millis(1000))
            .unwrap()
            .with_base_url(url);
        let mut rx = provider.stream(hello_request()).await.unwrap();

        let mut text = String::new();
        let mut final_message = None;
        while let Some(chunk) = rx.recv().await {
            match chunk.unwrap() {
                StreamChunk::Text(t) => text.push_str(&t),
                StreamChunk::Final(f) => final_message = Some(f),
            }
        }

        assert_eq!(text, "one two three four five");
        let final_message = final_message.expect("stream should finish");
        assert_eq!(final_message.stop_reason, StopReason::EndTurn);
        assert_eq!(final_message.content, vec![ContentBlock::text("one two three four five")]);
    }

    #[tokio::test]
    async fn silent_stream_times_out() {
        let mut schedule: Vec<_> = text_events(&["partial"])
            .into_iter()
            .map(|e| (Duration::ZERO, e))
            .collect();
        schedule.push((Duration::from_secs(5), closing_events().remove(0)));
        let url = serve_events(schedule).await;

        let provider = AnthropicProvider::new("sk-test", Duration::from_millis(300))
            .unwrap()
            .with_base_url(url);
        let mut rx = provider.stream(hello_request()).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Ok(StreamChunk::Text(t))) if t == "partial"));
        assert!(matches!(rx.recv().await, Some(Err(ProviderError::Timeout(_)))));
    }
}
