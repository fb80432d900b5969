use super::{ChatChunk, ChatMessage, ChatRequest, ChunkStream, Provider};
use anyhow::{anyhow, Context};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

const MAX_ATTEMPTS: u32 = 3;

/// Streaming client for any OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: Url,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, api_key: String, base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            api_key,
            endpoint: completions_url(base_url)?,
        })
    }

    /// POST the request, retrying transient failures with exponential backoff.
    async fn send(&self, body: &CompletionRequest) -> anyhow::Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let err = match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let (err, retryable) = status_error(status, &text);
                    if !retryable {
                        return Err(err);
                    }
                    err
                }
                Err(e) => anyhow!(e).context("failed to send chat request"),
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(err.context(format!("giving up after {attempt} attempts")));
            }
            let wait = backoff(attempt);
            tracing::warn!(attempt, ?wait, error = %format!("{err:#}"), "chat request failed; retrying");
            tokio::time::sleep(wait).await;
        }
    }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<ChunkStream>> + Send>> {
        let this = self.clone();

        Box::pin(async move {
            let started = Instant::now();
            let body = CompletionRequest {
                model: req.model,
                messages: req.messages,
                stream: true,
            };
            tracing::debug!(model = %body.model, messages = body.messages.len(), "starting chat stream");

            let resp = this.send(&body).await?;
            tracing::debug!(elapsed = ?started.elapsed(), "response headers received");

            let (tx, rx) = mpsc::channel::<anyhow::Result<ChatChunk>>(64);

            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                let mut parser = SseParser::new();
                let mut first_token = true;

                while let Some(item) = stream.next().await {
                    let bytes = match item {
                        Ok(b) => b,
                        Err(e) => {
                            let _ = tx.send(Err(anyhow!(e).context("network stream error"))).await;
                            return;
                        }
                    };

                    for ev in parser.push(&bytes) {
                        let data = match ev {
                            Ok(SseEvent::Data(data)) => data,
                            Ok(SseEvent::Done) => {
                                tracing::debug!(elapsed = ?started.elapsed(), "chat stream finished");
                                return;
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        };

                        match parse_chunk(&data) {
                            Ok(Some(text)) => {
                                if first_token {
                                    first_token = false;
                                    tracing::debug!(elapsed = ?started.elapsed(), "first token");
                                }
                                if tx.send(Ok(ChatChunk { text })).await.is_err() {
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
                tracing::debug!(elapsed = ?started.elapsed(), "chat stream closed without [DONE]");
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        })
    }
}

fn completions_url(base_url: &str) -> anyhow::Result<Url> {
    // Url::join drops the last path segment unless the base ends with '/'.
    let base = format!("{}/", base_url.trim_end_matches('/'));
    let base = Url::parse(&base).with_context(|| format!("invalid base_url: {base_url}"))?;
    Ok(base.join("chat/completions")?)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).clamp(4, 10))
}

/// Map a failed HTTP status to an error, and whether trying again may help.
fn status_error(status: StatusCode, body: &str) -> (anyhow::Error, bool) {
    match status {
        StatusCode::UNAUTHORIZED => (anyhow!("API key is invalid (HTTP 401)"), false),
        StatusCode::TOO_MANY_REQUESTS => (anyhow!("rate limit exceeded (HTTP 429)"), true),
        s => (anyhow!("API error: HTTP {s}: {body}"), s.is_server_error()),
    }
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Text carried by one SSE data payload, if any.
fn parse_chunk(data: &str) -> anyhow::Result<Option<String>> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    let chunk: CompletionChunk = serde_json::from_str(data).context("failed to parse SSE JSON")?;
    if let Some(err) = chunk.error {
        return Err(anyhow!("API error in stream: {}", err.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Minimal SSE parser.
///
/// - Collects UTF-8 lines
/// - Emits Data events when a blank line ends an event
/// - Maps the `[DONE]` sentinel to `Done`
struct SseParser {
    buf: Vec<u8>,
    cur_data: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            cur_data: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<anyhow::Result<SseEvent>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            if line.is_empty() {
                if !self.cur_data.is_empty() {
                    if self.cur_data.ends_with('\n') {
                        self.cur_data.pop();
                    }
                    let data = std::mem::take(&mut self.cur_data);
                    if data.trim() == "[DONE]" {
                        out.push(Ok(SseEvent::Done));
                    } else {
                        out.push(Ok(SseEvent::Data(data)));
                    }
                }
                continue;
            }

            let s = match std::str::from_utf8(&line) {
                Ok(s) => s,
                Err(e) => {
                    out.push(Err(anyhow!(e).context("SSE line is not valid UTF-8")));
                    continue;
                }
            };

            // Other fields (event:, id:, retry:) and comments are ignored.
            if let Some(rest) = s.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.cur_data.push_str(rest);
                self.cur_data.push('\n');
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn events(parser: &mut SseParser, chunk: &str) -> Vec<SseEvent> {
        parser.push(chunk.as_bytes()).into_iter().map(|e| e.unwrap()).collect()
    }

    #[test]
    fn sse_events_split_across_chunks() {
        let mut p = SseParser::new();
        assert!(events(&mut p, "data: {\"a\"").is_empty());
        assert!(events(&mut p, ":1}\r\n").is_empty());
        assert_eq!(
            events(&mut p, "\r\n: keep-alive\n\ndata: [DONE]\n\n"),
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut p = SseParser::new();
        assert_eq!(
            events(&mut p, "event: message\ndata: one\ndata: two\n\n"),
            vec![SseEvent::Data("one\ntwo".to_string())]
        );
    }

    #[test]
    fn utf8_split_inside_a_line() {
        let mut p = SseParser::new();
        let bytes = "data: 你好\n\n".as_bytes();
        assert!(p.push(&bytes[..8]).is_empty());
        let out: Vec<SseEvent> = p.push(&bytes[8..]).into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(out, vec![SseEvent::Data("你好".to_string())]);
    }

    #[test]
    fn chunk_text_comes_from_first_delta() {
        let data = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_chunk(data).unwrap(), Some("Hi".to_string()));
    }

    #[test]
    fn role_only_and_usage_frames_are_skipped() {
        let role = r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#;
        let usage = r#"{"choices":[],"usage":{"total_tokens":12}}"#;
        assert_eq!(parse_chunk(role).unwrap(), None);
        assert_eq!(parse_chunk(usage).unwrap(), None);
        assert_eq!(parse_chunk("  ").unwrap(), None);
    }

    #[test]
    fn in_stream_errors_surface() {
        let data = r#"{"error":{"message":"quota exhausted"}}"#;
        let err = parse_chunk(data).unwrap_err();
        assert!(err.to_string().contains("quota exhausted"));
        assert!(parse_chunk("not json").is_err());
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let url = completions_url("https://dashscope.aliyuncs.com/compatible-mode/v1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
        );
        let url = completions_url("http://localhost:8080/v1/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/chat/completions");
        assert!(completions_url("not a url").is_err());
    }

    #[test]
    fn status_mapping() {
        let (err, retry) = status_error(StatusCode::UNAUTHORIZED, "");
        assert!(!retry);
        assert!(err.to_string().contains("API key is invalid"));

        let (err, retry) = status_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(retry);
        assert!(err.to_string().contains("rate limit exceeded"));

        assert!(status_error(StatusCode::BAD_GATEWAY, "").1);
        assert!(!status_error(StatusCode::BAD_REQUEST, "bad model").1);
    }

    #[test]
    fn backoff_is_clamped() {
        assert_eq!(backoff(1), Duration::from_secs(4));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(10), Duration::from_secs(10));
    }
}
