//! OpenAI chat-completion wire shapes.
//!
//! Buffered responses are one [`ChatCompletion`]. Streamed responses are a
//! sequence of [`ChatCompletionChunk`]s sharing one id and timestamp: one per
//! backend line, then a terminal chunk with an empty delta and
//! `finish_reason: "stop"`, then the literal `[DONE]` event.
//!
//! Token counts are estimates (`chars / 4`, floored). Clients of this
//! bridge rely on that exact arithmetic, so it is not swapped for a real
//! tokenizer.

use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::models::Role;

pub const DONE_SENTINEL: &str = "[DONE]";

/// `chatcmpl-` followed by 8 random hex digits.
pub fn completion_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..8])
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count() as u64 / 4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = estimate_tokens(prompt);
        let completion_tokens = estimate_tokens(completion);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    pub role: Role,
    pub content: String,
}

impl ChatCompletion {
    /// Frame raw backend output. Usage counts the untrimmed text; the
    /// message content is trimmed.
    pub fn new(model: &str, prompt: &str, output: &str) -> Self {
        Self {
            id: completion_id(),
            object: "chat.completion",
            created: unix_now(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: Role::Assistant,
                    content: output.trim().to_string(),
                },
                finish_reason: "stop",
            }],
            usage: Usage::estimate(prompt, output),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Builds the chunks of one streamed response.
#[derive(Debug, Clone)]
pub struct StreamFramer {
    id: String,
    created: i64,
    model: String,
}

impl StreamFramer {
    pub fn new(model: &str) -> Self {
        Self {
            id: completion_id(),
            created: unix_now(),
            model: model.to_string(),
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<&'static str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    pub fn content_chunk(&self, text: impl Into<String>) -> ChatCompletionChunk {
        self.chunk(
            Delta {
                content: Some(text.into()),
            },
            None,
        )
    }

    pub fn stop_chunk(&self) -> ChatCompletionChunk {
        self.chunk(Delta::default(), Some("stop"))
    }
}

/// SSE events for a streamed response: content chunks, the stop chunk,
/// then `[DONE]`. Always at least two events, even for an empty `lines`.
pub fn sse_events<S>(
    framer: StreamFramer,
    lines: S,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send
where
    S: Stream<Item = String> + Send + 'static,
{
    let stop = framer.stop_chunk();
    lines
        .map(move |line| framer.content_chunk(line))
        .chain(stream::once(async move { stop }))
        .map(|chunk| Event::default().json_data(chunk))
        .chain(stream::once(async {
            Ok(Event::default().data(DONE_SENTINEL))
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_have_expected_shape() {
        let id = completion_id();
        assert!(id.starts_with("chatcmpl-"));
        let suffix = &id["chatcmpl-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn usage_is_floor_quarter_and_sums() {
        let u = Usage::estimate("abcdefg", "abc");
        assert_eq!(u.prompt_tokens, 1);
        assert_eq!(u.completion_tokens, 0);
        assert_eq!(u.total_tokens, 1);

        for (p, c) in [("", ""), ("xxxxxxxxx", "yyyyyyy"), ("ñññññ", "😀😀😀😀😀😀😀😀")] {
            let u = Usage::estimate(p, c);
            assert_eq!(u.total_tokens, u.prompt_tokens + u.completion_tokens);
            assert_eq!(u.prompt_tokens, p.chars().count() as u64 / 4);
            assert_eq!(u.completion_tokens, c.chars().count() as u64 / 4);
        }
    }

    #[test]
    fn buffered_completion_shape() {
        let c = ChatCompletion::new("sergio-rag", "p".repeat(40).as_str(), "  Mira, tío.\n");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["object"], "chat.completion");
        assert_eq!(v["model"], "sergio-rag");
        assert_eq!(
            v["choices"],
            json!([{
                "index": 0,
                "message": {"role": "assistant", "content": "Mira, tío."},
                "finish_reason": "stop"
            }])
        );
        assert_eq!(
            v["usage"],
            json!({"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13})
        );
    }

    #[test]
    fn chunks_share_id_and_created() {
        let f = StreamFramer::new("m");
        let a = serde_json::to_value(f.content_chunk("uno\n")).unwrap();
        let b = serde_json::to_value(f.stop_chunk()).unwrap();
        assert_eq!(a["id"], b["id"]);
        assert_eq!(a["created"], b["created"]);
        assert_eq!(a["object"], "chat.completion.chunk");
        assert_eq!(
            a["choices"],
            json!([{"index": 0, "delta": {"content": "uno\n"}, "finish_reason": null}])
        );
        assert_eq!(
            b["choices"],
            json!([{"index": 0, "delta": {}, "finish_reason": "stop"}])
        );
        assert!(b.get("usage").is_none());
    }

    #[tokio::test]
    async fn event_count_is_lines_plus_two() {
        let lines = stream::iter(vec!["a\n".to_string(), "b\n".to_string()]);
        let events: Vec<_> = sse_events(StreamFramer::new("m"), lines).collect().await;
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.is_ok()));

        let empty = stream::iter(Vec::<String>::new());
        let events: Vec<_> = sse_events(StreamFramer::new("m"), empty).collect().await;
        assert_eq!(events.len(), 2);
    }
}
