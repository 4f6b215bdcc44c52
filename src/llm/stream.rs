//! Server-sent event framing and the per-request stream state machine.
//!
//! The machine owns the accumulated answer. It moves
//! `Connecting -> Streaming -> Finalizing -> Done`, and hands the final text out
//! exactly once no matter how many of `[DONE]`, end of body or abort arrive.

use log::{debug, error};
use serde_json::Value;

use crate::llm::ChatCompletionEvent;

pub static EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
pub static DONE_SENTINEL: &str = "[DONE]";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser, network chunks may split lines and events anywhere
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, strum::Display)]
pub enum StreamState {
    Connecting,
    Streaming,
    Finalizing,
    Done,
}

/// What to do with a freshly opened response
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpenVerdict {
    /// The body is the answer as-is
    PlainText,
    /// The body describes a failure
    Failure { unauthorized: bool },
    Stream,
}

#[derive(Debug)]
pub struct ChatStreamMachine {
    state: StreamState,
    text: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = vec![];
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }

        events
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).to_string();
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }

        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

pub fn classify_open(status: u16, content_type: Option<&str>) -> OpenVerdict {
    let content_type = content_type.unwrap_or_default().to_lowercase();

    if content_type.starts_with("text/plain") {
        OpenVerdict::PlainText
    } else if status != 200 || !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
        OpenVerdict::Failure {
            unauthorized: status == 401,
        }
    } else {
        OpenVerdict::Stream
    }
}

/// Text shown in place of an answer when the upstream refused the request
pub fn failure_text(unauthorized_message: Option<&str>, body: &str) -> String {
    let mut parts: Vec<String> = vec![];

    if let Some(message) = unauthorized_message {
        parts.push(message.to_string());
    }

    let extra_info = match serde_json::from_str::<Value>(body) {
        Ok(json) => pretty_json(&json),
        Err(_) => body.trim().to_string(),
    };
    if !extra_info.is_empty() {
        parts.push(extra_info);
    }

    parts.join("\n\n")
}

fn pretty_json(json: &Value) -> String {
    match serde_json::to_string_pretty(json) {
        Ok(s) => format!("```json\n{s}\n```"),
        Err(_) => json.to_string(),
    }
}

impl ChatStreamMachine {
    pub fn new() -> Self {
        Self {
            state: StreamState::Connecting,
            text: String::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, StreamState::Finalizing | StreamState::Done)
    }

    /// Response headers arrived and the body is an event stream
    pub fn open(&mut self) {
        if self.state == StreamState::Connecting {
            self.state = StreamState::Streaming;
        }
    }

    /// Replace the answer with a whole body and finalize, used for plain text and failures
    pub fn finish_with(&mut self, text: String) -> Option<ChatCompletionEvent> {
        if self.is_done() {
            return None;
        }

        self.text = text;
        self.finalize()
    }

    pub fn on_data(&mut self, data: &str) -> Option<ChatCompletionEvent> {
        if self.is_done() || data == DONE_SENTINEL {
            return self.finalize();
        }

        if self.state != StreamState::Streaming {
            debug!("Ignore data in state {}", self.state);
            return None;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(json) => {
                let delta = json["choices"][0]["delta"]["content"].as_str()?;
                if delta.is_empty() {
                    return None;
                }

                self.text.push_str(delta);
                Some(ChatCompletionEvent::Update {
                    text: self.text.clone(),
                    delta: delta.to_string(),
                })
            }
            Err(err) => {
                error!("Skip malformed stream event '{data}': {err}");
                None
            }
        }
    }

    /// End of body or external abort
    pub fn on_close(&mut self) -> Option<ChatCompletionEvent> {
        self.finalize()
    }

    /// The final event has been handed to the consumer
    pub fn complete(&mut self) {
        if self.state == StreamState::Finalizing {
            self.state = StreamState::Done;
        }
    }

    fn finalize(&mut self) -> Option<ChatCompletionEvent> {
        match self.state {
            StreamState::Connecting | StreamState::Streaming => {
                self.state = StreamState::Finalizing;
                let text = std::mem::take(&mut self.text);
                debug!("Chat finished with {} chars", text.chars().count());
                Some(ChatCompletionEvent::Finish(text))
            }
            StreamState::Finalizing | StreamState::Done => None,
        }
    }
}

impl Default for ChatStreamMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_event(content: &str) -> String {
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] }).to_string()
    }

    fn finish_text(event: Option<ChatCompletionEvent>) -> Option<String> {
        match event {
            Some(ChatCompletionEvent::Finish(text)) => Some(text),
            _ => None,
        }
    }

    #[test]
    fn test_decoder_split_chunks() {
        let mut decoder = SseDecoder::new();

        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let events = decoder.push(b": 1}\r\n\r\n: keep-alive\n\nevent: ping\ndata: x\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: None,
                data: "{\"a\": 1}".to_string(),
            }]
        );

        assert_eq!(
            decoder.finish(),
            Some(SseEvent {
                event: Some("ping".to_string()),
                data: "x".to_string(),
            })
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: first\ndata:second\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[1].data, "[DONE]");
    }

    #[test]
    fn test_classify_open() {
        assert_eq!(
            classify_open(200, Some("text/event-stream; charset=utf-8")),
            OpenVerdict::Stream
        );
        assert_eq!(
            classify_open(200, Some("text/plain; charset=utf-8")),
            OpenVerdict::PlainText
        );
        assert_eq!(
            classify_open(401, Some("application/json")),
            OpenVerdict::Failure { unauthorized: true }
        );
        assert_eq!(
            classify_open(200, Some("application/json")),
            OpenVerdict::Failure {
                unauthorized: false
            }
        );
        assert_eq!(
            classify_open(500, None),
            OpenVerdict::Failure {
                unauthorized: false
            }
        );
    }

    #[test]
    fn test_failure_text() {
        let text = failure_text(
            Some("Unauthorized"),
            r#"{"error":{"message":"Incorrect API key"}}"#,
        );
        assert!(text.starts_with("Unauthorized\n\n```json\n"));
        assert!(text.contains("\"message\": \"Incorrect API key\""));

        assert_eq!(failure_text(None, " Bad gateway \n"), "Bad gateway");
        assert_eq!(failure_text(None, ""), "");
    }

    #[test]
    fn test_machine_accumulates_deltas() {
        let mut machine = ChatStreamMachine::new();
        assert_eq!(machine.state(), StreamState::Connecting);

        machine.open();
        assert_eq!(machine.state(), StreamState::Streaming);

        match machine.on_data(&delta_event("Hel")) {
            Some(ChatCompletionEvent::Update { text, delta }) => {
                assert_eq!(text, "Hel");
                assert_eq!(delta, "Hel");
            }
            other => panic!("unexpected {other:?}"),
        }

        match machine.on_data(&delta_event("lo")) {
            Some(ChatCompletionEvent::Update { text, delta }) => {
                assert_eq!(text, "Hello");
                assert_eq!(delta, "lo");
            }
            other => panic!("unexpected {other:?}"),
        }

        // role-only and malformed events are skipped
        assert!(
            machine
                .on_data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#)
                .is_none()
        );
        assert!(machine.on_data("{not json").is_none());
        assert_eq!(machine.text(), "Hello");
    }

    #[test]
    fn test_machine_done_finishes_once() {
        let mut machine = ChatStreamMachine::new();
        machine.open();
        machine.on_data(&delta_event("Hi"));

        assert_eq!(finish_text(machine.on_data(DONE_SENTINEL)), Some("Hi".to_string()));
        assert_eq!(machine.state(), StreamState::Finalizing);
        machine.complete();
        assert_eq!(machine.state(), StreamState::Done);

        assert!(machine.on_data(&delta_event("late")).is_none());
        assert!(machine.on_data(DONE_SENTINEL).is_none());
        assert!(machine.on_close().is_none());
        assert!(machine.finish_with("other".to_string()).is_none());
    }

    #[test]
    fn test_machine_abort_keeps_partial_text() {
        let mut machine = ChatStreamMachine::new();
        machine.open();
        machine.on_data(&delta_event("partial"));

        assert_eq!(finish_text(machine.on_close()), Some("partial".to_string()));
        assert!(machine.on_close().is_none());
    }

    #[test]
    fn test_machine_abort_before_open() {
        let mut machine = ChatStreamMachine::new();
        assert!(machine.on_data(&delta_event("early")).is_none());
        assert_eq!(finish_text(machine.on_close()), Some(String::new()));
    }

    #[test]
    fn test_machine_finish_with_body() {
        let mut machine = ChatStreamMachine::new();
        assert_eq!(
            finish_text(machine.finish_with("plain answer".to_string())),
            Some("plain answer".to_string())
        );
        assert!(machine.is_done());
    }
}
