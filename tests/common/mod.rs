#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use nxchat::api::{ChatCompletionEvent, ChatCompletionStream};
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::oneshot};

/// Fake OpenAI-compatible upstream bound to an ephemeral local port
pub struct Upstream {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Upstream {
    pub async fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub upstream");
        let addr = listener.local_addr().expect("stub upstream local addr");
        let (tx, rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, router.into_make_service());
        tokio::spawn(async move {
            tokio::select! {
                res = server => {
                    if let Err(err) = res {
                        eprintln!("Stub upstream error: {err:?}");
                    }
                }
                _ = rx => {}
            }
        });

        Upstream {
            base_url: format!("http://{addr}"),
            shutdown: Some(tx),
        }
    }

    pub fn url(&self) -> String {
        self.base_url.clone()
    }
}

impl Drop for Upstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Requests seen by a stub handler
pub type Recorded = Arc<Mutex<Vec<Value>>>;

pub fn delta_event(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": content } }] })
    )
}

pub fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

pub fn function_call(name: &str, arguments: &str) -> Value {
    json!({
        "id": "chatcmpl-2",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "function_call": { "name": name, "arguments": arguments }
            },
            "finish_reason": "function_call"
        }]
    })
}

/// Drain a stream, returning every event in order
pub async fn events(mut stream: ChatCompletionStream) -> Vec<ChatCompletionEvent> {
    let mut events = vec![];
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

pub fn finishes(events: &[ChatCompletionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ChatCompletionEvent::Finish(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}
