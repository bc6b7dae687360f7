//! Deterministic provider for tests and demos.
//!
//! Each `chat_stream` call plays back the next scripted event list.
//! When the script runs dry, the provider echoes the last user message
//! as a single text block so demo sessions always answer.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use ag_domain::error::Result;
use ag_domain::stream::BoxStream;

use crate::traits::{ChatRequest, ModelEvent, ModelProvider};

#[derive(Debug)]
pub struct ScriptedProvider {
    id: String,
    scripts: Mutex<VecDeque<Vec<ModelEvent>>>,
    /// Number of chat_stream calls served (model-invocation assertions).
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scripts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(0),
        }
    }

    /// Queue the events for the next completion.
    pub fn push_script(&self, events: Vec<ModelEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Convenience: queue a plain text reply.
    pub fn push_text_reply(&self, text: &str) {
        self.push_script(vec![
            ModelEvent::TextStart,
            ModelEvent::TextDelta { text: text.into() },
            ModelEvent::TextEnd,
            ModelEvent::Done { stop_reason: None },
        ]);
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }

    fn echo_script(req: &ChatRequest) -> Vec<ModelEvent> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content().to_owned())
            .unwrap_or_default();
        vec![
            ModelEvent::TextStart,
            ModelEvent::TextDelta {
                text: format!("echo: {last_user}"),
            },
            ModelEvent::TextEnd,
            ModelEvent::Done { stop_reason: None },
        ]
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        _cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        *self.calls.lock() += 1;
        let events = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Self::echo_script(req));
        Ok(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::message::Message;
    use futures_util::StreamExt;

    fn request(text: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user(text)],
            tools: vec![],
            model: None,
            think_level: None,
        }
    }

    #[tokio::test]
    async fn plays_back_scripts_in_order() {
        let provider = ScriptedProvider::new("scripted");
        provider.push_text_reply("first");
        provider.push_text_reply("second");

        let cancel = CancellationToken::new();
        for expected in ["first", "second"] {
            let mut stream = provider.chat_stream(&request("hi"), &cancel).await.unwrap();
            let mut text = String::new();
            while let Some(ev) = stream.next().await {
                if let ModelEvent::TextDelta { text: t } = ev.unwrap() {
                    text.push_str(&t);
                }
            }
            assert_eq!(text, expected);
        }
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn echoes_when_script_empty() {
        let provider = ScriptedProvider::new("scripted");
        let cancel = CancellationToken::new();
        let mut stream = provider
            .chat_stream(&request("ping"), &cancel)
            .await
            .unwrap();
        let mut text = String::new();
        while let Some(ev) = stream.next().await {
            if let ModelEvent::TextDelta { text: t } = ev.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "echo: ping");
    }
}
