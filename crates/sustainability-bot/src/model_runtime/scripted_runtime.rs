//! A provider that replays canned output. Used offline and in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::model_runtime::runtime_trait::*;

#[derive(Debug, Clone)]
enum Script {
    Chunks {
        chunks: Vec<String>,
        usage: TokenUsage,
        fail_after: Option<usize>,
    },
    Refuse(String),
}

pub struct ScriptedRuntime {
    script: Script,
    /// Non-streamed answers handed out in order; the last one repeats.
    replies: Mutex<Vec<Result<Completion, String>>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<Vec<ChatMessage>>>,
}

impl ScriptedRuntime {
    /// Stream `chunks` in order, then report `usage`.
    pub fn new<I, S>(chunks: I, usage: TokenUsage) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_script(Script::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            usage,
            fail_after: None,
        })
    }

    /// Stream `n` chunks, then fail with a model error instead of finishing.
    pub fn failing_after(mut self, n: usize) -> Self {
        if let Script::Chunks { fail_after, .. } = &mut self.script {
            *fail_after = Some(n);
        }
        self
    }

    /// Reject every call before any output.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self::from_script(Script::Refuse(reason.into()))
    }

    /// Queue answers for `complete`. `Err` entries become model errors.
    pub fn with_replies(self, replies: Vec<Result<Completion, String>>) -> Self {
        if let Ok(mut slot) = self.replies.lock() {
            *slot = replies;
        }
        self
    }

    fn from_script(script: Script) -> Self {
        Self {
            script,
            replies: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Vec<ChatMessage>> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    fn record(&self, messages: &[ChatMessage]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(messages.to_vec());
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        _options: &CompletionOptions,
    ) -> Result<CompletionStream, ChatError> {
        self.record(&messages);
        let (chunks, usage, fail_after) = match &self.script {
            Script::Refuse(reason) => return Err(ChatError::Model(reason.clone())),
            Script::Chunks { chunks, usage, fail_after } => (chunks.clone(), *usage, *fail_after),
        };

        let events = async_stream::stream! {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if fail_after == Some(i) {
                    yield Err(ChatError::Model("scripted failure".to_string()));
                    return;
                }
                yield Ok(CompletionEvent::Delta(chunk));
            }
            if fail_after.is_some() {
                yield Err(ChatError::Model("scripted failure".to_string()));
                return;
            }
            yield Ok(CompletionEvent::Usage(usage));
        };
        Ok(Box::pin(events))
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _options: &CompletionOptions,
    ) -> Result<Completion, ChatError> {
        self.record(&messages);
        if let Script::Refuse(reason) = &self.script {
            return Err(ChatError::Model(reason.clone()));
        }

        let queued = {
            let mut replies = self
                .replies
                .lock()
                .map_err(|_| ChatError::Model("scripted runtime poisoned".to_string()))?;
            if replies.len() > 1 {
                Some(replies.remove(0))
            } else {
                replies.first().cloned()
            }
        };
        match queued {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(reason)) => Err(ChatError::Model(reason)),
            None => match &self.script {
                Script::Chunks { chunks, usage, .. } => Ok(Completion {
                    content: chunks.concat(),
                    usage: *usage,
                }),
                Script::Refuse(reason) => Err(ChatError::Model(reason.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn usage() -> TokenUsage {
        TokenUsage { prompt_tokens: 7, completion_tokens: 3, total_tokens: 10, cost_usd: 0.001 }
    }

    #[tokio::test]
    async fn replays_chunks_then_usage() {
        let runtime = ScriptedRuntime::new(["a", "b"], usage());
        let events: Vec<_> = runtime
            .stream_chat(vec![ChatMessage::user("q")], &CompletionOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], Ok(CompletionEvent::Usage(_))));
        assert_eq!(runtime.calls(), 1);
    }

    #[tokio::test]
    async fn fails_after_requested_chunks() {
        let runtime = ScriptedRuntime::new(["a", "b", "c"], usage()).failing_after(1);
        let events: Vec<_> = runtime
            .stream_chat(vec![], &CompletionOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(ChatError::Model(_))));
    }

    #[tokio::test]
    async fn queued_replies_are_consumed_in_order() {
        let first = Completion { content: "one".into(), usage: usage() };
        let runtime = ScriptedRuntime::new(Vec::<String>::new(), usage())
            .with_replies(vec![Ok(first), Err("down".into())]);
        let opts = CompletionOptions::default();
        assert_eq!(runtime.complete(vec![], &opts).await.unwrap().content, "one");
        assert!(runtime.complete(vec![], &opts).await.is_err());
        assert!(runtime.complete(vec![], &opts).await.is_err());
    }
}
