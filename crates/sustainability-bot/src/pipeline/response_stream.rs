//! Relay -> accumulate -> finalize, with a distinct cancellation path.
//!
//! [`ResponsePipeline::respond`] returns a lazy [`ResponseStream`]. Nothing
//! touches the model or the database until the stream is polled. Text chunks
//! are forwarded in the order the model produced them; once the model stream
//! is exhausted the message row is written and a single
//! [`StreamItem::Completed`] record is yielded from the same poll. Dropping or
//! cancelling the stream before that point writes nothing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::context_engine::ContextAssembler;
use crate::error::{ChatError, Result};
use crate::memory_db::{ChatDatabase, NewMessage, ProfileFields};
use crate::metrics;
use crate::model_runtime::{CompletionEvent, CompletionOptions, CompletionProvider};
use crate::pipeline::ResponseAccumulator;

/// One inbound user message and everything needed to answer it.
#[derive(Debug, Clone)]
pub struct ChatTurnRequest {
    pub user_id: String,
    pub session_id: String,
    pub query: String,
    pub profile: ProfileFields,
    pub prompt_template: String,
    /// Latency is measured from here to the moment the row is written.
    pub started: Instant,
}

/// Terminal record of a successfully persisted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub message_id: String,
    pub latency: f64,
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_inr: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Chunk(String),
    Completed(CompletionRecord),
}

#[derive(Clone)]
pub struct ResponsePipeline {
    database: Arc<ChatDatabase>,
    provider: Arc<dyn CompletionProvider>,
    context: ContextAssembler,
    options: CompletionOptions,
    usd_to_inr: f64,
}

impl ResponsePipeline {
    pub fn new(
        database: Arc<ChatDatabase>,
        provider: Arc<dyn CompletionProvider>,
        options: CompletionOptions,
        usd_to_inr: f64,
        history_limit: usize,
    ) -> Self {
        Self {
            context: ContextAssembler::new(Arc::clone(&database), history_limit),
            database,
            provider,
            options,
            usd_to_inr,
        }
    }

    pub fn respond(&self, request: ChatTurnRequest) -> ResponseStream {
        ResponseStream {
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            inner: Box::pin(drive(self.clone(), request)),
            state: StreamState::Pending,
        }
    }

    /// Runs once, after the model stream ended without error.
    fn finalize(
        &self,
        request: &ChatTurnRequest,
        accumulator: ResponseAccumulator,
    ) -> Result<CompletionRecord> {
        let latency = request.started.elapsed().as_secs_f64();
        let usage = accumulator.usage_metrics(self.usd_to_inr);
        let message_id = self.database.messages.add_message(&NewMessage {
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            question: request.query.clone(),
            answer: accumulator.into_answer(),
            latency,
            usage,
        })?;

        info!(
            message_id = %message_id,
            user_id = %request.user_id,
            session_id = %request.session_id,
            latency,
            total_tokens = usage.total_tokens,
            "response persisted"
        );
        Ok(CompletionRecord {
            message_id,
            latency,
            total_tokens: usage.total_tokens,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost_inr: usage.cost_inr,
        })
    }
}

fn drive(
    pipeline: ResponsePipeline,
    request: ChatTurnRequest,
) -> impl Stream<Item = Result<StreamItem>> + Send + 'static {
    async_stream::try_stream! {
        let messages = pipeline.context.conversation(
            &request.user_id,
            &request.session_id,
            &request.prompt_template,
            &request.profile,
            &request.query,
        )?;
        let mut model_stream = pipeline.provider.stream_chat(messages, &pipeline.options).await?;

        let mut accumulator = ResponseAccumulator::new();
        while let Some(event) = model_stream.next().await {
            match event? {
                CompletionEvent::Delta(text) => {
                    accumulator.push_delta(&text);
                    yield StreamItem::Chunk(text);
                }
                CompletionEvent::Usage(usage) => accumulator.record_usage(usage),
            }
        }
        // Release the provider connection before touching storage.
        drop(model_stream);

        let record = pipeline.finalize(&request, accumulator)?;
        yield StreamItem::Completed(record);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not polled yet.
    Pending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

type ItemStream = Pin<Box<dyn Stream<Item = Result<StreamItem>> + Send>>;

pin_project! {
    /// Stream of [`StreamItem`]s for one chat turn.
    pub struct ResponseStream {
        #[pin]
        inner: ItemStream,
        state: StreamState,
        user_id: String,
        session_id: String,
    }

    impl PinnedDrop for ResponseStream {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if *this.state == StreamState::Streaming {
                metrics::dec_streams();
                metrics::inc_cancelled_streams();
                warn!(
                    event = "cancelled",
                    user_id = %this.user_id,
                    session_id = %this.session_id,
                    "response stream dropped before completion, nothing persisted"
                );
            }
        }
    }
}

impl ResponseStream {
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Abandon the stream. No message is persisted for an unfinished stream.
    pub fn cancel(mut self) -> ChatError {
        match self.state {
            StreamState::Pending | StreamState::Streaming => {
                if self.state == StreamState::Streaming {
                    metrics::dec_streams();
                }
                metrics::inc_cancelled_streams();
                warn!(
                    event = "cancelled",
                    user_id = %self.user_id,
                    session_id = %self.session_id,
                    "response stream cancelled by consumer"
                );
            }
            StreamState::Completed | StreamState::Failed | StreamState::Cancelled => {}
        }
        self.state = StreamState::Cancelled;
        ChatError::Cancelled(format!(
            "user {} session {}",
            self.user_id, self.session_id
        ))
    }
}

impl Stream for ResponseStream {
    type Item = Result<StreamItem>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match *this.state {
            StreamState::Completed | StreamState::Failed | StreamState::Cancelled => {
                return Poll::Ready(None)
            }
            StreamState::Pending => {
                *this.state = StreamState::Streaming;
                metrics::inc_streams();
            }
            StreamState::Streaming => {}
        }

        let item = ready!(this.inner.poll_next(cx));
        let next_state = match &item {
            Some(Ok(StreamItem::Chunk(_))) => StreamState::Streaming,
            Some(Ok(StreamItem::Completed(_))) => StreamState::Completed,
            Some(Err(e)) => {
                error!(
                    event = e.kind(),
                    user_id = %this.user_id,
                    session_id = %this.session_id,
                    error = %e,
                    "response stream failed"
                );
                StreamState::Failed
            }
            None => {
                error!(
                    user_id = %this.user_id,
                    session_id = %this.session_id,
                    "response stream ended without a completion record"
                );
                StreamState::Failed
            }
        };
        if next_state != StreamState::Streaming {
            metrics::dec_streams();
        }
        *this.state = next_state;
        Poll::Ready(item)
    }
}
