//! Model runtime - chat completion providers
//!
//! Every provider implements [`CompletionProvider`]: a streamed call that
//! yields text deltas followed by one usage report, and a buffered call used
//! by the batch trait miner.
pub mod openai_runtime;
pub mod runtime_trait;
pub mod scripted_runtime;

pub use openai_runtime::OpenAiRuntime;
pub use runtime_trait::{
    ChatMessage, Completion, CompletionEvent, CompletionOptions, CompletionProvider,
    CompletionStream, ModelPricing, Role, TokenUsage,
};
pub use scripted_runtime::ScriptedRuntime;
