//! Streaming response pipeline: relay model deltas, accumulate the answer and
//! usage, persist one message once the model stream is exhausted.

pub mod accumulator;
pub mod response_stream;

pub use accumulator::ResponseAccumulator;
pub use response_stream::{
    ChatTurnRequest, CompletionRecord, ResponsePipeline, ResponseStream, StreamItem,
};
