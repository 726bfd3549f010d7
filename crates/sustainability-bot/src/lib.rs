//! Conversational backend: streams model answers over SSE, stores chat
//! history and personas in SQLite, and periodically mines persona traits
//! from recent conversations.

pub mod api;
pub mod auth;
pub mod config;
pub mod context_engine;
pub mod error;
pub mod memory_db;
pub mod metrics;
pub mod model_runtime;
pub mod persona;
pub mod pipeline;
pub mod prompt_store;
pub mod scheduler;
pub mod server;
pub mod shared_state;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::Config;
pub use error::{ChatError, Result};
pub use memory_db::ChatDatabase;
pub use pipeline::{ChatTurnRequest, ResponsePipeline, ResponseStream, StreamItem};
pub use scheduler::{TraitMiner, TraitMiningService};
pub use server::{build_router, mine_traits_once, run_server};
