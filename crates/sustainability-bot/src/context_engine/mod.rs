//! Context engine - turns stored history and the user profile into model input

pub mod context_builder;

pub use context_builder::{
    assemble_history, build_conversation, build_system_prompt, ContextAssembler,
};
