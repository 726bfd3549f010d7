//! State shared by every request handler.
//!
//! Everything here is cheap to clone: handlers receive their own copy via
//! axum's `State` extractor and never take a lock across a request.

use std::sync::Arc;

use crate::auth::TokenAuthority;
use crate::memory_db::ChatDatabase;
use crate::pipeline::ResponsePipeline;
use crate::prompt_store::PromptStore;

#[derive(Clone)]
pub struct AppState {
    pub database: Arc<ChatDatabase>,
    pub pipeline: ResponsePipeline,
    pub tokens: Arc<TokenAuthority>,
    pub prompts: Arc<PromptStore>,
}

impl AppState {
    pub fn new(
        database: Arc<ChatDatabase>,
        pipeline: ResponsePipeline,
        tokens: TokenAuthority,
        prompts: PromptStore,
    ) -> Self {
        Self {
            database,
            pipeline,
            tokens: Arc::new(tokens),
            prompts: Arc::new(prompts),
        }
    }
}
