//! HTTP handlers. Routing and layers live in [`crate::server`].

pub mod analytics_api;
pub mod auth_api;
pub mod chat_api;
pub mod feedback_api;
pub mod message_api;
pub mod persona_api;
pub mod prompt_api;
pub mod response;

pub use analytics_api::get_analytics;
pub use auth_api::generate_bearer_token;
pub use chat_api::send_message;
pub use feedback_api::update_feedback;
pub use message_api::{get_all_messages, get_message, get_user_messages};
pub use persona_api::{get_user, list_users, upsert_user};
pub use prompt_api::{get_prompt, update_prompt};
pub use response::{ApiResponse, ApiResult};
