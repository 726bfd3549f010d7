//! Text helpers shared by the persona and scheduler modules

pub mod text_utils;

pub use text_utils::TextUtils;
