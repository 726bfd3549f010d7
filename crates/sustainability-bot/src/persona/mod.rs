//! Persona merge engine: trait cleanup, set union and parsing of model trait lists

pub mod merge;
pub mod trait_parser;

pub use merge::{clean_trait, merge_traits};
pub use trait_parser::{parse_trait_response, REJECTION_MARKERS};
