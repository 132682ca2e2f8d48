//! Document generation: template filling, model calls and session memory.

pub mod document;
pub mod generator;

pub use document::structure_document;
pub use generator::{GenerationOptions, Generator, HUMAN_INPUT_FIELD, RAW_PROMPT_TRACE_NAME};
