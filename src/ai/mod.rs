pub mod client;
pub mod json_parser;
pub mod prompts;

pub use client::*;
pub use json_parser::{extract_json, ParseError};
