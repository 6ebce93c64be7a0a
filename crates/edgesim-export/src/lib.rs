//! Offline transports for edgesim
//!
//! - **JSONL**: append every outbound message to a file, one JSON object per line

pub mod jsonl;

pub use jsonl::{JsonlClient, JsonlClientConfig, JsonlRecord};
