pub mod api;
pub mod bootstrap;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod indexer;
pub mod logger;
pub mod models;
pub mod prompt;
pub mod proxy;
pub mod rag;
pub mod telemetry;

pub use error::{RagError, TemplateError};
