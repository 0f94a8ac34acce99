pub mod caption;
pub mod gemini;
pub mod prompt;
pub mod server;
pub mod tracing_utils;
pub mod upload;
