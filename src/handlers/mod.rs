//! HTTP request handlers
//!
//! - `api` - Health check, relay counters and the live session list
//! - `relay` - Streaming audio relay endpoint

pub mod api;
pub mod relay;

// Re-export commonly used handlers for convenient access
pub use relay::stream_handler;
