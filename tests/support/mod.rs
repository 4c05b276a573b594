//! Shared test infrastructure
//!
//! - `voice_service_mock` - scripted websocket server standing in for the voice service
//! - `scripted` - in-process resolver and connector doubles

// Not every test binary uses every helper
#![allow(dead_code)]

pub mod scripted;
pub mod voice_service_mock;
