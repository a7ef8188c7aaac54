//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Chat: Helpers for sending, editing and reacting
//! - Errors: Error types shared by every layer
//! - Messaging: Message parsing and event dispatching
//! - Services: The login and sync loop

pub mod chat;
pub mod errors;
pub mod messaging;
pub mod services;
