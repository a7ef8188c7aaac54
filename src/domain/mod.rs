//! Domain layer - Core types shared by the runtime and plugins
//!
//! This layer contains:
//! - Entities: rooms, members, events and command invocations
//! - Traits: the chat client abstraction the runtime drives
//! - Similarity: the fuzzy-matching ratio used for commands and members

pub mod entities;
pub mod similarity;
pub mod traits;
