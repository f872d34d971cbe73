// src/session/mod.rs
// Session state: the conversation context, its mutations and the store

mod patch;
mod store;
pub mod sweeper;
mod types;

pub use patch::SessionPatch;
pub use store::SessionStore;
pub use sweeper::SessionSweeper;
pub use types::{Block, ConversationContext, FieldValue, Persona};
