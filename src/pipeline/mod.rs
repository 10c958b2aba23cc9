//! The response pipeline: messages, the per-turn cache, and the coordinator.

pub mod cache;
pub mod coordinator;
pub mod messages;
