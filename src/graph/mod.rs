//! Collaborative graph session support: remote client, local state and the
//! session lifecycle manager.

pub mod client;
pub mod lifecycle;
pub mod state;
