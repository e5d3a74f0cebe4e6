//! Domain models shared by the store, cache and session layers.

pub mod auth;
pub mod passkey;
