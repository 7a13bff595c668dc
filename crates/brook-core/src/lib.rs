//! # brook-core
//! Shared vocabulary for the brook wallet engine: data model, provider
//! response shapes, persistent store keys, and the collaborator traits.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
