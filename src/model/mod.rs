//! Core data model types: the MIME part tree and whole-message wrappers.

pub mod message;
pub mod part;
