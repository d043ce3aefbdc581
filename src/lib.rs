//! `mailstrip` — remove attachments from existing email messages.
//!
//! Messages are parsed into a MIME tree, their attachment parts are
//! classified and dropped (or replaced by a short text note), and the
//! rebuilt message is written back to the mailbox with its original
//! headers, labels and date.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod mailbox;
pub mod metadata;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod rebuild;
pub mod report;
