//! Parsing of raw RFC 5322 / MIME messages.

pub mod header;
pub mod mime;
pub mod transfer;
