//! ferry — forwards Telegram channel posts to a WhatsApp group.
//!
//! Posts are normalized into text plus at most one attachment, albums are
//! regrouped and sent in order, and anything WhatsApp cannot take right now
//! waits in a durable queue until the session is ready again.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod telegram;
pub mod whatsapp;

pub mod forward;
