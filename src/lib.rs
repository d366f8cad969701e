//! Armitage — a sales-qualification conversational agent.
//!
//! Single Rust binary. Receives WhatsApp and web chat messages, qualifies
//! leads through a tool-calling LLM loop, and books meetings against a slot
//! table kept consistent with an external calendar.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod store;

pub mod providers;
pub mod prompts;

pub mod calendar;
pub mod gateway;
pub mod knowledge;

pub mod classify;
pub mod quickreply;
pub mod scheduling;
pub mod tools;

pub mod agent;
pub mod server;
