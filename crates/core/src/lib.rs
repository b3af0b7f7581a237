//! Virtual patient encounters.
//!
//! A student interviews an AI-played patient over a hosted assistants API and
//! then asks a second assistant to rate the interview. This crate holds the
//! encounter directory, per-session state, and the thread/run orchestration
//! for both the conversation and the feedback.

pub mod assistants;
pub mod conversation;
pub mod encounter;
pub mod error;
pub mod feedback;
pub mod polling;
pub mod session;

pub use error::VpeError;
