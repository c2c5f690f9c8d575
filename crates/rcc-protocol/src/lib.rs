//! Wire DTOs for the router.
//!
//! `openai` is the canonical internal chat shape every adapter produces and
//! consumes. The other modules describe upstream request/response bodies that
//! adapters translate to and from. This crate holds plain data only; no IO.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod qwen;
