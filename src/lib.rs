//! Snipvault - password-protected text snippets
//!
//! Snippet bodies are sealed with scrypt and NaCl secretbox before they reach
//! storage. The [`controller`] decides when sealing and opening happen and how
//! long a password is kept in memory.

#![forbid(unsafe_code)]

pub mod controller;
pub mod editor;
pub mod engine;
pub mod error;
pub mod file_ops;
pub mod handoff;
pub mod inflight;
pub mod password;
pub mod secretcrypt;
pub mod session;
pub mod store;
pub mod varmor;
