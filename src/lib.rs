//! Palaver is a terminal chat client for hosted AI chat services that keep
//! conversations behind a user account.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`auth`] defines the identity-provider boundary and implements it
//!   against the Identity Toolkit REST surface, with keyring-backed session
//!   persistence.
//! - [`core`] owns runtime state: the session snapshot and its store, the
//!   route-gating access policy, the token-attaching HTTP client, the
//!   conversation synchronizer, the response segmenter, and the email
//!   verification flow.
//! - [`api`] defines the chat service wire payloads and the typed routes used
//!   by the conversation synchronizer.
//! - [`cli`] parses arguments and runs the interactive surface that forwards
//!   user intents into [`core`].
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::run`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod core;
pub mod utils;
