//! Core types and trait definitions for Parley.
//!
//! Parley pairs participants for one-on-one conversations. This crate holds
//! the domain model (participants, matches, sessions), the change-event
//! vocabulary, and the seams to external collaborators: the record store,
//! the candidate recommender and the summarizer. It is free of HTTP and
//! database dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod event;
pub mod matching;
pub mod participant;
pub mod session;
pub mod store;
pub mod upstream;

pub use error::{Error, Result};
