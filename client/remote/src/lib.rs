//! Everything the word voting client knows about its hosted backend.
//!
//! # Layout
//! - [`backend::Backend`]: table and procedure surface (votes, options, polls, counts)
//! - [`auth::IdentityProvider`]: Google sign-in through the hosted identity service
//! - [`supabase`] and [`auth::GoTrueClient`]: the HTTP implementations
//! - [`fake`]: in-memory implementations for tests and offline runs
//!
//!
//!
//! # Notes
//!
//! ## Votes
//! The backend keeps one row per (user, option, poll). Submitting twice hands back the first row,
//! updating a missing row is an error. Nothing here ever deletes a vote.
//!
//! ## Counts
//! Aggregate counts are always computed remotely. Caching is up to the caller.
pub mod auth;
pub mod backend;
pub mod error;
pub mod fake;
pub mod models;
pub mod supabase;

pub use backend::Backend;
pub use error::RemoteError;
