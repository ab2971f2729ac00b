//! Terminal client for classifying the words of a poll as easy, difficult or non-existent.
//!
//! Votes, counts and sessions all live in the hosted backend (see the `remote` crate). This crate
//! only keeps per-page state and renders it.
//!
//!
//!
//! # Flow
//! - `wordvote login` opens Google sign-in and waits for the redirect on a loopback port
//! - `/` lists the polls the user can view or vote, with progress
//! - `/vote?pollId=N` shows one unvoted word at a time, `1` `2` `3` classify it, `z` goes back one word
//! - `/history?pollId=N` pages through past votes (or unvoted words) with search and a filter
//!
//!
//!
//! # Notes
//!
//! ## Counts
//! Aggregate counts are cached per (user, poll) for five minutes in a [`counts::CountsCache`]
//! shared by every page. Votes always bypass the cache so the stats bar never lags.
//!
//! ## Undo
//! Undo never deletes the vote. It shows the previous word again, and voting it a second time
//! updates the existing row.
//!
//!
//!
//! # Setup
//!
//! ```sh
//! export SUPABASE_URL=https://<project>.supabase.co
//! export SUPABASE_ANON_KEY=<anon key>
//! RUST_LOG=info wordvote login
//! wordvote vote --poll-id 1
//! ```
//!
//! | Variable | Default |
//! |----------|---------|
//! | `WORDVOTE_CALLBACK_PORT` | `54321` |
//! | `WORDVOTE_SESSION_PATH` | `.wordvote-session.json` |
//! | `WORDVOTE_COUNTS_TTL_SECS` | `300` |
//! | `WORDVOTE_BATCH_SIZE` | `500` |
//! | `WORDVOTE_SUPPLY` | `rpc` (or `sampled`) |
pub mod callback;
pub mod config;
pub mod counts;
pub mod error;
pub mod history;
pub mod pages;
pub mod session;
pub mod shortcuts;
pub mod state;
pub mod supply;
pub mod utils;
pub mod views;
pub mod vote;

pub use error::AppError;
pub use pages::Route;
pub use state::State;
