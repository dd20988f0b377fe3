//! leaving-x library.
//!
//! Migrates an exported X/Twitter archive to a Bluesky account: reads the
//! archive, rewrites each post into destination rich text, publishes it with
//! its media and quote embeds, and records progress so a run can be resumed.

// JSON fixtures read better with uniform raw string hashes
#![allow(clippy::needless_raw_string_hashes)]

pub mod archive;
pub mod bluesky;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod constants;
pub mod delete;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod media;
pub mod quote;
pub mod retry;
pub mod transform;
