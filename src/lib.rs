//! Discuz forum automation bot library.
//!
//! Authenticates sessions against Discuz-based forums, performs the daily
//! check-in, and posts AI-generated replies to randomly selected threads,
//! across multiple accounts with cookie- or credential-based sessions. A
//! shared sqlite ledger guarantees the same thread is never targeted twice.

pub mod ai;
pub mod client;
pub mod config;
pub mod db;
pub mod extract;
pub mod picker;
pub mod runner;
pub mod web;
