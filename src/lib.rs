//! Progress tracking over a shared catalog of interview-prep items.
//!
//! Each user walks the catalog one item at a time (pending, in progress,
//! done), builds a daily streak, closes full cycles, and periodically reviews
//! a random sample of what they've already finished.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod policy;
pub mod sampler;
pub mod streak;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
