//! Pairwise comparison ranking.
//!
//! Users are shown two items and pick the one they prefer. Each vote moves both items' Elo
//! ratings, and at the end of a season the top of the leaderboard earns badges before every
//! rating is reset.

pub mod admission;
pub mod config;
pub mod db;
pub mod error;
pub mod item;
pub mod message;
pub mod pair;
pub mod rating;
pub mod season;
pub mod vote;

pub use error::{Error, Result};
