// src/lib.rs

//! Vicifons corpus harvester library.
//!
//! Acquires Latin works from la.wikisource.org into a local corpus, expands
//! index pages into their chapters and repairs records that were stored as
//! indices by an earlier run.

pub mod cache;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
