//! Service layer for the harvester.
//!
//! This module contains the single-page building blocks:
//! - Remote endpoint access (`PageSource`, `HttpSource`)
//! - Cached retrieval (`FetchClient`)
//! - Wikitext analysis (`markup`)
//! - Index/content classification (`Classifier`, `HeuristicClassifier`)
//! - Category listings for chapter lookup (`CategorySource`)

mod category;
mod classifier;
mod fetch;
pub mod markup;
mod source;

pub use category::{CategoryMember, CategorySource, HttpCategorySource, chapters_of};
pub use classifier::{Classifier, CrossReference, HeuristicClassifier, KnownWorks};
pub use fetch::{FetchClient, FetchMetrics, FetchStats};
pub use source::{HttpSource, PageSource};
