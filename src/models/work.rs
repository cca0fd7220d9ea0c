// src/models/work.rs

//! Work descriptors, the catalog that lists them, and fetch tasks.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::canonical_title;

/// A unit of work to acquire, as issued by the external catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkDescriptor {
    /// Canonical page title on the source site
    pub id: String,

    /// Author, when the catalog knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Period hint (e.g. "Latinitas Romana"), passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,

    /// The catalog believes this work is split across chapter pages
    #[serde(default)]
    pub multipart: bool,

    /// Expected number of chapters, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_chapters: Option<usize>,
}

impl WorkDescriptor {
    /// Descriptor with only an identifier.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: canonical_title(id.as_ref()),
            author: None,
            period: None,
            multipart: false,
            expected_chapters: None,
        }
    }

    /// Mark the work as multi-chapter.
    pub fn multipart(mut self) -> Self {
        self.multipart = true;
        self
    }

    pub fn with_expected_chapters(mut self, count: usize) -> Self {
        self.expected_chapters = Some(count);
        self
    }

    /// Descriptor for a chapter discovered inside an index.
    ///
    /// Chapters inherit author and period but no multipart hints.
    pub fn chapter(&self, chapter_id: &str) -> Self {
        Self {
            id: canonical_title(chapter_id),
            author: self.author.clone(),
            period: self.period.clone(),
            multipart: false,
            expected_chapters: None,
        }
    }
}

/// Ordered list of works produced by the offline discovery step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub works: Vec<WorkDescriptor>,
}

impl Catalog {
    /// Load a catalog from a JSON file.
    ///
    /// Accepts either a bare array of descriptors or `{ "works": [...] }`.
    /// Identifiers are canonicalised and duplicates keep their first position.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            List(Vec<WorkDescriptor>),
            Wrapped { works: Vec<WorkDescriptor> },
        }

        let works = match serde_json::from_str::<Raw>(content)? {
            Raw::List(works) | Raw::Wrapped { works } => works,
        };
        Ok(Self::from_works(works))
    }

    pub fn from_works(works: Vec<WorkDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let works = works
            .into_iter()
            .map(|mut work| {
                work.id = canonical_title(&work.id);
                work
            })
            .filter(|work| !work.id.is_empty() && seen.insert(work.id.clone()))
            .collect();
        Self { works }
    }

    /// Basic sanity checks before a run.
    pub fn validate(&self) -> Result<()> {
        if self.works.is_empty() {
            return Err(AppError::validation("Catalog contains no works"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.works.len()
    }

    pub fn is_empty(&self) -> bool {
        self.works.is_empty()
    }

    /// Works the catalog flags as multi-chapter.
    pub fn multipart_ids(&self) -> impl Iterator<Item = &str> {
        self.works
            .iter()
            .filter(|w| w.multipart)
            .map(|w| w.id.as_str())
    }
}

/// One network operation, discarded once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    /// Page to retrieve
    pub target: String,
    /// Attempts made so far
    pub attempt: u32,
    /// Lower is more urgent. Chapters of an index take permits ahead of
    /// fresh works waiting at the same time.
    pub priority: u8,
}

impl FetchTask {
    pub const WORK_PRIORITY: u8 = 1;
    pub const CHAPTER_PRIORITY: u8 = 0;

    pub fn new(target: impl AsRef<str>, priority: u8) -> Self {
        Self {
            target: canonical_title(target.as_ref()),
            attempt: 0,
            priority,
        }
    }

    pub fn for_work(work: &WorkDescriptor) -> Self {
        Self::new(&work.id, Self::WORK_PRIORITY)
    }

    pub fn for_chapter(target: &str) -> Self {
        Self::new(target, Self::CHAPTER_PRIORITY)
    }

    /// Same task redirected to another page; the attempt count carries over.
    pub fn redirected(&self, target: &str) -> Self {
        Self {
            target: canonical_title(target),
            attempt: self.attempt,
            priority: self.priority,
        }
    }
}
