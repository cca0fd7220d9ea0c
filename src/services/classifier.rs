// src/services/classifier.rs

//! Index/content classification.
//!
//! The heuristic measures prose words and the link-anchor share of a payload.
//! Ambiguous payloads are resolved through a cross-reference of known
//! multi-chapter works, biased toward `IndexOnly`: treating an index as
//! content loses the work, while expanding real content costs one refetch.

use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;
use crate::models::{Catalog, ClassifierConfig, PageClassification, WorkDescriptor};
use crate::services::markup::{self, TextProfile};
use crate::utils::canonical_title;

/// Source of truth for "is this a known multi-chapter work".
pub trait CrossReference: Send + Sync {
    fn is_multi_chapter(&self, id: &str) -> bool;
}

/// Known multi-chapter works: catalog multipart hints plus an optional list file.
#[derive(Debug, Clone, Default)]
pub struct KnownWorks {
    ids: HashSet<String>,
}

impl KnownWorks {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(|id| canonical_title(id.as_ref()))
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self::new(catalog.multipart_ids())
    }

    /// Add titles from a plain text file: one per line, `#` starts a comment.
    pub fn extend_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let before = self.ids.len();
        self.ids.extend(
            content
                .lines()
                .map(|line| line.split('#').next().unwrap_or("").trim())
                .filter(|line| !line.is_empty())
                .map(canonical_title),
        );
        Ok(self.ids.len() - before)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl CrossReference for KnownWorks {
    fn is_multi_chapter(&self, id: &str) -> bool {
        self.ids.contains(&canonical_title(id))
    }
}

/// Decides whether a payload is content or an index.
pub trait Classifier: Send + Sync {
    /// Raw verdict; may be `Ambiguous`.
    fn assess(&self, payload: &str) -> PageClassification;

    /// Final verdict, never `Ambiguous`.
    fn classify(&self, payload: &str, work: &WorkDescriptor) -> PageClassification;
}

/// Threshold classifier over [`TextProfile`]s.
pub struct HeuristicClassifier {
    config: ClassifierConfig,
    cross_ref: Box<dyn CrossReference>,
}

impl HeuristicClassifier {
    pub fn new(config: ClassifierConfig, cross_ref: impl CrossReference + 'static) -> Self {
        Self {
            config,
            cross_ref: Box::new(cross_ref),
        }
    }

    /// Classifier with no cross-reference knowledge.
    pub fn without_cross_reference(config: ClassifierConfig) -> Self {
        Self::new(config, KnownWorks::default())
    }

    fn verdict(&self, profile: &TextProfile) -> PageClassification {
        let ratio = profile.link_ratio();
        if profile.prose_words < self.config.min_prose_words && ratio > self.config.max_link_ratio {
            PageClassification::IndexOnly
        } else if profile.prose_words >= self.config.full_content_words
            && ratio <= self.config.low_link_ratio
        {
            PageClassification::FullContent
        } else {
            PageClassification::Ambiguous
        }
    }
}

impl Classifier for HeuristicClassifier {
    fn assess(&self, payload: &str) -> PageClassification {
        self.verdict(&markup::profile(payload))
    }

    fn classify(&self, payload: &str, work: &WorkDescriptor) -> PageClassification {
        match self.assess(payload) {
            PageClassification::Ambiguous => {
                if work.multipart || self.cross_ref.is_multi_chapter(&work.id) {
                    log::debug!("Ambiguous page {} resolved as index", work.id);
                    PageClassification::IndexOnly
                } else {
                    PageClassification::FullContent
                }
            }
            verdict => verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{index_payload, latin_prose};
    use tempfile::TempDir;

    fn classifier(known: &[&str]) -> HeuristicClassifier {
        HeuristicClassifier::new(ClassifierConfig::default(), KnownWorks::new(known))
    }

    #[test]
    fn test_prose_is_full_content() {
        let c = classifier(&[]);
        let work = WorkDescriptor::new("De Bello Gallico");
        assert_eq!(c.assess(&latin_prose(400)), PageClassification::FullContent);
        assert_eq!(
            c.classify(&latin_prose(400), &work),
            PageClassification::FullContent
        );
    }

    #[test]
    fn test_link_list_is_index() {
        let c = classifier(&[]);
        let chapters: Vec<String> = (1..=12).map(|i| format!("Aeneis/Liber {}", i)).collect();
        let payload = index_payload("Aeneis", &chapters);
        assert_eq!(c.assess(&payload), PageClassification::IndexOnly);
        assert_eq!(
            c.classify(&payload, &WorkDescriptor::new("Aeneis")),
            PageClassification::IndexOnly
        );
    }

    #[test]
    fn test_ambiguous_resolved_by_cross_reference() {
        // Some prose and some links: neither threshold is met.
        let payload = format!(
            "{}\n* [[Fabulae/Liber I|Liber I]]\n* [[Fabulae/Liber II|Liber II]]",
            latin_prose(80)
        );
        let c = classifier(&["Fabulae"]);
        assert_eq!(c.assess(&payload), PageClassification::Ambiguous);
        assert_eq!(
            c.classify(&payload, &WorkDescriptor::new("Fabulae")),
            PageClassification::IndexOnly
        );
        assert_eq!(
            c.classify(&payload, &WorkDescriptor::new("Epigrammata")),
            PageClassification::FullContent
        );
        assert_eq!(
            c.classify(&payload, &WorkDescriptor::new("Epigrammata").multipart()),
            PageClassification::IndexOnly
        );
    }

    #[test]
    fn test_short_text_without_links_is_ambiguous() {
        let c = classifier(&[]);
        assert_eq!(c.assess(&latin_prose(20)), PageClassification::Ambiguous);
    }

    #[test]
    fn test_known_works_from_catalog_and_file() {
        let catalog = Catalog::from_works(vec![
            WorkDescriptor::new("Ab_Urbe_Condita").multipart(),
            WorkDescriptor::new("Germania"),
        ]);
        let mut known = KnownWorks::from_catalog(&catalog);
        assert!(known.is_multi_chapter("Ab Urbe Condita"));
        assert!(!known.is_multi_chapter("Germania"));

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("known.txt");
        std::fs::write(&path, "# multi-chapter works\nNoctes_Atticae\n\nMetamorphoses # Ovid\n").unwrap();
        assert_eq!(known.extend_from_file(&path).unwrap(), 2);
        assert!(known.is_multi_chapter("Noctes Atticae"));
        assert!(known.is_multi_chapter("Metamorphoses"));
        assert_eq!(known.len(), 3);
    }
}
