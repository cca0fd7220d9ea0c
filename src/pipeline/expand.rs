// src/pipeline/expand.rs

//! Chapter expansion of index pages.
//!
//! Chapters live in an arena of slots. Each slot is created in index order
//! and results are written back into their own slot, so the order in which
//! concurrent fetches complete never reaches the assembled record. Pending
//! slots are fetched in waves; a chapter that is itself an index adds child
//! slots for the next wave, up to the configured depth.

use futures::stream::{self, StreamExt};

use crate::error::FetchError;
use crate::models::{
    Chapter, CorpusRecord, FetchTask, GapReason, PageClassification, RecordStatus,
    WorkDescriptor,
};
use crate::pipeline::scheduler::FetchScheduler;
use crate::services::markup::chapter_links;
use crate::utils::{canonical_title, roman};

#[derive(Debug)]
enum SlotState {
    Pending,
    Content(String),
    Gap(GapReason),
    /// Nested index replaced by these child slots
    Expanded(Vec<usize>),
}

#[derive(Debug)]
struct Slot {
    id: String,
    depth: usize,
    state: SlotState,
}

/// Expands index pages through a scheduler, sharing its concurrency bound.
pub struct ChapterExpander<'a> {
    scheduler: &'a FetchScheduler,
}

impl<'a> ChapterExpander<'a> {
    pub fn new(scheduler: &'a FetchScheduler) -> Self {
        Self { scheduler }
    }

    /// Ordered chapter targets of an index payload.
    ///
    /// When the page links nothing, the chapter category is searched next,
    /// then targets are built from the fallback pattern if the descriptor
    /// knows its chapter count.
    pub async fn chapter_targets(&self, work: &WorkDescriptor, payload: &str) -> Vec<String> {
        let links = chapter_links(payload, &work.id);
        if !links.is_empty() {
            return links;
        }

        let listed = self.scheduler.category_chapters(work).await;
        if !listed.is_empty() {
            log::info!(
                "{} links no chapters, found {} in the chapter category",
                work.id,
                listed.len()
            );
            return listed;
        }

        match work.expected_chapters {
            Some(count) if count > 0 => {
                log::info!(
                    "{} links no chapters, trying {} from pattern",
                    work.id,
                    count
                );
                synthesize_targets(&self.scheduler.expansion().fallback_pattern, &work.id, count)
            }
            _ => Vec::new(),
        }
    }

    /// Expand an index payload into a record of its chapters.
    pub async fn expand(&self, work: &WorkDescriptor, payload: &str) -> CorpusRecord {
        let targets = self.chapter_targets(work, payload).await;
        self.expand_targets(work, targets).await
    }

    /// Fetch `targets` as the chapters of `work` and assemble the record.
    pub async fn expand_targets(&self, work: &WorkDescriptor, targets: Vec<String>) -> CorpusRecord {
        if targets.is_empty() {
            log::warn!("Index {} lists no chapters", work.id);
            return CorpusRecord::pending(work.clone()).fail("index lists no chapters");
        }
        log::info!("Expanding {} into {} chapters", work.id, targets.len());

        let mut slots: Vec<Slot> = targets
            .into_iter()
            .map(|id| Slot {
                id,
                depth: 1,
                state: SlotState::Pending,
            })
            .collect();
        let roots: Vec<usize> = (0..slots.len()).collect();

        loop {
            let wave: Vec<(usize, String)> = slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| matches!(slot.state, SlotState::Pending))
                .map(|(idx, slot)| (idx, slot.id.clone()))
                .collect();
            if wave.is_empty() {
                break;
            }

            let results: Vec<(usize, Result<String, FetchError>)> = stream::iter(wave)
                .map(|(idx, id)| async move {
                    (idx, self.scheduler.fetch_task(FetchTask::for_chapter(&id)).await)
                })
                .buffer_unordered(self.scheduler.limit())
                .collect()
                .await;

            for (idx, result) in results {
                self.resolve(&mut slots, idx, work, result);
            }
        }

        let chapters = assemble(&slots, &roots);
        self.finish(work, chapters)
    }

    /// Settle one fetched slot, adding child slots for a nested index.
    fn resolve(
        &self,
        slots: &mut Vec<Slot>,
        idx: usize,
        work: &WorkDescriptor,
        result: Result<String, FetchError>,
    ) {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Chapter {} of {} missing: {}", slots[idx].id, work.id, e);
                slots[idx].state = SlotState::Gap(gap_reason(&e));
                return;
            }
        };

        let id = slots[idx].id.clone();
        let depth = slots[idx].depth;
        let chapter = work.chapter(&id);
        let max_depth = self.scheduler.expansion().max_depth;

        let state = match self.scheduler.classifier().classify(&payload, &chapter) {
            PageClassification::FullContent => SlotState::Content(payload),
            _ if depth >= max_depth => {
                log::warn!("Chapter {} is an index beyond depth {}", id, max_depth);
                SlotState::Gap(GapReason::RecursionLimit)
            }
            _ => {
                let children: Vec<usize> = chapter_links(&payload, &id)
                    .into_iter()
                    .map(|child| {
                        slots.push(Slot {
                            id: child,
                            depth: depth + 1,
                            state: SlotState::Pending,
                        });
                        slots.len() - 1
                    })
                    .collect();
                if children.is_empty() {
                    SlotState::Gap(GapReason::NotContent)
                } else {
                    log::debug!("Chapter {} expands into {} more", id, children.len());
                    SlotState::Expanded(children)
                }
            }
        };
        slots[idx].state = state;
    }

    fn finish(&self, work: &WorkDescriptor, chapters: Vec<Chapter>) -> CorpusRecord {
        let mut record = CorpusRecord::pending(work.clone());

        let cancelled = chapters
            .iter()
            .any(|c| c.gap == Some(GapReason::Cancelled));
        if cancelled && self.scheduler.shutdown().is_triggered() {
            log::info!("Expansion of {} interrupted by shutdown", work.id);
            record.status = RecordStatus::NeedsExpansion;
            return record;
        }

        record.chapters = chapters;
        if record.present_chapters() == 0 {
            return record.fail("no chapter could be fetched");
        }

        // Only content chapters are kept, so this holds unless the classifier
        // disagrees with itself on concatenated text.
        let verdict = self
            .scheduler
            .classifier()
            .classify(&record.content(), work);
        if verdict != PageClassification::FullContent {
            return record.fail(format!("expanded content classifies as {}", verdict));
        }

        record.classification = Some(verdict);
        record.status = if record.has_gaps() {
            RecordStatus::FetchedWithGaps
        } else {
            RecordStatus::Fetched
        };
        record.touch();
        record
    }
}

/// Flatten slots depth-first in index order.
fn assemble(slots: &[Slot], roots: &[usize]) -> Vec<Chapter> {
    let mut chapters = Vec::new();
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();

    while let Some(idx) = stack.pop() {
        let slot = &slots[idx];
        match &slot.state {
            SlotState::Content(text) => chapters.push(Chapter::content(&slot.id, text.clone())),
            SlotState::Gap(reason) => chapters.push(Chapter::gap(&slot.id, *reason)),
            SlotState::Pending => chapters.push(Chapter::gap(&slot.id, GapReason::Cancelled)),
            SlotState::Expanded(children) => stack.extend(children.iter().rev().copied()),
        }
    }
    chapters
}

fn gap_reason(error: &FetchError) -> GapReason {
    match error {
        FetchError::Transient { .. } => GapReason::RetriesExhausted,
        FetchError::Permanent { .. } => GapReason::PermanentFailure,
        FetchError::Cancelled { .. } => GapReason::Cancelled,
    }
}

/// Targets `1..=count` built from a pattern with `{work}`, `{n}` and `{roman}`.
pub fn synthesize_targets(pattern: &str, work_id: &str, count: usize) -> Vec<String> {
    (1..=count)
        .map(|n| {
            canonical_title(
                &pattern
                    .replace("{work}", work_id)
                    .replace("{n}", &n.to_string())
                    .replace("{roman}", &roman(n)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scheduler::tests::{fast_config, scheduler};
    use crate::services::CategoryMember;
    use crate::testing::{MockCategories, MockSource, chapter_text, index_payload, latin_prose};
    use std::sync::Arc;

    fn chapter_ids(work: &str, count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("{}/C{}", work, i)).collect()
    }

    fn markers(record: &CorpusRecord) -> Vec<String> {
        record
            .chapters
            .iter()
            .map(|c| match &c.content {
                Some(text) => text.split_whitespace().next().unwrap_or("").to_string(),
                None => format!("gap:{}", c.id),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_order_follows_index_not_completion() {
        for _ in 0..5 {
            let source = Arc::new(MockSource::new().with_latency(0, 25));
            let ids = chapter_ids("Fabulae", 5);
            source.page("Fabulae", index_payload("Fabulae", &ids));
            for (i, id) in ids.iter().enumerate() {
                source.page(id, chapter_text(&format!("C{}", i + 1), 200));
            }
            let scheduler = scheduler(&source, &fast_config(5));

            let record = scheduler.acquire(&WorkDescriptor::new("Fabulae")).await;
            assert_eq!(record.status, RecordStatus::Fetched);
            assert_eq!(markers(&record), vec!["C1", "C2", "C3", "C4", "C5"]);
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_order_and_flags_gaps() {
        let source = Arc::new(MockSource::new());
        let ids = chapter_ids("Fabulae", 4);
        source.page("Fabulae", index_payload("Fabulae", &ids));
        source.page(&ids[0], chapter_text("C1", 200));
        source.flaky(&ids[1]);
        source.page(&ids[2], chapter_text("C3", 200));
        source.missing(&ids[3]);
        let scheduler = scheduler(&source, &fast_config(4));

        let record = scheduler.acquire(&WorkDescriptor::new("Fabulae")).await;
        assert_eq!(record.status, RecordStatus::FetchedWithGaps);
        assert_eq!(record.classification, Some(PageClassification::FullContent));
        assert_eq!(
            markers(&record),
            vec!["C1", "gap:Fabulae/C2", "C3", "gap:Fabulae/C4"]
        );
        assert_eq!(record.chapters[1].gap, Some(GapReason::RetriesExhausted));
        assert_eq!(record.chapters[3].gap, Some(GapReason::PermanentFailure));
        assert_eq!(source.calls(&ids[1]), 5);
    }

    #[tokio::test]
    async fn test_nested_index_expands_until_depth_limit() {
        let source = Arc::new(MockSource::new());
        source.page(
            "Opera",
            index_payload("Opera", &["Opera/A".to_string(), "Opera/B".to_string()]),
        );
        source.page("Opera/A", chapter_text("A", 200));
        // Depth 1 index, expanded.
        source.page(
            "Opera/B",
            index_payload("Opera/B", &["Opera/B/1".to_string(), "Opera/B/2".to_string()]),
        );
        source.page("Opera/B/1", chapter_text("B1", 200));
        // Depth 2 index, beyond the default limit.
        source.page(
            "Opera/B/2",
            index_payload("Opera/B/2", &["Opera/B/2/x".to_string()]),
        );
        source.page("Opera/B/2/x", chapter_text("X", 200));
        let scheduler = scheduler(&source, &fast_config(4));

        let record = scheduler.acquire(&WorkDescriptor::new("Opera")).await;
        assert_eq!(record.status, RecordStatus::FetchedWithGaps);
        assert_eq!(markers(&record), vec!["A", "B1", "gap:Opera/B/2"]);
        assert_eq!(record.chapters[2].gap, Some(GapReason::RecursionLimit));
        assert_eq!(source.calls("Opera/B/2/x"), 0);
    }

    #[tokio::test]
    async fn test_all_chapters_failing_marks_record_failed() {
        let source = Arc::new(MockSource::new());
        let ids = chapter_ids("Fabulae", 2);
        source.page("Fabulae", index_payload("Fabulae", &ids));
        source.missing(&ids[0]);
        source.missing(&ids[1]);
        let scheduler = scheduler(&source, &fast_config(2));

        let record = scheduler.acquire(&WorkDescriptor::new("Fabulae")).await;
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.classification, None);
        assert!(record.chapters.is_empty());
    }

    #[tokio::test]
    async fn test_synthesized_targets_when_index_links_nothing() {
        let source = Arc::new(MockSource::new());
        // Plain-text index: chapter-like lines but no links.
        source.page("Georgica", "[[Categoria:Carmina]]\nLiber I\nLiber II");
        source.page("Georgica/Liber I", chapter_text("G1", 200));
        source.page("Georgica/Liber II", chapter_text("G2", 200));
        let scheduler = scheduler(&source, &fast_config(2));

        let work = WorkDescriptor::new("Georgica").multipart().with_expected_chapters(2);
        let record = scheduler.acquire(&work).await;
        assert_eq!(record.status, RecordStatus::Fetched);
        assert_eq!(markers(&record), vec!["G1", "G2"]);
    }

    #[tokio::test]
    async fn test_periochae_with_140_chapters() {
        let source = Arc::new(MockSource::new().with_latency(0, 3));
        let work_id = "Ab Urbe Condita/Periochae";
        let ids: Vec<String> = (1..=140)
            .map(|i| format!("{}/Periocha {}", work_id, i))
            .collect();
        source.page(work_id, index_payload(work_id, &ids));
        for (i, id) in ids.iter().enumerate() {
            source.page(id, chapter_text(&format!("P{}", i + 1), 160));
        }

        let config = fast_config(10);
        let client = crate::services::FetchClient::new(
            Arc::clone(&source) as Arc<dyn crate::services::PageSource>,
            Arc::new(crate::cache::MemoryCache::new()),
            std::time::Duration::from_secs(60),
        );
        let classifier = crate::services::HeuristicClassifier::without_cross_reference(
            config.classifier.clone(),
        );
        let scheduler = FetchScheduler::new(client, Arc::new(classifier), &config);

        let work = WorkDescriptor::new(work_id).multipart();
        let record = scheduler.acquire(&work).await;

        assert_eq!(record.status, RecordStatus::Fetched);
        assert_eq!(record.classification, Some(PageClassification::FullContent));
        assert_eq!(record.chapters.len(), 140);
        let expected: Vec<String> = (1..=140).map(|i| format!("P{}", i)).collect();
        assert_eq!(markers(&record), expected);
        assert!(source.peak_in_flight() <= 10);
    }

    #[test]
    fn test_synthesize_targets() {
        assert_eq!(
            synthesize_targets("{work}/Liber {roman}", "Aeneis", 3),
            vec!["Aeneis/Liber I", "Aeneis/Liber II", "Aeneis/Liber III"]
        );
        assert_eq!(
            synthesize_targets("{work}_{n}", "Carmina", 2),
            vec!["Carmina 1", "Carmina 2"]
        );
    }

    #[test]
    fn test_prose_page_is_not_split() {
        let prose = latin_prose(50);
        assert!(chapter_links(&prose, "Germania").is_empty());
    }

    #[tokio::test]
    async fn test_unlinked_index_resolves_chapters_from_category() {
        let source = Arc::new(MockSource::new());
        source.page("Tristia", "Publius Ovidius Naso. Vide [[Categoria:Ovidius]]");
        source.page("Fasti", "Vide [[Categoria:Ovidius]]");
        for (i, book) in ["I", "II", "X"].iter().enumerate() {
            source.page(
                &format!("Tristia/Liber {}", book),
                chapter_text(&format!("T{}", i + 1), 200),
            );
        }
        for book in ["I", "II"] {
            source.page(&format!("Fasti/Liber {}", book), chapter_text(&format!("F{}", book), 200));
        }

        let categories = Arc::new(MockCategories::new());
        categories.listing(
            "Categoria:Capita ex operibus",
            vec![
                CategoryMember::page("Tristia/Liber X"),
                CategoryMember::subcategory("Categoria:Capita Ovidii"),
                CategoryMember::page("Tristia/Liber I"),
                CategoryMember::page("Fasti/Liber I"),
            ],
        );
        categories.listing(
            "Categoria:Capita Ovidii",
            vec![
                CategoryMember::page("Tristia/Liber II"),
                CategoryMember::page("Fasti/Liber II"),
                CategoryMember::subcategory("Categoria:Capita ex operibus"),
            ],
        );

        let scheduler = scheduler(&source, &fast_config(4))
            .with_categories(Arc::clone(&categories) as Arc<dyn crate::services::CategorySource>);

        let tristia = scheduler.acquire(&WorkDescriptor::new("Tristia")).await;
        assert_eq!(tristia.status, RecordStatus::Fetched);
        assert_eq!(markers(&tristia), vec!["T1", "T2", "T3"]);

        let fasti = scheduler.acquire(&WorkDescriptor::new("Fasti")).await;
        assert_eq!(markers(&fasti), vec!["FI", "FII"]);

        // Each listing is fetched once per run; the cycle back to the root is cut.
        assert_eq!(categories.calls(), 2);
    }

    #[tokio::test]
    async fn test_category_lookup_respects_depth() {
        let source = Arc::new(MockSource::new());
        let categories = Arc::new(MockCategories::new());
        categories.listing(
            "Categoria:Capita ex operibus",
            vec![CategoryMember::subcategory("Categoria:A")],
        );
        categories.listing("Categoria:A", vec![CategoryMember::subcategory("Categoria:B")]);
        categories.listing("Categoria:B", vec![CategoryMember::page("Fasti/Liber I")]);

        let mut config = fast_config(2);
        config.expansion.category_depth = 1;
        let shallow = scheduler(&source, &config)
            .with_categories(Arc::clone(&categories) as Arc<dyn crate::services::CategorySource>);

        let work = WorkDescriptor::new("Fasti");
        assert!(shallow.category_chapters(&work).await.is_empty());
        assert_eq!(categories.calls(), 2);

        config.expansion.category_depth = 2;
        let deeper = scheduler(&source, &config)
            .with_categories(Arc::clone(&categories) as Arc<dyn crate::services::CategorySource>);
        assert_eq!(deeper.category_chapters(&work).await, vec!["Fasti/Liber I"]);
    }
}
