// src/testing.rs

//! Test doubles and payload builders shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, FetchError, Result as AppResult};
use crate::models::{
    CorpusRecord, CorrectionLogEntry, PageClassification, ResumeState, WorkDescriptor,
};
use crate::services::{CategoryMember, CategorySource, Classifier, PageSource};
use crate::storage::{CorpusStorage, LocalStorage};
use crate::utils::canonical_title;

const VOCABULARY: &[&str] = &[
    "arma", "virumque", "cano", "troiae", "qui", "primus", "ab", "oris", "italiam", "fato",
    "profugus", "laviniaque", "venit", "litora", "multum", "ille", "et", "terris", "iactatus",
    "alto", "vi", "superum", "saevae", "memorem", "iunonis", "ob", "iram", "urbem", "deos",
    "genus", "unde", "latinum", "albanique", "patres", "atque", "altae", "moenia", "romae",
];

/// `n` words of Latin prose in sentences of twelve words, one per line.
pub fn latin_prose(n: usize) -> String {
    let mut lines = Vec::new();
    let mut sentence = Vec::new();
    for i in 0..n {
        sentence.push(VOCABULARY[(i * 7 + i / VOCABULARY.len()) % VOCABULARY.len()]);
        if sentence.len() == 12 {
            lines.push(format!("{}.", sentence.join(" ")));
            sentence.clear();
        }
    }
    if !sentence.is_empty() {
        lines.push(format!("{}.", sentence.join(" ")));
    }
    lines.join("\n")
}

/// Chapter prose prefixed with a marker word so its position can be asserted.
pub fn chapter_text(marker: &str, words: usize) -> String {
    format!("{} {}", marker, latin_prose(words))
}

/// Wikitext index page listing `chapters` as bullet links.
pub fn index_payload(work: &str, chapters: &[String]) -> String {
    let mut lines = vec![format!("== {} ==", canonical_title(work))];
    for chapter in chapters {
        let anchor = chapter.rsplit('/').next().unwrap_or(chapter);
        lines.push(format!("* [[{}|{}]]", chapter, anchor));
    }
    lines.join("\n")
}

enum Response {
    Steady(Result<String, FetchError>),
    Scripted(VecDeque<Result<String, FetchError>>),
}

/// Scripted in-memory page source with call counters and in-flight gauges.
pub struct MockSource {
    responses: Mutex<HashMap<String, Response>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Option<(u64, u64)>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            latency: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Each call sleeps a random duration in `min_ms..=max_ms`.
    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency = Some((min_ms, max_ms));
        self
    }

    /// Always answer `id` with `text`.
    pub fn page(&self, id: &str, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(canonical_title(id), Response::Steady(Ok(text.into())));
    }

    /// Answer `id` with `script` in order; the last answer repeats.
    pub fn script(&self, id: &str, script: Vec<Result<String, FetchError>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(canonical_title(id), Response::Scripted(script.into()));
    }

    /// Always fail `id` transiently.
    pub fn flaky(&self, id: &str) {
        let key = canonical_title(id);
        let error = FetchError::transient(&key, "HTTP 503");
        self.responses
            .lock()
            .unwrap()
            .insert(key, Response::Steady(Err(error)));
    }

    /// Always fail `id` permanently.
    pub fn missing(&self, id: &str) {
        let key = canonical_title(id);
        let error = FetchError::permanent(&key, "HTTP 404");
        self.responses
            .lock()
            .unwrap()
            .insert(key, Response::Steady(Err(error)));
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&canonical_title(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of simultaneous `fetch_page` calls seen.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn respond(&self, key: &str) -> Result<String, FetchError> {
        *self.calls.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(key) {
            Some(Response::Steady(result)) => result.clone(),
            Some(Response::Scripted(queue)) => {
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue
                        .front()
                        .cloned()
                        .unwrap_or_else(|| Err(FetchError::permanent(key, "empty script")))
                }
            }
            None => Err(FetchError::permanent(key, "HTTP 404")),
        }
    }
}

#[async_trait]
impl PageSource for MockSource {
    fn host(&self) -> &str {
        "test.invalid"
    }

    async fn fetch_page(&self, id: &str) -> Result<String, FetchError> {
        let key = canonical_title(id);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some((min, max)) = self.latency {
            let ms = if max > min {
                min + rand::random::<u64>() % (max - min + 1)
            } else {
                min
            };
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let result = self.respond(&key);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Scripted category listings with a call counter.
#[derive(Default)]
pub struct MockCategories {
    listings: Mutex<HashMap<String, Vec<CategoryMember>>>,
    calls: AtomicUsize,
}

impl MockCategories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing(&self, category: &str, members: Vec<CategoryMember>) {
        self.listings
            .lock()
            .unwrap()
            .insert(canonical_title(category), members);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CategorySource for MockCategories {
    fn host(&self) -> &str {
        "test.invalid"
    }

    async fn members(&self, category: &str) -> Result<Vec<CategoryMember>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.listings
            .lock()
            .unwrap()
            .get(&canonical_title(category))
            .cloned()
            .ok_or_else(|| FetchError::permanent(category, "no such category"))
    }
}

/// Deterministic classifier: a payload containing a wiki link is an index.
pub struct StubClassifier;

impl Classifier for StubClassifier {
    fn assess(&self, payload: &str) -> PageClassification {
        if payload.contains("[[") {
            PageClassification::IndexOnly
        } else {
            PageClassification::FullContent
        }
    }

    fn classify(&self, payload: &str, _work: &WorkDescriptor) -> PageClassification {
        self.assess(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unicode_segmentation::UnicodeSegmentation;

    #[test]
    fn test_latin_prose_word_count() {
        assert_eq!(latin_prose(0), "");
        assert_eq!(latin_prose(25).unicode_words().count(), 25);
        assert_eq!(latin_prose(25).lines().count(), 3);
    }

    #[tokio::test]
    async fn test_script_repeats_last_answer() {
        let source = MockSource::new();
        source.script(
            "A",
            vec![Err(FetchError::transient("A", "503")), Ok("text".into())],
        );
        assert!(source.fetch_page("A").await.is_err());
        assert_eq!(source.fetch_page("A").await.unwrap(), "text");
        assert_eq!(source.fetch_page("A").await.unwrap(), "text");
        assert_eq!(source.calls("A"), 3);
        assert!(source.fetch_page("Unknown").await.is_err());
    }
}

/// Local storage whose record writes fail for one work.
pub struct FailingWrites {
    pub inner: LocalStorage,
    pub fail_id: &'static str,
}

#[async_trait]
impl CorpusStorage for FailingWrites {
    async fn write_record(&self, record: &CorpusRecord) -> AppResult<()> {
        if record.id() == self.fail_id {
            return Err(AppError::storage(record.id(), "disk full"));
        }
        self.inner.write_record(record).await
    }
    async fn load_record(&self, id: &str) -> AppResult<Option<CorpusRecord>> {
        self.inner.load_record(id).await
    }
    async fn list_records(&self) -> AppResult<Vec<CorpusRecord>> {
        self.inner.list_records().await
    }
    async fn backup_record(&self, record: &CorpusRecord) -> AppResult<String> {
        self.inner.backup_record(record).await
    }
    async fn append_correction(&self, entry: &CorrectionLogEntry) -> AppResult<()> {
        self.inner.append_correction(entry).await
    }
    async fn load_correction_log(&self) -> AppResult<Vec<CorrectionLogEntry>> {
        self.inner.load_correction_log().await
    }
    async fn load_resume_state(&self) -> AppResult<ResumeState> {
        self.inner.load_resume_state().await
    }
    async fn save_resume_state(&self, state: &ResumeState) -> AppResult<()> {
        self.inner.save_resume_state(state).await
    }
}
