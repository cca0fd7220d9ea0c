//! Pipeline entry points for harvester operations.
//!
//! - `run_acquisition`: Fetch catalog works into corpus records
//! - `run_correction`: Repair stored records that are really indices
//! - `build_scheduler`: Wire source, cache and classifier from a config

pub mod acquire;
pub mod correct;
pub mod expand;
pub mod gate;
pub mod scheduler;
pub mod summary;

use std::path::Path;
use std::sync::Arc;

pub use acquire::{AcquireOptions, run_acquisition};
pub use correct::{CorrectOptions, run_correction};
pub use expand::ChapterExpander;
pub use gate::PriorityGate;
pub use scheduler::{FetchScheduler, HostRateLimiter, RetryPolicy, ShutdownSignal};
pub use summary::RunSummary;

use crate::cache::{CacheStore, FileCache, NoCache};
use crate::error::Result;
use crate::models::{Catalog, Config};
use crate::services::{FetchClient, HeuristicClassifier, HttpCategorySource, HttpSource, KnownWorks};

/// Build the production scheduler for a corpus directory.
///
/// Relative cache and known-works paths resolve against `corpus_dir`. The
/// category lookup is wired only when a chapter category is configured.
pub async fn build_scheduler(
    config: &Config,
    corpus_dir: &Path,
    catalog: &Catalog,
    shutdown: ShutdownSignal,
) -> Result<FetchScheduler> {
    let cache: Arc<dyn CacheStore> = if config.cache.enabled {
        let dir = corpus_dir.join(&config.cache.dir);
        log::info!("Using cache at {}", dir.display());
        Arc::new(FileCache::open(dir).await?)
    } else {
        log::info!("Cache disabled");
        Arc::new(NoCache)
    };

    let source = Arc::new(HttpSource::new(&config.crawler)?);
    let client = FetchClient::new(source, cache, config.cache.ttl());

    let mut known = KnownWorks::from_catalog(catalog);
    if let Some(path) = &config.paths.known_works {
        let added = known.extend_from_file(corpus_dir.join(path))?;
        log::info!("Loaded {} known multi-chapter works from {}", added, path.display());
    }
    let classifier = HeuristicClassifier::new(config.classifier.clone(), known);

    let mut scheduler =
        FetchScheduler::new(client, Arc::new(classifier), config).with_shutdown(shutdown);
    if let Some(category) = config.expansion.category_root() {
        log::info!("Looking up unlinked chapters under {}", category);
        scheduler = scheduler.with_categories(Arc::new(HttpCategorySource::new(&config.crawler)?));
    }
    Ok(scheduler)
}
