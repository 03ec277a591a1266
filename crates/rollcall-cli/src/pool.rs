//! Bounded worker pool running one encoding builder per person.
//!
//! Builders are synchronous; each runs on the blocking pool while a semaphore
//! caps how many are in flight. Different persons never contend, and two jobs
//! for the same person are serialized by the store's compare-and-swap.

use rollcall_core::{
    BuildOutcome, EmbeddingExtractor, EncodingBuilder, EncodingStore, GroupId, Image, PersonId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PersonFailure {
    pub person_id: PersonId,
    pub error: String,
}

/// Result of one encode run over a group.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub group_id: GroupId,
    pub succeeded: Vec<BuildOutcome>,
    pub failed: Vec<PersonFailure>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub dedup_threshold: f32,
    pub workers: usize,
    pub max_attempts: usize,
}

pub async fn build_all(
    store: Arc<dyn EncodingStore>,
    extractor: Arc<dyn EmbeddingExtractor>,
    group: GroupId,
    jobs: Vec<(PersonId, Vec<Image>)>,
    settings: PoolSettings,
) -> BatchReport {
    let run_id = Uuid::new_v4();
    let limit = Arc::new(Semaphore::new(settings.workers.max(1)));
    let mut tasks = JoinSet::new();
    tracing::info!(%run_id, %group, persons = jobs.len(), workers = settings.workers, "encode run started");

    for (person, images) in jobs {
        let limit = Arc::clone(&limit);
        let store = Arc::clone(&store);
        let extractor = Arc::clone(&extractor);
        let group = group.clone();
        tasks.spawn(async move {
            let result = match limit.acquire_owned().await {
                Ok(_permit) => {
                    let person = person.clone();
                    tokio::task::spawn_blocking(move || {
                        EncodingBuilder::new(store.as_ref(), extractor.as_ref(), settings.dedup_threshold)
                            .with_max_attempts(settings.max_attempts)
                            .build(&group, &person, &images)
                            .map_err(|e| e.to_string())
                    })
                    .await
                    .unwrap_or_else(|e| Err(format!("builder task failed: {e}")))
                }
                Err(e) => Err(format!("worker pool closed: {e}")),
            };
            (person, result)
        });
    }

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(outcome))) => succeeded.push(outcome),
            Ok((person_id, Err(error))) => {
                tracing::warn!(%run_id, person = %person_id, %error, "encoding failed");
                failed.push(PersonFailure { person_id, error });
            }
            Err(e) => tracing::error!(%run_id, error = %e, "encode task panicked"),
        }
    }
    succeeded.sort_by(|a: &BuildOutcome, b| a.person_id.cmp(&b.person_id));
    failed.sort_by(|a, b| a.person_id.cmp(&b.person_id));

    tracing::info!(
        %run_id,
        %group,
        succeeded = succeeded.len(),
        failed = failed.len(),
        "encode run finished"
    );
    BatchReport {
        run_id,
        group_id: group,
        succeeded,
        failed,
    }
}
