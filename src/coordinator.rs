use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::geocode::GeocodeResolver;
use crate::images::ImageEnricher;
use crate::model::PoiCandidate;

#[derive(Debug, Clone)]
pub struct EnrichmentProgress {
    pub total: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentStats {
    pub total: usize,
    pub image_steps: usize,
    pub geocode_steps: usize,
    pub resolved_coordinates: usize,
    pub cancelled: bool,
}

pub type ProgressObserver = Arc<dyn Fn(EnrichmentProgress) + Send + Sync>;

#[derive(Clone)]
pub struct EnrichmentCoordinator {
    images: ImageEnricher,
    geocode: GeocodeResolver,
}

impl EnrichmentCoordinator {
    pub fn new(images: ImageEnricher, geocode: GeocodeResolver) -> Self {
        Self { images, geocode }
    }

    /// Fans candidate enrichment out concurrently and joins the results in
    /// generation order. Each candidate contributes exactly one increment to
    /// the completion counter once all of its dispatched sub-steps settle;
    /// the finished batch is handed back exactly once, when the counter
    /// reaches the original candidate count.
    pub async fn enrich_batch(
        &self,
        candidates: Vec<PoiCandidate>,
        observer: Option<ProgressObserver>,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> (Vec<PoiCandidate>, EnrichmentStats) {
        let total = candidates.len();
        let mut stats = EnrichmentStats {
            total,
            ..EnrichmentStats::default()
        };
        if total == 0 {
            return (Vec::new(), stats);
        }

        // index-tagged slots, pre-sized so concurrent completion cannot
        // reorder the batch
        let slots: Arc<Mutex<Vec<Option<PoiCandidate>>>> =
            Arc::new(Mutex::new((0..total).map(|_| None).collect()));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        for (index, candidate) in candidates.into_iter().enumerate() {
            if let Some(flag) = &cancel_flag {
                if flag.load(Ordering::SeqCst) {
                    stats.cancelled = true;
                    slots.lock()[index] = Some(candidate);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    // skipped candidates still count towards progress
                    if let Some(callback) = &observer {
                        callback(EnrichmentProgress {
                            total,
                            completed: done,
                        });
                    }
                    continue;
                }
            }

            if candidate.needs_images() {
                stats.image_steps += 1;
            }
            if candidate.needs_coordinate() {
                stats.geocode_steps += 1;
            }

            let images = self.images.clone();
            let geocode = self.geocode.clone();
            let slots = Arc::clone(&slots);
            let completed = Arc::clone(&completed);
            let observer = observer.clone();

            handles.push(tokio::spawn(async move {
                let enriched = enrich_candidate(candidate, &images, &geocode).await;
                slots.lock()[index] = Some(enriched);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = &observer {
                    callback(EnrichmentProgress {
                        total,
                        completed: done,
                    });
                }
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(?err, "enrichment task panicked");
                completed.fetch_add(1, Ordering::SeqCst);
            }
        }

        // the barrier: every candidate has reported completion exactly once
        debug_assert_eq!(completed.load(Ordering::SeqCst), total);

        if let Some(flag) = &cancel_flag {
            if flag.load(Ordering::SeqCst) {
                stats.cancelled = true;
            }
        }

        let batch: Vec<PoiCandidate> = slots
            .lock()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        stats.resolved_coordinates = batch
            .iter()
            .filter(|candidate| candidate.coordinate.is_some())
            .count();
        debug!(
            total,
            resolved = stats.resolved_coordinates,
            "enrichment batch joined"
        );
        (batch, stats)
    }
}

/// Runs the sub-steps one candidate needs concurrently. Both steps degrade
/// gracefully: a failed image or geocode step leaves the field untouched and
/// never aborts the candidate.
async fn enrich_candidate(
    mut candidate: PoiCandidate,
    images: &ImageEnricher,
    geocode: &GeocodeResolver,
) -> PoiCandidate {
    let wants_images = candidate.needs_images();
    let wants_coordinate = candidate.needs_coordinate();

    let (resolved_images, resolved_coordinate) = tokio::join!(
        async {
            if wants_images {
                images.enrich(&candidate.name).await
            } else {
                Vec::new()
            }
        },
        async {
            if wants_coordinate {
                geocode.resolve(&candidate.name, &candidate.city).await
            } else {
                None
            }
        },
    );

    if wants_images {
        candidate.images = resolved_images;
    }
    if wants_coordinate {
        candidate.coordinate = resolved_coordinate;
    }
    candidate
}
