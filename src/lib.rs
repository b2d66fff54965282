mod config;
mod coordinator;
mod errors;
mod events;
mod generator;
mod geocode;
mod images;
mod model;
mod store;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::config::{AppConfig, PublicAppConfig};
pub use crate::coordinator::{
    EnrichmentCoordinator, EnrichmentProgress, EnrichmentStats, ProgressObserver,
};
pub use crate::errors::{AppError, AppResult};
pub use crate::events::EventLog;
pub use crate::generator::{
    CandidateSource, GenerationService, HttpGenerationClient, PromptVariant,
};
pub use crate::geocode::{GeoLookup, GeocodeResolver, PageRecord, WikiGeoClient};
pub use crate::images::{ImageEnricher, MediaLookup, WikiMediaClient};
pub use crate::model::{
    normalize_secret, Challenge, ChallengeKind, Coordinate, PoiCandidate, AI_CREATOR_TAG,
};
pub use crate::store::{PoiBatch, PoiStore};

/// Outcome of one generation run. A store failure is carried alongside the
/// finalized batch instead of replacing it: results already delivered
/// in-memory are never retracted.
#[derive(Debug)]
pub struct RunSummary {
    pub city: String,
    pub pois: Vec<PoiCandidate>,
    pub stats: EnrichmentStats,
    pub store_error: Option<String>,
}

pub struct PoiEngine {
    generator: GenerationService,
    coordinator: EnrichmentCoordinator,
    store: PoiStore,
    events: EventLog,
    config: AppConfig,
}

impl PoiEngine {
    pub fn from_env() -> AppResult<Self> {
        init_tracing();
        let config = AppConfig::from_env();
        Self::new(config)
    }

    pub fn new(config: AppConfig) -> AppResult<Self> {
        let generator = GenerationService::new(&config)?;
        let images = ImageEnricher::new(&config)?;
        let geocode = GeocodeResolver::new(&config)?;
        let store = PoiStore::new(&config)?;
        let events = EventLog::new(store.data_dir())?;
        Ok(Self {
            generator,
            coordinator: EnrichmentCoordinator::new(images, geocode),
            store,
            events,
            config,
        })
    }

    pub fn public_config(&self) -> PublicAppConfig {
        self.config.public_profile()
    }

    pub fn store(&self) -> &PoiStore {
        &self.store
    }

    /// Runs the full pipeline for one city: generation, concurrent
    /// enrichment, persistence. An empty candidate batch (after the
    /// generator's single alternate-prompt retry) is an empty success.
    pub async fn generate_for_city(&self, city: &str) -> AppResult<RunSummary> {
        self.generate_with(city, None, None).await
    }

    pub async fn generate_with(
        &self,
        city: &str,
        observer: Option<ProgressObserver>,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> AppResult<RunSummary> {
        let city = city.trim();
        if city.is_empty() {
            return Err(AppError::Config("city name is empty".into()));
        }
        self.note("run_started", json!({ "city": city }));

        let candidates = match self.generator.generate_candidates(city).await {
            Ok(candidates) => candidates,
            Err(err) => {
                self.note("generation_failed", json!({ "city": city, "error": err.to_string() }));
                let _ = self.events.flush();
                return Err(err);
            }
        };
        self.note(
            "candidates_generated",
            json!({ "city": city, "count": candidates.len() }),
        );

        let (pois, stats) = self
            .coordinator
            .enrich_batch(candidates, observer, cancel_flag.clone())
            .await;

        let cancelled = cancel_flag
            .map(|flag| flag.load(std::sync::atomic::Ordering::SeqCst))
            .unwrap_or(false);
        let store_error = if pois.is_empty() || cancelled {
            None
        } else {
            let batch = PoiBatch::new(city, pois.clone());
            match self.store.write(&batch) {
                Ok(()) => {
                    self.note(
                        "batch_stored",
                        json!({ "city": city, "pois": batch.pois.len() }),
                    );
                    None
                }
                Err(err) => {
                    warn!(?err, city, "failed to persist batch; keeping in-memory results");
                    self.note(
                        "store_failed",
                        json!({ "city": city, "error": err.to_string() }),
                    );
                    Some(err.to_string())
                }
            }
        };

        if let Err(err) = self.events.flush() {
            warn!(?err, "failed to flush run events");
        }

        Ok(RunSummary {
            city: city.to_string(),
            pois,
            stats,
            store_error,
        })
    }

    fn note(&self, name: &str, payload: serde_json::Value) {
        if let Err(err) = self.events.record(name, payload) {
            warn!(?err, event = name, "failed to queue run event");
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,cityscout=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
