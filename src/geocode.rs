use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::Coordinate;

/// The direct-lookup record for a page title: a coordinate if the page
/// carries one, and a cross-reference id into the entity graph if not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRecord {
    pub coordinate: Option<Coordinate>,
    pub entity_id: Option<String>,
}

#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Exact page lookup with redirect/alias following.
    async fn lookup_page(&self, title: &str) -> AppResult<Option<PageRecord>>;

    /// Full-text search returning the top result titles.
    async fn search(&self, query: &str) -> AppResult<Vec<String>>;

    /// Canonical coordinate property for an entity-graph id.
    async fn entity_coordinate(&self, entity_id: &str) -> AppResult<Option<Coordinate>>;
}

#[derive(Clone)]
pub struct GeocodeResolver {
    lookup: Arc<dyn GeoLookup>,
    step_timeout: Duration,
    search_result_limit: usize,
}

impl GeocodeResolver {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let client = WikiGeoClient::new(config)?;
        Ok(Self {
            lookup: Arc::new(client),
            step_timeout: Duration::from_secs(config.geocode_step_timeout_secs),
            search_result_limit: config.search_result_limit,
        })
    }

    pub fn from_lookup(lookup: Arc<dyn GeoLookup>, step_timeout: Duration, limit: usize) -> Self {
        Self {
            lookup,
            step_timeout,
            search_result_limit: limit.max(1),
        }
    }

    /// Resolves a verified coordinate for a POI, or `None` if every tier of
    /// the cascade comes up empty. A coordinate is only ever taken from the
    /// lookup services; nothing is fabricated.
    pub async fn resolve(&self, name: &str, city: &str) -> Option<Coordinate> {
        if let Some(found) = self.try_record(name).await {
            return Some(found);
        }

        for variant in query_variants(name, city) {
            debug!(name, query = %variant, "geocode search variant");
            let hits = match self.step(self.lookup.search(&variant)).await {
                Some(hits) => hits,
                None => continue,
            };

            let mut records = Vec::new();
            for title in hits.into_iter().take(self.search_result_limit) {
                if let Some(Some(record)) = self.step(self.lookup.lookup_page(&title)).await {
                    records.push(record);
                }
            }

            // a direct coordinate on any hit outranks every entity
            // cross-reference for this variant
            if let Some(coordinate) = records.iter().find_map(|record| record.coordinate) {
                return Some(coordinate);
            }
            for entity_id in records.iter().filter_map(|record| record.entity_id.as_deref()) {
                if let Some(Some(coordinate)) =
                    self.step(self.lookup.entity_coordinate(entity_id)).await
                {
                    return Some(coordinate);
                }
            }
        }

        debug!(name, city, "geocode cascade exhausted; unresolved");
        None
    }

    /// One direct-lookup step: page coordinate first, entity graph second.
    async fn try_record(&self, title: &str) -> Option<Coordinate> {
        let record = self.step(self.lookup.lookup_page(title)).await??;
        if let Some(coordinate) = record.coordinate {
            return Some(coordinate);
        }
        let entity_id = record.entity_id?;
        self.step(self.lookup.entity_coordinate(&entity_id)).await?
    }

    /// Bounds a cascade step with its own timeout and flattens errors and
    /// timeouts into "no result for this step".
    async fn step<T>(
        &self,
        fut: impl std::future::Future<Output = AppResult<T>>,
    ) -> Option<T> {
        match timeout(self.step_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                debug!(?err, "geocode step failed; continuing cascade");
                None
            }
            Err(_) => {
                debug!("geocode step timed out; continuing cascade");
                None
            }
        }
    }
}

/// Ordered search variants for tier 2; duplicates collapse so a name
/// without hyphens (or an empty city hint) is not queried twice.
fn query_variants(name: &str, city: &str) -> Vec<String> {
    let name = name.trim();
    let city = city.trim();
    let dehyphenated = name.replace('-', " ");

    let raw = [
        format!("{name} {city}"),
        name.to_string(),
        format!("{dehyphenated} {city}"),
    ];

    let mut variants = Vec::with_capacity(raw.len());
    for variant in raw {
        let trimmed = variant.trim().to_string();
        if !trimmed.is_empty() && !variants.contains(&trimmed) {
            variants.push(trimmed);
        }
    }
    variants
}

pub struct WikiGeoClient {
    http: reqwest::Client,
    lookup_api_base: String,
    entity_api_base: String,
}

impl WikiGeoClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cityscout/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.geocode_step_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            lookup_api_base: config.lookup_api_base.clone(),
            entity_api_base: config.entity_api_base.clone(),
        })
    }

    fn api_url(base: &str, params: &[(&str, &str)]) -> AppResult<Url> {
        let mut url = Url::parse(base)
            .map_err(|err| AppError::Config(format!("invalid api base: {err}")))?;
        url.query_pairs_mut()
            .append_pair("format", "json")
            .extend_pairs(params);
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct PageQueryResponse {
    query: Option<PageQueryBody>,
}

#[derive(Debug, Deserialize)]
struct PageQueryBody {
    pages: Option<HashMap<String, PageBody>>,
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    missing: Option<serde_json::Value>,
    #[serde(default)]
    coordinates: Vec<PageCoordinate>,
    #[serde(default)]
    pageprops: Option<PageProps>,
}

#[derive(Debug, Deserialize)]
struct PageCoordinate {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    wikibase_item: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ClaimsResponse {
    claims: Option<HashMap<String, Vec<Claim>>>,
}

#[derive(Debug, Deserialize)]
struct Claim {
    mainsnak: Option<MainSnak>,
}

#[derive(Debug, Deserialize)]
struct MainSnak {
    datavalue: Option<DataValue>,
}

#[derive(Debug, Deserialize)]
struct DataValue {
    value: Option<GlobeValue>,
}

#[derive(Debug, Deserialize)]
struct GlobeValue {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[async_trait]
impl GeoLookup for WikiGeoClient {
    async fn lookup_page(&self, title: &str) -> AppResult<Option<PageRecord>> {
        let url = Self::api_url(
            &self.lookup_api_base,
            &[
                ("action", "query"),
                ("prop", "coordinates|pageprops"),
                ("ppprop", "wikibase_item"),
                ("redirects", "1"),
                ("titles", title),
            ],
        )?;
        let response: PageQueryResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(pages) = response.query.and_then(|body| body.pages) else {
            return Ok(None);
        };
        let Some(page) = pages.into_values().next() else {
            return Ok(None);
        };
        if page.missing.is_some() {
            return Ok(None);
        }

        let coordinate = page
            .coordinates
            .first()
            .and_then(|c| Coordinate::checked(c.lat, c.lon));
        let entity_id = page.pageprops.and_then(|props| props.wikibase_item);
        Ok(Some(PageRecord {
            coordinate,
            entity_id,
        }))
    }

    async fn search(&self, query: &str) -> AppResult<Vec<String>> {
        let url = Self::api_url(
            &self.lookup_api_base,
            &[
                ("action", "query"),
                ("list", "search"),
                ("srlimit", "5"),
                ("srsearch", query),
            ],
        )?;
        let response: PageQueryResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .query
            .map(|body| body.search.into_iter().map(|hit| hit.title).collect())
            .unwrap_or_default())
    }

    async fn entity_coordinate(&self, entity_id: &str) -> AppResult<Option<Coordinate>> {
        let url = Self::api_url(
            &self.entity_api_base,
            &[
                ("action", "wbgetclaims"),
                ("property", "P625"),
                ("entity", entity_id),
            ],
        )?;
        let response: ClaimsResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let coordinate = response
            .claims
            .and_then(|mut claims| claims.remove("P625"))
            .and_then(|claims| claims.into_iter().next())
            .and_then(|claim| claim.mainsnak)
            .and_then(|snak| snak.datavalue)
            .and_then(|datavalue| datavalue.value)
            .and_then(|value| match (value.latitude, value.longitude) {
                (Some(lat), Some(lon)) => Coordinate::checked(lat, lon),
                _ => None,
            });
        Ok(coordinate)
    }
}
