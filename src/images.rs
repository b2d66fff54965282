use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::MAX_IMAGES;

const PHOTO_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png"];

#[async_trait]
pub trait MediaLookup: Send + Sync {
    /// File names of media associated with a page title.
    async fn list_media(&self, title: &str) -> AppResult<Vec<String>>;

    /// Direct content URL for a single file, if one can be resolved.
    async fn resolve_file_url(&self, file: &str) -> AppResult<Option<String>>;
}

#[derive(Clone)]
pub struct ImageEnricher {
    lookup: Arc<dyn MediaLookup>,
    max_images: usize,
}

impl ImageEnricher {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let client = WikiMediaClient::new(config)?;
        Ok(Self {
            lookup: Arc::new(client),
            max_images: config.max_images_per_poi,
        })
    }

    pub fn from_lookup(lookup: Arc<dyn MediaLookup>, max_images: usize) -> Self {
        Self {
            lookup,
            max_images: max_images.clamp(1, MAX_IMAGES),
        }
    }

    /// Resolves up to `max_images` photo URLs for a POI. Individual file
    /// failures are dropped silently; zero images is a valid result.
    pub async fn enrich(&self, name: &str) -> Vec<String> {
        let files = match self.lookup.list_media(name).await {
            Ok(files) => files,
            Err(err) => {
                debug!(name, ?err, "media listing failed; treating as no images");
                return Vec::new();
            }
        };

        let retained: Vec<String> = files
            .into_iter()
            .filter(|file| is_photo_file(file))
            .take(self.max_images)
            .collect();

        let lookups = retained
            .iter()
            .map(|file| self.lookup.resolve_file_url(file));
        let resolved = join_all(lookups).await;

        let mut urls = Vec::with_capacity(retained.len());
        for (file, result) in retained.iter().zip(resolved) {
            match result {
                Ok(Some(url)) if !urls.contains(&url) => urls.push(url),
                Ok(Some(_)) | Ok(None) => {}
                Err(err) => {
                    debug!(%file, ?err, "file url lookup failed; omitting");
                }
            }
        }
        urls
    }
}

fn is_photo_file(file: &str) -> bool {
    let lower = file.to_ascii_lowercase();
    PHOTO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub struct WikiMediaClient {
    http: reqwest::Client,
    api_base: String,
}

impl WikiMediaClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cityscout/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.geocode_step_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: config.lookup_api_base.clone(),
        })
    }

    fn api_url(&self, params: &[(&str, &str)]) -> AppResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| AppError::Config(format!("invalid lookup api base: {err}")))?;
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("action", "query")
            .extend_pairs(params);
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct MediaQueryResponse {
    query: Option<MediaQueryBody>,
}

#[derive(Debug, Deserialize)]
struct MediaQueryBody {
    pages: Option<HashMap<String, MediaPage>>,
}

#[derive(Debug, Deserialize)]
struct MediaPage {
    #[serde(default)]
    images: Vec<MediaImage>,
    #[serde(default)]
    imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
struct MediaImage {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    url: Option<String>,
}

#[async_trait]
impl MediaLookup for WikiMediaClient {
    async fn list_media(&self, title: &str) -> AppResult<Vec<String>> {
        let url = self.api_url(&[("prop", "images"), ("imlimit", "50"), ("titles", title)])?;
        let response: MediaQueryResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let files = response
            .query
            .and_then(|body| body.pages)
            .map(|pages| {
                pages
                    .into_values()
                    .flat_map(|page| page.images)
                    .map(|image| image.title)
                    .collect()
            })
            .unwrap_or_default();
        Ok(files)
    }

    async fn resolve_file_url(&self, file: &str) -> AppResult<Option<String>> {
        let url = self.api_url(&[("prop", "imageinfo"), ("iiprop", "url"), ("titles", file)])?;
        let response: MediaQueryResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let resolved = response
            .query
            .and_then(|body| body.pages)
            .and_then(|pages| {
                pages
                    .into_values()
                    .flat_map(|page| page.imageinfo)
                    .find_map(|info| info.url)
            });
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct FakeMedia {
        files: Vec<String>,
        urls: HashMap<String, Option<String>>,
        failing: Vec<String>,
        resolve_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaLookup for FakeMedia {
        async fn list_media(&self, _title: &str) -> AppResult<Vec<String>> {
            Ok(self.files.clone())
        }

        async fn resolve_file_url(&self, file: &str) -> AppResult<Option<String>> {
            self.resolve_calls.lock().push(file.to_string());
            if self.failing.iter().any(|f| f == file) {
                return Err(AppError::Config("lookup failed".into()));
            }
            Ok(self.urls.get(file).cloned().flatten())
        }
    }

    fn enricher(fake: FakeMedia) -> (ImageEnricher, Arc<FakeMedia>) {
        let fake = Arc::new(fake);
        (ImageEnricher::from_lookup(fake.clone(), 5), fake)
    }

    #[tokio::test]
    async fn filters_non_photo_files_and_caps_at_five() {
        let files: Vec<String> = vec![
            "File:A.jpg".into(),
            "File:Map.svg".into(),
            "File:B.JPEG".into(),
            "File:C.png".into(),
            "File:Audio.ogg".into(),
            "File:D.jpg".into(),
            "File:E.jpg".into(),
            "File:F.jpg".into(),
            "File:G.jpg".into(),
        ];
        let urls = files
            .iter()
            .map(|f| (f.clone(), Some(format!("https://img/{f}"))))
            .collect();
        let (enricher, fake) = enricher(FakeMedia {
            files,
            urls,
            failing: Vec::new(),
            resolve_calls: Mutex::new(Vec::new()),
        });

        let resolved = enricher.enrich("Fernsehturm").await;
        assert_eq!(resolved.len(), 5);
        assert!(resolved.iter().all(|url| !url.contains(".svg")));
        // only the retained photo files were fanned out
        assert_eq!(fake.resolve_calls.lock().len(), 5);
    }

    #[tokio::test]
    async fn omits_failed_lookups_without_failing_the_candidate() {
        let (enricher, _) = enricher(FakeMedia {
            files: vec!["File:Ok.jpg".into(), "File:Broken.jpg".into()],
            urls: HashMap::from([("File:Ok.jpg".to_string(), Some("https://img/ok".to_string()))]),
            failing: vec!["File:Broken.jpg".into()],
            resolve_calls: Mutex::new(Vec::new()),
        });

        let resolved = enricher.enrich("Schlossplatz").await;
        assert_eq!(resolved, vec!["https://img/ok".to_string()]);
    }

    #[tokio::test]
    async fn zero_images_is_a_valid_terminal_state() {
        let (enricher, fake) = enricher(FakeMedia {
            files: Vec::new(),
            urls: HashMap::new(),
            failing: Vec::new(),
            resolve_calls: Mutex::new(Vec::new()),
        });

        assert!(enricher.enrich("Unknown Spot").await.is_empty());
        assert!(fake.resolve_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn deduplicates_resolved_urls() {
        let urls = HashMap::from([
            (
                "File:A.jpg".to_string(),
                Some("https://img/same".to_string()),
            ),
            (
                "File:B.jpg".to_string(),
                Some("https://img/same".to_string()),
            ),
        ]);
        let (enricher, _) = enricher(FakeMedia {
            files: vec!["File:A.jpg".into(), "File:B.jpg".into()],
            urls,
            failing: Vec::new(),
            resolve_calls: Mutex::new(Vec::new()),
        });

        assert_eq!(enricher.enrich("Killesberg").await.len(), 1);
    }
}
