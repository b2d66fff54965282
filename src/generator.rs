use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::{
    Challenge, ChallengeKind, PoiCandidate, AI_CREATOR_TAG, QUIZ_ANSWER_COUNT, SHORT_FACT_COUNT,
};

pub const MAX_CANDIDATES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Primary,
    Alternate,
}

impl PromptVariant {
    fn instructions(&self, city: &str) -> String {
        match self {
            PromptVariant::Primary => format!(
                "List up to {MAX_CANDIDATES} noteworthy points of interest in {city}. \
                 For each, give a short description, exactly {SHORT_FACT_COUNT} short facts, \
                 and a challenge: either a quiz with exactly {QUIZ_ANSWER_COUNT} answer options \
                 and the index of the correct one, or a hangman challenge with a single short \
                 answer word of at most 8 letters."
            ),
            PromptVariant::Alternate => format!(
                "You are a local tour guide for {city}. Name up to {MAX_CANDIDATES} sights, \
                 landmarks or hidden gems a visitor should see there. Describe each briefly, \
                 add exactly {SHORT_FACT_COUNT} surprising short facts, and attach either a \
                 {QUIZ_ANSWER_COUNT}-option quiz question (with the correct answer index) or a \
                 hangman word of at most 8 letters."
            ),
        }
    }
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn generate(&self, city: &str, variant: PromptVariant) -> AppResult<Vec<PoiCandidate>>;
}

#[derive(Clone)]
pub struct GenerationService {
    inner: Arc<dyn CandidateSource>,
}

impl GenerationService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let client = HttpGenerationClient::new(config)?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    pub fn from_source(source: Arc<dyn CandidateSource>) -> Self {
        Self { inner: source }
    }

    /// Produces the candidate batch for a city. An empty first batch is
    /// retried exactly once with the alternate prompt; an empty batch after
    /// that is a valid (empty) result, not an error.
    pub async fn generate_candidates(&self, city: &str) -> AppResult<Vec<PoiCandidate>> {
        let first = self.inner.generate(city, PromptVariant::Primary).await?;
        if !first.is_empty() {
            return Ok(first);
        }

        debug!(city, "primary prompt yielded no candidates; retrying with alternate");
        self.inner.generate(city, PromptVariant::Alternate).await
    }
}

pub struct HttpGenerationClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpGenerationClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cityscout/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.generation_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.generation_endpoint.clone(),
            api_key: config.generation_api_key.clone(),
        })
    }

    fn request_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| AppError::Config(format!("invalid generation endpoint: {err}")))?;
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key.expose_secret());
        }
        Ok(url)
    }
}

#[async_trait]
impl CandidateSource for HttpGenerationClient {
    async fn generate(&self, city: &str, variant: PromptVariant) -> AppResult<Vec<PoiCandidate>> {
        let body = json!({
            "contents": [{
                "parts": [{ "text": variant.instructions(city) }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": candidate_schema(),
            }
        });

        let response = self
            .http
            .post(self.request_url()?)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Generation(err.to_string()))?
            .error_for_status()
            .map_err(|err| AppError::Generation(err.to_string()))?;

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| AppError::Generation(format!("unparseable response: {err}")))?;
        let text = payload
            .first_text()
            .ok_or_else(|| AppError::Generation("response carried no text part".into()))?;

        parse_candidates(&text, city)
    }
}

/// The strict response schema the generative service enforces. Field
/// constraints beyond counts and enums (e.g. hangman length) are checked
/// again in `PoiCandidate::validate`.
fn candidate_schema() -> Value {
    json!({
        "type": "ARRAY",
        "maxItems": MAX_CANDIDATES,
        "items": {
            "type": "OBJECT",
            "required": ["name", "description", "shortFacts", "challengeKind", "answers", "sourceLanguage"],
            "properties": {
                "name": { "type": "STRING" },
                "description": { "type": "STRING" },
                "shortFacts": {
                    "type": "ARRAY",
                    "minItems": SHORT_FACT_COUNT,
                    "maxItems": SHORT_FACT_COUNT,
                    "items": { "type": "STRING" }
                },
                "challengeKind": { "type": "STRING", "enum": ["quiz", "hangman"] },
                "answers": {
                    "type": "ARRAY",
                    "minItems": 1,
                    "maxItems": QUIZ_ANSWER_COUNT,
                    "items": { "type": "STRING" }
                },
                "correctIndex": { "type": "INTEGER" },
                "sourceLanguage": { "type": "STRING" }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<ResponseCandidate>>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(self) -> Option<String> {
        self.candidates?
            .into_iter()
            .next()?
            .content?
            .parts?
            .into_iter()
            .find_map(|part| part.text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    name: String,
    description: String,
    short_facts: Vec<String>,
    challenge_kind: String,
    answers: Vec<String>,
    #[serde(default)]
    correct_index: Option<usize>,
    #[serde(default)]
    source_language: Option<String>,
}

/// Parses the schema-shaped JSON array, dropping records that fail the
/// business rules the schema cannot express.
fn parse_candidates(text: &str, city: &str) -> AppResult<Vec<PoiCandidate>> {
    let raw: Vec<RawCandidate> = serde_json::from_str(text)
        .map_err(|err| AppError::Generation(format!("unparseable candidate payload: {err}")))?;

    let mut candidates = Vec::with_capacity(raw.len().min(MAX_CANDIDATES));
    for record in raw.into_iter().take(MAX_CANDIDATES) {
        let kind = match ChallengeKind::parse(&record.challenge_kind) {
            Ok(kind) => kind,
            Err(err) => {
                warn!(name = %record.name, ?err, "dropping candidate with unknown challenge kind");
                continue;
            }
        };
        let candidate = PoiCandidate {
            id: PoiCandidate::stable_id(&record.name, city),
            name: record.name,
            city: city.to_string(),
            description: record.description,
            short_facts: record.short_facts,
            images: Vec::new(),
            coordinate: None,
            challenge: Challenge {
                kind,
                answers: record.answers,
                correct_index: record.correct_index,
            },
            source_language: record.source_language.unwrap_or_else(|| "en".into()),
            creator_tag: AI_CREATOR_TAG.into(),
        };
        match candidate.validate() {
            Ok(()) => candidates.push(candidate),
            Err(err) => {
                warn!(name = %candidate.name, ?err, "dropping structurally invalid candidate");
            }
        }
    }
    Ok(candidates)
}
