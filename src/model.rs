use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{AppError, AppResult};

pub const SHORT_FACT_COUNT: usize = 3;
pub const QUIZ_ANSWER_COUNT: usize = 4;
pub const MAX_IMAGES: usize = 5;
pub const MAX_HANGMAN_SECRET_LEN: usize = 8;
pub const COORDINATE_DECIMALS: u32 = 5;

pub const AI_CREATOR_TAG: &str = "cityscout-ai";

/// A verified geocoordinate. Absence of a coordinate is expressed with
/// `Option<Coordinate>`; the resolver never emits placeholder values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Builds a coordinate rounded to five decimal places, rejecting
    /// values outside the valid latitude/longitude ranges.
    pub fn checked(latitude: f64, longitude: f64) -> Option<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self {
            latitude: round_decimals(latitude, COORDINATE_DECIMALS),
            longitude: round_decimals(longitude, COORDINATE_DECIMALS),
        })
    }
}

fn round_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Quiz,
    Hangman,
}

impl ChallengeKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ChallengeKind::Quiz => "quiz",
            ChallengeKind::Hangman => "hangman",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quiz" => Ok(ChallengeKind::Quiz),
            "hangman" => Ok(ChallengeKind::Hangman),
            _ => Err(AppError::Config(format!("invalid challenge kind: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub kind: ChallengeKind,
    pub answers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiCandidate {
    pub id: String,
    pub name: String,
    pub city: String,
    pub description: String,
    pub short_facts: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
    pub challenge: Challenge,
    pub source_language: String,
    pub creator_tag: String,
}

impl PoiCandidate {
    /// Stable identity within a city batch, derived from name and city.
    pub fn stable_id(name: &str, city: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.trim().to_lowercase().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(city.trim().to_lowercase().as_bytes());
        STANDARD_NO_PAD.encode(hasher.finalize())
    }

    pub fn needs_images(&self) -> bool {
        self.images.is_empty()
    }

    pub fn needs_coordinate(&self) -> bool {
        self.coordinate.is_none()
    }

    /// Business-rule validation applied after structural schema parsing.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Config("candidate name is empty".into()));
        }
        if self.short_facts.len() != SHORT_FACT_COUNT {
            return Err(AppError::Config(format!(
                "expected {SHORT_FACT_COUNT} short facts, got {}",
                self.short_facts.len()
            )));
        }
        if self.images.len() > MAX_IMAGES {
            return Err(AppError::Config(format!(
                "too many images: {}",
                self.images.len()
            )));
        }
        match self.challenge.kind {
            ChallengeKind::Quiz => {
                if self.challenge.answers.len() != QUIZ_ANSWER_COUNT {
                    return Err(AppError::Config(format!(
                        "quiz needs {QUIZ_ANSWER_COUNT} answers, got {}",
                        self.challenge.answers.len()
                    )));
                }
                match self.challenge.correct_index {
                    Some(index) if index < QUIZ_ANSWER_COUNT => {}
                    other => {
                        return Err(AppError::Config(format!(
                            "quiz correct_index out of range: {other:?}"
                        )))
                    }
                }
            }
            ChallengeKind::Hangman => {
                if self.challenge.answers.len() != 1 {
                    return Err(AppError::Config(format!(
                        "hangman needs exactly 1 answer, got {}",
                        self.challenge.answers.len()
                    )));
                }
                let secret = normalize_secret(&self.challenge.answers[0]);
                if secret.is_empty()
                    || secret.len() > MAX_HANGMAN_SECRET_LEN
                    || !secret.chars().all(|c| c.is_ascii_alphabetic())
                {
                    return Err(AppError::Config(format!(
                        "hangman secret '{}' does not normalize to 1-{MAX_HANGMAN_SECRET_LEN} letters",
                        self.challenge.answers[0]
                    )));
                }
            }
        }
        Ok(())
    }

    /// The guessable form of a hangman answer, or `None` for quizzes.
    pub fn hangman_secret(&self) -> Option<String> {
        match self.challenge.kind {
            ChallengeKind::Hangman => self
                .challenge
                .answers
                .first()
                .map(|answer| normalize_secret(answer)),
            ChallengeKind::Quiz => None,
        }
    }
}

/// Lowercases, folds common Latin diacritics to ASCII and strips spaces
/// and hyphens. Any other non-letter survives normalization so that
/// `validate` can reject the candidate instead of guessing a secret.
pub fn normalize_secret(answer: &str) -> String {
    answer
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .map(fold_char)
        .collect()
}

fn fold_char(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ç' => 'c',
        'ñ' => 'n',
        'š' => 's',
        'ž' => 'z',
        // single-char fold, so ß maps to one 's'
        'ß' => 's',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiz_candidate() -> PoiCandidate {
        PoiCandidate {
            id: PoiCandidate::stable_id("Fernsehturm", "Stuttgart"),
            name: "Fernsehturm".into(),
            city: "Stuttgart".into(),
            description: "The first television tower of its kind.".into(),
            short_facts: vec![
                "Built in 1956".into(),
                "217 meters tall".into(),
                "A worldwide prototype".into(),
            ],
            images: Vec::new(),
            coordinate: None,
            challenge: Challenge {
                kind: ChallengeKind::Quiz,
                answers: vec!["1956".into(), "1960".into(), "1949".into(), "1972".into()],
                correct_index: Some(0),
            },
            source_language: "en".into(),
            creator_tag: AI_CREATOR_TAG.into(),
        }
    }

    #[test]
    fn stable_id_ignores_case_and_padding() {
        let a = PoiCandidate::stable_id("Schlossplatz", "Stuttgart");
        let b = PoiCandidate::stable_id("  schlossplatz ", "STUTTGART");
        assert_eq!(a, b);
        assert_ne!(a, PoiCandidate::stable_id("Schlossplatz", "Berlin"));
    }

    #[test]
    fn validates_quiz_shape() {
        let valid = quiz_candidate();
        assert!(valid.validate().is_ok());

        let mut too_few = quiz_candidate();
        too_few.challenge.answers.pop();
        assert!(too_few.validate().is_err());

        let mut bad_index = quiz_candidate();
        bad_index.challenge.correct_index = Some(4);
        assert!(bad_index.validate().is_err());

        let mut missing_index = quiz_candidate();
        missing_index.challenge.correct_index = None;
        assert!(missing_index.validate().is_err());
    }

    #[test]
    fn normalizes_hangman_secrets() {
        assert_eq!(normalize_secret("Käfer"), "kafer");
        assert_eq!(normalize_secret("Bad Canns"), "badcanns");
        assert_eq!(normalize_secret("Straße"), "strase");
        // digits and punctuation are kept for validation to reject
        assert_eq!(normalize_secret("Tor 1"), "tor1");
        assert_eq!(normalize_secret("Killesberg-1"), "killesberg1");
        assert!(normalize_secret("Fernsehturm")
            .chars()
            .all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn validates_hangman_length_window() {
        let mut candidate = quiz_candidate();
        candidate.challenge = Challenge {
            kind: ChallengeKind::Hangman,
            answers: vec!["Käfer".into()],
            correct_index: None,
        };
        assert!(candidate.validate().is_ok());
        assert_eq!(candidate.hangman_secret().as_deref(), Some("kafer"));

        candidate.challenge.answers = vec!["Killesbergturm".into()];
        assert!(candidate.validate().is_err());

        candidate.challenge.answers = vec!["1234".into()];
        assert!(candidate.validate().is_err());
    }

    #[test]
    fn hangman_rejects_non_alphabetic_normalized_secrets() {
        let mut candidate = quiz_candidate();
        candidate.challenge = Challenge {
            kind: ChallengeKind::Hangman,
            answers: vec!["Tor 1".into()],
            correct_index: None,
        };
        // "tor1" fits the length window but is not purely alphabetic
        assert!(candidate.validate().is_err());

        candidate.challenge.answers = vec!["Tor".into()];
        assert!(candidate.validate().is_ok());
    }

    #[test]
    fn coordinate_rounds_and_bounds() {
        let c = Coordinate::checked(48.7758459999, 9.1829320001).unwrap();
        assert_eq!(c.latitude, 48.77585);
        assert_eq!(c.longitude, 9.18293);
        assert!(Coordinate::checked(91.0, 0.0).is_none());
        assert!(Coordinate::checked(0.0, -181.0).is_none());
        // a genuine near-origin coordinate is representable, unresolved is None
        assert!(Coordinate::checked(0.0, 0.0).is_some());
    }

    #[test]
    fn challenge_kind_round_trips_tags() {
        assert_eq!(ChallengeKind::parse("Quiz").unwrap(), ChallengeKind::Quiz);
        assert_eq!(
            ChallengeKind::parse(" hangman ").unwrap(),
            ChallengeKind::Hangman
        );
        assert!(ChallengeKind::parse("riddle").is_err());
    }
}
