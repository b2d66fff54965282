use std::{env, io, path::PathBuf};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_GENERATION_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";
const DEFAULT_LOOKUP_API_BASE: &str = "https://en.wikipedia.org/w/api.php";
const DEFAULT_ENTITY_API_BASE: &str = "https://www.wikidata.org/w/api.php";
const DEFAULT_REFERENCE_CITY: &str = "stuttgart";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub generation_endpoint: String,
    pub generation_api_key: Option<SecretString>,
    pub generation_timeout_secs: u64,
    pub lookup_api_base: String,
    pub entity_api_base: String,
    pub geocode_step_timeout_secs: u64,
    pub search_result_limit: usize,
    pub max_images_per_poi: usize,
    pub reference_city: String,
    pub data_dir_override: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub generation_endpoint: String,
    pub has_generation_api_key: bool,
    pub generation_timeout_secs: u64,
    pub lookup_api_base: String,
    pub entity_api_base: String,
    pub geocode_step_timeout_secs: u64,
    pub search_result_limit: usize,
    pub max_images_per_poi: usize,
    pub reference_city: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            generation_endpoint: env::var("GENERATION_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GENERATION_ENDPOINT.to_string()),
            generation_api_key: env::var("GENERATION_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            generation_timeout_secs: parse_u64("GENERATION_TIMEOUT_SECS", 60),
            lookup_api_base: env::var("LOOKUP_API_BASE")
                .unwrap_or_else(|_| DEFAULT_LOOKUP_API_BASE.to_string()),
            entity_api_base: env::var("ENTITY_API_BASE")
                .unwrap_or_else(|_| DEFAULT_ENTITY_API_BASE.to_string()),
            geocode_step_timeout_secs: parse_u64("GEOCODE_STEP_TIMEOUT_SECS", 10),
            search_result_limit: parse_usize("SEARCH_RESULT_LIMIT", 3).max(1),
            max_images_per_poi: parse_usize("MAX_IMAGES_PER_POI", 5).clamp(1, 5),
            reference_city: env::var("REFERENCE_CITY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REFERENCE_CITY.to_string()),
            data_dir_override: env::var("CITYSCOUT_DATA_DIR").ok().map(PathBuf::from),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            generation_endpoint: self.generation_endpoint.clone(),
            has_generation_api_key: self.generation_api_key.is_some(),
            generation_timeout_secs: self.generation_timeout_secs,
            lookup_api_base: self.lookup_api_base.clone(),
            entity_api_base: self.entity_api_base.clone(),
            geocode_step_timeout_secs: self.geocode_step_timeout_secs,
            search_result_limit: self.search_result_limit,
            max_images_per_poi: self.max_images_per_poi,
            reference_city: self.reference_city.clone(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GENERATION_API_KEY", "secret");
        env::set_var("GENERATION_TIMEOUT_SECS", "30");
        env::set_var("SEARCH_RESULT_LIMIT", "5");
        env::set_var("MAX_IMAGES_PER_POI", "9");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert!(public.has_generation_api_key);
        assert!(config.generation_api_key.is_some());
        assert_eq!(public.generation_timeout_secs, 30);
        assert_eq!(public.search_result_limit, 5);
        // capped at the five-image ceiling
        assert_eq!(public.max_images_per_poi, 5);
        assert_eq!(public.reference_city, DEFAULT_REFERENCE_CITY);
    }
}
