use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::PoiCandidate;

const APP_DIR_NAME: &str = "cityscout";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiBatch {
    pub city: String,
    pub generated_at: DateTime<Utc>,
    pub pois: Vec<PoiCandidate>,
}

impl PoiBatch {
    pub fn new(city: &str, pois: Vec<PoiCandidate>) -> Self {
        Self {
            city: city.trim().to_string(),
            generated_at: Utc::now(),
            pois,
        }
    }
}

#[derive(Clone)]
pub struct PoiStore {
    data_dir: PathBuf,
    reference_city: String,
}

impl PoiStore {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let data_dir = match &config.data_dir_override {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| AppError::Path("no application data directory".into()))?
                .join(APP_DIR_NAME),
        };
        Self::at(data_dir, &config.reference_city)
    }

    pub fn at<P: AsRef<Path>>(data_dir: P, reference_city: &str) -> AppResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)
            .map_err(|err| AppError::Store(format!("cannot create data dir: {err}")))?;
        Ok(Self {
            data_dir,
            reference_city: reference_city.to_string(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn batch_path(&self, city: &str) -> PathBuf {
        self.data_dir.join(format!("{}-pois.json", city_key(city)))
    }

    /// Persists the batch for its city as a full overwrite of any prior
    /// document. Generation order is preserved verbatim.
    pub fn write(&self, batch: &PoiBatch) -> AppResult<()> {
        let path = self.batch_path(&batch.city);
        let payload = serde_json::to_vec_pretty(batch)
            .map_err(|err| AppError::Store(format!("serialize batch: {err}")))?;
        fs::write(&path, payload)
            .map_err(|err| AppError::Store(format!("write {}: {err}", path.display())))?;
        debug!(city = %batch.city, path = %path.display(), pois = batch.pois.len(), "batch stored");
        Ok(())
    }

    /// The most recent batch for a city, or `None` if never generated.
    pub fn read(&self, city: &str) -> AppResult<Option<PoiBatch>> {
        let path = self.batch_path(city);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::Store(format!("read {}: {err}", path.display())))
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| AppError::Store(format!("parse {}: {err}", path.display())))
    }

    /// City batch merged with the fixed reference-city batch for offline and
    /// demo use, de-duplicated by id. The city batch wins on collision.
    pub fn read_with_reference(&self, city: &str) -> AppResult<Option<PoiBatch>> {
        let own = self.read(city)?;
        if city_key(city) == city_key(&self.reference_city) {
            return Ok(own);
        }

        let reference = match self.read(&self.reference_city) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(?err, "reference batch unreadable; returning city batch only");
                None
            }
        };

        let merged = match (own, reference) {
            (None, None) => return Ok(None),
            (Some(batch), None) => batch,
            (None, Some(reference)) => reference,
            (Some(mut batch), Some(reference)) => {
                for poi in reference.pois {
                    if !batch.pois.iter().any(|existing| existing.id == poi.id) {
                        batch.pois.push(poi);
                    }
                }
                batch
            }
        };
        Ok(Some(merged))
    }
}

/// Lowercased city key used in the document file name.
fn city_key(city: &str) -> String {
    let filtered = city
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>();
    let collapsed = filtered
        .split('-')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if collapsed.is_empty() {
        "city".into()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::model::{Challenge, ChallengeKind, Coordinate, PoiCandidate, AI_CREATOR_TAG};

    use super::*;

    fn candidate(name: &str, city: &str) -> PoiCandidate {
        PoiCandidate {
            id: PoiCandidate::stable_id(name, city),
            name: name.into(),
            city: city.into(),
            description: format!("{name} in {city}"),
            short_facts: vec!["one".into(), "two".into(), "three".into()],
            images: vec![format!("https://img/{name}.jpg")],
            coordinate: Coordinate::checked(48.77, 9.18),
            challenge: Challenge {
                kind: ChallengeKind::Quiz,
                answers: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_index: Some(2),
            },
            source_language: "en".into(),
            creator_tag: AI_CREATOR_TAG.into(),
        }
    }

    #[test]
    fn round_trips_a_batch() {
        let dir = tempdir().unwrap();
        let store = PoiStore::at(dir.path(), "stuttgart").unwrap();

        let batch = PoiBatch::new(
            "Stuttgart",
            vec![
                candidate("Fernsehturm", "Stuttgart"),
                candidate("Schlossplatz", "Stuttgart"),
            ],
        );
        store.write(&batch).unwrap();

        let loaded = store.read("Stuttgart").unwrap().unwrap();
        assert_eq!(loaded.city, "Stuttgart");
        assert_eq!(loaded.pois.len(), 2);
        // generation order is the pinned ordering policy
        assert_eq!(loaded.pois[0].id, batch.pois[0].id);
        assert_eq!(loaded.pois[1].id, batch.pois[1].id);
        assert_eq!(loaded.pois[0].coordinate, batch.pois[0].coordinate);
    }

    #[test]
    fn write_is_a_full_overwrite() {
        let dir = tempdir().unwrap();
        let store = PoiStore::at(dir.path(), "stuttgart").unwrap();

        store
            .write(&PoiBatch::new(
                "Stuttgart",
                vec![
                    candidate("Fernsehturm", "Stuttgart"),
                    candidate("Killesberg", "Stuttgart"),
                ],
            ))
            .unwrap();
        store
            .write(&PoiBatch::new(
                "Stuttgart",
                vec![candidate("Schlossplatz", "Stuttgart")],
            ))
            .unwrap();

        let loaded = store.read("stuttgart").unwrap().unwrap();
        assert_eq!(loaded.pois.len(), 1);
        assert_eq!(loaded.pois[0].name, "Schlossplatz");
    }

    #[test]
    fn missing_city_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = PoiStore::at(dir.path(), "stuttgart").unwrap();
        assert!(store.read("Berlin").unwrap().is_none());
    }

    #[test]
    fn city_key_is_case_insensitive_and_filesystem_safe() {
        assert_eq!(city_key("Stuttgart"), "stuttgart");
        assert_eq!(city_key("  New York "), "new-york");
        assert_eq!(city_key("São Paulo"), "são-paulo");
        assert_eq!(city_key("///"), "city");
    }

    #[test]
    fn merges_reference_city_without_duplicates() {
        let dir = tempdir().unwrap();
        let store = PoiStore::at(dir.path(), "stuttgart").unwrap();

        let shared = candidate("Fernsehturm", "Stuttgart");
        let mut shared_in_berlin = shared.clone();
        shared_in_berlin.description = "stale copy".into();

        store
            .write(&PoiBatch::new(
                "Stuttgart",
                vec![shared, candidate("Killesberg", "Stuttgart")],
            ))
            .unwrap();
        store
            .write(&PoiBatch::new(
                "Berlin",
                vec![candidate("Fernsehturm Berlin", "Berlin"), shared_in_berlin],
            ))
            .unwrap();

        let merged = store.read_with_reference("Berlin").unwrap().unwrap();
        assert_eq!(merged.city, "Berlin");
        // Berlin's own record wins the id collision, reference fills the rest
        assert_eq!(merged.pois.len(), 3);
        let stale = merged
            .pois
            .iter()
            .find(|poi| poi.description == "stale copy");
        assert!(stale.is_some());
    }

    #[test]
    fn reference_read_for_the_reference_city_itself_does_not_merge() {
        let dir = tempdir().unwrap();
        let store = PoiStore::at(dir.path(), "stuttgart").unwrap();
        store
            .write(&PoiBatch::new(
                "Stuttgart",
                vec![candidate("Fernsehturm", "Stuttgart")],
            ))
            .unwrap();

        let loaded = store.read_with_reference("Stuttgart").unwrap().unwrap();
        assert_eq!(loaded.pois.len(), 1);
    }
}
