use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use toolgate_store::{ArtifactStore, EpisodeIndex};
use toolgate_types::{canonical_json, ArtifactRef, Episode};

/// Writes evidence artifacts and appends episodes.
///
/// Both operations are best effort: a failed write is logged and never replaces the outcome the
/// flow already reached.
#[derive(Clone)]
pub struct EvidenceRecorder {
    artifacts: Arc<dyn ArtifactStore>,
    episodes: Arc<dyn EpisodeIndex>,
}

impl EvidenceRecorder {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, episodes: Arc<dyn EpisodeIndex>) -> Self {
        Self { artifacts, episodes }
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn episodes(&self) -> &Arc<dyn EpisodeIndex> {
        &self.episodes
    }

    pub async fn put_json(&self, kind: &str, value: &Value) -> Option<ArtifactRef> {
        match self.artifacts.put(canonical_json(value)).await {
            Ok(artifact) => Some(artifact),
            Err(err) => {
                warn!(kind, error = %err, "evidence write failed");
                None
            }
        }
    }

    /// Appends the episode after its evidence. Returns the episode id even if the append failed.
    pub async fn append(&self, episode: Episode) -> String {
        let id = episode.id.clone();
        let ty = episode.episode_type.as_str();
        if let Err(err) = self.episodes.append(episode).await {
            warn!(episode_id = %id, episode_type = ty, error = %err, "episode append failed");
        }
        id
    }
}
