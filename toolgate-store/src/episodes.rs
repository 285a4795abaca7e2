use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use toolgate_types::{DecisionKind, Episode, EpisodeType};

use crate::{EpisodeIndex, StoreError};

pub const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EpisodeQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub id_prefix: Option<String>,
    #[serde(default)]
    pub decision: Option<DecisionKind>,
    #[serde(default, rename = "type")]
    pub episode_type: Option<EpisodeType>,
    #[serde(default)]
    pub since_ts: Option<i64>,
    #[serde(default)]
    pub until_ts: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: SortOrder,
}

impl EpisodeQuery {
    pub fn matches(&self, ep: &Episode) -> bool {
        if self.id.as_deref().is_some_and(|id| ep.id != id) {
            return false;
        }
        if self.id_prefix.as_deref().is_some_and(|p| !ep.id.starts_with(p)) {
            return false;
        }
        if self.decision.is_some_and(|d| ep.decision != d) {
            return false;
        }
        if self.episode_type.is_some_and(|t| ep.episode_type != t) {
            return false;
        }
        if self.since_ts.is_some_and(|t| ep.ts < t) {
            return false;
        }
        if self.until_ts.is_some_and(|t| ep.ts > t) {
            return false;
        }
        true
    }

    /// Requested limit clamped to `1..=MAX_SEARCH_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(MAX_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT)
    }

    /// Filters, orders and truncates an episode slice held in append order.
    pub fn apply(&self, episodes: &[Episode]) -> Vec<Episode> {
        let matching = episodes.iter().filter(|ep| self.matches(ep));
        let limit = self.effective_limit();
        match self.order {
            SortOrder::Asc => matching.take(limit).cloned().collect(),
            SortOrder::Desc => matching.rev().take(limit).cloned().collect(),
        }
    }
}

#[derive(Default)]
pub struct InMemoryEpisodeIndex {
    episodes: RwLock<Vec<Episode>>,
}

impl InMemoryEpisodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.episodes.read().await.len()
    }
}

#[async_trait]
impl EpisodeIndex for InMemoryEpisodeIndex {
    async fn append(&self, episode: Episode) -> Result<(), StoreError> {
        self.episodes.write().await.push(episode);
        Ok(())
    }

    async fn search(&self, query: &EpisodeQuery) -> Result<Vec<Episode>, StoreError> {
        let episodes = self.episodes.read().await;
        Ok(query.apply(&episodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(id: &str, ts: i64, ty: EpisodeType, decision: DecisionKind) -> Episode {
        let mut ep = Episode::new(ty, decision, "test");
        ep.id = id.into();
        ep.ts = ts;
        ep
    }

    async fn seeded() -> InMemoryEpisodeIndex {
        let index = InMemoryEpisodeIndex::new();
        index.append(episode("ep_1", 10, EpisodeType::ToolRun, DecisionKind::Allow)).await.unwrap();
        index.append(episode("ep_2", 20, EpisodeType::PolicyDeny, DecisionKind::Deny)).await.unwrap();
        index.append(episode("ep_3", 30, EpisodeType::ToolRun, DecisionKind::Allow)).await.unwrap();
        index.append(episode("xx_4", 40, EpisodeType::PayloadDeny, DecisionKind::Deny)).await.unwrap();
        index
    }

    fn ids(eps: &[Episode]) -> Vec<&str> {
        eps.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn default_order_is_newest_first() {
        let index = seeded().await;
        let out = index.search(&EpisodeQuery::default()).await.unwrap();
        assert_eq!(ids(&out), vec!["xx_4", "ep_3", "ep_2", "ep_1"]);
    }

    #[tokio::test]
    async fn filters_combine() {
        let index = seeded().await;
        let query = EpisodeQuery {
            id_prefix: Some("ep_".into()),
            decision: Some(DecisionKind::Allow),
            order: SortOrder::Asc,
            ..Default::default()
        };
        assert_eq!(ids(&index.search(&query).await.unwrap()), vec!["ep_1", "ep_3"]);

        let query = EpisodeQuery {
            since_ts: Some(20),
            until_ts: Some(30),
            ..Default::default()
        };
        assert_eq!(ids(&index.search(&query).await.unwrap()), vec!["ep_3", "ep_2"]);

        let query = EpisodeQuery {
            episode_type: Some(EpisodeType::PayloadDeny),
            ..Default::default()
        };
        assert_eq!(ids(&index.search(&query).await.unwrap()), vec!["xx_4"]);
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let index = InMemoryEpisodeIndex::new();
        for i in 0..150 {
            index
                .append(episode(&format!("ep_{i:03}"), i, EpisodeType::ToolRun, DecisionKind::Allow))
                .await
                .unwrap();
        }
        let query = EpisodeQuery {
            limit: Some(1000),
            ..Default::default()
        };
        assert_eq!(index.search(&query).await.unwrap().len(), MAX_SEARCH_LIMIT);
        let query = EpisodeQuery {
            limit: Some(0),
            order: SortOrder::Asc,
            ..Default::default()
        };
        assert_eq!(ids(&index.search(&query).await.unwrap()), vec!["ep_000"]);
    }

    #[test]
    fn query_parses_from_wire_shape() {
        let q: EpisodeQuery = serde_json::from_str(
            r#"{"decision":"deny","type":"policy_deny","limit":5,"order":"asc"}"#,
        )
        .unwrap();
        assert_eq!(q.decision, Some(DecisionKind::Deny));
        assert_eq!(q.episode_type, Some(EpisodeType::PolicyDeny));
        assert_eq!(q.order, SortOrder::Asc);
    }
}
