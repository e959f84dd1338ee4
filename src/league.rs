// Current-war discovery across a league group and the per-request snapshot
// pipeline built on top of it.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::coc::models::PLACEHOLDER_WAR_TAG;
use crate::coc::{LeagueGroup, UpstreamError, War, WarApi, WarState};
use crate::metrics;
use crate::snapshot::{build_snapshot, Snapshot};

/// Why a snapshot could not be produced.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("No CWL rounds found.")]
    NoRoundsFound,

    #[error("No ongoing CWL war found for clan {0}.")]
    NoActiveWar(String),

    #[error("{0}")]
    Upstream(#[from] UpstreamError),
}

impl SnapshotError {
    /// Short label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            SnapshotError::NoRoundsFound => "no_rounds",
            SnapshotError::NoActiveWar(_) => "no_war",
            SnapshotError::Upstream(_) => "upstream_error",
        }
    }
}

/// Walk the group's rounds in order and return the first war that is in
/// progress and involves `clan_tag`. Placeholder war tags are never fetched.
pub async fn find_current_war(
    api: &dyn WarApi,
    group: &LeagueGroup,
    clan_tag: &str,
) -> Result<Option<War>, UpstreamError> {
    for (round, wars) in group.rounds.iter().enumerate() {
        for war_tag in &wars.war_tags {
            if war_tag == PLACEHOLDER_WAR_TAG {
                continue;
            }
            let war = api.league_war(war_tag).await?;
            if war.state == WarState::InWar && war.involves(clan_tag) {
                tracing::debug!(round = round + 1, "Found current war {war_tag} for {clan_tag}");
                return Ok(Some(war));
            }
        }
    }
    Ok(None)
}

async fn resolve_snapshot(
    api: &mut dyn WarApi,
    clan_tag: &str,
    now: DateTime<Utc>,
) -> Result<Snapshot, SnapshotError> {
    api.authenticate().await?;

    let group = match api.league_group(clan_tag).await? {
        Some(group) if !group.rounds.is_empty() => group,
        _ => return Err(SnapshotError::NoRoundsFound),
    };

    let war = find_current_war(&*api, &group, clan_tag)
        .await?
        .ok_or_else(|| SnapshotError::NoActiveWar(clan_tag.to_string()))?;

    Ok(build_snapshot(&war, clan_tag, now))
}

/// Produce the snapshot for `clan_tag` using a fresh upstream session.
///
/// The session is always closed afterwards. A failure to close is logged
/// and does not affect the returned result.
pub async fn fetch_snapshot(
    api: &mut dyn WarApi,
    clan_tag: &str,
    now: DateTime<Utc>,
) -> Result<Snapshot, SnapshotError> {
    let result = resolve_snapshot(api, clan_tag, now).await;

    if let Err(e) = api.close().await {
        metrics::UPSTREAM_CLOSE_FAILURES_TOTAL.inc();
        tracing::warn!("Error closing upstream session: {e}");
    }

    if let Err(e) = &result {
        tracing::warn!("Snapshot for {clan_tag} failed: {e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coc::{LeagueRound, WarClan};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn clan(tag: &str) -> WarClan {
        WarClan {
            tag: tag.into(),
            name: format!("name{tag}"),
            clan_level: 0,
            attacks: 0,
            stars: 0,
            destruction_percentage: 0.0,
            members: Vec::new(),
        }
    }

    fn war(state: WarState, a: &str, b: &str) -> War {
        War {
            state,
            team_size: 15,
            preparation_start_time: None,
            start_time: None,
            end_time: now() + Duration::hours(1),
            clan: clan(a),
            opponent: clan(b),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn group(rounds: &[&[&str]]) -> LeagueGroup {
        LeagueGroup {
            state: "inWar".into(),
            season: "2024-01".into(),
            clans: Vec::new(),
            rounds: rounds
                .iter()
                .map(|r| LeagueRound {
                    war_tags: r.iter().map(|t| t.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[derive(Default)]
    struct FakeApi {
        group: Option<LeagueGroup>,
        wars: HashMap<String, War>,
        fail_auth: bool,
        fail_close: bool,
        fetched: Mutex<Vec<String>>,
        closed: bool,
    }

    #[async_trait]
    impl WarApi for FakeApi {
        async fn authenticate(&mut self) -> Result<(), UpstreamError> {
            if self.fail_auth {
                return Err(UpstreamError::Auth("bad credentials".into()));
            }
            Ok(())
        }

        async fn league_group(&self, _clan_tag: &str) -> Result<Option<LeagueGroup>, UpstreamError> {
            Ok(self.group.clone())
        }

        async fn league_war(&self, war_tag: &str) -> Result<War, UpstreamError> {
            self.fetched.lock().unwrap().push(war_tag.to_string());
            self.wars.get(war_tag).cloned().ok_or(UpstreamError::NotFound)
        }

        async fn close(&mut self) -> Result<(), UpstreamError> {
            self.closed = true;
            if self.fail_close {
                return Err(UpstreamError::Decode("close failed".into()));
            }
            Ok(())
        }
    }

    fn fake_league() -> FakeApi {
        let mut wars = HashMap::new();
        wars.insert("#W1".into(), war(WarState::WarEnded, "#OUR", "#X"));
        wars.insert("#W2".into(), war(WarState::InWar, "#Y", "#Z"));
        wars.insert("#W3".into(), war(WarState::InWar, "#ENEMY", "#OUR"));
        wars.insert("#W4".into(), war(WarState::InWar, "#OUR", "#LATE"));
        FakeApi {
            group: Some(group(&[&["#W1", "#W2"], &["#0", "#W3"], &["#W4"]])),
            wars,
            ..FakeApi::default()
        }
    }

    #[tokio::test]
    async fn test_first_in_war_match_wins_and_placeholders_skipped() {
        let api = fake_league();
        let group = api.group.clone().unwrap();
        let found = find_current_war(&api, &group, "#OUR").await.unwrap().unwrap();

        assert_eq!(found.clan.tag, "#ENEMY");
        assert_eq!(*api.fetched.lock().unwrap(), vec!["#W1", "#W2", "#W3"]);
    }

    #[tokio::test]
    async fn test_no_match_returns_none() {
        let api = fake_league();
        let group = api.group.clone().unwrap();
        let found = find_current_war(&api, &group, "#NOBODY").await.unwrap();
        assert!(found.is_none());
        assert!(!api.fetched.lock().unwrap().contains(&"#0".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_orients_to_requesting_clan() {
        let mut api = fake_league();
        let snap = fetch_snapshot(&mut api, "#OUR", now()).await.unwrap();
        assert_eq!(snap.clan_name, "name#OUR");
        assert_eq!(snap.enemy_name, "name#ENEMY");
        assert_eq!(snap.time_remaining, "1h 0m remaining");
        assert!(api.closed);
    }

    #[tokio::test]
    async fn test_missing_group_is_no_rounds() {
        let mut api = FakeApi::default();
        let err = fetch_snapshot(&mut api, "#OUR", now()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::NoRoundsFound));
        assert_eq!(err.to_string(), "No CWL rounds found.");
        assert!(api.closed);
    }

    #[tokio::test]
    async fn test_empty_rounds_is_no_rounds() {
        let mut api = FakeApi {
            group: Some(group(&[])),
            ..FakeApi::default()
        };
        let err = fetch_snapshot(&mut api, "#OUR", now()).await.unwrap_err();
        assert_eq!(err.outcome(), "no_rounds");
    }

    #[tokio::test]
    async fn test_no_active_war_message() {
        let mut api = fake_league();
        let err = fetch_snapshot(&mut api, "#NOBODY", now()).await.unwrap_err();
        assert_eq!(err.to_string(), "No ongoing CWL war found for clan #NOBODY.");
    }

    #[tokio::test]
    async fn test_upstream_failure_surfaces_message_and_closes() {
        let mut api = FakeApi {
            fail_auth: true,
            ..fake_league()
        };
        let err = fetch_snapshot(&mut api, "#OUR", now()).await.unwrap_err();
        assert_eq!(err.outcome(), "upstream_error");
        assert!(err.to_string().contains("bad credentials"));
        assert!(api.closed);
    }

    #[tokio::test]
    async fn test_war_fetch_failure_aborts() {
        let mut api = FakeApi {
            group: Some(group(&[&["#MISSING", "#W3"]])),
            ..fake_league()
        };
        let err = fetch_snapshot(&mut api, "#OUR", now()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Upstream(UpstreamError::NotFound)));
        assert_eq!(*api.fetched.lock().unwrap(), vec!["#MISSING"]);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_change_result() {
        let mut api = FakeApi {
            fail_close: true,
            ..fake_league()
        };
        let snap = fetch_snapshot(&mut api, "#OUR", now()).await.unwrap();
        assert_eq!(snap.clan_name, "name#OUR");
    }
}
