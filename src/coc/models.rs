// Upstream data model for league groups and league wars.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// War identifier the upstream uses for rounds that have not been drawn yet.
pub const PLACEHOLDER_WAR_TAG: &str = "#0";

/// Compact timestamp format used by the upstream, e.g. `20240110T073015.000Z`.
const API_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.fZ";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueGroup {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub season: String,
    #[serde(default)]
    pub clans: Vec<LeagueClan>,
    #[serde(default)]
    pub rounds: Vec<LeagueRound>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueClan {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub clan_level: u32,
}

/// One round of a league group: the war tags drawn for it, in order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueRound {
    #[serde(default)]
    pub war_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarState {
    NotInWar,
    Preparation,
    InWar,
    WarEnded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct War {
    pub state: WarState,
    #[serde(default)]
    pub team_size: u32,
    #[serde(default, deserialize_with = "deserialize_optional_api_time")]
    pub preparation_start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_api_time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_api_time")]
    pub end_time: DateTime<Utc>,
    pub clan: WarClan,
    pub opponent: WarClan,
}

impl War {
    /// Whether either side of this war is the given clan.
    pub fn involves(&self, clan_tag: &str) -> bool {
        self.clan.tag == clan_tag || self.opponent.tag == clan_tag
    }
}

/// One side of a war.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarClan {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clan_level: u32,
    #[serde(default)]
    pub attacks: u32,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub destruction_percentage: f64,
    #[serde(default)]
    pub members: Vec<WarMember>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMember {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub townhall_level: u32,
    #[serde(default)]
    pub map_position: u32,
    #[serde(default)]
    pub attacks: Vec<Attack>,
    #[serde(default)]
    pub opponent_attacks: u32,
    #[serde(default)]
    pub best_opponent_attack: Option<Attack>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attack {
    #[serde(default)]
    pub attacker_tag: String,
    pub defender_tag: String,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub destruction_percentage: f64,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub duration: u32,
}

/// Parse an upstream timestamp into UTC.
///
/// The compact upstream form carries no offset and is always UTC. RFC 3339
/// strings with an explicit offset are converted; RFC 3339 strings without
/// one are also taken to be UTC.
pub fn parse_api_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, API_TIME_FORMAT) {
        return Ok(naive.and_utc());
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| e),
    }
}

fn deserialize_api_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_api_time(&raw)
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
}

fn deserialize_optional_api_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_api_time(&raw)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}"))),
        None => Ok(None),
    }
}
