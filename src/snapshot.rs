// War snapshot computation: orient the two sides of a war, work out which
// bases are still untouched and who still has attacks left, and format the
// time remaining for display.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::coc::{War, WarClan, WarMember};

/// Attacks each member gets per league war.
pub const ATTACKS_PER_MEMBER: usize = 1;

pub const WAR_ENDED: &str = "War ended";

const END_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// A member as shown in the roster and untouched-base lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub tag: String,
    pub name: String,
    pub map_position: u32,
    pub town_hall: u32,
}

impl From<&WarMember> for RosterEntry {
    fn from(m: &WarMember) -> Self {
        RosterEntry {
            tag: m.tag.clone(),
            name: m.name.clone(),
            map_position: m.map_position,
            town_hall: m.townhall_level,
        }
    }
}

/// A member who still has attacks to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attacker {
    pub name: String,
    pub remaining: usize,
    pub map_position: u32,
    pub town_hall: u32,
}

/// Display-ready state of one war from the requesting clan's point of view.
///
/// `Default` is the empty snapshot shown before a clan has been requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub clan_name: String,
    pub enemy_name: String,
    pub war_end_time: String,
    pub time_remaining: String,
    pub untouched_us: Vec<RosterEntry>,
    pub untouched_enemy: Vec<RosterEntry>,
    pub attackers_us: Vec<Attacker>,
    pub attackers_enemy: Vec<Attacker>,
    pub our_members: Vec<RosterEntry>,
    pub enemy_members: Vec<RosterEntry>,
}

/// Split a war into (our side, enemy side) for the given clan.
///
/// The upstream may list the requesting clan on either side.
pub fn orient<'a>(war: &'a War, clan_tag: &str) -> (&'a WarClan, &'a WarClan) {
    if war.clan.tag == clan_tag {
        (&war.clan, &war.opponent)
    } else {
        (&war.opponent, &war.clan)
    }
}

/// Defender tags of every attack made by `attackers`.
pub fn hit_set(attackers: &WarClan) -> HashSet<&str> {
    attackers
        .members
        .iter()
        .flat_map(|m| m.attacks.iter())
        .map(|a| a.defender_tag.as_str())
        .collect()
}

/// Members of `side` that no member of `opposing` has attacked, by map position.
pub fn untouched(side: &WarClan, opposing: &WarClan) -> Vec<RosterEntry> {
    let hit = hit_set(opposing);
    let mut bases: Vec<RosterEntry> = side
        .members
        .iter()
        .filter(|m| !hit.contains(m.tag.as_str()))
        .map(RosterEntry::from)
        .collect();
    bases.sort_by_key(|b| b.map_position);
    bases
}

pub fn remaining_attacks(member: &WarMember) -> usize {
    ATTACKS_PER_MEMBER.saturating_sub(member.attacks.len())
}

/// Members of `side` with attacks left, by map position.
pub fn attackers_with_remaining(side: &WarClan) -> Vec<Attacker> {
    let mut attackers: Vec<Attacker> = side
        .members
        .iter()
        .filter_map(|m| {
            let remaining = remaining_attacks(m);
            (remaining > 0).then(|| Attacker {
                name: m.name.clone(),
                remaining,
                map_position: m.map_position,
                town_hall: m.townhall_level,
            })
        })
        .collect();
    attackers.sort_by_key(|a| a.map_position);
    attackers
}

/// Every member of `side`, by map position.
pub fn roster(side: &WarClan) -> Vec<RosterEntry> {
    let mut members: Vec<RosterEntry> = side.members.iter().map(RosterEntry::from).collect();
    members.sort_by_key(|m| m.map_position);
    members
}

/// "Xh Ym remaining" while the war is running, "War ended" from the end
/// time onwards.
pub fn format_time_remaining(end_time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let left = end_time - now;
    if left <= chrono::Duration::zero() {
        return WAR_ENDED.to_string();
    }
    let secs = left.num_seconds();
    format!("{}h {}m remaining", secs / 3600, (secs % 3600) / 60)
}

pub fn format_end_time(end_time: DateTime<Utc>) -> String {
    end_time.format(END_TIME_FORMAT).to_string()
}

/// Build the snapshot of `war` as seen by `clan_tag` at `now`.
pub fn build_snapshot(war: &War, clan_tag: &str, now: DateTime<Utc>) -> Snapshot {
    let (ours, theirs) = orient(war, clan_tag);

    Snapshot {
        clan_name: ours.name.clone(),
        enemy_name: theirs.name.clone(),
        war_end_time: format_end_time(war.end_time),
        time_remaining: format_time_remaining(war.end_time, now),
        untouched_us: untouched(ours, theirs),
        untouched_enemy: untouched(theirs, ours),
        attackers_us: attackers_with_remaining(ours),
        attackers_enemy: attackers_with_remaining(theirs),
        our_members: roster(ours),
        enemy_members: roster(theirs),
    }
}
