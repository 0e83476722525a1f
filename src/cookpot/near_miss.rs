//! Near-miss classification and ranking
//!
//! A recipe that did not match is still interesting: the UI shows "what you
//! could almost cook". Relevance is tiered by what kind of missing pieces a
//! recipe has relative to the pool of ingredients the player can actually
//! reach. Filler ids and filler tags never count as a hit.

use std::collections::BTreeSet;

use serde::Serialize;
use strum::Display;

use super::{EvalRow, IngredientIndex, Missing, MissingKind, RuleMode};

/// Primary: a required non-filler id is in the pool. Secondary: only a
/// required non-filler tag is. Filler: neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    Primary,
    Secondary,
    Filler,
}

pub(crate) const FILLER_TAGS: &[&str] = &["inedible", "frozen", "dried"];
pub(crate) const FILLER_NAMES: &[&str] = &["twigs", "ice", "lightninggoathorn", "boneshard"];

/// A ranked near-miss row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearMiss {
    #[serde(flatten)]
    pub row: EvalRow,
    pub tier: Tier,
    /// Required non-filler ids (or id groups) present in the pool.
    pub feature_hits: usize,
    /// Required non-filler tags present in the pool.
    pub tag_hits: usize,
    /// Missing pieces that are not filler.
    pub missing_non_filler: usize,
}

/// Near-miss rows grouped by tier, for direct UI consumption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierGroup {
    pub key: Tier,
    pub count: usize,
    pub items: Vec<NearMiss>,
}

/// The reachable ingredient pool: slot ids plus the pantry, and every tag
/// they carry.
#[derive(Debug, Default)]
pub(crate) struct Pool {
    pub names: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

pub(crate) fn collect_pool<'a>(
    items: impl IntoIterator<Item = &'a str>,
    index: &IngredientIndex,
) -> Pool {
    let mut pool = Pool::default();
    for item in items {
        let id = item.trim().to_ascii_lowercase();
        if id.is_empty() {
            continue;
        }
        if let Some(tags) = index.tags_by_item.get(&id) {
            pool.tags.extend(tags.keys().cloned());
        }
        pool.names.insert(id);
    }
    pool
}

pub(crate) fn is_filler_name(name: &str, index: &IngredientIndex) -> bool {
    let key = name.trim().to_ascii_lowercase();
    if key.is_empty() {
        return false;
    }
    if FILLER_NAMES.contains(&key.as_str()) {
        return true;
    }
    match index.tags_by_item.get(&key) {
        Some(tags) if !tags.is_empty() => {
            tags.keys().all(|t| FILLER_TAGS.contains(&t.as_str()))
        }
        _ => false,
    }
}

fn missing_is_filler(missing: &Missing, index: &IngredientIndex) -> bool {
    match missing.kind {
        MissingKind::Tag => FILLER_TAGS.contains(&missing.key.as_str()),
        MissingKind::Name => is_filler_name(&missing.key, index),
        MissingKind::NameAny => {
            !missing.options.is_empty()
                && missing.options.iter().all(|o| is_filler_name(o, index))
        }
        MissingKind::NameSum => false,
    }
}

fn classify(row: &EvalRow, pool: &Pool, index: &IngredientIndex) -> (Tier, usize, usize, usize) {
    let non_filler = row
        .missing
        .iter()
        .filter(|m| !missing_is_filler(m, index))
        .count();

    if row.rule_mode == RuleMode::None {
        return (Tier::Filler, 0, 0, non_filler);
    }

    let name_hits = row
        .req_names
        .iter()
        .filter(|n| pool.names.contains(*n) && !is_filler_name(n, index))
        .count();
    let group_hits = row
        .req_name_groups
        .iter()
        .filter(|group| {
            group
                .iter()
                .any(|o| pool.names.contains(o) && !is_filler_name(o, index))
        })
        .count();
    let tag_hits = row
        .req_tags
        .iter()
        .filter(|t| pool.tags.contains(*t) && !FILLER_TAGS.contains(&t.as_str()))
        .count();

    let feature_hits = name_hits + group_hits;
    let tier = if feature_hits > 0 {
        Tier::Primary
    } else if tag_hits > 0 {
        Tier::Secondary
    } else {
        Tier::Filler
    };
    (tier, feature_hits, tag_hits, non_filler)
}

/// Classifies and ranks near-miss rows; returns the flat limited list plus
/// its tier grouping.
pub(crate) fn rank(
    rows: Vec<EvalRow>,
    pool: &Pool,
    index: &IngredientIndex,
    limit: usize,
) -> (Vec<NearMiss>, Vec<TierGroup>) {
    let mut enriched: Vec<NearMiss> = rows
        .into_iter()
        .map(|row| {
            let (tier, feature_hits, tag_hits, missing_non_filler) = classify(&row, pool, index);
            NearMiss {
                row,
                tier,
                feature_hits,
                tag_hits,
                missing_non_filler,
            }
        })
        .collect();

    enriched.sort_by(|a, b| {
        a.tier
            .cmp(&b.tier)
            .then(b.feature_hits.cmp(&a.feature_hits))
            .then(b.tag_hits.cmp(&a.tag_hits))
            .then(a.missing_non_filler.cmp(&b.missing_non_filler))
            .then(
                b.row
                    .score
                    .partial_cmp(&a.row.score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.row.name.cmp(&b.row.name))
    });

    if limit > 0 {
        enriched.truncate(limit);
    }

    let mut groups: Vec<TierGroup> = Vec::new();
    for tier in [Tier::Primary, Tier::Secondary, Tier::Filler] {
        let items: Vec<NearMiss> = enriched.iter().filter(|r| r.tier == tier).cloned().collect();
        if !items.is_empty() {
            groups.push(TierGroup {
                key: tier,
                count: items.len(),
                items,
            });
        }
    }

    (enriched, groups)
}
