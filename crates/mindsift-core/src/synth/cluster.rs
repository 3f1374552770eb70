//! Insight clustering for Tier 2.
//!
//! Three strategies: by shared themes (connected components over
//! shares-at-least-two-themes edges), by time (fixed windows over the
//! earliest source date, small buckets folded into their nearest
//! neighbour), and by entity (components over entity co-occurrence in
//! excerpts). `Auto` runs all three and keeps the one with the best mean
//! silhouette under theme distance.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::entity::normalise_value;
use crate::extract::similarity::jaccard;
use crate::model::Insight;
use crate::signals;

/// Which clustering strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStrategy {
    Theme,
    Time,
    Entity,
    Auto,
}

impl ClusterStrategy {
    /// Parse from config text, defaulting to `Auto`.
    pub fn parse(s: &str) -> Self {
        match s {
            "theme" => ClusterStrategy::Theme,
            "time" => ClusterStrategy::Time,
            "entity" => ClusterStrategy::Entity,
            _ => ClusterStrategy::Auto,
        }
    }
}

/// A group of related insights with its cohesion diagnostics.
#[derive(Debug, Clone)]
pub struct InsightCluster {
    pub insights: Vec<Insight>,
    /// Mean pairwise theme similarity inside the cluster.
    pub cohesion_score: f64,
    /// Most frequent themes, strongest first.
    pub dominant_themes: Vec<String>,
}

/// Cluster insights with the given strategy.
///
/// Clusters smaller than `min_cluster` are discarded. For `Auto`, each
/// concrete strategy runs and the one maximising mean silhouette wins.
pub fn cluster(
    insights: &[Insight],
    strategy: ClusterStrategy,
    min_cluster: usize,
    time_bucket_days: i64,
) -> Vec<InsightCluster> {
    let groups = match strategy {
        ClusterStrategy::Theme => by_theme(insights),
        ClusterStrategy::Time => by_time(insights, min_cluster, time_bucket_days),
        ClusterStrategy::Entity => by_entity(insights),
        ClusterStrategy::Auto => {
            let candidates = [
                by_theme(insights),
                by_time(insights, min_cluster, time_bucket_days),
                by_entity(insights),
            ];
            let best = candidates
                .into_iter()
                .map(|groups| (mean_silhouette(insights, &groups), groups))
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            best.map(|(_, groups)| groups).unwrap_or_default()
        }
    };

    groups
        .into_iter()
        .filter(|g| g.len() >= min_cluster)
        .map(|g| build_cluster(insights, &g))
        .collect()
}

/// Connected components where an edge means "shares >= 2 themes".
fn by_theme(insights: &[Insight]) -> Vec<Vec<usize>> {
    connected_components(insights.len(), |a, b| {
        insights[a].themes.intersection(&insights[b].themes).count() >= 2
    })
}

/// Fixed time windows over `earliest_source_date`; buckets below
/// `min_cluster` are folded into their nearest adjacent bucket.
fn by_time(insights: &[Insight], min_cluster: usize, bucket_days: i64) -> Vec<Vec<usize>> {
    let dated: Vec<(usize, i64)> = insights
        .iter()
        .enumerate()
        .map(|(index, insight)| {
            let date = insight
                .earliest_source_date
                .unwrap_or(insight.created_at)
                .timestamp();
            (index, date)
        })
        .collect();
    if dated.is_empty() {
        return Vec::new();
    }

    let min_ts = dated.iter().map(|(_, ts)| *ts).min().unwrap_or(0);
    let bucket_secs = bucket_days.max(1) * 86_400;

    let mut buckets: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (index, ts) in dated {
        buckets.entry((ts - min_ts) / bucket_secs).or_default().push(index);
    }

    // Fold undersized buckets into their nearest neighbour by key distance
    let mut keys: Vec<i64> = buckets.keys().copied().collect();
    loop {
        let Some(&small) = keys
            .iter()
            .find(|k| buckets.get(k).map_or(0, Vec::len) < min_cluster)
        else {
            break;
        };
        if keys.len() <= 1 {
            break;
        }

        let nearest = keys
            .iter()
            .filter(|k| **k != small)
            .min_by_key(|k| (**k - small).abs())
            .copied();
        let Some(nearest) = nearest else { break };

        let moved = buckets.remove(&small).unwrap_or_default();
        buckets.entry(nearest).or_default().extend(moved);
        keys.retain(|k| *k != small);
    }

    buckets.into_values().collect()
}

/// Connected components over shared entities in excerpts.
fn by_entity(insights: &[Insight]) -> Vec<Vec<usize>> {
    let entity_sets: Vec<BTreeSet<String>> = insights
        .iter()
        .map(|insight| {
            let mut entities = BTreeSet::new();
            for excerpt in &insight.excerpts {
                for candidate in signals::entities::extract(excerpt) {
                    entities.insert(format!(
                        "{}:{}",
                        candidate.entity_type,
                        normalise_value(candidate.entity_type, &candidate.value)
                    ));
                }
            }
            entities
        })
        .collect();

    connected_components(insights.len(), |a, b| {
        !entity_sets[a].is_disjoint(&entity_sets[b])
            && (!entity_sets[a].is_empty() || !entity_sets[b].is_empty())
    })
}

/// Union-find connected components under an edge predicate.
fn connected_components<F: Fn(usize, usize) -> bool>(n: usize, connected: F) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        // Path compression
        let mut current = x;
        while parent[current] != root {
            let next = parent[current];
            parent[current] = root;
            current = next;
        }
        root
    }

    for a in 0..n {
        for b in (a + 1)..n {
            if connected(a, b) {
                let ra = find(&mut parent, a);
                let rb = find(&mut parent, b);
                if ra != rb {
                    parent[ra] = rb;
                }
            }
        }
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for x in 0..n {
        let root = find(&mut parent, x);
        components.entry(root).or_default().push(x);
    }

    let mut out: Vec<Vec<usize>> = components.into_values().collect();
    out.sort_by_key(|c| c.first().copied().unwrap_or(0));
    out
}

/// Mean silhouette coefficient under theme distance (1 - Jaccard).
///
/// Returns 0 for degenerate clusterings (a single cluster, or all
/// singletons), which naturally deprioritises them under `Auto`.
fn mean_silhouette(insights: &[Insight], groups: &[Vec<usize>]) -> f64 {
    if groups.len() < 2 || insights.is_empty() {
        return 0.0;
    }

    let distance =
        |a: usize, b: usize| 1.0 - jaccard(&insights[a].themes, &insights[b].themes);

    let mut total = 0.0;
    let mut count = 0usize;

    for (group_index, group) in groups.iter().enumerate() {
        for &point in group {
            if group.len() < 2 {
                count += 1;
                continue;
            }

            let a: f64 = group
                .iter()
                .filter(|other| **other != point)
                .map(|&other| distance(point, other))
                .sum::<f64>()
                / (group.len() - 1) as f64;

            let b = groups
                .iter()
                .enumerate()
                .filter(|(other_index, other)| *other_index != group_index && !other.is_empty())
                .map(|(_, other)| {
                    other.iter().map(|&o| distance(point, o)).sum::<f64>() / other.len() as f64
                })
                .fold(f64::INFINITY, f64::min);

            if b.is_finite() {
                let denominator = a.max(b);
                if denominator > 0.0 {
                    total += (b - a) / denominator;
                }
            }
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

fn build_cluster(insights: &[Insight], indices: &[usize]) -> InsightCluster {
    let members: Vec<Insight> = indices.iter().map(|&i| insights[i].clone()).collect();

    let mut cohesion = 0.0;
    let mut pairs = 0usize;
    for (position, &a) in indices.iter().enumerate() {
        for &b in &indices[position + 1..] {
            cohesion += jaccard(&insights[a].themes, &insights[b].themes);
            pairs += 1;
        }
    }
    let cohesion_score = if pairs == 0 { 1.0 } else { cohesion / pairs as f64 };

    let mut theme_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for member in &members {
        for theme in &member.themes {
            *theme_counts.entry(theme.as_str()).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = theme_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let dominant_themes = ranked
        .into_iter()
        .take(5)
        .map(|(theme, _)| theme.to_string())
        .collect();

    InsightCluster {
        insights: members,
        cohesion_score,
        dominant_themes,
    }
}
