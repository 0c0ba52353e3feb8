mod config;
pub mod builder;
pub mod manual;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

pub use crate::config::*;

/// The level reported for the leaves filled with unmatched videos.
pub const UNMATCHED_LEVEL: &str = "*";

// **** Private structures ****

// Position of a video in the pool.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
struct VideoIdx(usize);

/// The videos of one stratum, split by the levels of a rule.
#[derive(Eq, PartialEq, Debug, Clone)]
struct Partition {
    // In the order of the levels of the rule.
    groups: Vec<Vec<VideoIdx>>,
    // The videos with a value that is not a declared level.
    unmatched: Vec<VideoIdx>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
struct StratumSelection {
    videos: Vec<(VideoIdx, StratumPath)>,
    leaves: Vec<StratumCount>,
}

impl StratumSelection {
    fn append(&mut self, other: StratumSelection) {
        self.videos.extend(other.videos);
        self.leaves.extend(other.leaves);
    }
}

struct Selector<'a, R: Rng + ?Sized> {
    pool: &'a [VideoRecord],
    rules: &'a SelectionRules,
    rng: &'a mut R,
}

/// Selects videos from the pool following the stratification rules.
///
/// Arguments:
/// * `pool` the candidate videos. Each of them must have a value for every variable of the rules.
/// * `strata` the stratification rules, by order of priority. The first rule partitions the whole pool,
/// the second rule partitions each of the resulting strata, and so on.
/// * `target_count` the number of videos to select. If fewer videos are available, the plan is partial.
/// * `excluded` the videos that must not be selected (typically, already rated by the participant).
/// * `rules` the policies that control the selection.
/// * `rng` the source of randomness.
pub fn select_videos<R: Rng + ?Sized>(
    pool: &[VideoRecord],
    strata: &[StratificationRule],
    target_count: usize,
    excluded: &HashSet<String>,
    rules: &SelectionRules,
    rng: &mut R,
) -> Result<SamplePlan, SelectionErrors> {
    info!(
        "Selecting {:?} videos from a pool of {:?} ({:?} excluded), strata: {:?}, rules: {:?}",
        target_count,
        pool.len(),
        excluded.len(),
        strata,
        rules
    );
    if target_count == 0 {
        return Err(SelectionErrors::ZeroTarget);
    }
    validate_strata(pool, strata, rules)?;

    let candidates: Vec<VideoIdx> = pool
        .iter()
        .enumerate()
        .filter(|(_, v)| !excluded.contains(&v.id))
        .map(|(idx, _)| VideoIdx(idx))
        .collect();
    debug!(
        "select_videos: {:?} candidates after exclusion",
        candidates.len()
    );

    let mut selector = Selector { pool, rules, rng };
    let selection = selector.select_stratum(&candidates, strata, target_count, &Vec::new());

    let mut videos: Vec<SampledVideo> = selection
        .videos
        .into_iter()
        .map(|(idx, stratum)| SampledVideo {
            id: pool[idx.0].id.clone(),
            stratum,
        })
        .collect();
    if rules.order == OrderMode::Shuffled {
        videos.shuffle(&mut *selector.rng);
    }

    let plan = SamplePlan {
        videos,
        leaf_counts: selection.leaves,
        requested: target_count,
    };
    info!(
        "Selected {:?} videos out of {:?} requested",
        plan.videos.len(),
        plan.requested
    );
    for leaf in plan.leaf_counts.iter() {
        debug!("select_videos: leaf: {:?}", leaf);
    }
    Ok(plan)
}

/// Same as `select_videos`, with a random source seeded from `seed`.
///
/// Two calls with the same inputs and the same seed return the same plan.
pub fn select_videos_seeded(
    pool: &[VideoRecord],
    strata: &[StratificationRule],
    target_count: usize,
    excluded: &HashSet<String>,
    rules: &SelectionRules,
    seed: u64,
) -> Result<SamplePlan, SelectionErrors> {
    let mut rng = StdRng::seed_from_u64(seed);
    select_videos(pool, strata, target_count, excluded, rules, &mut rng)
}

/// Checks the stratification rules against the pool, before any sampling.
pub fn validate_strata(
    pool: &[VideoRecord],
    strata: &[StratificationRule],
    rules: &SelectionRules,
) -> Result<(), SelectionErrors> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for v in pool.iter() {
        if !seen_ids.insert(v.id.as_str()) {
            return Err(SelectionErrors::DuplicateVideo {
                video_id: v.id.clone(),
            });
        }
    }

    for rule in strata.iter() {
        let variable = rule.variable.clone();
        if rule.levels.is_empty() {
            return Err(SelectionErrors::EmptyLevels { variable });
        }
        if rule.levels.len() != rule.proportions.len() {
            return Err(SelectionErrors::LevelMismatch {
                variable,
                levels: rule.levels.len(),
                proportions: rule.proportions.len(),
            });
        }
        let mut seen_levels: HashSet<&str> = HashSet::new();
        for level in rule.levels.iter() {
            if !seen_levels.insert(level.as_str()) {
                return Err(SelectionErrors::DuplicateLevel {
                    variable,
                    level: level.clone(),
                });
            }
        }
        for p in rule.proportions.iter() {
            if !p.is_finite() || *p < 0.0 {
                return Err(SelectionErrors::InvalidProportion {
                    variable,
                    proportion: *p,
                });
            }
        }
        let sum: f64 = rule.proportions.iter().sum();
        if (sum - 1.0).abs() > rules.proportion_tolerance {
            return Err(SelectionErrors::ProportionSum { variable, sum });
        }
        if let Some(v) = pool.iter().find(|v| !v.metadata.contains_key(&rule.variable)) {
            return Err(SelectionErrors::UnknownVariable {
                variable,
                video_id: v.id.clone(),
            });
        }
    }
    Ok(())
}

/// Splits `total` between levels following the proportions.
///
/// Every level first receives the integer part of its share. The units left are
/// given one at a time to the levels with the largest fractional remainder, the first
/// levels winning the ties. Each count is then at most one unit away from its exact
/// share, and the counts always sum to `total`.
///
/// The proportions are normalized: they only need to sum approximately to one.
pub fn allocate_counts(total: usize, proportions: &[f64]) -> Vec<usize> {
    let sum: f64 = proportions.iter().sum();
    if proportions.is_empty() || sum <= 0.0 {
        return vec![0; proportions.len()];
    }
    let exact: Vec<f64> = proportions
        .iter()
        .map(|p| total as f64 * p / sum)
        .collect();
    let mut counts: Vec<usize> = exact.iter().map(|x| x.floor() as usize).collect();

    // Floating point noise may push the sum of the integer parts above the total.
    let mut assigned: usize = counts.iter().sum();
    while assigned > total {
        if let Some(c) = counts.iter_mut().rev().find(|c| **c > 0) {
            *c -= 1;
        }
        assigned -= 1;
    }

    // Only the levels with a positive share may receive a remainder unit.
    let mut by_remainder: Vec<usize> = (0..proportions.len())
        .filter(|idx| proportions[*idx] > 0.0)
        .collect();
    // Stable sort: ties keep the order of the levels.
    by_remainder.sort_by(|a, b| {
        let ra = exact[*a] - counts[*a] as f64;
        let rb = exact[*b] - counts[*b] as f64;
        rb.partial_cmp(&ra).unwrap_or(Ordering::Equal)
    });
    for idx in by_remainder.iter().cycle().take(total - assigned) {
        counts[*idx] += 1;
    }
    debug!(
        "allocate_counts: total: {:?} proportions: {:?} counts: {:?}",
        total, proportions, counts
    );
    counts
}

/// Allocates `total` like `allocate_counts`, without giving any level more than its capacity.
///
/// The units that do not fit in a level are allocated again to the levels that still
/// have room, following their proportions. Levels with a zero proportion never receive
/// any unit.
fn allocate_capped(total: usize, proportions: &[f64], capacities: &[usize]) -> Vec<usize> {
    let mut counts = allocate_counts(total, proportions);
    loop {
        let mut excess: usize = 0;
        for (c, cap) in counts.iter_mut().zip(capacities.iter()) {
            if *c > *cap {
                excess += *c - *cap;
                *c = *cap;
            }
        }
        if excess == 0 {
            break;
        }
        let open: Vec<usize> = (0..counts.len())
            .filter(|idx| counts[*idx] < capacities[*idx] && proportions[*idx] > 0.0)
            .collect();
        debug!(
            "allocate_capped: excess: {:?} open levels: {:?}",
            excess, open
        );
        if open.is_empty() {
            break;
        }
        let open_proportions: Vec<f64> = open.iter().map(|idx| proportions[*idx]).collect();
        let extra = allocate_counts(excess, &open_proportions);
        for (idx, e) in open.iter().zip(extra) {
            counts[*idx] += e;
        }
    }
    counts
}

impl<'a, R: Rng + ?Sized> Selector<'a, R> {
    fn select_stratum(
        &mut self,
        candidates: &[VideoIdx],
        strata: &[StratificationRule],
        target: usize,
        path: &StratumPath,
    ) -> StratumSelection {
        let (rule, rest) = match strata.split_first() {
            Some(x) => x,
            None => {
                // Leaf: all the videos here are equivalent.
                let chosen = self.sample_uniform(candidates, target);
                debug!(
                    "select_stratum: leaf {:?}: {:?} out of {:?} for target {:?}",
                    path,
                    chosen.len(),
                    candidates.len(),
                    target
                );
                return StratumSelection {
                    leaves: vec![StratumCount {
                        stratum: path.clone(),
                        requested: target,
                        available: candidates.len(),
                        selected: chosen.len(),
                        overflow: false,
                    }],
                    videos: chosen.into_iter().map(|idx| (idx, path.clone())).collect(),
                };
            }
        };

        let partition = self.partition(candidates, rule);
        let counts = match self.rules.shortfall_policy {
            ShortfallPolicy::Proportional => allocate_counts(target, &rule.proportions),
            ShortfallPolicy::Redistribute => {
                let capacities: Vec<usize> = partition
                    .groups
                    .iter()
                    .map(|g| self.capacity(g, rest))
                    .collect();
                allocate_capped(target, &rule.proportions, &capacities)
            }
        };
        debug!(
            "select_stratum: {:?} split on {:?}: group sizes: {:?} unmatched: {:?} counts: {:?}",
            path,
            rule.variable,
            partition.groups.iter().map(|g| g.len()).collect::<Vec<_>>(),
            partition.unmatched.len(),
            counts
        );

        let mut res = StratumSelection::default();
        for ((level, group), count) in rule.levels.iter().zip(partition.groups.iter()).zip(counts) {
            let mut child_path = path.clone();
            child_path.push((rule.variable.clone(), level.clone()));
            let child = self.select_stratum(group, rest, count, &child_path);
            res.append(child);
        }

        let missing = target.saturating_sub(res.videos.len());
        if self.rules.unmatched_policy == UnmatchedPolicy::AppendOverflow
            && missing > 0
            && !partition.unmatched.is_empty()
        {
            let chosen = self.sample_uniform(&partition.unmatched, missing);
            debug!(
                "select_stratum: {:?} filling {:?} missing videos with {:?} unmatched videos",
                path,
                missing,
                chosen.len()
            );
            let mut leaf_path = path.clone();
            leaf_path.push((rule.variable.clone(), UNMATCHED_LEVEL.to_string()));
            res.leaves.push(StratumCount {
                stratum: leaf_path,
                requested: missing,
                available: partition.unmatched.len(),
                selected: chosen.len(),
                overflow: true,
            });
            for idx in chosen {
                let mut video_path = path.clone();
                video_path.push((rule.variable.clone(), self.value_of(idx, rule).to_string()));
                res.videos.push((idx, video_path));
            }
        }
        res
    }

    /// The maximum number of videos that a stratum can provide under the current policies.
    fn capacity(&self, candidates: &[VideoIdx], strata: &[StratificationRule]) -> usize {
        match strata.split_first() {
            None => candidates.len(),
            Some((rule, rest)) => {
                let partition = self.partition(candidates, rule);
                let matched: usize = partition
                    .groups
                    .iter()
                    .zip(rule.proportions.iter())
                    .filter(|(_, p)| **p > 0.0)
                    .map(|(g, _)| self.capacity(g, rest))
                    .sum();
                match self.rules.unmatched_policy {
                    UnmatchedPolicy::Exclude => matched,
                    UnmatchedPolicy::AppendOverflow => matched + partition.unmatched.len(),
                }
            }
        }
    }

    fn partition(&self, candidates: &[VideoIdx], rule: &StratificationRule) -> Partition {
        let level_index: HashMap<&str, usize> = rule
            .levels
            .iter()
            .enumerate()
            .map(|(idx, l)| (l.as_str(), idx))
            .collect();
        let mut groups: Vec<Vec<VideoIdx>> = vec![Vec::new(); rule.levels.len()];
        let mut unmatched: Vec<VideoIdx> = Vec::new();
        for idx in candidates.iter() {
            match level_index.get(self.value_of(*idx, rule)) {
                Some(level) => groups[*level].push(*idx),
                None => unmatched.push(*idx),
            }
        }
        Partition { groups, unmatched }
    }

    // The variable is checked to be present before the selection starts.
    fn value_of(&self, idx: VideoIdx, rule: &StratificationRule) -> &'a str {
        let pool: &'a [VideoRecord] = self.pool;
        pool[idx.0]
            .metadata
            .get(&rule.variable)
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// Picks `count` videos uniformly without replacement, returned in pool order.
    fn sample_uniform(&mut self, candidates: &[VideoIdx], count: usize) -> Vec<VideoIdx> {
        let amount = count.min(candidates.len());
        let mut picked: Vec<usize> =
            index::sample(&mut *self.rng, candidates.len(), amount).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| candidates[i]).collect()
    }
}
