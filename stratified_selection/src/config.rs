// ********* Input data structures ***********

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;

/// A video that may be shown to a participant, with its categorical metadata.
///
/// The metadata maps the name of a stratification variable (for example `category`)
/// to the value of this variable for the video (for example `A`).
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VideoRecord {
    pub id: String,
    pub metadata: BTreeMap<String, String>,
}

impl VideoRecord {
    pub fn new(id: &str, metadata: &[(&str, &str)]) -> VideoRecord {
        VideoRecord {
            id: id.to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// One level of the stratification hierarchy.
///
/// `levels` and `proportions` are parallel lists: the n-th level should make up
/// the n-th proportion of the videos selected from the parent stratum.
#[derive(PartialEq, Debug, Clone)]
pub struct StratificationRule {
    pub variable: String,
    pub levels: Vec<String>,
    pub proportions: Vec<f64>,
}

impl StratificationRule {
    pub fn new(variable: &str, levels: &[&str], proportions: &[f64]) -> StratificationRule {
        StratificationRule {
            variable: variable.to_string(),
            levels: levels.iter().map(|s| s.to_string()).collect(),
            proportions: proportions.to_vec(),
        }
    }
}

// ******** Output data structures *********

/// One (variable, value) step from the root of the stratification tree.
pub type StratumPath = Vec<(String, String)>;

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SampledVideo {
    pub id: String,
    /// The stratum that produced this video.
    pub stratum: StratumPath,
}

/// Statistics for one leaf of the stratification tree.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct StratumCount {
    pub stratum: StratumPath,
    /// The number of videos allocated to this stratum.
    pub requested: usize,
    /// The number of candidate videos in this stratum, after exclusions.
    pub available: usize,
    pub selected: usize,
    /// Set when the videos come from the unmatched group of the parent.
    pub overflow: bool,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SamplePlan {
    pub videos: Vec<SampledVideo>,
    pub leaf_counts: Vec<StratumCount>,
    pub requested: usize,
}

impl SamplePlan {
    /// True when fewer videos were selected than requested.
    /// This is not an error: the caller decides whether to proceed.
    pub fn is_partial(&self) -> bool {
        self.videos.len() < self.requested
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn video_ids(&self) -> Vec<String> {
        self.videos.iter().map(|v| v.id.clone()).collect()
    }
}

/// Errors that prevent the selection from running.
///
/// They are all configuration errors: they are detected before any sampling
/// takes place and retrying will not help.
#[derive(PartialEq, Debug, Clone)]
pub enum SelectionErrors {
    ZeroTarget,
    EmptyLevels {
        variable: String,
    },
    LevelMismatch {
        variable: String,
        levels: usize,
        proportions: usize,
    },
    DuplicateLevel {
        variable: String,
        level: String,
    },
    InvalidProportion {
        variable: String,
        proportion: f64,
    },
    ProportionSum {
        variable: String,
        sum: f64,
    },
    UnknownVariable {
        variable: String,
        video_id: String,
    },
    DuplicateVideo {
        video_id: String,
    },
}

impl Error for SelectionErrors {}

impl Display for SelectionErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionErrors::ZeroTarget => write!(f, "the target count must be positive"),
            SelectionErrors::EmptyLevels { variable } => {
                write!(f, "rule {}: no level declared", variable)
            }
            SelectionErrors::LevelMismatch {
                variable,
                levels,
                proportions,
            } => write!(
                f,
                "rule {}: {} levels but {} proportions",
                variable, levels, proportions
            ),
            SelectionErrors::DuplicateLevel { variable, level } => {
                write!(f, "rule {}: level {} declared twice", variable, level)
            }
            SelectionErrors::InvalidProportion {
                variable,
                proportion,
            } => write!(f, "rule {}: invalid proportion {}", variable, proportion),
            SelectionErrors::ProportionSum { variable, sum } => write!(
                f,
                "rule {}: proportions sum to {} instead of 1.0",
                variable, sum
            ),
            SelectionErrors::UnknownVariable { variable, video_id } => write!(
                f,
                "video {} has no value for the stratification variable {}",
                video_id, variable
            ),
            SelectionErrors::DuplicateVideo { video_id } => {
                write!(f, "video {} is declared twice", video_id)
            }
        }
    }
}

// ********* Configuration **********

/// What happens with the videos whose value is not one of the declared levels.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum UnmatchedPolicy {
    /// They are never selected.
    Exclude,
    /// They fill the gap when a stratum could not reach its allocated count.
    AppendOverflow,
}

/// What happens when a stratum has fewer videos than allocated to it.
///
/// - Proportional keeps the allocation computed from the proportions. A short stratum
/// simply reduces the total number of selected videos.
///
/// - Redistribute caps each stratum to what it can provide and moves the excess to the
/// sibling strata that still have videos, following their proportions.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ShortfallPolicy {
    Proportional,
    Redistribute,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum OrderMode {
    Shuffled,
    /// Videos come out in stratum order, and in pool order within a stratum.
    Stable,
}

#[derive(PartialEq, Debug, Clone)]
pub struct SelectionRules {
    pub unmatched_policy: UnmatchedPolicy,
    pub shortfall_policy: ShortfallPolicy,
    pub order: OrderMode,
    /// Accepted distance between the sum of the proportions of a rule and 1.0
    pub proportion_tolerance: f64,
}

impl SelectionRules {
    pub const DEFAULT_RULES: SelectionRules = SelectionRules {
        unmatched_policy: UnmatchedPolicy::Exclude,
        shortfall_policy: ShortfallPolicy::Proportional,
        order: OrderMode::Shuffled,
        proportion_tolerance: 0.001,
    };
}
