use crate::survey::forms::FieldConfig;
use crate::survey::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSource {
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "idColumn")]
    pub id_column: Option<String>,
    #[serde(rename = "worksheetName")]
    pub worksheet_name: Option<String>,
}

impl MetadataSource {
    pub fn id_column(&self) -> String {
        self.id_column
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "video".to_string())
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub variable: String,
    pub levels: Vec<String>,
    pub proportions: Vec<f64>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSettings {
    #[serde(rename = "targetCount")]
    pub target_count: usize,
    #[serde(rename = "randomSeed")]
    pub random_seed: Option<JSValue>,
    #[serde(rename = "unmatchedPolicy")]
    pub unmatched_policy: Option<String>,
    #[serde(rename = "shortfallPolicy")]
    pub shortfall_policy: Option<String>,
    #[serde(rename = "stableOrder")]
    pub stable_order: Option<bool>,
    #[serde(rename = "proportionTolerance")]
    pub proportion_tolerance: Option<f64>,
}

impl SelectionSettings {
    /// The seed is optional. It may be written as a number or as a string.
    pub fn random_seed(&self) -> SurveyResult<Option<u64>> {
        match &self.random_seed {
            None | Some(JSValue::Null) => Ok(None),
            Some(JSValue::Number(n)) => n.as_u64().map(Some).context(ParsingSeedSnafu {
                content: n.to_string(),
            }),
            Some(JSValue::String(s)) => s
                .trim()
                .parse::<u64>()
                .ok()
                .map(Some)
                .context(ParsingSeedSnafu { content: s.clone() }),
            Some(x) => ParsingSeedSnafu {
                content: x.to_string(),
            }
            .fail(),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub mode: String,
    pub primary: Option<String>,
    #[serde(rename = "localDirectory")]
    pub local_directory: Option<String>,
    #[serde(rename = "onlineUrl")]
    pub online_url: Option<String>,
    #[serde(rename = "timeoutSeconds")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum StorageMode {
    Local,
    Online,
    Both { online_first: bool },
}

impl StorageSettings {
    pub fn storage_mode(&self) -> SurveyResult<StorageMode> {
        match self.mode.as_str() {
            "local" => Ok(StorageMode::Local),
            "online" => Ok(StorageMode::Online),
            "both" => match self.primary.as_deref() {
                None | Some("online") => Ok(StorageMode::Both { online_first: true }),
                Some("local") => Ok(StorageMode::Both {
                    online_first: false,
                }),
                Some(x) => whatever!("unknown primary storage: {}", x),
            },
            x => whatever!("unknown storage mode: {}", x),
        }
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(10)
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(rename = "studyName")]
    pub study_name: String,
    #[serde(rename = "videoMetadata")]
    pub video_metadata: MetadataSource,
    #[serde(default)]
    pub stratification: Vec<RuleConfig>,
    pub selection: SelectionSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub demographics: Vec<FieldConfig>,
    #[serde(rename = "ratingScales", default)]
    pub rating_scales: Vec<FieldConfig>,
}

impl SurveyConfig {
    pub fn strata(&self) -> Vec<StratificationRule> {
        self.stratification
            .iter()
            .map(|r| StratificationRule {
                variable: r.variable.clone(),
                levels: r.levels.clone(),
                proportions: r.proportions.clone(),
            })
            .collect()
    }
}

pub fn read_config(path: &str) -> SurveyResult<SurveyConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: SurveyConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_config: {:?}", config);
    Ok(config)
}

pub fn validate_rules(settings: &SelectionSettings) -> SurveyResult<SelectionRules> {
    let res = SelectionRules {
        unmatched_policy: match settings.unmatched_policy.as_deref() {
            None | Some("exclude") => UnmatchedPolicy::Exclude,
            Some("appendOverflow") => UnmatchedPolicy::AppendOverflow,
            Some(x) => {
                whatever!("Cannot use unmatched policy {:?}", x)
            }
        },
        shortfall_policy: match settings.shortfall_policy.as_deref() {
            None | Some("proportional") => ShortfallPolicy::Proportional,
            Some("redistribute") => ShortfallPolicy::Redistribute,
            Some(x) => {
                whatever!("Cannot use shortfall policy {:?}", x)
            }
        },
        order: match settings.stable_order {
            Some(true) => OrderMode::Stable,
            _ => OrderMode::Shuffled,
        },
        proportion_tolerance: match settings.proportion_tolerance {
            None => SelectionRules::DEFAULT_RULES.proportion_tolerance,
            Some(x) if x.is_finite() && x >= 0.0 => x,
            Some(x) => {
                whatever!("Failed to understand proportionTolerance option: {:?}", x)
            }
        },
    };
    if settings.target_count == 0 {
        whatever!("targetCount must be positive");
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::forms::FieldKind;

    const CONFIG: &str = r#"{
        "studyName": "gesture-rating",
        "videoMetadata": {"provider": "csv", "filePath": "videos.csv"},
        "stratification": [
            {"variable": "category", "levels": ["A", "B"], "proportions": [0.5, 0.5]}
        ],
        "selection": {"targetCount": 6, "randomSeed": "42", "shortfallPolicy": "redistribute"},
        "storage": {"mode": "both", "primary": "local", "localDirectory": "responses"},
        "ratingScales": [
            {"type": "discreteScale", "name": "naturalness", "label": "How natural?",
             "required": true, "min": 1, "max": 7}
        ]
    }"#;

    #[test]
    fn parses_full_config() {
        let config: SurveyConfig = serde_json::from_str(CONFIG).unwrap();
        assert_eq!(config.study_name, "gesture-rating");
        assert_eq!(config.video_metadata.id_column(), "video");
        assert_eq!(config.strata().len(), 1);
        assert_eq!(config.selection.random_seed().unwrap(), Some(42));
        assert_eq!(
            config.storage.storage_mode().unwrap(),
            StorageMode::Both {
                online_first: false
            }
        );
        assert_eq!(config.storage.timeout_seconds(), 10);
        assert!(config.demographics.is_empty());
        assert_eq!(config.rating_scales.len(), 1);
        assert!(matches!(
            config.rating_scales[0].kind,
            FieldKind::DiscreteScale { min: 1, max: 7, .. }
        ));

        let rules = validate_rules(&config.selection).unwrap();
        assert_eq!(rules.shortfall_policy, ShortfallPolicy::Redistribute);
        assert_eq!(rules.unmatched_policy, UnmatchedPolicy::Exclude);
        assert_eq!(rules.order, OrderMode::Shuffled);
    }

    #[test]
    fn seeds() {
        let mut settings: SurveyConfig = serde_json::from_str(CONFIG).unwrap();
        settings.selection.random_seed = Some(serde_json::json!(7));
        assert_eq!(settings.selection.random_seed().unwrap(), Some(7));
        settings.selection.random_seed = None;
        assert_eq!(settings.selection.random_seed().unwrap(), None);
        settings.selection.random_seed = Some(serde_json::json!("seven"));
        assert!(settings.selection.random_seed().is_err());
        settings.selection.random_seed = Some(serde_json::json!(-3));
        assert!(settings.selection.random_seed().is_err());
    }

    #[test]
    fn rejects_unknown_options() {
        let config: SurveyConfig = serde_json::from_str(CONFIG).unwrap();
        let mut settings = config.selection.clone();
        settings.unmatched_policy = Some("keep".to_string());
        assert!(validate_rules(&settings).is_err());

        let mut settings = config.selection.clone();
        settings.target_count = 0;
        assert!(validate_rules(&settings).is_err());

        let mut storage = config.storage;
        storage.mode = "cloud".to_string();
        assert!(storage.storage_mode().is_err());
    }
}
