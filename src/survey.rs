use log::{debug, info, warn};

use snafu::{prelude::*, Snafu};
use stratified_selection::*;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::survey::config_reader::*;
use crate::survey::forms::{check_fields, validate_answers};
use crate::survey::storage::{RatingRecord, RatingStore};

pub mod config_reader;
pub mod forms;
mod io_common;
mod io_csv;
mod io_excel;
pub mod storage;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SurveyError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error while writing JSON"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Cannot understand the random seed {content}"))]
    ParsingSeed { content: String },
    #[snafu(display("Error opening the CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error parsing line {lineno} of the CSV file"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("Error opening the Excel file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("No worksheet {name} in {path}"))]
    MissingWorksheet { name: String, path: String },
    #[snafu(display("The table {path} is empty"))]
    EmptyTable { path: String },
    #[snafu(display("Column {column} is missing in {path}"))]
    MissingColumn { column: String, path: String },
    #[snafu(display("Line {lineno}: empty video id"))]
    EmptyVideoId { lineno: usize },
    #[snafu(display("Line {lineno}: video {video_id} is already declared"))]
    DuplicateVideoId { video_id: String, lineno: usize },
    #[snafu(display("Line {lineno}: cannot read the cell {content}"))]
    ExcelWrongCellType { lineno: usize, content: String },
    #[snafu(display("Cannot find the directory of {path}"))]
    MissingParentDir { path: String },
    #[snafu(display("Field {field}: {message}"))]
    InvalidField { field: String, message: String },
    #[snafu(display("Answer to {field}: {message}"))]
    InvalidAnswer { field: String, message: String },
    #[snafu(display("Invalid selection rules"))]
    Selection { source: SelectionErrors },
    #[snafu(display("Error accessing {path}"))]
    StorageIo {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error calling {url}"))]
    Http { source: reqwest::Error, url: String },
    #[snafu(display("No storage backend is available: {failures}"))]
    StorageUnavailable { failures: String },
    #[snafu(display("Error writing the output to {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type SurveyResult<T> = Result<T, SurveyError>;

/// Everything that is read from a configuration file.
pub struct LoadedSurvey {
    pub config: SurveyConfig,
    /// The directory of the configuration file. Relative paths start from here.
    pub root: PathBuf,
    pub rules: SelectionRules,
    pub strata: Vec<StratificationRule>,
    pub videos: Vec<VideoRecord>,
}

/// Reads the configuration, the fields and the metadata, and checks them all.
pub fn load_survey(config_path: &str) -> SurveyResult<LoadedSurvey> {
    let config = read_config(config_path)?;
    info!("Loading study {}", config.study_name);
    check_fields(&config.demographics)?;
    check_fields(&config.rating_scales)?;
    let rules = validate_rules(&config.selection)?;
    let strata = config.strata();

    let root = Path::new(config_path)
        .parent()
        .context(MissingParentDirSnafu { path: config_path })?
        .to_path_buf();
    let videos = read_metadata(&root, &config.video_metadata)?;
    validate_strata(&videos, &strata, &rules).context(SelectionSnafu {})?;
    Ok(LoadedSurvey {
        config,
        root,
        rules,
        strata,
        videos,
    })
}

fn read_metadata(root: &Path, source: &MetadataSource) -> SurveyResult<Vec<VideoRecord>> {
    let p: PathBuf = root.join(&source.file_path);
    let p2 = p.as_path().display().to_string();
    info!("Attempting to read metadata file {:?}", p2);
    match source.provider.as_str() {
        "csv" => io_csv::read_csv_metadata(&p2, source),
        "xlsx" | "excel" => io_excel::read_excel_metadata(&p2, source),
        x => whatever!("Provider not implemented {:?}", x),
    }
}

/// The number of videos for each level of each variable.
pub fn level_counts(videos: &[VideoRecord], strata: &[StratificationRule]) -> Vec<JSValue> {
    strata
        .iter()
        .map(|rule| {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for v in videos.iter() {
                let value = v.metadata.get(&rule.variable).cloned().unwrap_or_default();
                let level = if rule.levels.contains(&value) {
                    value
                } else {
                    UNMATCHED_LEVEL.to_string()
                };
                *counts.entry(level).or_insert(0) += 1;
            }
            json!({"variable": rule.variable, "counts": counts})
        })
        .collect()
}

/// Selects the videos for a participant, leaving out those they already rated.
pub fn select_for_user(
    survey: &LoadedSurvey,
    store: &RatingStore,
    user_id: &str,
    target_count: usize,
    rules: &SelectionRules,
    seed: u64,
) -> SurveyResult<SamplePlan> {
    let excluded = store.rated_video_ids(user_id)?;
    info!("User {} already rated {} videos", user_id, excluded.len());
    let plan = select_videos_seeded(
        &survey.videos,
        &survey.strata,
        target_count,
        &excluded,
        rules,
        seed,
    )
    .context(SelectionSnafu {})?;
    if plan.is_partial() {
        warn!(
            "Only {} videos could be selected out of {} requested",
            plan.videos.len(),
            plan.requested
        );
        for leaf in plan.leaf_counts.iter().filter(|l| l.selected < l.requested) {
            warn!(
                "Stratum {:?}: {} selected out of {} requested",
                leaf.stratum, leaf.selected, leaf.requested
            );
        }
    }
    Ok(plan)
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub study: String,
    pub requested: usize,
    pub selected: usize,
    pub partial: bool,
    pub seed: u64,
}

fn stratum_to_json(stratum: &StratumPath) -> JSValue {
    let mut m: JSMap<String, JSValue> = JSMap::new();
    for (variable, value) in stratum.iter() {
        m.insert(variable.clone(), json!(value));
    }
    JSValue::Object(m)
}

pub fn plan_to_json(study: &str, plan: &SamplePlan, seed: u64) -> JSValue {
    let c = OutputConfig {
        study: study.to_string(),
        requested: plan.requested,
        selected: plan.videos.len(),
        partial: plan.is_partial(),
        seed,
    };
    let videos: Vec<JSValue> = plan
        .videos
        .iter()
        .map(|v| json!({"id": v.id, "stratum": stratum_to_json(&v.stratum)}))
        .collect();
    let strata: Vec<JSValue> = plan
        .leaf_counts
        .iter()
        .map(|l| {
            json!({
                "stratum": stratum_to_json(&l.stratum),
                "requested": l.requested,
                "available": l.available,
                "selected": l.selected,
                "overflow": l.overflow
            })
        })
        .collect();
    json!({"config": c, "videos": videos, "strata": strata})
}

fn read_reference(path: &str) -> SurveyResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_reference: {:?}", js);
    Ok(js)
}

fn write_output(out: &Option<String>, content: &str) -> SurveyResult<()> {
    match out.as_deref() {
        None | Some("stdout") => {
            println!("{}", content);
        }
        Some(path) => {
            fs::write(path, content).context(WritingOutputSnafu { path })?;
            info!("Plan written to {}", path);
        }
    }
    Ok(())
}

fn clock_seed() -> u64 {
    chrono::Utc::now().timestamp_millis().unsigned_abs()
}

pub fn run_check(config_path: &str) -> SurveyResult<()> {
    let survey = load_survey(config_path)?;
    let summary = json!({
        "study": survey.config.study_name,
        "videos": survey.videos.len(),
        "levels": level_counts(&survey.videos, &survey.strata),
    });
    let pretty = serde_json::to_string_pretty(&summary).context(SerializingJsonSnafu {})?;
    println!("{}", pretty);
    Ok(())
}

/// The command line options of a selection.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SelectRequest {
    pub config_path: String,
    pub user_id: String,
    /// Overrides the target count of the configuration.
    pub count: Option<usize>,
    /// Overrides the seed of the configuration.
    pub seed: Option<u64>,
    pub stable: bool,
    pub out: Option<String>,
    pub reference: Option<String>,
}

pub fn run_select(req: &SelectRequest) -> SurveyResult<JSValue> {
    let user_id = req.user_id.trim();
    ensure_whatever!(!user_id.is_empty(), "The user id is empty");
    let survey = load_survey(&req.config_path)?;
    let store = RatingStore::from_config(&survey.config.storage, &survey.root)?;

    let target_count = req.count.unwrap_or(survey.config.selection.target_count);
    let seed = match req.seed {
        Some(s) => s,
        None => match survey.config.selection.random_seed()? {
            Some(s) => s,
            None => {
                let s = clock_seed();
                info!("No random seed given, using {}", s);
                s
            }
        },
    };
    let mut rules = survey.rules.clone();
    if req.stable {
        rules.order = OrderMode::Stable;
    }

    let plan = select_for_user(&survey, &store, user_id, target_count, &rules, seed)?;
    let plan_js = plan_to_json(&survey.config.study_name, &plan, seed);
    let pretty_js = serde_json::to_string_pretty(&plan_js).context(SerializingJsonSnafu {})?;
    write_output(&req.out, &pretty_js)?;

    // The reference plan, if provided for comparison
    if let Some(reference_p) = &req.reference {
        let reference = read_reference(reference_p)?;
        let pretty_js_reference =
            serde_json::to_string_pretty(&reference).context(SerializingJsonSnafu {})?;
        if pretty_js_reference != pretty_js {
            warn!("Found differences with the reference plan");
            print_diff(pretty_js_reference.as_str(), pretty_js.as_ref(), "\n");
            whatever!("Difference detected between the computed plan and the reference plan")
        }
    }
    Ok(plan_js)
}

fn parse_scale_args(scales: &[String]) -> SurveyResult<BTreeMap<String, String>> {
    let mut res: BTreeMap<String, String> = BTreeMap::new();
    for s in scales.iter() {
        let (name, value) = match s.split_once('=') {
            Some((n, v)) if !n.trim().is_empty() => (n.trim(), v.trim()),
            _ => whatever!("Expected name=value, got {:?}", s),
        };
        if res.insert(name.to_string(), value.to_string()).is_some() {
            whatever!("Scale {} given twice", name);
        }
    }
    Ok(res)
}

pub fn run_rate(
    config_path: &str,
    user_id: &str,
    video_id: &str,
    scales: &[String],
    not_recognized: bool,
) -> SurveyResult<RatingRecord> {
    let user_id = user_id.trim();
    ensure_whatever!(!user_id.is_empty(), "The user id is empty");
    let survey = load_survey(config_path)?;
    ensure_whatever!(
        survey.videos.iter().any(|v| v.id == video_id),
        "Unknown video {}",
        video_id
    );

    // A video whose action was not recognized may be left without ratings.
    let fields: Vec<forms::FieldConfig> = survey
        .config
        .rating_scales
        .iter()
        .cloned()
        .map(|mut f| {
            f.required = f.required && !not_recognized;
            f
        })
        .collect();
    let answers = parse_scale_args(scales)?;
    let scale_values = validate_answers(&fields, &answers)?;

    let record = RatingRecord {
        user_id: user_id.to_string(),
        video_id: video_id.to_string(),
        scale_values,
        action_not_recognized: not_recognized,
        timestamp: chrono::Utc::now(),
    };
    let store = RatingStore::from_config(&survey.config.storage, &survey.root)?;
    store.save_rating(&record)?;
    Ok(record)
}

pub fn run_rated(config_path: &str, user_id: &str) -> SurveyResult<Vec<String>> {
    let user_id = user_id.trim();
    ensure_whatever!(!user_id.is_empty(), "The user id is empty");
    let survey = load_survey(config_path)?;
    let store = RatingStore::from_config(&survey.config.storage, &survey.root)?;
    let mut ids: Vec<String> = store.rated_video_ids(user_id)?.into_iter().collect();
    ids.sort();
    for id in ids.iter() {
        println!("{}", id);
    }
    Ok(ids)
}
