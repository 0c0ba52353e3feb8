// Storage of the ratings.
//
// The ratings go through an ordered list of backends. A write succeeds when at least one
// backend accepts it; a read returns the answer of the first backend that succeeds.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

use crate::survey::config_reader::{StorageMode, StorageSettings};
use crate::survey::forms::AnswerValue;
use crate::survey::*;

/// One rating of one video by one participant.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RatingRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "scaleValues")]
    pub scale_values: BTreeMap<String, AnswerValue>,
    /// The participant could not tell what the video shows.
    #[serde(rename = "actionNotRecognized")]
    pub action_not_recognized: bool,
    pub timestamp: DateTime<Utc>,
}

/// The outcome of one operation on one backend.
#[derive(PartialEq, Debug, Clone)]
pub enum BackendOutcome<T> {
    Success(T),
    Failure(String),
    /// The backend is not configured for this operation.
    Skipped(String),
}

impl<T> BackendOutcome<T> {
    pub fn from_result(res: SurveyResult<T>) -> BackendOutcome<T> {
        match res {
            Ok(x) => BackendOutcome::Success(x),
            Err(e) => BackendOutcome::Failure(e.to_string()),
        }
    }
}

pub trait RatingBackend {
    fn name(&self) -> &str;

    fn save_rating(&self, record: &RatingRecord) -> BackendOutcome<()>;

    fn rated_video_ids(&self, user_id: &str) -> BackendOutcome<HashSet<String>>;
}

/// Combines the outcomes of a write on all the backends.
///
/// Returns the number of backends that stored the record. It is an error if none did.
pub fn aggregate_writes(outcomes: &[(String, BackendOutcome<()>)]) -> SurveyResult<usize> {
    let mut failures: Vec<String> = Vec::new();
    let mut successes: usize = 0;
    for (name, outcome) in outcomes.iter() {
        match outcome {
            BackendOutcome::Success(()) => successes += 1,
            BackendOutcome::Failure(msg) => {
                warn!("Backend {} failed to store the rating: {}", name, msg);
                failures.push(format!("{}: {}", name, msg));
            }
            BackendOutcome::Skipped(msg) => {
                debug!("aggregate_writes: backend {} skipped: {}", name, msg);
                failures.push(format!("{}: skipped ({})", name, msg));
            }
        }
    }
    if successes == 0 {
        if failures.is_empty() {
            failures.push("no storage backend configured".to_string());
        }
        return StorageUnavailableSnafu {
            failures: failures.join("; "),
        }
        .fail();
    }
    Ok(successes)
}

/// Returns the value of the first successful outcome.
///
/// The outcomes are consumed lazily: the backends after the first success are not queried.
pub fn first_success<T, I>(outcomes: I) -> SurveyResult<T>
where
    I: IntoIterator<Item = (String, BackendOutcome<T>)>,
{
    let mut failures: Vec<String> = Vec::new();
    for (name, outcome) in outcomes {
        match outcome {
            BackendOutcome::Success(x) => {
                debug!("first_success: answer from backend {}", name);
                return Ok(x);
            }
            BackendOutcome::Failure(msg) => {
                warn!("Backend {} failed, trying the next one: {}", name, msg);
                failures.push(format!("{}: {}", name, msg));
            }
            BackendOutcome::Skipped(msg) => {
                debug!("first_success: backend {} skipped: {}", name, msg);
                failures.push(format!("{}: skipped ({})", name, msg));
            }
        }
    }
    if failures.is_empty() {
        failures.push("no storage backend configured".to_string());
    }
    StorageUnavailableSnafu {
        failures: failures.join("; "),
    }
    .fail()
}

/// The file name used for the ratings of a participant.
///
/// Characters other than ASCII alphanumerics, `-` and `_` are percent-encoded, so two
/// different ids never share a file.
pub fn sanitize_user_id(user_id: &str) -> String {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return "%".to_string();
    }
    let mut s = String::with_capacity(trimmed.len());
    for b in trimmed.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            s.push(b as char);
        } else {
            s.push_str(&format!("%{:02X}", b));
        }
    }
    s
}

/// Stores the ratings of each participant in a JSON-lines file, one record per line.
pub struct LocalJsonBackend {
    directory: PathBuf,
}

impl LocalJsonBackend {
    pub fn new(directory: &Path) -> LocalJsonBackend {
        LocalJsonBackend {
            directory: directory.to_path_buf(),
        }
    }

    fn user_file(&self, user_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}.jsonl", sanitize_user_id(user_id)))
    }

    fn append(&self, record: &RatingRecord) -> SurveyResult<()> {
        let dir = self.directory.display().to_string();
        fs::create_dir_all(&self.directory).context(StorageIoSnafu { path: dir })?;
        let p = self.user_file(&record.user_id);
        let path = p.display().to_string();
        let line = serde_json::to_string(record).context(SerializingJsonSnafu {})?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&p)
            .context(StorageIoSnafu { path: path.clone() })?;
        writeln!(f, "{}", line).context(StorageIoSnafu { path: path.clone() })?;
        debug!("append: {}: {}", path, line);
        Ok(())
    }

    fn read_ids(&self, user_id: &str) -> SurveyResult<HashSet<String>> {
        let p = self.user_file(user_id);
        let path = p.display().to_string();
        if !p.exists() {
            debug!("read_ids: no file {}, no rating yet", path);
            return Ok(HashSet::new());
        }
        let user_id = user_id.trim();
        let f = fs::File::open(&p).context(StorageIoSnafu { path: path.clone() })?;
        let mut res: HashSet<String> = HashSet::new();
        for line_r in BufReader::new(f).lines() {
            let line = line_r.context(StorageIoSnafu { path: path.clone() })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: RatingRecord =
                serde_json::from_str(&line).context(ParsingJsonSnafu { path: path.clone() })?;
            if record.user_id.trim() != user_id {
                debug!("read_ids: {}: skipping a record of {:?}", path, record.user_id);
                continue;
            }
            res.insert(record.video_id);
        }
        Ok(res)
    }
}

impl RatingBackend for LocalJsonBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn save_rating(&self, record: &RatingRecord) -> BackendOutcome<()> {
        BackendOutcome::from_result(self.append(record))
    }

    fn rated_video_ids(&self, user_id: &str) -> BackendOutcome<HashSet<String>> {
        BackendOutcome::from_result(self.read_ids(user_id))
    }
}

/// Stores the ratings through an HTTP endpoint (typically a spreadsheet web app).
///
/// A rating is POSTed as JSON. The ratings of a participant are read with
/// `GET <url>?userId=<id>`, which returns a JSON array of rows with a `videoId` field.
pub struct OnlineBackend {
    url: Option<String>,
    client: reqwest::blocking::Client,
}

impl OnlineBackend {
    pub fn new(url: Option<String>, timeout_seconds: u64) -> SurveyResult<OnlineBackend> {
        let url = url.filter(|u| !u.trim().is_empty());
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context(HttpSnafu {
                url: url.clone().unwrap_or_default(),
            })?;
        Ok(OnlineBackend { url, client })
    }

    fn post(&self, url: &str, record: &RatingRecord) -> SurveyResult<()> {
        self.client
            .post(url)
            .json(record)
            .send()
            .and_then(|r| r.error_for_status())
            .context(HttpSnafu { url })?;
        debug!("post: {}: stored {:?}", url, record);
        Ok(())
    }

    fn fetch(&self, url: &str, user_id: &str) -> SurveyResult<HashSet<String>> {
        let rows: Vec<JSValue> = self
            .client
            .get(url)
            .query(&[("userId", user_id.trim())])
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .context(HttpSnafu { url })?;
        debug!("fetch: {}: {} rows", url, rows.len());
        Ok(video_ids_from_rows(&rows, user_id))
    }
}

// Rows of other participants, if the endpoint returns them, are ignored.
fn video_ids_from_rows(rows: &[JSValue], user_id: &str) -> HashSet<String> {
    rows.iter()
        .filter(|row| match row.get("userId") {
            Some(JSValue::String(u)) => u.trim() == user_id.trim(),
            _ => true,
        })
        .filter_map(|row| match row.get("videoId") {
            Some(JSValue::String(s)) => Some(s.clone()),
            Some(JSValue::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

impl RatingBackend for OnlineBackend {
    fn name(&self) -> &str {
        "online"
    }

    fn save_rating(&self, record: &RatingRecord) -> BackendOutcome<()> {
        match &self.url {
            Some(url) => BackendOutcome::from_result(self.post(url, record)),
            None => BackendOutcome::Skipped("no onlineUrl configured".to_string()),
        }
    }

    fn rated_video_ids(&self, user_id: &str) -> BackendOutcome<HashSet<String>> {
        match &self.url {
            Some(url) => BackendOutcome::from_result(self.fetch(url, user_id)),
            None => BackendOutcome::Skipped("no onlineUrl configured".to_string()),
        }
    }
}

/// The entry point for storing and reading the ratings.
pub struct RatingStore {
    backends: Vec<Box<dyn RatingBackend>>,
}

impl RatingStore {
    pub fn new(backends: Vec<Box<dyn RatingBackend>>) -> RatingStore {
        RatingStore { backends }
    }

    /// Builds the backends declared in the configuration. Relative directories are
    /// resolved against `root`.
    pub fn from_config(settings: &StorageSettings, root: &Path) -> SurveyResult<RatingStore> {
        let local_dir = root.join(
            settings
                .local_directory
                .clone()
                .unwrap_or_else(|| "responses".to_string()),
        );
        let local = || -> Box<dyn RatingBackend> { Box::new(LocalJsonBackend::new(&local_dir)) };
        let online = || -> SurveyResult<Box<dyn RatingBackend>> {
            Ok(Box::new(OnlineBackend::new(
                settings.online_url.clone(),
                settings.timeout_seconds(),
            )?))
        };
        let backends = match settings.storage_mode()? {
            StorageMode::Local => vec![local()],
            StorageMode::Online => vec![online()?],
            StorageMode::Both { online_first: true } => vec![online()?, local()],
            StorageMode::Both {
                online_first: false,
            } => vec![local(), online()?],
        };
        info!(
            "Storage backends: {:?}",
            backends.iter().map(|b| b.name()).collect::<Vec<&str>>()
        );
        Ok(RatingStore::new(backends))
    }

    pub fn save_rating(&self, record: &RatingRecord) -> SurveyResult<()> {
        let outcomes: Vec<(String, BackendOutcome<()>)> = self
            .backends
            .iter()
            .map(|b| (b.name().to_string(), b.save_rating(record)))
            .collect();
        let stored = aggregate_writes(&outcomes)?;
        info!(
            "Stored the rating of {} by {} in {} backend(s)",
            record.video_id, record.user_id, stored
        );
        Ok(())
    }

    pub fn rated_video_ids(&self, user_id: &str) -> SurveyResult<HashSet<String>> {
        first_success(
            self.backends
                .iter()
                .map(|b| (b.name().to_string(), b.rated_video_ids(user_id))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeBackend {
        name: String,
        write: BackendOutcome<()>,
        read: BackendOutcome<HashSet<String>>,
        calls: Rc<Cell<usize>>,
    }

    impl FakeBackend {
        fn boxed(
            name: &str,
            write: BackendOutcome<()>,
            read: BackendOutcome<HashSet<String>>,
            calls: &Rc<Cell<usize>>,
        ) -> Box<dyn RatingBackend> {
            Box::new(FakeBackend {
                name: name.to_string(),
                write,
                read,
                calls: calls.clone(),
            })
        }
    }

    impl RatingBackend for FakeBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn save_rating(&self, _record: &RatingRecord) -> BackendOutcome<()> {
            self.calls.set(self.calls.get() + 1);
            self.write.clone()
        }

        fn rated_video_ids(&self, _user_id: &str) -> BackendOutcome<HashSet<String>> {
            self.calls.set(self.calls.get() + 1);
            self.read.clone()
        }
    }

    fn ids(xs: &[&str]) -> HashSet<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn record(user_id: &str, video_id: &str) -> RatingRecord {
        let mut scale_values = BTreeMap::new();
        scale_values.insert("naturalness".to_string(), AnswerValue::Number(5.0));
        RatingRecord {
            user_id: user_id.to_string(),
            video_id: video_id.to_string(),
            scale_values,
            action_not_recognized: false,
            timestamp: Utc::now(),
        }
    }

    fn failed(msg: &str) -> BackendOutcome<()> {
        BackendOutcome::Failure(msg.to_string())
    }

    #[test]
    fn write_policy() {
        let ok = ("a".to_string(), BackendOutcome::Success(()));
        let ko = ("b".to_string(), failed("timeout"));
        let skip = ("c".to_string(), BackendOutcome::Skipped("no url".to_string()));
        assert_eq!(aggregate_writes(&[ok.clone(), ko.clone()]).unwrap(), 1);
        assert_eq!(aggregate_writes(&[ko.clone(), ok.clone()]).unwrap(), 1);
        match aggregate_writes(&[ko, skip]) {
            Err(SurveyError::StorageUnavailable { failures }) => {
                assert!(failures.contains("timeout"));
                assert!(failures.contains("no url"));
            }
            x => panic!("unexpected {:?}", x),
        }
        assert!(aggregate_writes(&[]).is_err());
    }

    #[test]
    fn read_policy_stops_at_first_success() {
        let calls = Rc::new(Cell::new(0));
        let store = RatingStore::new(vec![
            FakeBackend::boxed(
                "down",
                failed("down"),
                BackendOutcome::Failure("down".to_string()),
                &calls,
            ),
            FakeBackend::boxed(
                "up",
                BackendOutcome::Success(()),
                BackendOutcome::Success(ids(&["v1"])),
                &calls,
            ),
            FakeBackend::boxed(
                "never",
                BackendOutcome::Success(()),
                BackendOutcome::Success(ids(&["v2"])),
                &calls,
            ),
        ]);
        assert_eq!(store.rated_video_ids("u").unwrap(), ids(&["v1"]));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn writes_go_to_every_backend() {
        let calls = Rc::new(Cell::new(0));
        let store = RatingStore::new(vec![
            FakeBackend::boxed(
                "primary",
                failed("unreachable"),
                BackendOutcome::Success(ids(&[])),
                &calls,
            ),
            FakeBackend::boxed(
                "secondary",
                BackendOutcome::Success(()),
                BackendOutcome::Success(ids(&[])),
                &calls,
            ),
        ]);
        store.save_rating(&record("u", "v1")).unwrap();
        assert_eq!(calls.get(), 2);

        let broken = RatingStore::new(vec![FakeBackend::boxed(
            "primary",
            failed("unreachable"),
            BackendOutcome::Failure("unreachable".to_string()),
            &calls,
        )]);
        assert!(broken.save_rating(&record("u", "v1")).is_err());
        assert!(broken.rated_video_ids("u").is_err());
        assert!(RatingStore::new(vec![]).rated_video_ids("u").is_err());
    }

    #[test]
    fn local_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalJsonBackend::new(&dir.path().join("responses"));
        assert_eq!(
            backend.rated_video_ids("user 1"),
            BackendOutcome::Success(ids(&[]))
        );
        assert_eq!(
            backend.save_rating(&record("user 1", "v1")),
            BackendOutcome::Success(())
        );
        assert_eq!(
            backend.save_rating(&record("user 1", "v2")),
            BackendOutcome::Success(())
        );
        assert_eq!(
            backend.save_rating(&record("user 2", "v3")),
            BackendOutcome::Success(())
        );
        assert_eq!(
            backend.rated_video_ids("user 1"),
            BackendOutcome::Success(ids(&["v1", "v2"]))
        );
        assert!(dir.path().join("responses").join("user_1.jsonl").exists());
    }

    #[test]
    fn online_without_url_is_skipped() {
        let backend = OnlineBackend::new(None, 1).unwrap();
        assert!(matches!(
            backend.save_rating(&record("u", "v")),
            BackendOutcome::Skipped(_)
        ));

        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings {
            mode: "both".to_string(),
            primary: None,
            local_directory: Some("out".to_string()),
            online_url: None,
            timeout_seconds: None,
        };
        let store = RatingStore::from_config(&settings, dir.path()).unwrap();
        store.save_rating(&record("u", "v")).unwrap();
        assert_eq!(store.rated_video_ids("u").unwrap(), ids(&["v"]));
    }

    #[test]
    fn rows_from_the_endpoint() {
        let rows: Vec<JSValue> = serde_json::from_str(
            r#"[{"userId": "u", "videoId": "a"}, {"userId": "w", "videoId": "b"},
                {"videoId": 12}, {"comment": "no id"}]"#,
        )
        .unwrap();
        assert_eq!(video_ids_from_rows(&rows, "u"), ids(&["a", "12"]));
        assert_eq!(video_ids_from_rows(&rows, " u "), ids(&["a", "12"]));
    }

    #[test]
    fn user_file_names() {
        assert_eq!(sanitize_user_id("abc-12_x"), "abc-12_x");
        assert_eq!(sanitize_user_id("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(sanitize_user_id(" user 1 "), "user%201");
        assert_eq!(sanitize_user_id("  "), "%");
        assert_ne!(sanitize_user_id("user 1"), sanitize_user_id("user_1"));
        assert_ne!(sanitize_user_id("user/1"), sanitize_user_id("user_1"));
        assert_ne!(sanitize_user_id("a%20"), sanitize_user_id("a "));
    }

    #[test]
    fn participants_do_not_share_ratings() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalJsonBackend::new(dir.path());
        assert_eq!(
            backend.save_rating(&record("user 1", "v1")),
            BackendOutcome::Success(())
        );
        assert_eq!(
            backend.rated_video_ids("user_1"),
            BackendOutcome::Success(ids(&[]))
        );
        assert_eq!(
            backend.rated_video_ids("user/1"),
            BackendOutcome::Success(ids(&[]))
        );
        assert_eq!(
            backend.rated_video_ids(" user 1 "),
            BackendOutcome::Success(ids(&["v1"]))
        );

        // A file holding the records of another participant is filtered.
        let other = record("user 2", "v2");
        let line = serde_json::to_string(&other).unwrap();
        fs::write(dir.path().join("user%201.jsonl"), format!("{}\n", line)).unwrap();
        assert_eq!(
            backend.rated_video_ids("user 1"),
            BackendOutcome::Success(ids(&[]))
        );
    }

    #[test]
    fn unreachable_endpoint_falls_back_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings {
            mode: "both".to_string(),
            primary: Some("online".to_string()),
            local_directory: Some("out".to_string()),
            online_url: Some("http://127.0.0.1:1".to_string()),
            timeout_seconds: Some(1),
        };
        let store = RatingStore::from_config(&settings, dir.path()).unwrap();
        store.save_rating(&record("u", "v")).unwrap();
        assert_eq!(store.rated_video_ids("u").unwrap(), ids(&["v"]));

        let online_only = StorageSettings {
            mode: "online".to_string(),
            ..settings
        };
        let store = RatingStore::from_config(&online_only, dir.path()).unwrap();
        assert!(matches!(
            store.save_rating(&record("u", "w")),
            Err(SurveyError::StorageUnavailable { .. })
        ));
        assert!(store.rated_video_ids("u").is_err());
    }
}
