use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::survey::*;

/// The id of a video named after its file: `clips/clip_01.mp4` -> `clip_01`.
pub fn video_id_from_file_name(name: &str) -> String {
    let trimmed = name.trim();
    Path::new(trimmed)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Builds the video records out of the rows of a table.
///
/// `rows` contains the line number (1-based, header included) and the cells of each
/// data row. Blank rows are skipped.
pub fn assemble_records(
    path: &str,
    header: &[String],
    rows: Vec<(usize, Vec<String>)>,
    id_column: &str,
) -> SurveyResult<Vec<VideoRecord>> {
    let id_idx = header
        .iter()
        .position(|h| h.trim() == id_column)
        .context(MissingColumnSnafu {
            column: id_column,
            path,
        })?;
    debug!(
        "assemble_records: {}: id column {:?} at index {:?}",
        path, id_column, id_idx
    );

    let mut seen: HashSet<String> = HashSet::new();
    let mut res: Vec<VideoRecord> = Vec::new();
    for (lineno, cells) in rows.into_iter() {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let raw_id = cells.get(id_idx).map(|s| s.as_str()).unwrap_or("");
        ensure!(!raw_id.trim().is_empty(), EmptyVideoIdSnafu { lineno });
        let id = video_id_from_file_name(raw_id);
        ensure!(
            seen.insert(id.clone()),
            DuplicateVideoIdSnafu {
                video_id: id,
                lineno
            }
        );

        let metadata: BTreeMap<String, String> = header
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != id_idx)
            .map(|(idx, name)| {
                let value = cells.get(idx).map(|s| s.trim()).unwrap_or("");
                (name.trim().to_string(), value.to_string())
            })
            .collect();
        res.push(VideoRecord { id, metadata });
    }
    info!("Read {} videos from {}", res.len(), path);
    Ok(res)
}
