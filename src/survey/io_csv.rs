// Primitives for reading the video metadata from CSV files.

use crate::survey::{io_common::assemble_records, *};

pub fn read_csv_metadata(path: &str, source: &MetadataSource) -> SurveyResult<Vec<VideoRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    let header: Vec<String> = rdr
        .headers()
        .context(CsvLineParseSnafu { lineno: 1_usize })?
        .iter()
        .map(|s| s.to_string())
        .collect();
    debug!("read_csv_metadata: header: {:?}", header);
    ensure!(!header.is_empty(), EmptyTableSnafu { path });

    let mut rows: Vec<(usize, Vec<String>)> = Vec::new();
    for (idx, line_r) in rdr.records().enumerate() {
        // The header is the first line.
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { lineno })?;
        debug!("read_csv_metadata: lineno: {:?} row: {:?}", lineno, line);
        rows.push((lineno, line.iter().map(|s| s.to_string()).collect()));
    }
    assemble_records(path, &header, rows, &source.id_column())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(id_column: Option<&str>) -> MetadataSource {
        MetadataSource {
            provider: "csv".to_string(),
            file_path: "videos.csv".to_string(),
            id_column: id_column.map(|s| s.to_string()),
            worksheet_name: None,
        }
    }

    #[test]
    fn reads_metadata() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "video,category,speaker").unwrap();
        writeln!(f, "clip_01.mp4,A,f").unwrap();
        writeln!(f, "clip_02.mp4,B,m").unwrap();
        let path = f.path().display().to_string();
        let videos = read_csv_metadata(&path, &source(None)).unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[1].id, "clip_02");
        assert_eq!(videos[1].metadata.get("category").unwrap(), "B");
    }

    #[test]
    fn custom_id_column() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "file,category").unwrap();
        writeln!(f, "x.mp4,A").unwrap();
        let path = f.path().display().to_string();
        let videos = read_csv_metadata(&path, &source(Some("file"))).unwrap();
        assert_eq!(videos[0].id, "x");
        assert!(read_csv_metadata(&path, &source(None)).is_err());
    }

    #[test]
    fn missing_file() {
        let res = read_csv_metadata("/nonexistent/videos.csv", &source(None));
        assert!(matches!(res, Err(SurveyError::CsvOpen { .. })));
    }
}
