use calamine::{open_workbook, DataType, Range, Reader, Xlsx};

use crate::survey::{io_common::assemble_records, *};

pub fn read_excel_metadata(path: &str, source: &MetadataSource) -> SurveyResult<Vec<VideoRecord>> {
    let wrange = get_range(path, source)?;

    let mut iter = wrange.rows();
    let header: Vec<String> = iter
        .next()
        .context(EmptyTableSnafu { path })?
        .iter()
        .enumerate()
        .map(|(idx, cell)| read_cell(cell, 1, idx))
        .collect::<SurveyResult<Vec<String>>>()?;
    debug!("read_excel_metadata: header: {:?}", header);

    let mut rows: Vec<(usize, Vec<String>)> = Vec::new();
    for (idx, row) in iter.enumerate() {
        let lineno = idx + 2;
        debug!("read_excel_metadata: lineno: {:?} row: {:?}", lineno, row);
        let cells = row
            .iter()
            .enumerate()
            .map(|(col, cell)| read_cell(cell, lineno, col))
            .collect::<SurveyResult<Vec<String>>>()?;
        rows.push((lineno, cells));
    }
    assemble_records(path, &header, rows, &source.id_column())
}

fn get_range(path: &str, source: &MetadataSource) -> SurveyResult<Range<DataType>> {
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let wrange = match source.worksheet_name.as_deref() {
        Some(name) => workbook
            .worksheet_range(name)
            .context(MissingWorksheetSnafu { name, path })?
            .context(OpeningExcelSnafu { path })?,
        None => workbook
            .worksheet_range_at(0)
            .context(MissingWorksheetSnafu { name: "#0", path })?
            .context(OpeningExcelSnafu { path })?,
    };
    Ok(wrange)
}

// Metadata values are categorical: every cell is read as text.
fn read_cell(cell: &DataType, lineno: usize, col: usize) -> SurveyResult<String> {
    match cell {
        DataType::String(s) => Ok(s.trim().to_string()),
        DataType::Int(i) => Ok(i.to_string()),
        DataType::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Ok(format!("{}", *f as i64)),
        DataType::Float(f) => Ok(f.to_string()),
        DataType::Bool(b) => Ok(b.to_string()),
        DataType::Empty => Ok("".to_string()),
        _ => ExcelWrongCellTypeSnafu {
            lineno,
            content: format!("column {}: {:?}", col + 1, cell),
        }
        .fail(),
    }
}
