use super::{SpreadsheetClient, ValueInputOption, Worksheet, column_index};
use crate::error::{QuatiError, Result};
use crate::logging::{EtlStatus, PipelineStage, messages};
use crate::retry::RetryPolicy;
use crate::table::{Keep, Table};

/// Where the column names of a downloaded tab come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// 0-based row holding the column names. Data always starts on the
    /// second row, so with a later header row the rows above and including
    /// it are kept as data.
    Row(usize),
    /// Every row is data; columns are named `"0"`, `"1"`, ...
    None,
}

impl Default for HeaderMode {
    fn default() -> Self {
        HeaderMode::Row(0)
    }
}

/// Open a tab by workbook title, retrying per `policy`.
pub async fn open_tab<C: SpreadsheetClient>(
    client: &C,
    workbook: &str,
    tab: &str,
    policy: &RetryPolicy,
) -> Result<C::Tab> {
    let label = format!("open '{workbook}' / '{tab}'");
    policy
        .run(&label, move || client.open_tab(workbook, tab))
        .await
}

/// Open a tab by spreadsheet URL, retrying per `policy`.
pub async fn open_tab_by_url<C: SpreadsheetClient>(
    client: &C,
    url: &str,
    tab: &str,
    policy: &RetryPolicy,
) -> Result<C::Tab> {
    let label = format!("open {url} / '{tab}'");
    policy
        .run(&label, move || client.open_tab_by_url(url, tab))
        .await
}

fn header_past_end(idx: usize, len: usize) -> QuatiError {
    QuatiError::Table(format!("header row {idx} is past the last of {len} rows"))
}

fn build_table(mut rows: Vec<Vec<String>>, header: HeaderMode) -> Result<Table> {
    match header {
        HeaderMode::None => Table::from_headerless_rows(rows),
        HeaderMode::Row(idx) => {
            let names = rows
                .get(idx)
                .cloned()
                .ok_or_else(|| header_past_end(idx, rows.len()))?;
            let data = rows.split_off(1);
            Table::from_rows(names, data)
        }
    }
}

/// Names from row `idx`; only the rows below it are data.
fn build_records(mut rows: Vec<Vec<String>>, idx: usize) -> Result<Table> {
    if idx >= rows.len() {
        return Err(header_past_end(idx, rows.len()));
    }
    let data = rows.split_off(idx + 1);
    let names = rows.swap_remove(idx);
    Table::from_rows(names, data)
}

/// Download every value of `tab` into a [`Table`].
pub async fn fetch_table<W: Worksheet + ?Sized>(
    tab: &W,
    header: HeaderMode,
    policy: &RetryPolicy,
) -> Result<Table> {
    tracing::info!(stage = %PipelineStage::Extract, "{}", messages::GSHEET_GET_SHEET);
    let table = policy
        .run("fetch rows", move || async move {
            let rows = tab.get_all_values().await?;
            build_table(rows, header)
        })
        .await?;
    tracing::info!(
        stage = %PipelineStage::Extract,
        rows = table.height(),
        columns = table.width(),
        "{}",
        messages::API_DATA_RETRIEVED
    );
    Ok(table)
}

/// 1-based index of the first row after the populated cells of column `col`.
///
/// Blank cells are not counted, so gaps in the column pull the result up.
pub async fn next_row<W: Worksheet + ?Sized>(
    tab: &W,
    col: usize,
    policy: &RetryPolicy,
) -> Result<usize> {
    if col == 0 {
        return Err(QuatiError::Config("column index is 1-based".to_string()));
    }
    policy
        .run("find next row", move || async move {
            let values = tab.col_values(col).await?;
            Ok(values.iter().filter(|v| !v.is_empty()).count() + 1)
        })
        .await
}

/// A1 anchor of the next writable cell of a lettered column, e.g. `"A237"`.
pub async fn next_empty_cell<W: Worksheet + ?Sized>(tab: &W, column: &str) -> Result<String> {
    let col = column_index(column)?;
    let filled = tab
        .col_values(col)
        .await?
        .into_iter()
        .filter(|v| !v.is_empty())
        .count();
    Ok(format!("{}{}", column.to_ascii_uppercase(), filled + 1))
}

/// Overwrite the cells starting at `anchor` with the table's values.
///
/// Values are written unparsed. The header is not written.
pub async fn write_table<W: Worksheet + ?Sized>(
    tab: &W,
    anchor: &str,
    table: &Table,
    policy: &RetryPolicy,
) -> Result<()> {
    tracing::info!(stage = %PipelineStage::Load, anchor, "{}", messages::GSHEET_UPDATE_SHEET);
    let grid = table.to_grid();
    let rows = grid.len();
    let grid = &grid;
    policy
        .run("update rows", move || {
            tab.update(anchor, grid.clone(), ValueInputOption::Raw)
        })
        .await?;
    tracing::info!(stage = %PipelineStage::Load, status = %EtlStatus::Success, rows, "Sync complete.");
    Ok(())
}

/// Single-shot write of the table's values parsed as user input.
pub async fn push_table<W: Worksheet + ?Sized>(tab: &W, table: &Table, anchor: &str) -> Result<()> {
    let mut text = table.clone();
    text.cast_to_text();
    tab.update(anchor, text.to_grid(), ValueInputOption::UserEntered)
        .await
}

/// Open a tab and read it as records under the 1-based `header_row`.
pub async fn read_records<C: SpreadsheetClient>(
    client: &C,
    workbook: &str,
    tab: &str,
    header_row: usize,
) -> Result<Table> {
    if header_row == 0 {
        return Err(QuatiError::Config("header row is 1-based".to_string()));
    }
    tracing::info!(stage = %PipelineStage::Extract, workbook, tab, "{}", messages::GSHEET_GET_SPREADSHEET);
    let sheet = client.open_tab(workbook, tab).await?;
    let rows = sheet.get_all_values().await?;
    build_records(rows, header_row - 1)
}

/// Settings for [`remove_duplicates`].
#[derive(Debug, Clone)]
pub struct DedupOptions {
    pub match_columns: Vec<String>,
    pub keep: Keep,
    /// Top-left cell of the cleared and rewritten block.
    pub origin: String,
    /// Column (or cell) closing the cleared block.
    pub boundary: String,
}

impl DedupOptions {
    pub fn new(match_columns: Vec<String>) -> Self {
        Self {
            match_columns,
            keep: Keep::First,
            origin: "A1".to_string(),
            boundary: "ZZ".to_string(),
        }
    }
}

/// Drop duplicate rows of a tab in place and return the surviving table.
///
/// The block `origin:boundary` is cleared and the header plus surviving
/// rows are written back at `origin` with user-entered semantics. The
/// header is written back on purpose, unlike a values-only rewrite which
/// would drop the tab's column names.
pub async fn remove_duplicates<C: SpreadsheetClient>(
    client: &C,
    workbook: &str,
    tab: &str,
    options: &DedupOptions,
) -> Result<Table> {
    let sheet = client.open_tab(workbook, tab).await?;
    let mut table = build_table(sheet.get_all_values().await?, HeaderMode::Row(0))?;

    tracing::info!(stage = %PipelineStage::Transform, "{}", messages::TABLE_DROP_DUPLICATES);
    let before = table.height();
    table.cast_to_text();
    table.drop_duplicates(&options.match_columns, options.keep)?;
    tracing::info!(
        stage = %PipelineStage::Transform,
        removed = before - table.height(),
        kept = table.height(),
        "Duplicates removed"
    );

    sheet
        .batch_clear(vec![format!("{}:{}", options.origin, options.boundary)])
        .await?;
    sheet
        .update(
            &options.origin,
            table.to_grid_with_header(),
            ValueInputOption::UserEntered,
        )
        .await?;

    Ok(table)
}
