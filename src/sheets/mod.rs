//! Spreadsheet access: the capabilities the ETL jobs rely on, a Google
//! Sheets implementation of them, and the resilient operations built on top.

pub mod google;
pub mod ops;

use async_trait::async_trait;

use crate::error::{QuatiError, Result};

#[cfg(test)]
use mockall::automock;

pub use google::{GoogleSheets, GoogleWorksheet};
pub use ops::{
    DedupOptions, HeaderMode, fetch_table, next_empty_cell, next_row, open_tab, open_tab_by_url,
    push_table, read_records, remove_duplicates, write_table,
};

/// How written text is interpreted by the spreadsheet service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueInputOption {
    /// Stored verbatim, never parsed.
    Raw,
    /// Parsed as if typed by a person, so numbers and dates get formatted.
    UserEntered,
}

impl ValueInputOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueInputOption::Raw => "RAW",
            ValueInputOption::UserEntered => "USER_ENTERED",
        }
    }
}

/// One tab of a workbook.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Worksheet: Send + Sync {
    /// Every populated row, padded to a rectangle.
    async fn get_all_values(&self) -> Result<Vec<Vec<String>>>;
    /// Values of the 1-based column `col`, top to bottom.
    async fn col_values(&self, col: usize) -> Result<Vec<String>>;
    async fn batch_clear(&self, ranges: Vec<String>) -> Result<()>;
    async fn update(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
        input: ValueInputOption,
    ) -> Result<()>;
}

/// An authorized session able to open tabs.
#[async_trait]
pub trait SpreadsheetClient: Send + Sync {
    type Tab: Worksheet;

    async fn open_tab(&self, workbook: &str, tab: &str) -> Result<Self::Tab>;
    async fn open_tab_by_url(&self, url: &str, tab: &str) -> Result<Self::Tab>;
}

/// `1 -> "A"`, `27 -> "AA"`.
pub fn column_letter(index: usize) -> String {
    let mut n = index;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// `"A" -> 1`, `"ab" -> 28`.
pub fn column_index(letters: &str) -> Result<usize> {
    if letters.is_empty() {
        return Err(QuatiError::Config("empty column letter".to_string()));
    }
    letters.chars().try_fold(0usize, |acc, c| {
        if c.is_ascii_alphabetic() {
            Ok(acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1))
        } else {
            Err(QuatiError::Config(format!("invalid column letter '{letters}'")))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(702), "ZZ");
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A").expect("valid"), 1);
        assert_eq!(column_index("b").expect("valid"), 2);
        assert_eq!(column_index("ZZ").expect("valid"), 702);
        assert!(column_index("B2").is_err());
        assert!(column_index("").is_err());
    }

    #[test]
    fn test_value_input_option_names() {
        assert_eq!(ValueInputOption::Raw.as_str(), "RAW");
        assert_eq!(ValueInputOption::UserEntered.as_str(), "USER_ENTERED");
    }
}
