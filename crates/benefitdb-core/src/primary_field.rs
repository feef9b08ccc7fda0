//! Detection of a table row's identifying column.
//!
//! Rows whose identifying column cannot be found stay "structurally thin";
//! the retrieval fallback widens those to their whole document.

use crate::types::TableRow;

pub trait PrimaryFieldDetector: Send + Sync {
    /// `(field name, value)` of the identifying column of a row taken from
    /// `filename`, if the file belongs to a known family and the column exists.
    fn detect(&self, filename: &str, row: &TableRow) -> Option<(String, String)>;
}

/// Keywords to look for in the headers of files whose name contains `marker`.
#[derive(Debug, Clone)]
pub struct FilenameRule {
    pub marker: String,
    pub keywords: Vec<String>,
}

impl FilenameRule {
    pub fn new(marker: &str, keywords: &[&str]) -> Self {
        Self { marker: marker.to_string(), keywords: keywords.iter().map(|k| normalize(k)).collect() }
    }
}

/// Matches headers against per-family keyword lists, ignoring case and
/// whitespace. Keyword order is priority order.
#[derive(Debug, Clone)]
pub struct KeywordColumnDetector {
    rules: Vec<FilenameRule>,
}

impl KeywordColumnDetector {
    pub fn new(rules: Vec<FilenameRule>) -> Self {
        Self { rules }
    }

    fn rule_for(&self, filename: &str) -> Option<&FilenameRule> {
        self.rules.iter().find(|r| filename.contains(&r.marker))
    }
}

impl Default for KeywordColumnDetector {
    fn default() -> Self {
        Self::new(vec![
            FilenameRule::new("치료재료", &["재료코드", "코드", "품명"]),
            FilenameRule::new("행위", &["시술코드", "수가코드", "분류번호"]),
            FilenameRule::new("약제", &["주성분코드", "제품코드"]),
            FilenameRule::new("material", &["material code", "code"]),
        ])
    }
}

impl PrimaryFieldDetector for KeywordColumnDetector {
    fn detect(&self, filename: &str, row: &TableRow) -> Option<(String, String)> {
        let rule = self.rule_for(filename)?;
        for keyword in &rule.keywords {
            for (header, value) in row.filled() {
                if normalize(header) == *keyword {
                    return Some((header.to_string(), value.to_string()));
                }
            }
        }
        None
    }
}

fn normalize(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(headers: &[&str], cells: &[&str]) -> TableRow {
        TableRow {
            page_number: 1,
            table_index: 0,
            row_index: 0,
            headers: headers.iter().map(|s| s.to_string()).collect(),
            cells: cells.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn header_match_ignores_case_and_spacing() {
        let d = KeywordColumnDetector::default();
        let r = row(&["순번", "재료 코드", "품명"], &["1", "A12345", "스텐트"]);
        assert_eq!(
            d.detect("치료재료_목록.pdf", &r),
            Some(("재료 코드".to_string(), "A12345".to_string()))
        );

        let r = row(&["Material Code"], &["M-1"]);
        assert_eq!(d.detect("material_list.pdf", &r), Some(("Material Code".to_string(), "M-1".to_string())));
    }

    #[test]
    fn files_outside_known_families_are_ignored() {
        let d = KeywordColumnDetector::default();
        let r = row(&["재료코드"], &["A12345"]);
        assert!(d.detect("2024_치료재료_급여목록.pdf", &r).is_some());
        assert_eq!(d.detect("고시_일반.pdf", &r), None);
    }

    #[test]
    fn empty_identifying_cell_is_not_a_match() {
        let d = KeywordColumnDetector::default();
        let r = row(&["재료코드", "비고"], &["", "참고"]);
        assert_eq!(d.detect("치료재료.pdf", &r), None);
    }
}
