use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::KeywordSets;
use crate::loaders::read_text_with_encodings;
use crate::models::SourceRef;

/// Rows extracted for one department, ready for table rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterTable {
    pub department: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RosterTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Labeled markdown table.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("### Members of {}\n\n", self.department);
        out.push_str(&format!("| {} |\n", self.columns.join(" | ")));
        out.push_str(&format!(
            "|{}|\n",
            self.columns
                .iter()
                .map(|_| " --- ")
                .collect::<Vec<_>>()
                .join("|")
        ));
        for row in &self.rows {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        out
    }
}

/// A query is a roster request only when it names the department AND carries
/// both an enumeration word and a person word. Either alone is insufficient;
/// that guards against casual mentions of the department name.
pub fn is_roster_request(prompt: &str, department: &str, keywords: &KeywordSets) -> bool {
    let lower = prompt.to_lowercase();
    if !lower.contains(&department.to_lowercase()) {
        return false;
    }
    let wants_enumeration = keywords
        .enumeration
        .iter()
        .any(|word| lower.contains(word.as_str()));
    let names_people = keywords
        .person
        .iter()
        .any(|word| lower.contains(word.as_str()));
    wants_enumeration && names_people
}

/// First configured department name appearing in the prompt.
pub fn department_from_prompt(prompt: &str, keywords: &KeywordSets) -> Option<String> {
    let lower = prompt.to_lowercase();
    keywords
        .departments
        .iter()
        .find(|name| lower.contains(name.as_str()))
        .cloned()
}

/// Scan the document root for CSV files and extract the department roster
/// from the first acceptable one. Per-file failures mean "try the next file";
/// this never errors outward.
pub fn extract_from_root(
    root: &Path,
    department: &str,
    min_rows: usize,
    keywords: &KeywordSets,
) -> Option<RosterTable> {
    let paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();

    extract_from_files(&paths, department, min_rows, keywords)
}

/// Extract the roster from an explicit candidate list, in order. A file is
/// accepted only when its matched row count meets `min_rows`.
pub fn extract_from_files(
    paths: &[PathBuf],
    department: &str,
    min_rows: usize,
    keywords: &KeywordSets,
) -> Option<RosterTable> {
    for path in paths {
        match match_file(path, department, keywords) {
            Some(table) if table.row_count() >= min_rows => return Some(table),
            _ => continue,
        }
    }
    None
}

/// Candidate CSV paths among a turn's citations, re-resolved by basename
/// under the document root when the cited path no longer exists verbatim.
pub fn csv_paths_from_sources(sources: &[SourceRef], root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for source in sources {
        if source.is_link() || !source.origin.to_lowercase().ends_with(".csv") {
            continue;
        }
        let direct = PathBuf::from(&source.origin);
        if direct.is_file() {
            out.push(direct);
            continue;
        }
        if let Some(resolved) = resolve_by_basename(&direct, root) {
            out.push(resolved);
        } else {
            out.push(direct);
        }
    }
    out
}

fn resolve_by_basename(path: &Path, root: &Path) -> Option<PathBuf> {
    let basename = path.file_name()?;
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name() == basename)
        .map(|entry| entry.into_path())
}

fn match_file(path: &Path, department: &str, keywords: &KeywordSets) -> Option<RosterTable> {
    let raw = read_text_with_encodings(path).ok()?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(raw.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .ok()?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.is_empty() {
        return None;
    }

    // Headers containing a department-like substring become grouping columns.
    let grouping: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, header)| {
            let header = header.to_lowercase();
            keywords
                .department_columns
                .iter()
                .any(|key| header.contains(key.as_str()))
        })
        .map(|(index, _)| index)
        .collect();

    let target = department.trim().to_lowercase();
    let mut rows = Vec::new();
    for record in reader.records() {
        let Ok(record) = record else { continue };
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        let matched = if grouping.is_empty() {
            // No grouping column identified: whole-row substring containment.
            cells.iter().any(|cell| cell.to_lowercase().contains(&target))
        } else {
            grouping
                .iter()
                .filter_map(|&index| cells.get(index))
                .any(|cell| cell.trim().to_lowercase() == target)
        };
        if matched {
            rows.push(cells);
        }
    }

    if rows.is_empty() {
        return None;
    }

    Some(RosterTable {
        department: department.to_string(),
        columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::path::PathBuf;

    fn keywords() -> crate::config::KeywordSets {
        // Defaults; tests never set the env overrides.
        AppConfig::from_env().keywords
    }

    fn temp_csv(contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("deskqa-roster-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn roster_request_needs_both_keyword_classes() {
        let kw = keywords();
        assert!(is_roster_request(
            "Please list the employees of the Sales department",
            "sales",
            &kw
        ));
        // Enumeration word without a person word.
        assert!(!is_roster_request("List everything about Sales", "sales", &kw));
        // Person word without an enumeration word.
        assert!(!is_roster_request(
            "Is that employee in Sales?",
            "sales",
            &kw
        ));
        // Department name missing entirely.
        assert!(!is_roster_request("List all employees", "sales", &kw));
    }

    #[test]
    fn below_threshold_files_are_rejected() {
        let kw = keywords();
        let path = temp_csv(b"name,department\nA,Sales\nB,Sales\nC,Sales\n");
        let result = extract_from_files(&[path.clone()], "Sales", 4, &kw);
        std::fs::remove_file(&path).ok();
        assert!(result.is_none());
    }

    #[test]
    fn threshold_met_yields_the_matched_rows() {
        let kw = keywords();
        let path = temp_csv(b"name,department\nA,Sales\nB,Sales\nC,Sales\nD,Sales\nE,Accounting\n");
        let table = extract_from_files(&[path.clone()], "Sales", 4, &kw).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.columns, vec!["name", "department"]);
        assert!(table.to_markdown().contains("### Members of Sales"));
    }

    #[test]
    fn grouping_column_requires_exact_match() {
        let kw = keywords();
        // "Sales Support" must not match the target "Sales" exactly.
        let path = temp_csv(
            b"name,department\nA,Sales Support\nB,Sales Support\nC,Sales Support\nD,Sales Support\n",
        );
        let result = extract_from_files(&[path.clone()], "Sales", 4, &kw);
        std::fs::remove_file(&path).ok();
        assert!(result.is_none());
    }

    #[test]
    fn missing_grouping_column_falls_back_to_row_containment() {
        let kw = keywords();
        let path = temp_csv(b"name,note\nA,works in Sales\nB,Sales desk\nC,Sales floor\nD,Sales\n");
        let table = extract_from_files(&[path.clone()], "Sales", 4, &kw).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(table.row_count(), 4);
    }

    #[test]
    fn secondary_encoding_files_still_match() {
        let kw = keywords();
        let (encoded, _, _) =
            encoding_rs::SHIFT_JIS.encode("氏名,所属department\n田中,営業部\n鈴木,営業部\n佐藤,営業部\n高橋,営業部\n");
        let path = temp_csv(&encoded);
        let table = extract_from_files(&[path.clone()], "営業部", 4, &kw).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(table.row_count(), 4);
    }

    #[test]
    fn unreadable_candidate_moves_to_the_next_file() {
        let kw = keywords();
        let missing = PathBuf::from("/nonexistent/roster.csv");
        let good = temp_csv(b"name,department\nA,Sales\nB,Sales\nC,Sales\nD,Sales\n");
        let table = extract_from_files(&[missing, good.clone()], "Sales", 4, &kw).unwrap();
        std::fs::remove_file(&good).ok();
        assert_eq!(table.row_count(), 4);
    }

    #[test]
    fn department_is_inferred_from_known_names() {
        let kw = keywords();
        assert_eq!(
            department_from_prompt("show me the engineering members", &kw).as_deref(),
            Some("engineering")
        );
        assert_eq!(department_from_prompt("what time is lunch", &kw), None);
    }
}
