//! Header intuition for resources without a schema

use serde_json::Value;
use tracing::debug;

use crate::pipeline::{Row, display_value};

/// Parse a `headerlines` property such as `"0,1"`
///
/// Anything unparseable, including an absent or empty value, falls back to line 0.
pub fn parse_header_lines(raw: Option<&str>) -> Vec<usize> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return vec![0];
    };
    let parsed: Result<Vec<usize>, _> = raw.split(',').map(|p| p.trim().parse()).collect();
    match parsed {
        Ok(mut lines) => {
            lines.sort_unstable();
            lines.dedup();
            lines
        }
        Err(_) => {
            debug!(headerlines = raw, "Unparseable header lines, using line 0");
            vec![0]
        }
    }
}

/// Merge one or more physical header lines into a single header row
///
/// A single line is used as it is. With several lines, blank cells of each line take the
/// value to their left (spanning titles), then the lines are joined column-wise with a
/// space. Columns that stay blank are named `col<N>`, 1-based.
pub fn coalesce_headers(lines: &[Row]) -> Vec<String> {
    match lines {
        [] => Vec::new(),
        [line] => line.iter().map(display_value).collect(),
        _ => {
            let width = lines.iter().map(Vec::len).max().unwrap_or(0);
            let filled: Vec<Vec<String>> = lines.iter().map(|l| forward_fill(l, width)).collect();

            (0..width)
                .map(|i| {
                    let joined = filled
                        .iter()
                        .map(|line| line[i].as_str())
                        .filter(|cell| !cell.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ");
                    if joined.is_empty() {
                        format!("col{}", i + 1)
                    } else {
                        joined
                    }
                })
                .collect()
        }
    }
}

fn forward_fill(line: &[Value], width: usize) -> Vec<String> {
    let mut last = String::new();
    (0..width)
        .map(|i| {
            let cell = line.get(i).map(display_value).unwrap_or_default();
            let cell = cell.trim();
            if !cell.is_empty() {
                last = cell.to_string();
            }
            last.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| json!(c)).collect()
    }

    #[test]
    fn test_parse_header_lines() {
        assert_eq!(parse_header_lines(None), vec![0]);
        assert_eq!(parse_header_lines(Some("")), vec![0]);
        assert_eq!(parse_header_lines(Some("0,1")), vec![0, 1]);
        assert_eq!(parse_header_lines(Some(" 2, 1 ,2")), vec![1, 2]);
        assert_eq!(parse_header_lines(Some("zero")), vec![0]);
        assert_eq!(parse_header_lines(Some("0,-1")), vec![0]);
    }

    #[test]
    fn test_single_line_kept() {
        assert_eq!(coalesce_headers(&[row(&["id", "", "name"])]), vec!["id", "", "name"]);
        assert!(coalesce_headers(&[]).is_empty());
    }

    #[test]
    fn test_two_lines_merged() {
        let lines = vec![
            row(&["", "Population", "", "Area"]),
            row(&["city", "2010", "2020", "km2"]),
        ];
        assert_eq!(
            coalesce_headers(&lines),
            vec!["city", "Population 2010", "Population 2020", "Area km2"]
        );
    }

    #[test]
    fn test_ragged_lines_padded() {
        let lines = vec![row(&["a"]), row(&["x", "y", ""])];
        assert_eq!(coalesce_headers(&lines), vec!["a x", "a y", "a y"]);

        let lines = vec![row(&[""]), row(&["", "y"])];
        assert_eq!(coalesce_headers(&lines), vec!["col1", "y"]);
    }
}
