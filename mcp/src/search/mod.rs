//! Tool search over an index snapshot.
//!
//! [`search`] is a pure function of the snapshot and the query; it never
//! opens a session.
//!
//! - `bm25` (default): lexical relevance ranking; zero-score tools are dropped
//! - `regex`: case-insensitive pattern match, fixed score 1.0
//! - `exact`: case-insensitive substring match, fixed score 1.0
//!
//! Results are ordered by descending score, then server, then tool name.

pub mod bm25;
pub mod tokenize;

use std::{cmp::Ordering, fmt};

use regex::RegexBuilder;

pub use self::tokenize::{document_text, tokenize};
use self::bm25::Bm25Index;
use crate::{
    error::{GatewayError, GatewayResult},
    inventory::{IndexSnapshot, ToolRecord},
};

pub const DEFAULT_LIMIT: usize = 10;

/// Score assigned to every `regex` and `exact` match.
pub const MATCH_SCORE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SearchMethod {
    #[default]
    Bm25,
    Regex,
    Exact,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Bm25 => "bm25",
            SearchMethod::Regex => "regex",
            SearchMethod::Exact => "exact",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<'a> {
    pub record: &'a ToolRecord,
    pub score: f64,
    pub method: SearchMethod,
}

/// Rank `snapshot` against `query`, keeping at most `limit` results.
pub fn search<'a>(
    snapshot: &'a IndexSnapshot,
    query: &str,
    method: SearchMethod,
    limit: usize,
) -> GatewayResult<Vec<SearchResult<'a>>> {
    let records = snapshot.records();
    let mut results: Vec<SearchResult<'a>> = match method {
        SearchMethod::Bm25 => {
            let terms = tokenize(query);
            if terms.is_empty() {
                return Ok(Vec::new());
            }
            let index = Bm25Index::new(records.iter().map(|r| tokenize(&document_text(r))));
            records
                .iter()
                .enumerate()
                .map(|(i, record)| SearchResult {
                    record,
                    score: index.score(&terms, i),
                    method,
                })
                .filter(|r| r.score > 0.0)
                .collect()
        }
        SearchMethod::Regex => {
            let pattern = RegexBuilder::new(query)
                .case_insensitive(true)
                .build()
                .map_err(|e| GatewayError::Validation {
                    subject: "regex pattern".to_string(),
                    violations: vec![format!("Invalid regex pattern '{}': {}", query, e)],
                    schema: None,
                })?;
            matches(records, method, |text| pattern.is_match(text))
        }
        SearchMethod::Exact => {
            let needle = query.to_lowercase();
            matches(records, method, |text| text.to_lowercase().contains(&needle))
        }
    };

    results.sort_by(compare_results);
    results.truncate(limit);
    Ok(results)
}

fn matches<'a>(
    records: &'a [ToolRecord],
    method: SearchMethod,
    is_match: impl Fn(&str) -> bool,
) -> Vec<SearchResult<'a>> {
    records
        .iter()
        .filter(|record| is_match(&document_text(record)))
        .map(|record| SearchResult {
            record,
            score: MATCH_SCORE,
            method,
        })
        .collect()
}

fn compare_results(a: &SearchResult<'_>, b: &SearchResult<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.record.server.cmp(&b.record.server))
        .then_with(|| a.record.name.cmp(&b.record.name))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn create_test_record(server: &str, name: &str, description: &str) -> ToolRecord {
        ToolRecord {
            server: server.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
            built_at: Utc::now(),
        }
    }

    fn create_test_snapshot() -> IndexSnapshot {
        IndexSnapshot::new(
            Utc::now(),
            vec![
                create_test_record(
                    "github",
                    "create_pull_request",
                    "Create a new pull request in a repository",
                ),
                create_test_record(
                    "github",
                    "list_pull_requests",
                    "List pull requests for a repository",
                ),
                create_test_record(
                    "github",
                    "merge_pull_request",
                    "Merge an open pull request",
                ),
                create_test_record("slack", "send_message", "Send a message to a channel"),
            ],
            BTreeMap::new(),
        )
    }

    fn names(results: &[SearchResult<'_>]) -> Vec<String> {
        results.iter().map(|r| r.record.key().to_string()).collect()
    }

    #[test]
    fn test_bm25_ranks_relevant_tools() {
        let snapshot = create_test_snapshot();
        let results = search(&snapshot, "github pull request", SearchMethod::Bm25, 10).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.record.server == "github"));
        assert!(!names(&results).contains(&"slack/send_message".to_string()));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_bm25_excludes_zero_scores() {
        let snapshot = create_test_snapshot();
        let results = search(&snapshot, "channel", SearchMethod::Bm25, 10).unwrap();
        assert_eq!(names(&results), vec!["slack/send_message"]);
        assert!(results.iter().all(|r| r.score > 0.0));

        assert!(search(&snapshot, "kubernetes", SearchMethod::Bm25, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_bm25_empty_query() {
        let snapshot = create_test_snapshot();
        assert!(search(&snapshot, "  ", SearchMethod::Bm25, 10).unwrap().is_empty());
    }

    #[test]
    fn test_regex_is_case_insensitive_with_fixed_score() {
        let snapshot = create_test_snapshot();
        let results = search(&snapshot, "^GITHUB .*merge", SearchMethod::Regex, 10).unwrap();
        assert_eq!(names(&results), vec!["github/merge_pull_request"]);
        assert_eq!(results[0].score, MATCH_SCORE);
        assert_eq!(results[0].method, SearchMethod::Regex);
    }

    #[test]
    fn test_regex_ties_break_by_server_then_tool() {
        let snapshot = create_test_snapshot();
        let results = search(&snapshot, "pull|message", SearchMethod::Regex, 10).unwrap();
        assert_eq!(
            names(&results),
            vec![
                "github/create_pull_request",
                "github/list_pull_requests",
                "github/merge_pull_request",
                "slack/send_message"
            ]
        );
    }

    #[test]
    fn test_invalid_regex_is_validation_error() {
        let snapshot = create_test_snapshot();
        let err = search(&snapshot, "pull(", SearchMethod::Regex, 10).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationError);
        assert!(err.to_string().contains("Invalid regex pattern"));
    }

    #[test]
    fn test_exact_substring() {
        let snapshot = create_test_snapshot();
        let results = search(&snapshot, "PULL_REQUESTS", SearchMethod::Exact, 10).unwrap();
        assert_eq!(names(&results), vec!["github/list_pull_requests"]);
    }

    #[test]
    fn test_limit_preserves_order() {
        let snapshot = create_test_snapshot();
        let all = search(&snapshot, "pull request", SearchMethod::Bm25, 10).unwrap();
        let top = search(&snapshot, "pull request", SearchMethod::Bm25, 2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(names(&top), names(&all)[..2].to_vec());
    }

    #[test]
    fn test_deterministic_results() {
        let snapshot = create_test_snapshot();
        for method in [SearchMethod::Regex, SearchMethod::Exact] {
            let first = search(&snapshot, "request", method, 10).unwrap();
            let second = search(&snapshot, "request", method, 10).unwrap();
            assert_eq!(first, second);
        }
    }
}
