//! Per-question facts gathered from tool results, used only to sanity-check
//! the final answer.
//!
//! Population is a list of independent extraction rules. Each rule either
//! yields a fact or `None`; a shape it does not recognize is skipped and
//! never affects the other rules or the tool call itself.

use crate::agent::tools::ToolKind;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Allowed gap between a claimed and a cached row count.
pub const ROW_COUNT_TOLERANCE: i64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvidenceCache {
    pub tables: Vec<String>,
    pub schema: BTreeMap<String, Vec<String>>,
    pub row_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq)]
enum Fact {
    Tables(Vec<String>),
    Columns(String, Vec<String>),
    RowCount(String, i64),
}

type Rule = fn(ToolKind, &Map<String, Value>, &Value) -> Vec<Fact>;

const RULES: &[Rule] = &[
    listed_tables,
    described_columns,
    described_row_count,
    counted_rows,
];

static COUNT_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*SELECT\s+COUNT\(\s*\*\s*\)(?:\s+(?:AS\s+)?\w+)?\s+FROM\s+[`"']?([A-Za-z_]\w*)[`"']?\s*(?:LIMIT\s+\d+\s*)?;?\s*$"#,
    )
    .unwrap()
});

static ROWS_CLAIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}(?:,\d{3})+|\d+)\s+rows?\b").unwrap()
});

static TABLE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:\btable\s+[`"']?([A-Za-z_]\w*)[`"']?|[`"']?\b([A-Za-z_]\w*)\b[`"']?\s+table\b)"#,
    )
    .unwrap()
});

static TABLE_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\btables?\b").unwrap());

/// Words that sit next to "table" in ordinary prose.
const NOT_TABLE_NAMES: &[&str] = &[
    "a", "an", "the", "this", "that", "each", "every", "any", "one", "which", "same", "single",
    "other", "another", "whole", "entire", "its", "their", "your", "our", "no", "only", "first",
    "second", "last", "given", "main", "database", "in", "of", "from", "to", "for", "per", "and",
    "or", "is", "has", "have", "contains", "with", "by", "on", "named", "called", "lookup",
    "join", "temp", "temporary", "was", "were", "are",
];

impl EvidenceCache {
    /// Fold a tool result into the cache.
    pub fn ingest(&mut self, kind: ToolKind, args: &Map<String, Value>, output: &Value) {
        for rule in RULES {
            for fact in rule(kind, args, output) {
                self.apply(fact);
            }
        }
    }

    fn apply(&mut self, fact: Fact) {
        match fact {
            Fact::Tables(tables) => self.tables = tables,
            Fact::Columns(table, cols) => {
                self.schema.insert(table, cols);
            }
            Fact::RowCount(table, count) => {
                self.row_counts.insert(table, count);
            }
        }
    }

    fn is_known_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.eq_ignore_ascii_case(name))
    }

    /// First contradiction between `answer` and the cache, if any.
    ///
    /// Heuristic: misses are fine, false alarms should be rare.
    pub fn check_final_answer(&self, answer: &str) -> Option<String> {
        self.check_table_names(answer)
            .or_else(|| self.check_row_count(answer))
    }

    fn check_table_names(&self, answer: &str) -> Option<String> {
        if self.tables.is_empty() || !TABLE_WORD.is_match(answer) {
            return None;
        }
        let mentions_known = self.tables.iter().any(|t| contains_word(answer, t));
        if !mentions_known {
            return None;
        }

        let stray = TABLE_MENTION.captures_iter(answer).find_map(|caps| {
            let name = caps.get(1).or_else(|| caps.get(2))?.as_str();
            let lowered = name.to_lowercase();
            if NOT_TABLE_NAMES.contains(&lowered.as_str()) || self.is_known_table(name) {
                None
            } else {
                Some(name.to_string())
            }
        })?;

        Some(format!(
            "Answer mentions table '{}' which is not among the known tables [{}].",
            stray,
            self.tables.join(", ")
        ))
    }

    fn check_row_count(&self, answer: &str) -> Option<String> {
        if self.row_counts.is_empty() {
            return None;
        }

        let named: Vec<(&String, &i64)> = self
            .row_counts
            .iter()
            .filter(|(t, _)| contains_word(answer, t))
            .collect();
        let (table, actual) = match named.as_slice() {
            [single] => *single,
            [] if self.row_counts.len() == 1 => self.row_counts.iter().next()?,
            _ => return None,
        };

        let caps = ROWS_CLAIM.captures(answer)?;
        let claimed: i64 = caps[1].replace(',', "").parse().ok()?;
        if (claimed - actual).abs() > ROW_COUNT_TOLERANCE {
            Some(format!(
                "Claimed {} rows, actual {} in table '{}'.",
                claimed, actual, table
            ))
        } else {
            None
        }
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

fn table_arg(args: &Map<String, Value>) -> Option<String> {
    args.get("table_name")
        .or_else(|| args.get("table"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn listed_tables(kind: ToolKind, _args: &Map<String, Value>, out: &Value) -> Vec<Fact> {
    if kind != ToolKind::ListTables {
        return vec![];
    }
    let list = out.as_array().or_else(|| out.get("tables")?.as_array());
    list.and_then(|items| {
        items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
    })
    .map(|tables| vec![Fact::Tables(tables)])
    .unwrap_or_default()
}

fn described_columns(kind: ToolKind, args: &Map<String, Value>, out: &Value) -> Vec<Fact> {
    if kind != ToolKind::DescribeTable {
        return vec![];
    }
    let extract = || -> Option<Fact> {
        let table = out
            .get("table_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| table_arg(args))?;
        let cols = out
            .get("columns")?
            .as_array()?
            .iter()
            .map(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("name")?.as_str().map(str::to_string),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Fact::Columns(table, cols))
    };
    extract().into_iter().collect()
}

fn described_row_count(kind: ToolKind, args: &Map<String, Value>, out: &Value) -> Vec<Fact> {
    if kind != ToolKind::DescribeTable {
        return vec![];
    }
    let extract = || -> Option<Fact> {
        let table = out
            .get("table_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| table_arg(args))?;
        let count = out.get("row_count")?.as_i64()?;
        Some(Fact::RowCount(table, count))
    };
    extract().into_iter().collect()
}

/// `SELECT COUNT(*) FROM t` with no filter answers "how many rows in t".
fn counted_rows(kind: ToolKind, args: &Map<String, Value>, out: &Value) -> Vec<Fact> {
    if kind != ToolKind::QueryDatabase {
        return vec![];
    }
    let extract = || -> Option<Fact> {
        let query = args.get("query")?.as_str()?;
        let table = COUNT_QUERY.captures(query)?.get(1)?.as_str().to_string();
        let rows = out.get("rows")?.as_array()?;
        let [row] = rows.as_slice() else {
            return None;
        };
        let [count] = row.as_array()?.as_slice() else {
            return None;
        };
        Some(Fact::RowCount(table, count.as_i64()?))
    };
    extract().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn seeded() -> EvidenceCache {
        let mut cache = EvidenceCache::default();
        cache.ingest(ToolKind::ListTables, &Map::new(), &json!(["emp", "sample"]));
        cache.ingest(
            ToolKind::DescribeTable,
            &args(json!({"table_name": "sample"})),
            &json!({
                "table_name": "sample",
                "columns": [{"name": "id", "type": "INTEGER"}, {"name": "city", "type": "TEXT"}],
                "row_count": 5000
            }),
        );
        cache
    }

    #[test]
    fn tool_results_populate_cache() {
        let cache = seeded();
        assert_eq!(cache.tables, vec!["emp", "sample"]);
        assert_eq!(cache.schema["sample"], vec!["id", "city"]);
        assert_eq!(cache.row_counts["sample"], 5000);
    }

    #[test]
    fn plain_column_lists_are_accepted() {
        let mut cache = EvidenceCache::default();
        cache.ingest(
            ToolKind::DescribeTable,
            &args(json!({"table": "emp"})),
            &json!({"columns": ["id", "emp_job"]}),
        );
        assert_eq!(cache.schema["emp"], vec!["id", "emp_job"]);
        assert!(cache.row_counts.is_empty());
    }

    #[test]
    fn malformed_shapes_are_skipped_without_damage() {
        let mut cache = seeded();
        let before = cache.clone();
        cache.ingest(ToolKind::ListTables, &Map::new(), &json!({"error": "boom"}));
        cache.ingest(ToolKind::ListTables, &Map::new(), &json!([1, 2]));
        cache.ingest(
            ToolKind::DescribeTable,
            &args(json!({"table_name": "emp"})),
            &json!({"columns": "id,emp_job", "row_count": "many"}),
        );
        assert_eq!(cache, before);
    }

    #[test]
    fn one_bad_field_does_not_block_the_other_rule() {
        let mut cache = EvidenceCache::default();
        cache.ingest(
            ToolKind::DescribeTable,
            &args(json!({"table_name": "emp"})),
            &json!({"table_name": "emp", "columns": 7, "row_count": 12}),
        );
        assert!(cache.schema.is_empty());
        assert_eq!(cache.row_counts["emp"], 12);
    }

    #[test]
    fn unfiltered_count_query_records_row_count() {
        let mut cache = EvidenceCache::default();
        cache.ingest(
            ToolKind::QueryDatabase,
            &args(json!({"query": "SELECT COUNT(*) AS total FROM emp;"})),
            &json!({"columns": ["total"], "rows": [[42]], "row_count": 1}),
        );
        assert_eq!(cache.row_counts["emp"], 42);

        cache.ingest(
            ToolKind::QueryDatabase,
            &args(json!({"query": "SELECT COUNT(*) FROM emp WHERE emp_job = 'x'"})),
            &json!({"columns": ["COUNT(*)"], "rows": [[3]], "row_count": 1}),
        );
        assert_eq!(cache.row_counts["emp"], 42);
    }

    #[test]
    fn consistent_answer_has_no_warning() {
        let cache = seeded();
        assert_eq!(
            cache.check_final_answer("The sample table contains 5,000 rows."),
            None
        );
        assert_eq!(
            cache.check_final_answer("The 'sample' table has 4998 rows."),
            None
        );
    }

    #[test]
    fn row_count_beyond_tolerance_is_flagged() {
        let warning = seeded()
            .check_final_answer("The sample table contains 4000 rows.")
            .expect("mismatch");
        assert!(warning.contains("Claimed 4000 rows, actual 5000"), "{warning}");
    }

    #[test]
    fn single_digit_claims_are_checked() {
        let warning = seeded()
            .check_final_answer("The sample table has 9 rows.")
            .expect("mismatch");
        assert!(warning.contains("Claimed 9 rows, actual 5000"), "{warning}");

        let mut small = EvidenceCache::default();
        small.row_counts.insert("emp".to_string(), 3);
        assert_eq!(small.check_final_answer("emp has 1 row"), None);
        assert!(small.check_final_answer("emp has 9 rows").is_some());
    }

    #[test]
    fn row_count_check_needs_an_unambiguous_table() {
        let mut cache = seeded();
        cache.row_counts.insert("emp".to_string(), 10);
        assert_eq!(cache.check_final_answer("There are 4000 rows."), None);
        assert!(
            cache
                .check_final_answer("The emp data holds 4000 rows.")
                .is_some()
        );
    }

    #[test]
    fn stray_table_reference_is_flagged() {
        let warning = seeded()
            .check_final_answer("Joining the sample table with the salaries table gives 3.")
            .expect("stray table");
        assert!(warning.contains("'salaries'"), "{warning}");
    }

    #[test]
    fn prose_around_table_word_is_not_a_table() {
        let cache = seeded();
        assert_eq!(
            cache.check_final_answer("The sample table has an id column; each table is small."),
            None
        );
        assert_eq!(
            cache.check_final_answer("Table emp lists jobs, and the sample table lists people."),
            None
        );
    }

    #[test]
    fn table_check_only_runs_when_a_known_table_is_named() {
        assert_eq!(
            seeded().check_final_answer("The ledger table is empty."),
            None
        );
    }
}
