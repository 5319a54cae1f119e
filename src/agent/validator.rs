//! Textual SQL safety gate for `query_database`.
//!
//! This is the first of two layers. The connection itself is opened
//! read-only with `query_only` on, which catches anything these heuristics
//! miss. Table extraction is a keyword scan, not a parse: tables named
//! inside subqueries are seen, but derived tables (`FROM (SELECT ...)`) and
//! comma-separated `FROM a, b` lists are only partially checked.

use regex::Regex;
use std::sync::LazyLock;

/// Keywords that must never appear as a whole word in an accepted query.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "PRAGMA",
];

pub const READ_ONLY_REJECTION: &str = "Only SELECT queries are allowed (read-only mode)";
pub const MULTIPLE_STATEMENTS_REJECTION: &str = "Multiple statements not allowed";

static FORBIDDEN: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"\b{}\b", kw)).unwrap()))
        .collect()
});

static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+([`"'\[]?[A-Za-z_][A-Za-z0-9_]*[`"'\]]?)"#).unwrap()
});

static LIMIT_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());

/// `LIMIT n`, `LIMIT n OFFSET m` or `LIMIT m, n` closing the statement.
static TRAILING_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+\d+(?:\s*,\s*\d+|\s+OFFSET\s+\d+)?\s*$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept {
        query: String,
        /// True when the default row cap had to be appended.
        row_cap_applied: bool,
    },
    Reject {
        reason: String,
    },
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }

    fn reject(reason: impl Into<String>) -> Self {
        Verdict::Reject {
            reason: reason.into(),
        }
    }
}

/// Judge `query` against the live table list, appending `LIMIT row_cap`
/// when no limit is present. Pure: same inputs, same verdict.
pub fn validate(query: &str, allowed_tables: &[String], row_cap: usize) -> Verdict {
    let trimmed = query.trim();
    let upper = trimmed.to_uppercase();

    if !upper.starts_with("SELECT") {
        return Verdict::reject(READ_ONLY_REJECTION);
    }

    for (keyword, pattern) in FORBIDDEN.iter() {
        if pattern.is_match(&upper) {
            return Verdict::reject(format!(
                "Forbidden keyword '{}' detected. Only SELECT queries allowed.",
                keyword
            ));
        }
    }

    for table in referenced_tables(trimmed) {
        let known = allowed_tables.iter().any(|t| t.eq_ignore_ascii_case(&table));
        if !known {
            return Verdict::reject(format!(
                "Unknown or disallowed table '{}'. Available tables: {}. Use list_tables or describe_table first.",
                table,
                allowed_tables.join(", ")
            ));
        }
    }

    if trimmed.matches(';').count() > 1 {
        return Verdict::reject(MULTIPLE_STATEMENTS_REJECTION);
    }

    let normalized = trimmed.trim_end_matches(';').trim_end();
    let (query, row_cap_applied) = apply_row_cap(normalized, row_cap);

    Verdict::Accept {
        query,
        row_cap_applied,
    }
}

/// Keep a bounded top-level trailing LIMIT; otherwise add one.
///
/// Text that mentions LIMIT anywhere else (a subquery, a literal, `LIMIT -1`)
/// or carries a comment is wrapped as a subquery, so the outer bound is
/// always the last clause and cannot be commented out.
fn apply_row_cap(query: &str, row_cap: usize) -> (String, bool) {
    let bounded = TRAILING_LIMIT
        .find(query)
        .is_some_and(|m| paren_depth_at(query, m.start()) == Some(0));
    if bounded {
        return (query.to_string(), false);
    }

    let needs_wrap = LIMIT_WORD.is_match(query) || query.contains("--") || query.contains("/*");
    let capped = if needs_wrap {
        format!("SELECT * FROM ({}\n) LIMIT {}", query, row_cap)
    } else {
        format!("{} LIMIT {}", query, row_cap)
    };
    (capped, true)
}

#[derive(Clone, Copy)]
enum Lexeme {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Parenthesis depth of plain code before byte offset `end`. `None` when
/// `end` falls inside a literal or comment.
fn paren_depth_at(text: &str, end: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut state = Lexeme::Code;
    let mut chars = text[..end].chars().peekable();
    while let Some(c) = chars.next() {
        state = match state {
            Lexeme::Quoted(q) if c == q => Lexeme::Code,
            Lexeme::LineComment if c == '\n' => Lexeme::Code,
            Lexeme::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                chars.next();
                Lexeme::Code
            }
            Lexeme::Code => match c {
                '\'' | '"' | '`' => Lexeme::Quoted(c),
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    Lexeme::LineComment
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    Lexeme::BlockComment
                }
                '(' => {
                    depth += 1;
                    Lexeme::Code
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    Lexeme::Code
                }
                _ => Lexeme::Code,
            },
            other => other,
        };
    }
    matches!(state, Lexeme::Code).then_some(depth)
}

/// Names following `FROM`/`JOIN`, with surrounding quote characters removed.
pub fn referenced_tables(query: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for caps in TABLE_REF.captures_iter(query) {
        let name = caps[1]
            .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '[' | ']'))
            .to_string();
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
            tables.push(name);
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 100;

    fn tables() -> Vec<String> {
        vec!["sample".to_string(), "emp".to_string()]
    }

    fn accepted(v: Verdict) -> String {
        match v {
            Verdict::Accept { query, .. } => query,
            Verdict::Reject { reason } => panic!("expected accept, got reject: {}", reason),
        }
    }

    fn rejected(v: Verdict) -> String {
        match v {
            Verdict::Reject { reason } => reason,
            Verdict::Accept { query, .. } => panic!("expected reject, got accept: {}", query),
        }
    }

    #[test]
    fn non_select_statements_are_rejected() {
        assert_eq!(
            rejected(validate("DELETE FROM sample", &tables(), CAP)),
            READ_ONLY_REJECTION
        );
        assert_eq!(
            rejected(validate("  with x as (select 1) select * from x", &tables(), CAP)),
            READ_ONLY_REJECTION
        );
    }

    #[test]
    fn forbidden_keywords_next_to_punctuation_are_caught() {
        for query in [
            "SELECT * FROM sample; DROP TABLE sample",
            "SELECT * FROM sample WHERE id IN (DROP)",
            "SELECT * FROM sample;DROP;",
            "select * from sample where x = 1 or delete",
            "SELECT 1 FROM sample WHERE pragma",
        ] {
            let reason = rejected(validate(query, &tables(), CAP));
            assert!(reason.starts_with("Forbidden keyword"), "{query}: {reason}");
        }
    }

    #[test]
    fn keywords_inside_identifiers_are_allowed() {
        let q = accepted(validate(
            "SELECT insertion_date, dropbox_id, created_at FROM sample",
            &tables(),
            CAP,
        ));
        assert_eq!(
            q,
            "SELECT insertion_date, dropbox_id, created_at FROM sample LIMIT 100"
        );
        assert!(validate("SELECT DROPBOX FROM sample", &tables(), CAP).is_accept());
    }

    #[test]
    fn unknown_tables_are_named_with_known_list() {
        let reason = rejected(validate("SELECT * FROM ghost", &tables(), CAP));
        assert!(reason.contains("'ghost'"), "{reason}");
        assert!(reason.contains("sample, emp"), "{reason}");
        assert!(validate("SELECT * FROM sample", &tables(), CAP).is_accept());
    }

    #[test]
    fn join_targets_and_quoted_names_are_checked_case_insensitively() {
        assert!(
            validate(
                r#"SELECT * FROM "SAMPLE" s JOIN `emp` e ON s.id = e.id"#,
                &tables(),
                CAP
            )
            .is_accept()
        );
        let reason = rejected(validate(
            "SELECT * FROM sample JOIN salaries ON 1=1",
            &tables(),
            CAP,
        ));
        assert!(reason.contains("'salaries'"));
    }

    #[test]
    fn statement_chaining_is_blocked() {
        assert_eq!(
            rejected(validate(
                "SELECT * FROM sample; SELECT * FROM emp;",
                &tables(),
                CAP
            )),
            MULTIPLE_STATEMENTS_REJECTION
        );
    }

    #[test]
    fn trailing_separator_is_stripped_before_capping() {
        let v = validate("SELECT COUNT(*) FROM sample;", &tables(), CAP);
        assert_eq!(
            v,
            Verdict::Accept {
                query: "SELECT COUNT(*) FROM sample LIMIT 100".to_string(),
                row_cap_applied: true,
            }
        );
    }

    #[test]
    fn existing_limit_is_kept() {
        let v = validate("select * from sample limit 5", &tables(), CAP);
        assert_eq!(
            v,
            Verdict::Accept {
                query: "select * from sample limit 5".to_string(),
                row_cap_applied: false,
            }
        );
    }

    #[test]
    fn a_column_named_like_limit_does_not_count_as_a_limit() {
        let q = accepted(validate("SELECT credit_limit FROM sample", &tables(), CAP));
        assert!(q.ends_with(" LIMIT 100"), "{q}");
    }

    #[test]
    fn limit_with_offset_is_kept() {
        for q in [
            "SELECT * FROM sample LIMIT 10 OFFSET 20",
            "SELECT * FROM sample LIMIT 20, 10",
        ] {
            assert_eq!(accepted(validate(q, &tables(), CAP)), q);
        }
    }

    #[test]
    fn unbounded_or_misplaced_limits_get_wrapped() {
        for q in [
            "SELECT id FROM sample LIMIT -1",
            "SELECT id, 'no limit' AS note FROM sample",
            "SELECT id FROM sample WHERE id > (SELECT 0 LIMIT 1)",
            "SELECT id FROM sample -- LIMIT 5",
            "SELECT id FROM sample /* LIMIT 5 */",
        ] {
            let v = validate(q, &tables(), CAP);
            assert_eq!(
                v,
                Verdict::Accept {
                    query: format!("SELECT * FROM ({}\n) LIMIT 100", q),
                    row_cap_applied: true,
                },
                "{q}"
            );
        }
    }

    #[test]
    fn wrapped_query_is_stable_under_revalidation() {
        let first = accepted(validate("SELECT id FROM sample LIMIT -1", &tables(), CAP));
        assert_eq!(accepted(validate(&first, &tables(), CAP)), first);
    }

    #[test]
    fn paren_depth_ignores_literals_and_comments() {
        assert_eq!(paren_depth_at("SELECT (1", 9), Some(1));
        assert_eq!(paren_depth_at("SELECT '(' ", 11), Some(0));
        assert_eq!(paren_depth_at("SELECT 'open", 12), None);
        assert_eq!(paren_depth_at("SELECT 1 -- x", 13), None);
        assert_eq!(paren_depth_at("SELECT 1 /* ( */ ", 17), Some(0));
    }

    #[test]
    fn row_cap_normalization_is_idempotent() {
        let first = accepted(validate("SELECT * FROM sample", &tables(), CAP));
        assert!(first.contains("LIMIT 100"));
        let second = validate(&first, &tables(), CAP);
        assert_eq!(
            second,
            Verdict::Accept {
                query: first.clone(),
                row_cap_applied: false,
            }
        );
    }

    #[test]
    fn derived_tables_are_a_known_blind_spot() {
        // `FROM (` is skipped; the inner FROM is still checked
        assert!(
            validate(
                "SELECT n FROM (SELECT COUNT(*) AS n FROM sample)",
                &tables(),
                CAP
            )
            .is_accept()
        );
        assert!(
            !validate(
                "SELECT n FROM (SELECT COUNT(*) AS n FROM ghost)",
                &tables(),
                CAP
            )
            .is_accept()
        );
        // only the first name of a comma list is seen
        assert_eq!(referenced_tables("SELECT * FROM sample, ghost"), vec!["sample"]);
    }
}
