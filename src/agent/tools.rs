//! The fixed, read-only tool set exposed to the model.

use crate::agent::validator::{self, Verdict};
use crate::core::config::AgentConfig;
use crate::core::db::{self, AccessMode};
use crate::core::error::ScoutError;
use crate::core::output;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

const DISPLAY_ROWS: usize = 50;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ListTables,
    DescribeTable,
    QueryDatabase,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::ListTables,
        ToolKind::DescribeTable,
        ToolKind::QueryDatabase,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::ListTables => "list_tables",
            ToolKind::DescribeTable => "describe_table",
            ToolKind::QueryDatabase => "query_database",
        }
    }

    /// Look a tool up by the name the model used. `run_query` is accepted
    /// for `query_database`.
    pub fn resolve(name: &str) -> Option<ToolKind> {
        if name.eq_ignore_ascii_case("run_query") {
            return Some(ToolKind::QueryDatabase);
        }
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    pub fn descriptor(self) -> ToolDescriptor {
        match self {
            ToolKind::ListTables => ToolDescriptor {
                name: self.name(),
                description: "Lists all tables in the database",
                parameters: &[],
            },
            ToolKind::DescribeTable => ToolDescriptor {
                name: self.name(),
                description: "Returns schema details for a specific table including columns, types, and row count",
                parameters: &[("table_name", "string - name of the table to describe")],
            },
            ToolKind::QueryDatabase => ToolDescriptor {
                name: self.name(),
                description: "Executes a read-only SELECT query on the database",
                parameters: &[("query", "string - SQL SELECT query to execute")],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// (parameter name, free-text type hint)
    pub parameters: &'static [(&'static str, &'static str)],
}

impl ToolDescriptor {
    /// `- name(param: hint, ...): description`
    pub fn render(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|(name, hint)| format!("{}: {}", name, hint))
            .collect::<Vec<_>>()
            .join(", ");
        format!("- {}({}): {}", self.name, params, self.description)
    }
}

/// Documentation block for every tool, one line each.
pub fn render_tool_docs() -> String {
    ToolKind::ALL
        .iter()
        .map(|k| k.descriptor().render())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
}

impl TableDescription {
    pub fn format(&self) -> String {
        let mut out = format!(
            "Table: {}\nRow Count: {}\nColumns:\n",
            self.table_name, self.row_count
        );
        for col in &self.columns {
            out.push_str(&format!("  - {} ({})\n", col.name, col.declared_type));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// The validator added the default LIMIT.
    #[serde(skip)]
    pub row_cap_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Rows(QueryRows),
    Rejected { error: String },
}

impl QueryOutcome {
    pub fn format(&self) -> String {
        let rows = match self {
            QueryOutcome::Rejected { error } => return format!("ERROR: {}", error),
            QueryOutcome::Rows(rows) => rows,
        };
        if rows.rows.is_empty() {
            return "Query executed successfully but returned no results.".to_string();
        }

        let shown: Vec<Vec<String>> = rows
            .rows
            .iter()
            .take(DISPLAY_ROWS)
            .map(|r| r.iter().map(display_cell).collect())
            .collect();
        let mut out = output::render_table(&rows.columns, &shown);
        if rows.row_count > DISPLAY_ROWS {
            out.push_str(&format!(
                "\n\n... ({} total rows, showing first {})",
                rows.row_count, DISPLAY_ROWS
            ));
        } else {
            out.push_str(&format!("\n\n({} rows)", rows.row_count));
        }
        out
    }
}

fn display_cell(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Result of one tool invocation, serialized as the observation body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Tables(Vec<String>),
    Table(TableDescription),
    Query(QueryOutcome),
}

/// Read-only operations over a single shared connection.
pub struct ToolRegistry {
    conn: Connection,
    row_cap: usize,
}

impl ToolRegistry {
    /// Wrap a connection that the caller already restricted.
    pub fn new(conn: Connection, row_cap: usize) -> Self {
        Self { conn, row_cap }
    }

    pub fn open(db_path: &Path, config: &AgentConfig) -> Result<(Self, AccessMode), ScoutError> {
        let (conn, mode) =
            db::open_read_only(db_path, Duration::from_secs(config.busy_timeout_secs))?;
        Ok((Self::new(conn, config.default_row_cap), mode))
    }

    pub fn row_cap(&self) -> usize {
        self.row_cap
    }

    /// Per-tool dispatch table. Unknown names never get this far.
    pub fn invoke(
        &self,
        kind: ToolKind,
        args: &Map<String, Value>,
    ) -> Result<ToolOutput, ScoutError> {
        match kind {
            ToolKind::ListTables => self.list_tables().map(ToolOutput::Tables),
            ToolKind::DescribeTable => {
                let table = required_str(args, "table_name")?;
                self.describe_table(table).map(ToolOutput::Table)
            }
            ToolKind::QueryDatabase => {
                let query = required_str(args, "query")?;
                self.query_database(query).map(ToolOutput::Query)
            }
        }
    }

    /// User tables from the catalog, alphabetically.
    pub fn list_tables(&self) -> Result<Vec<String>, ScoutError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for r in rows {
            tables.push(r?);
        }
        Ok(tables)
    }

    /// Columns and exact row count. Engine errors (unknown table) pass
    /// through untouched.
    pub fn describe_table(&self, table_name: &str) -> Result<TableDescription, ScoutError> {
        if !IDENTIFIER.is_match(table_name) {
            return Err(ScoutError::ToolExecution(format!(
                "Invalid identifier '{}'. Must start with letter/underscore and contain only alphanumeric/underscore.",
                table_name
            )));
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", table_name))?;
        let cols = stmt.query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get(2)?,
            })
        })?;
        let mut columns = Vec::new();
        for c in cols {
            columns.push(c?);
        }

        let row_count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table_name),
            [],
            |row| row.get(0),
        )?;

        Ok(TableDescription {
            table_name: table_name.to_string(),
            columns,
            row_count,
        })
    }

    /// Validate against the live table list, then run. A rejection is a
    /// normal result; an engine failure is an error.
    pub fn query_database(&self, query: &str) -> Result<QueryOutcome, ScoutError> {
        let tables = self.list_tables()?;
        match validator::validate(query, &tables, self.row_cap) {
            Verdict::Reject { reason } => Ok(QueryOutcome::Rejected { error: reason }),
            Verdict::Accept {
                query,
                row_cap_applied,
            } => {
                let mut rows = self.execute_select(&query)?;
                rows.row_cap_applied = row_cap_applied;
                Ok(QueryOutcome::Rows(rows))
            }
        }
    }

    fn execute_select(&self, sql: &str) -> Result<QueryRows, ScoutError> {
        let exec_err = |e: rusqlite::Error| ScoutError::ToolExecution(e.to_string());

        let mut stmt = self.conn.prepare(sql).map_err(exec_err)?;
        if !stmt.readonly() {
            return Err(ScoutError::ToolExecution(
                "statement would modify the database".to_string(),
            ));
        }
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut result = stmt.query([]).map_err(exec_err)?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().map_err(exec_err)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(json_value(row.get_ref(i).map_err(exec_err)?));
            }
            rows.push(values);
        }

        Ok(QueryRows {
            columns,
            row_count: rows.len(),
            rows,
            row_cap_applied: false,
        })
    }
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ScoutError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ScoutError::ToolExecution(format!(
            "argument '{}' must be a string, got {}",
            key, other
        ))),
        None => Err(ScoutError::ToolExecution(format!(
            "missing required argument '{}'",
            key
        ))),
    }
}

fn json_value(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}
