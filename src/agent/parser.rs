//! Free-text protocol parsing.
//!
//! The model speaks a line-oriented format:
//!
//! ```text
//! THOUGHT: <free text>
//! ACTION: <tool_name>{<json object>}
//! OBSERVATION: <filled in by the agent>
//! FINAL ANSWER: <free text>
//! ```
//!
//! Markers are matched case-insensitively. A section runs from its marker to
//! the next recognized marker or end of text.

use crate::core::error::ScoutError;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

pub const THOUGHT_MARKER: &str = "THOUGHT:";
pub const ACTION_MARKER: &str = "ACTION:";
pub const OBSERVATION_MARKER: &str = "OBSERVATION:";
pub const FINAL_ANSWER_MARKER: &str = "FINAL ANSWER:";

const EXPECTED_FORMAT: &str = "Expected format: ACTION: tool_name{json_args}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Thought,
    Action,
    Observation,
    FinalAnswer,
}

impl Section {
    pub fn marker(self) -> &'static str {
        match self {
            Section::Thought => THOUGHT_MARKER,
            Section::Action => ACTION_MARKER,
            Section::Observation => OBSERVATION_MARKER,
            Section::FinalAnswer => FINAL_ANSWER_MARKER,
        }
    }

    fn matches_marker(self, found: &str) -> bool {
        found.eq_ignore_ascii_case(self.marker())
    }
}

static MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:THOUGHT|ACTION|OBSERVATION|FINAL ANSWER):").unwrap());

// Tolerates markdown decoration around the tool name: ACTION: `list_tables{}`
static ACTION_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bACTION:[\s`*]*([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(name: &str, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            arguments,
        }
    }

    /// Wire form, as it is replayed into later prompts: `name{"k":"v"}`.
    pub fn render(&self) -> String {
        format!("{}{}", self.name, Value::Object(self.arguments.clone()))
    }
}

/// Content of the first `section` in `text`, trimmed. Empty when absent.
pub fn extract_section(text: &str, section: Section) -> String {
    let Some(start) = MARKERS
        .find_iter(text)
        .find(|m| section.matches_marker(m.as_str()))
        .map(|m| m.end())
    else {
        return String::new();
    };

    let end = MARKERS
        .find_at(text, start)
        .map(|m| m.start())
        .unwrap_or(text.len());
    text[start..end].trim().to_string()
}

/// Locate the `ACTION` marker and decode its tool name and arguments.
pub fn parse_action(text: &str) -> Result<ToolInvocation, ScoutError> {
    let caps = ACTION_HEAD.captures(text).ok_or_else(|| {
        ScoutError::ParseError(format!(
            "No valid ACTION found in response. {}",
            EXPECTED_FORMAT
        ))
    })?;
    let name = caps[1].to_string();
    let head_end = caps.get(0).map(|m| m.end()).unwrap_or(text.len());

    let rest = text[head_end..].trim_start();
    if !rest.starts_with('{') {
        return Ok(ToolInvocation::new(&name, Map::new()));
    }

    let arg_text = balanced_object(rest).unwrap_or_else(|| {
        let end = MARKERS.find(rest).map(|m| m.start()).unwrap_or(rest.len());
        rest[..end].trim_end()
    });

    let arguments = decode_arguments(arg_text)?;
    Ok(ToolInvocation::new(&name, arguments))
}

/// Decode an argument object: strict JSON, then single-to-double quote
/// repair, then literal-structure parsing. The first decoder that succeeds
/// decides; its result must be an object.
pub fn decode_arguments(raw: &str) -> Result<Map<String, Value>, ScoutError> {
    let raw = raw.trim();
    let value = serde_json::from_str::<Value>(raw)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&raw.replace('\'', "\"")).ok())
        .or_else(|| literal::parse(raw).ok())
        .ok_or_else(|| {
            ScoutError::ParseError(format!("Could not parse JSON arguments: {}", raw))
        })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ScoutError::ParseError(format!(
            "ACTION arguments must be a JSON object (dict), got: {}",
            raw
        ))),
    }
}

/// The `{...}` prefix of `s` with braces balanced, skipping quoted text.
fn balanced_object(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Literal-structure decoding: dicts, lists, tuples, quoted strings,
/// numbers and `True`/`False`/`None`. Nothing is evaluated.
mod literal {
    use super::*;

    pub(super) fn parse(input: &str) -> Result<Value, String> {
        let mut p = Parser {
            chars: input.chars().collect(),
            pos: 0,
        };
        let value = p.value()?;
        p.skip_ws();
        if p.pos != p.chars.len() {
            return Err(format!("trailing input at offset {}", p.pos));
        }
        Ok(value)
    }

    struct Parser {
        chars: Vec<char>,
        pos: usize,
    }

    impl Parser {
        fn peek(&self) -> Option<char> {
            self.chars.get(self.pos).copied()
        }

        fn bump(&mut self) -> Option<char> {
            let c = self.peek()?;
            self.pos += 1;
            Some(c)
        }

        fn skip_ws(&mut self) {
            while self.peek().is_some_and(char::is_whitespace) {
                self.pos += 1;
            }
        }

        fn expect(&mut self, want: char) -> Result<(), String> {
            self.skip_ws();
            match self.bump() {
                Some(c) if c == want => Ok(()),
                Some(c) => Err(format!("expected '{}' but found '{}'", want, c)),
                None => Err(format!("expected '{}' but input ended", want)),
            }
        }

        fn value(&mut self) -> Result<Value, String> {
            self.skip_ws();
            match self.peek() {
                Some('{') => self.dict(),
                Some('[') => self.sequence('[', ']'),
                Some('(') => self.sequence('(', ')'),
                Some('\'') | Some('"') => self.string().map(Value::String),
                Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
                Some(c) if c.is_ascii_alphabetic() => self.keyword(),
                Some(c) => Err(format!("unexpected '{}'", c)),
                None => Err("unexpected end of input".to_string()),
            }
        }

        fn dict(&mut self) -> Result<Value, String> {
            self.expect('{')?;
            let mut map = Map::new();
            loop {
                self.skip_ws();
                if self.peek() == Some('}') {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                let key = match self.value()? {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    other => return Err(format!("unsupported dict key {}", other)),
                };
                self.expect(':')?;
                let val = self.value()?;
                map.insert(key, val);
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some('}') => return Ok(Value::Object(map)),
                    _ => return Err("expected ',' or '}' in dict".to_string()),
                }
            }
        }

        fn sequence(&mut self, open: char, close: char) -> Result<Value, String> {
            self.expect(open)?;
            let mut items = Vec::new();
            loop {
                self.skip_ws();
                if self.peek() == Some(close) {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                items.push(self.value()?);
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some(c) if c == close => return Ok(Value::Array(items)),
                    _ => return Err(format!("expected ',' or '{}'", close)),
                }
            }
        }

        fn string(&mut self) -> Result<String, String> {
            let quote = self.bump().ok_or("expected string")?;
            let mut out = String::new();
            loop {
                match self.bump() {
                    None => return Err("unterminated string".to_string()),
                    Some(c) if c == quote => return Ok(out),
                    Some('\\') => match self.bump() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('r') => out.push('\r'),
                        Some('0') => out.push('\0'),
                        Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                        Some(c) => {
                            out.push('\\');
                            out.push(c);
                        }
                        None => return Err("unterminated escape".to_string()),
                    },
                    Some(c) => out.push(c),
                }
            }
        }

        fn number(&mut self) -> Result<Value, String> {
            let start = self.pos;
            if matches!(self.peek(), Some('-') | Some('+')) {
                self.pos += 1;
            }
            let mut is_float = false;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == '_' {
                    self.pos += 1;
                } else if c == '.' || c == 'e' || c == 'E' {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-') | Some('+')) && c != '.' {
                        self.pos += 1;
                    }
                } else {
                    break;
                }
            }
            let text: String = self.chars[start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();

            if !is_float {
                if let Ok(i) = text.parse::<i64>() {
                    return Ok(Value::Number(i.into()));
                }
            }
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("invalid number '{}'", text))
        }

        fn keyword(&mut self) -> Result<Value, String> {
            let start = self.pos;
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                self.pos += 1;
            }
            let word: String = self.chars[start..self.pos].iter().collect();
            match word.as_str() {
                "True" | "true" => Ok(Value::Bool(true)),
                "False" | "false" => Ok(Value::Bool(false)),
                "None" | "null" => Ok(Value::Null),
                other => Err(format!("names are not literals: '{}'", other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn parses_strict_json_arguments() {
        let inv = parse_action(
            "THOUGHT: look at it\nACTION: describe_table{\"table_name\": \"sample\"}",
        )
        .expect("parse");
        assert_eq!(inv.name, "describe_table");
        assert_eq!(inv.arguments, args(json!({"table_name": "sample"})));
    }

    #[test]
    fn single_quotes_are_repaired() {
        let inv = parse_action("ACTION: describe_table{'table_name': 'sample'}").expect("parse");
        assert_eq!(inv.name, "describe_table");
        assert_eq!(inv.arguments, args(json!({"table_name": "sample"})));
    }

    #[test]
    fn literal_fallback_handles_mixed_quotes() {
        // quote repair breaks the embedded SQL literal; the literal decoder does not
        let inv = parse_action(
            r#"ACTION: query_database{'query': "SELECT * FROM sample WHERE city = 'Oslo'", 'strict': True, 'hint': None}"#,
        )
        .expect("parse");
        assert_eq!(
            inv.arguments,
            args(json!({
                "query": "SELECT * FROM sample WHERE city = 'Oslo'",
                "strict": true,
                "hint": null
            }))
        );
    }

    #[test]
    fn nested_braces_stay_inside_arguments() {
        let inv = parse_action(
            r#"ACTION: query_database{"query": "SELECT 1", "opts": {"explain": false}}
OBSERVATION: (pending)"#,
        )
        .expect("parse");
        assert_eq!(inv.arguments["opts"], json!({"explain": false}));
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_object() {
        let inv = parse_action(r#"ACTION: query_database{"query": "SELECT '}' AS brace"}"#)
            .expect("parse");
        assert_eq!(inv.arguments["query"], json!("SELECT '}' AS brace"));
    }

    #[test]
    fn missing_marker_is_a_parse_error() {
        let err = parse_action("I think the answer is 42").expect_err("no marker");
        assert!(matches!(err, ScoutError::ParseError(_)));
        assert!(err.to_string().contains("ACTION: tool_name{json_args}"));
    }

    #[test]
    fn absent_arguments_yield_empty_mapping() {
        let inv = parse_action("ACTION: list_tables").expect("parse");
        assert_eq!(inv.name, "list_tables");
        assert!(inv.arguments.is_empty());

        let inv = parse_action("action: list_tables{}").expect("parse");
        assert!(inv.arguments.is_empty());
    }

    #[test]
    fn markdown_wrapped_action_is_tolerated() {
        let inv = parse_action("**ACTION:** `list_tables{}`").expect("parse");
        assert_eq!(inv.name, "list_tables");
    }

    #[test]
    fn undecodable_arguments_echo_raw_text() {
        let err = parse_action("ACTION: describe_table{table_name: sample}").expect_err("bad");
        assert!(
            err.to_string().contains("{table_name: sample}"),
            "{}",
            err
        );
    }

    #[test]
    fn unterminated_object_is_a_parse_error() {
        let err = parse_action("ACTION: describe_table{\"table_name\": \"sample\"\nFINAL ANSWER: x")
            .expect_err("unbalanced");
        assert!(matches!(err, ScoutError::ParseError(_)));
    }

    #[test]
    fn non_mapping_arguments_are_rejected() {
        assert!(decode_arguments("[1, 2]").is_err());
        assert!(decode_arguments("'sample'").is_err());
        assert!(decode_arguments("(1, 2)").is_err());
    }

    #[test]
    fn literal_decoder_never_evaluates_names() {
        assert!(literal::parse("{'a': __import__}").is_err());
        assert!(literal::parse("{'a': 1 + 2}").is_err());
        assert_eq!(
            literal::parse("{'n': -3, 'f': 2.5, 't': (1, 'x',)}").expect("literal"),
            json!({"n": -3, "f": 2.5, "t": [1, "x"]})
        );
    }

    #[test]
    fn render_round_trips_through_parser() {
        let inv = ToolInvocation::new("describe_table", args(json!({"table_name": "emp"})));
        assert_eq!(inv.render(), r#"describe_table{"table_name":"emp"}"#);
        let back = parse_action(&format!("ACTION: {}", inv.render())).expect("parse");
        assert_eq!(back, inv);
    }

    #[test]
    fn sections_run_to_next_marker() {
        let text = "THOUGHT: count rows first\nACTION: list_tables{}\nOBSERVATION: []";
        assert_eq!(extract_section(text, Section::Thought), "count rows first");
        assert_eq!(extract_section(text, Section::Action), "list_tables{}");
        assert_eq!(extract_section(text, Section::FinalAnswer), "");
    }

    #[test]
    fn final_answer_runs_to_end_of_text() {
        let text = "thought: done\nFinal Answer: There are 12 rows\nin total.";
        assert_eq!(
            extract_section(text, Section::FinalAnswer),
            "There are 12 rows\nin total."
        );
    }

    #[test]
    fn empty_section_is_empty_not_the_next_marker() {
        let text = "THOUGHT:\nACTION: list_tables{}";
        assert_eq!(extract_section(text, Section::Thought), "");
    }
}
