//! Prompt text. The FORMAT block here and the markers in `parser` are one
//! contract; change them together.

pub const SYSTEM_HEADER: &str = "You are a cautious, read-only SQL Database Agent.

Behavior:
- After each OBSERVATION, if you still need information, produce ANOTHER ACTION.
- Do NOT write FINAL ANSWER until you have evidence from tools in THIS conversation.
- Never rely on prior assumptions or memory; verify with tools every time.
- Exactly one ACTION per step. Keep THOUGHT brief.
- If the last step had an error in OBSERVATION, fix it in the next step.
- If you have not run any ACTION for the current question, you MUST NOT produce a FINAL ANSWER.
FORMAT (strict):
THOUGHT: ...
ACTION: <tool_name>{<valid JSON args>}
OBSERVATION: ...
...
FINAL ANSWER: ...";

pub const WORKED_EXAMPLE: &str = r#"User: How many plasterers drive a Mitsubishi?
THOUGHT: I need to see which tables exist first.
ACTION: list_tables{}
OBSERVATION: ["emp", "sample"]
THOUGHT: I will check the columns of the sample table.
ACTION: describe_table{"table_name": "sample"}
OBSERVATION: {"table_name": "sample", "columns": [{"name": "id", "type": "INTEGER"}, {"name": "car", "type": "TEXT"}], "row_count": 5000}
THOUGHT: Now the emp table, to find a profession column.
ACTION: describe_table{"table_name": "emp"}
OBSERVATION: {"table_name": "emp", "columns": [{"name": "id", "type": "INTEGER"}, {"name": "emp_job", "type": "TEXT"}], "row_count": 5000}
THOUGHT: emp_job holds the profession. I can join on id and count.
ACTION: query_database{"query": "SELECT COUNT(*) AS n FROM sample JOIN emp ON sample.id = emp.id WHERE sample.car = 'Mitsubishi' AND emp.emp_job = 'Plasterer'"}
OBSERVATION: {"columns": ["n"], "rows": [[7]], "row_count": 1}
THOUGHT: I have the count.
FINAL ANSWER: There are 7 plasterers who drive a Mitsubishi."#;

const NO_HISTORY: &str = "(none yet)";

/// Header, tool docs, worked example, trace so far, then the question.
pub fn build_prompt(tool_docs: &str, history: &[String], question: &str) -> String {
    let trace = if history.is_empty() {
        NO_HISTORY.to_string()
    } else {
        history.join("\n")
    };

    [
        SYSTEM_HEADER.to_string(),
        format!("TOOLS:\n{}\n", tool_docs),
        format!("EXAMPLE:\n{}", WORKED_EXAMPLE),
        format!("CONVERSATION TRACE:\n{}", trace),
        format!("User: {}", question),
        "Respond using the strict FORMAT above.".to_string(),
    ]
    .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::parser::{self, Section};
    use crate::agent::tools::render_tool_docs;

    #[test]
    fn empty_history_is_marked() {
        let prompt = build_prompt(&render_tool_docs(), &[], "How many rows?");
        assert!(prompt.contains("CONVERSATION TRACE:\n(none yet)"));
        assert!(prompt.ends_with("User: How many rows?\n\nRespond using the strict FORMAT above."));
    }

    #[test]
    fn history_is_replayed_in_order() {
        let history = vec![
            "THOUGHT: a\nACTION: list_tables{}\nOBSERVATION: [\"emp\"]".to_string(),
            "THOUGHT: b\nACTION: describe_table{\"table_name\":\"emp\"}\nOBSERVATION: {}"
                .to_string(),
        ];
        let prompt = build_prompt("- t(): d", &history, "q");
        let first = prompt.find("THOUGHT: a").expect("first block");
        let second = prompt.find("THOUGHT: b").expect("second block");
        assert!(first < second);
        assert!(prompt.contains("TOOLS:\n- t(): d\n"));
    }

    #[test]
    fn header_format_uses_parser_markers() {
        for section in [
            Section::Thought,
            Section::Action,
            Section::Observation,
            Section::FinalAnswer,
        ] {
            assert!(
                SYSTEM_HEADER.contains(&format!("\n{} ", section.marker())),
                "header missing {}",
                section.marker()
            );
        }
    }

    #[test]
    fn worked_example_actions_parse() {
        let actions: Vec<&str> = WORKED_EXAMPLE
            .lines()
            .filter(|l| l.starts_with(parser::ACTION_MARKER))
            .collect();
        assert_eq!(actions.len(), 4);
        for line in actions {
            parser::parse_action(line).expect("example action parses");
        }
    }
}
