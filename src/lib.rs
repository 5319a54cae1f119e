//! sqlscout: a read-only SQL question-answering agent.
//!
//! A language model is driven through a bounded THOUGHT / ACTION /
//! OBSERVATION loop against a single SQLite database. The model may only act
//! through three tools (`list_tables`, `describe_table`, `query_database`),
//! every query passes a SELECT-only validator, and a final answer is accepted
//! only after at least one tool has run for the current question.
//!
//! # Crate Structure
//!
//! - [`core`]: errors, configuration, the read-only connection, retry,
//!   output bounding and the JSONL step trace.
//! - [`agent`]: action parser, SQL validator, tool registry, evidence cache,
//!   prompt assembly, model backends and the step loop.
//!
//! # Examples
//!
//! ```bash
//! sqlscout --db sample.sqlite --model-cmd "my-llm --temperature 0" \
//!     ask "How many plasterers drive a Mitsubishi?"
//! sqlscout --db sample.sqlite check "SELECT * FROM sample"
//! ```

pub mod agent;
pub mod core;

use crate::agent::model::{CommandModel, RetryingModel};
use crate::agent::runner::{RunOutcome, RunStatus, SqlAgent};
use crate::agent::tools::{self, ToolRegistry};
use crate::agent::validator::{self, Verdict};
use crate::core::config::{self, AgentConfig};
use crate::core::db::AccessMode;
use crate::core::error::ScoutError;
use crate::core::output;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

const RULE_WIDTH: usize = 60;

#[derive(Parser, Debug)]
#[clap(
    name = "sqlscout",
    version = env!("CARGO_PKG_VERSION"),
    about = "Answer questions about a SQLite database with a read-only agent"
)]
struct Cli {
    /// SQLite database file.
    #[clap(long, global = true)]
    db: Option<PathBuf>,
    /// Config file (defaults to sqlscout.toml beside the database, then in the cwd).
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    /// Override the loop iteration budget.
    #[clap(long, global = true)]
    step_limit: Option<usize>,
    /// Model program: reads the prompt on stdin, writes the reply to stdout.
    #[clap(long, global = true)]
    model_cmd: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer each question in turn
    Ask {
        #[clap(required = true)]
        questions: Vec<String>,
    },
    /// Interactive question loop
    Shell,
    /// Print the tool documentation given to the model
    Tools,
    /// List user tables
    Tables,
    /// Show columns and row count for a table
    Describe { table: String },
    /// Run the SQL validator against the live table list
    Check { query: String },
}

pub fn run() -> Result<(), ScoutError> {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Tools) {
        println!("{}", tools::render_tool_docs());
        return Ok(());
    }

    let db_path = cli
        .db
        .clone()
        .ok_or_else(|| ScoutError::ConfigError("--db <path> is required".to_string()))?;
    let cwd = std::env::current_dir()?;
    let mut config = config::load_config(cli.config.as_deref(), &db_path, &cwd)?;
    if let Some(limit) = cli.step_limit {
        config.step_limit = limit;
    }
    if let Some(cmd) = cli.model_cmd {
        config.model_command = Some(cmd);
    }
    config.validate()?;

    match cli.command {
        Command::Tools => Ok(()),
        Command::Tables => {
            let registry = open_registry(&db_path, &config)?;
            for table in registry.list_tables()? {
                println!("{}", table);
            }
            Ok(())
        }
        Command::Describe { table } => {
            let registry = open_registry(&db_path, &config)?;
            print!("{}", registry.describe_table(&table)?.format());
            Ok(())
        }
        Command::Check { query } => {
            let registry = open_registry(&db_path, &config)?;
            let tables = registry.list_tables()?;
            match validator::validate(&query, &tables, registry.row_cap()) {
                Verdict::Accept {
                    query,
                    row_cap_applied,
                } => {
                    println!("{} {}", "ACCEPT".green().bold(), query);
                    if row_cap_applied {
                        println!("  (row cap {} applied)", registry.row_cap());
                    }
                    Ok(())
                }
                Verdict::Reject { reason } => {
                    println!("{} {}", "REJECT".red().bold(), reason);
                    Err(ScoutError::ValidationRejected(reason))
                }
            }
        }
        Command::Ask { questions } => {
            let mut agent = open_agent(&db_path, config)?;
            let total = questions.len();
            for (i, question) in questions.iter().enumerate() {
                println!("\n{}", "=".repeat(RULE_WIDTH));
                println!("QUESTION {}/{}: {}", i + 1, total, question.bold());
                println!("{}", "=".repeat(RULE_WIDTH));
                let outcome = agent.run_question(question)?;
                print_outcome(&outcome);
            }
            Ok(())
        }
        Command::Shell => run_shell(&db_path, config),
    }
}

fn open_registry(db_path: &Path, config: &AgentConfig) -> Result<ToolRegistry, ScoutError> {
    let (registry, mode) = ToolRegistry::open(db_path, config)?;
    if mode == AccessMode::QueryOnlyFallback {
        eprintln!(
            "{} read-only open failed for {}; relying on query_only",
            "[Warning]".yellow().bold(),
            db_path.display()
        );
    }
    Ok(registry)
}

fn open_agent(
    db_path: &Path,
    config: AgentConfig,
) -> Result<SqlAgent<RetryingModel<CommandModel>>, ScoutError> {
    let command = config.model_command.as_deref().ok_or_else(|| {
        ScoutError::ConfigError(
            "no model configured: pass --model-cmd or set model_command in sqlscout.toml"
                .to_string(),
        )
    })?;
    let model = RetryingModel::new(
        CommandModel::from_command_line(command)?,
        config.retry.clone(),
    );
    let registry = open_registry(db_path, &config)?;
    Ok(SqlAgent::new(registry, model, config))
}

fn run_shell(db_path: &Path, config: AgentConfig) -> Result<(), ScoutError> {
    let mut agent = open_agent(db_path, config)?;
    println!("{}", "sqlscout shell (exit, quit or q to leave)".bold());

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{} ", "Question>".cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let question = line?;
        let question = question.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit" | "q") {
            break;
        }

        match agent.run_question(question) {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => eprintln!("{} {}", "[Error]".red().bold(), e),
        }
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    let rule = "-".repeat(RULE_WIDTH);
    let heading = match outcome.status {
        RunStatus::Answered => "FINAL ANSWER:".green().bold(),
        RunStatus::StepBudgetExhausted => "STEP BUDGET EXHAUSTED:".yellow().bold(),
    };
    println!("\n{}\n{}\n{}\n{}", rule, heading, rule, outcome.answer);

    for warning in &outcome.warnings {
        eprintln!("{} {}", "[Warning]".yellow().bold(), warning);
    }

    if !outcome.history.is_empty() {
        eprintln!("\n{}\n{}\n{}", rule, "FULL TRACE:".bold(), rule);
        for (i, block) in outcome.history.iter().enumerate() {
            eprintln!("\n--- Step {} ---", i + 1);
            eprintln!("{}", block.render());
        }
    }

    if !outcome.logs.is_empty() {
        eprintln!("\n{}\n{}\n{}", rule, "AGENT LOGS:".bold(), rule);
        for line in &outcome.logs {
            eprintln!("{}", output::compact_line(line, 200).dimmed());
        }
    }
}
