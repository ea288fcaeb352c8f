use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use session_store::{Role, SummaryFormat};

/// Inspect and drive an append-only agent session log
#[derive(Parser, Debug)]
#[command(name = "tape-session")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Session file (default: newest file under .agent/sessions, created when absent)
    #[arg(long, global = true, value_name = "PATH", env = "TAPE_SESSION_PATH")]
    pub session: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a session header if the file is missing or empty
    Init,

    /// Append a message on the active branch
    Append {
        #[arg(value_enum)]
        role: RoleArg,

        content: String,
    },

    /// Append a tool call
    ToolCall {
        tool: String,

        arg: String,
    },

    /// Append a tool result
    ToolResult {
        tool: String,

        content: String,

        /// Record the result as a failure
        #[arg(long)]
        failed: bool,
    },

    /// Print every entry in file order
    Entries,

    /// Print the active context
    Context {
        /// Include bookkeeping entries (turn markers, model changes, ...)
        #[arg(long)]
        verbose: bool,

        /// One JSON entry per line
        #[arg(long)]
        json: bool,
    },

    /// Move the head to an entry, or back to the root
    Branch {
        #[arg(value_name = "ENTRY_ID", required_unless_present = "root", conflicts_with = "root")]
        id: Option<String>,

        #[arg(long)]
        root: bool,
    },

    /// Set or clear the label of an entry
    Label {
        #[arg(value_name = "ENTRY_ID")]
        id: String,

        #[arg(required_unless_present = "clear", conflicts_with = "clear")]
        label: Option<String>,

        #[arg(long)]
        clear: bool,
    },

    /// Print the effective labels
    Labels,

    /// Summarize older context entries into a compaction record
    Compact {
        /// Business entries kept verbatim (default: from env or 4)
        #[arg(long)]
        keep_last: Option<usize>,

        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,

        /// Label attached to the new summary
        #[arg(long)]
        label: Option<String>,

        /// Fold into the previous markdown summary when there is one
        #[arg(long)]
        merge: bool,
    },

    /// Run one agent turn with the mock model and builtin tools
    Run {
        prompt: String,

        #[arg(long, default_value_t = crate::agent::DEFAULT_MAX_STEPS)]
        max_steps: usize,
    },

    /// Show how the head resolves
    Leaf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    User,
    Assistant,
    Tool,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
            RoleArg::Tool => Role::Tool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Text,
    Md,
    Json,
}

impl From<FormatArg> for SummaryFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Text => SummaryFormat::Text,
            FormatArg::Md => SummaryFormat::Md,
            FormatArg::Json => SummaryFormat::Json,
        }
    }
}
