use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::filter::SortMode;
use crate::item::Reminder;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "foothold",
    version,
    about = "Foothold: goals, projects and tasks from the terminal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an item.
    Add {
        title: String,
        #[command(flatten)]
        fields: ItemFields,
    },
    /// Change fields of an item; unset options keep their value.
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: ItemFields,
        #[arg(long)]
        clear_due: bool,
        #[arg(long)]
        clear_reminders: bool,
    },
    /// Show the filtered, sorted view.
    List(ListArgs),
    /// Show one item in full.
    Show { id: i64 },
    /// Toggle completion.
    Done { id: i64 },
    Delete { id: i64 },
    /// Restore the last deleted item.
    Undo,
    #[command(subcommand)]
    Subtask(SubtaskCommand),
    /// Manually reorder an item within the current view.
    Move {
        id: i64,
        #[command(flatten)]
        target: MoveTarget,
    },
    #[command(subcommand)]
    Category(CategoryCommand),
    /// Show or change status thresholds and display settings.
    Settings {
        #[arg(long)]
        urgent_hours: Option<u32>,
        #[arg(long)]
        upcoming_days: Option<u32>,
        #[arg(long, action = ArgAction::Set)]
        show_counts: Option<bool>,
        #[arg(long)]
        theme: Option<String>,
    },
    /// Write items and categories as JSON.
    Export { path: Option<PathBuf> },
    /// Replace all items and categories from an export.
    Import { path: Option<PathBuf> },
    /// Fire due reminders.
    Remind {
        /// Keep ticking at the configured period.
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ItemFields {
    /// Category id or name.
    #[arg(long, short = 'c')]
    pub category: Option<String>,
    /// YYYY-MM-DD, today, tomorrow, +3d, +2w or a weekday.
    #[arg(long)]
    pub due: Option<String>,
    /// HH:MM, 3pm, noon, ...
    #[arg(long)]
    pub time: Option<String>,
    #[arg(long, short = 'd')]
    pub description: Option<String>,
    #[arg(long = "subtask")]
    pub subtasks: Vec<String>,
    /// 30m, 2h, 1d, 1w; repeatable.
    #[arg(long = "remind")]
    pub reminders: Vec<Reminder>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Category id or name; repeatable, matches any.
    #[arg(long, short = 'c')]
    pub category: Vec<String>,
    #[arg(long)]
    pub completed: bool,
    #[arg(long, short = 's')]
    pub search: Option<String>,
    #[arg(long, default_value_t = SortMode::Manual)]
    pub sort: SortMode,
}

/// Where a moved item or subtask lands.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct MoveTarget {
    /// Drop in front of this id.
    #[arg(long)]
    pub before: Option<i64>,
    /// Drop at the end.
    #[arg(long)]
    pub end: bool,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct CategoryMoveTarget {
    /// Drop in front of this category (id or name).
    #[arg(long)]
    pub before: Option<String>,
    #[arg(long)]
    pub end: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubtaskCommand {
    Add { item: i64, text: String },
    /// Remove by position (1-based).
    Remove { item: i64, position: usize },
    Toggle { item: i64, subtask: i64 },
    Move {
        item: i64,
        subtask: i64,
        #[command(flatten)]
        target: MoveTarget,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    List,
    Add { name: String },
    Rename { category: String, name: String },
    /// Delete a category and every item in it.
    Delete { category: String },
    Move {
        category: String,
        #[command(flatten)]
        target: CategoryMoveTarget,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{CategoryCommand, Command, GlobalCli};

    fn parse(args: &[&str]) -> GlobalCli {
        GlobalCli::try_parse_from(std::iter::once("foothold").chain(args.iter().copied()))
            .expect("parse args")
    }

    #[test]
    fn parses_add_with_repeated_options() {
        let cli = parse(&[
            "-vv", "add", "Standup", "--due", "tomorrow", "--time", "9am", "--remind", "15m",
            "--remind", "1h", "--subtask", "notes",
        ]);
        assert_eq!(cli.verbose, 2);
        let Some(Command::Add { title, fields }) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(title, "Standup");
        assert_eq!(fields.reminders.len(), 2);
        assert_eq!(fields.subtasks, vec!["notes"]);
    }

    #[test]
    fn move_needs_exactly_one_target() {
        let cli = parse(&["category", "move", "task", "--before", "goal"]);
        let Some(Command::Category(CategoryCommand::Move { target, .. })) = cli.command else {
            panic!("expected category move");
        };
        assert_eq!(target.before.as_deref(), Some("goal"));

        assert!(GlobalCli::try_parse_from(["foothold", "move", "1"]).is_err());
        assert!(GlobalCli::try_parse_from(["foothold", "move", "1", "--before", "2", "--end"]).is_err());
    }

    #[test]
    fn rc_overrides_are_global() {
        let cli = parse(&["list", "--rc", "color=off", "--sort", "date"]);
        assert_eq!(cli.rc_overrides[0].key, "color");
        assert_eq!(cli.rc_overrides[0].value, "off");
    }
}
