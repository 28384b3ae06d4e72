use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueHint};

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}",
    arg_required_else_help = true
)]
pub struct Args {
    /// Set output verbosity
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress outputs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as json
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Provide custom config file
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Database to open, overriding the configuration
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub db: Option<String>,

    /// Print statement timings after the command
    #[arg(long, global = true)]
    pub timings: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a query and print its rows
    #[command(arg_required_else_help = true)]
    #[clap(name = "query", visible_alias = "q")]
    Query {
        /// SQL text or the name of a configured statement
        #[arg(required = true)]
        sql: String,

        /// Named argument as name=value; values are parsed as JSON, falling back to text
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Positional argument, bound in order
        #[arg(short = 'a', long = "arg")]
        args: Vec<String>,

        /// Stop after this many rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run an update and print the affected row count
    #[command(arg_required_else_help = true)]
    #[clap(name = "exec", visible_alias = "x")]
    Exec {
        /// SQL text or the name of a configured statement
        #[arg(required = true)]
        sql: String,

        /// Named argument as name=value
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Positional argument, bound in order
        #[arg(short = 'a', long = "arg")]
        args: Vec<String>,

        /// Return these generated key columns instead of a count
        #[arg(short, long)]
        keys: Vec<String>,
    },

    /// Run a statement once per object of a JSON array
    #[command(arg_required_else_help = true)]
    Batch {
        /// SQL text or the name of a configured statement
        #[arg(required = true)]
        sql: String,

        /// JSON file holding an array of objects; stdin when omitted
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,

        /// Parts per driver batch
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Run all parts in one transaction
        #[arg(short, long)]
        transaction: bool,
    },

    /// Run a file of semicolon separated statements
    #[command(arg_required_else_help = true)]
    Script {
        /// Script file
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Generate a documented default configuration file
    #[clap(name = "defconfig")]
    DefConfig {
        /// Where to write the file; the configured location when omitted
        #[arg(value_hint = ValueHint::FilePath)]
        path: Option<PathBuf>,
    },
}
