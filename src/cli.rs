use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docfuse",
    version,
    about = "Hybrid keyword + semantic retrieval over your local documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load, chunk and index documents
    Ingest(IngestArgs),
    /// Retrieve the chunks most relevant to a query
    Query(QueryArgs),
    /// Remove every chunk of an indexed source
    Remove {
        /// Source id (file name) as shown by `docfuse sources`
        source: String,
    },
    /// Show index statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List indexed sources
    Sources,
    /// Delete the whole index
    Clear,
    /// Print the text docfuse extracts from a file
    Show {
        path: PathBuf,
    },
    /// Show the document/term graph of the keyword index
    Graph(GraphArgs),
    /// Inspect or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Files to index
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Run on the background pool and poll until done
    #[arg(long)]
    pub background: bool,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The query text
    pub query: String,

    /// Number of chunks to return (defaults to the retrieval_k setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct GraphArgs {
    /// Maximum number of chunks to include
    #[arg(long, default_value_t = docfuse::graph::DEFAULT_MAX_DOCS)]
    pub max_docs: usize,

    /// Terms linked per chunk
    #[arg(long, default_value_t = docfuse::graph::DEFAULT_TERMS_PER_DOC)]
    pub terms: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the live settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate and persist a setting
    Set { key: String, value: String },
    /// Revert every setting to its default
    Reset,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docfuse",
            &mut std::io::stdout(),
        );
    }
}
