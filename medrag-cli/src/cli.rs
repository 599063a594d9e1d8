use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Ask questions about a medical reference book.
#[derive(Parser, Debug)]
#[command(name = "medrag", version, about)]
pub struct Cli {
    /// TOML configuration file. `MEDRAG_*` environment variables override it.
    #[arg(long, short = 'c', global = true, env = "MEDRAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Index directory, overriding the configured one.
    #[arg(long, global = true)]
    pub index: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chunk, embed and save extracted pages as the index.
    Ingest {
        /// A directory of per-page `.txt` files or a `.jsonl` file of page records.
        #[arg(long, short = 's')]
        source: PathBuf,
    },
    /// Answer one question and exit.
    Ask {
        /// The question.
        question: String,

        /// Print the whole response as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Interactive question loop.
    Chat {
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Print the retrieved chunks with their source and page.
    #[arg(long)]
    pub show_context: bool,

    /// Build the index from these pages first if it is missing or unreadable.
    #[arg(long, short = 's')]
    pub source: Option<PathBuf>,
}
