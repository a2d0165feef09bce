use agora_core::{RecordId, RecordKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agora")]
#[command(author, version, about = "Forum BBCode post-processing: remote image mirroring")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the media server and the background postprocess queue
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one postprocess pass over a record in the foreground
    Postprocess {
        /// Record kind: newsitem, forumpost or forumuser
        kind: RecordKind,

        /// Record ID
        id: RecordId,
    },

    /// Postprocess every record of every kind
    TriggerAll,

    /// Re-render every record's rendered text from its raw text
    Regenerate,

    /// List image URLs containing a fragment
    FindUrls {
        /// Substring to search for
        #[arg(long)]
        url: String,
    },

    /// Replace linked thumbnails with the image they link to
    CleanUrlImages,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        #[arg(value_name = "CONFIG")]
        path: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
