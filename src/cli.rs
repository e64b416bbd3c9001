use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Store directory holding config.yaml, tm.csv and the semantic index
    #[clap(short, long, default_value = ".")]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Query the TM for ranked suggestions
    Query {
        /// Source text to match
        text: String,

        /// Language pair, e.g. "en:fr"
        #[clap(short, long)]
        pair: String,

        /// Additional store directories consulted read-only, after the main
        /// store
        #[clap(long = "ref")]
        reference: Vec<PathBuf>,
    },

    /// Add one entry to the TM
    Insert {
        /// Source text
        #[clap(short, long)]
        source: String,

        /// Target text
        #[clap(short, long)]
        target: String,

        /// Language pair, e.g. "en:fr"
        #[clap(short, long)]
        pair: String,

        /// Who or what produced this translation
        #[clap(long, default_value = "")]
        provenance: String,
    },

    /// Delete one entry by id
    Delete {
        id: u64,
    },

    /// Import entries from a TMX file
    ImportTmx {
        file: PathBuf,

        /// Language pair to pick out of the file, e.g. "en:fr"
        #[clap(short, long)]
        pair: String,
    },

    /// Export one language pair of the TM as TMX
    ExportTmx {
        file: PathBuf,

        /// Language pair, e.g. "en:fr"
        #[clap(short, long)]
        pair: String,
    },

    /// Rebuild the semantic index from the store
    Reindex {
        /// Re-embed every entry even if its source is unchanged
        #[clap(short, long, default_value = "false")]
        force: bool,
    },

    /// Create an empty project file
    ProjectNew {
        file: PathBuf,

        /// Project name; defaults to the file stem
        #[clap(short, long)]
        name: Option<String>,

        /// Language pair, e.g. "en:fr"
        #[clap(short, long)]
        pair: String,
    },

    /// Append a source segment to a project file
    ProjectAdd {
        file: PathBuf,

        /// Source text of the new segment
        text: String,
    },

    /// Export project segments to a bilingual file for external editing
    ExportBilingual {
        project: PathBuf,

        /// Bilingual document to write; a .session.json sidecar is written
        /// next to it and is required for reimport
        out: PathBuf,
    },

    /// Reimport an externally edited bilingual file into the project
    ImportBilingual {
        project: PathBuf,

        /// Bilingual document previously produced by export-bilingual
        input: PathBuf,
    },

    /// Show store and index counters
    Stats {},
}
