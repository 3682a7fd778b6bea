use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "msiver",
    about = "MSI file versioner - rewrite File table versions inside Windows Installer packages",
    version,
    author
)]
pub struct Cli {
    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set the Version column of File table rows, committing once at the end
    Patch {
        /// Path to the MSI package to modify in place
        #[arg(short, long, value_name = "PATH", default_value = "")]
        msi: PathBuf,

        /// File version pair (e.g. "Serilog.dll=4.3.0.1"); may be repeated
        #[arg(short, long = "set", value_name = "FILE=VERSION")]
        set: Vec<String>,

        /// TOML ([[file]] tables) or MSBuild item manifest; may be repeated
        #[arg(long, value_name = "FILE")]
        manifest: Vec<PathBuf>,

        /// MSBuild item type to read from manifests
        #[arg(long, value_name = "TYPE", default_value = crate::agents::DEFAULT_ITEM_TYPE)]
        item_type: String,

        /// Property used to expand $(NAME) references in manifests
        #[arg(short = 'p', long = "property", value_name = "NAME=VALUE")]
        properties: Vec<String>,

        /// Show what would change without writing the package
        #[arg(long)]
        dry_run: bool,

        /// Fail without committing if any entry was skipped
        #[arg(long)]
        strict: bool,

        /// Print a JSON report instead of human-readable output
        #[arg(long)]
        json: bool,
    },

    /// List the File table with its versions
    List {
        /// Path to the MSI package to read
        #[arg(short, long, value_name = "PATH")]
        msi: PathBuf,

        /// Filter file names using glob syntax (e.g. "*serilog*")
        #[arg(long, value_name = "GLOB")]
        filter: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
