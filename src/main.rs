mod agents;
mod cli;
mod error;
mod installer;
mod utils;
mod workflow;

use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use std::process;
use workflow::PatchOptions;

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        unsafe {
            std::env::set_var(utils::VERBOSE_ENV, "1");
        }
    }

    let result = match cli.command {
        Commands::Patch {
            msi,
            set,
            manifest,
            item_type,
            properties,
            dry_run,
            strict,
            json,
        } => workflow::execute_patch(
            &msi,
            &PatchOptions {
                pairs: set,
                manifests: manifest,
                item_type,
                properties,
                dry_run,
                strict,
                json,
            },
        )
        .map(|_| ()),
        Commands::List { msi, filter, json } => {
            workflow::execute_list(&msi, filter.as_deref(), json)
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}
