use std::path::PathBuf;

use clap::{Parser, Subcommand};
use houdini_common::CliConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "houdini-vc", about = "Batch VC checking and Houdini candidate inference")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the batch driver once against a literal SMT-LIB VC file.
    Check {
        vc_file: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        overrides: CliConfigOverrides,
    },
    /// Run the Houdini engine end-to-end against a textual program file.
    Infer {
        program_file: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        overrides: CliConfigOverrides,
    },
}
