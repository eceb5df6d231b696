mod check_cmd;
mod cli;
mod infer_cmd;
mod logging;
pub mod program_text;
mod verifier;

pub use cli::{Cli, Command};
pub use logging::init_logging;

use houdini_core::config::Config;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Check {
            vc_file,
            config,
            overrides,
        } => {
            let config = load_config(config.as_deref(), &overrides)?;
            check_cmd::run_check(&vc_file, &config).await
        }
        Command::Infer {
            program_file,
            config,
            overrides,
        } => {
            let config = load_config(config.as_deref(), &overrides)?;
            infer_cmd::run_infer(&program_file, &config).await
        }
    }
}

fn load_config(
    path: Option<&std::path::Path>,
    overrides: &houdini_common::CliConfigOverrides,
) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    for (key, value) in overrides
        .parse_overrides()
        .map_err(|e| anyhow::anyhow!(e))?
    {
        config.apply_override(&key, &value)?;
    }
    Ok(config)
}
