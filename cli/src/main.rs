use clap::Parser;
use houdini_cli::{init_logging, run_main, Cli};

fn main() -> anyhow::Result<()> {
    init_logging();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let cli = Cli::parse();
        run_main(cli).await
    })
}
