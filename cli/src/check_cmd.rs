use std::path::Path;
use std::sync::Arc;

use houdini_core::config::Config;
use houdini_core::driver::{BatchDriver, CancellationToken, SolverKind};
use houdini_core::process_session::{NoopInspector, SolverSession, TracingErrorHandler};
use houdini_core::vcgen::TextVcGenerator;

/// Runs the batch driver once against a literal SMT-LIB VC file and prints
/// the resulting `Outcome`.
pub async fn run_check(vc_file: &Path, config: &Config) -> anyhow::Result<()> {
    let vc = std::fs::read_to_string(vc_file)?;
    let session = SolverSession::spawn(
        0,
        &config.solver_path,
        &config.solver_args,
        config.verbosity.into(),
        Arc::new(NoopInspector),
        Arc::new(TracingErrorHandler),
    )
    .await?;

    let solver_kind = match config.solver_flavor {
        houdini_core::config::SolverFlavor::Z3 => SolverKind::Z3,
        houdini_core::config::SolverFlavor::Other => SolverKind::Other,
    };
    let driver = BatchDriver::new(&session, solver_kind, config.rlimit_option.clone(), config.max_control_flow_steps);
    let generator = TextVcGenerator::new();
    let cancel = CancellationToken::new();
    let result = driver
        .begin_check("", vc.trim(), &[], 0, &generator, &cancel, config.unsat_core_inference)
        .await?;

    session.close().await;
    tracing::info!(outcome = ?result.outcome, "check complete");
    println!("{:?}", result.outcome);
    Ok(())
}
