use std::path::Path;

use houdini_core::config::{Config, SolverFlavor};
use houdini_core::driver::SolverKind;
use houdini_core::houdini::{HoudiniEngine, StagingOverrides};
use houdini_core::program::inline_calls;

use crate::program_text::parse_program;
use crate::verifier::SolverBackedVerifier;

pub async fn run_infer(program_file: &Path, config: &Config) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(program_file)?;
    let parsed = parse_program(&text)?;
    let program = inline_calls(&parsed, config.inline_depth);

    let candidates = program.existential_candidates();
    let solver_kind = match config.solver_flavor {
        SolverFlavor::Z3 => SolverKind::Z3,
        SolverFlavor::Other => SolverKind::Other,
    };
    let log_path = config.log_path.as_ref().map(Path::new);

    let mut verifier = SolverBackedVerifier::spawn(
        &program,
        &config.solver_path,
        &config.solver_args,
        config.verbosity.into(),
        solver_kind,
        config.rlimit_option.clone(),
        config.max_control_flow_steps,
        config.unsat_core_inference,
        log_path,
    )
    .await?;

    let mut engine = HoudiniEngine::new(
        &program,
        config.reverse_queue_order,
        config.unsat_core_inference,
        config.cross_dependencies,
    );
    engine.register_observer(std::sync::Arc::new(houdini_core::observer::TracingObserver));
    engine.scan_cross_dependencies(&candidates);

    let staging = StagingOverrides {
        current_stage: config.current_stage,
        completed_stages: config.completed_stages.iter().copied().collect(),
    };
    let outcome = engine.run(&candidates, None, &staging, &mut verifier).await;
    verifier.close_all().await;

    println!("assignment:");
    for (name, value) in outcome.assignment.iter() {
        println!("  {name} = {value}");
    }
    println!("implementation outcomes:");
    for (name, result) in &outcome.implementation_outcomes {
        println!("  {name}: {result:?}");
    }
    Ok(())
}
