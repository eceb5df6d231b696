use thiserror::Error;

pub type Result<T> = std::result::Result<T, HoudiniError>;

/// Error taxonomy for the solver session, batch driver and Houdini engine.
///
/// Solver-level errors never poison the engine: a batch `check` always
/// resolves to an [`crate::driver::Outcome`], and `Undetermined` is itself a
/// valid terminal answer for one procedure. The variants here are only the
/// conditions that can legitimately abort a whole run.
#[derive(Error, Debug)]
pub enum HoudiniError {
    #[error("failed to start solver process {path}: {source}")]
    ProcessStartFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("solver reported an error: {0}")]
    HardSolverError(String),

    #[error("unsupported operation in batch mode: {0}")]
    UnsupportedOperation(&'static str),

    #[error("VC generation failed for implementation {implementation}: {source}")]
    VcGenFailure {
        implementation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("control-flow path extraction did not terminate within {0} steps")]
    ControlFlowCycle(usize),

    #[error("operation cancelled")]
    Cancelled,

    #[error("observer callback failed: {0}")]
    ObserverFailure(String),

    #[error("malformed configuration: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
