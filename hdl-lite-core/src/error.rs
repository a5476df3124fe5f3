use thiserror::Error;

/// Failure modes of the simulation kernel.
///
/// Path lookups fail hard at the call site. Trace I/O and process-body
/// failures abort the run; the scheduler attempts a trace flush before
/// surfacing them.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("can't find module \"{0}\"")]
    UnknownModule(String),

    #[error("can't find signal \"{0}\"")]
    UnknownSignal(String),

    #[error("trace output: {0}")]
    Trace(#[from] std::io::Error),

    #[error("process \"{name}\" failed: {cause}")]
    Process { name: String, cause: anyhow::Error },
}
