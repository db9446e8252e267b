use thiserror::Error;

/// All errors produced by the corestream pipeline.
///
/// Each variant maps to one of the taxonomy entries used to pick the worst
/// category for the process exit code; see [`ErrorCategory`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to establish transport on {addr}: {source}")]
    TransportInit {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport fault on {stream:?} stream: {source}")]
    TransportFault {
        stream: crate::protocol::StreamIdentity,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("file i/o error for {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("predictor unavailable: {0}")]
    PredictorUnavailable(String),

    #[error("downstream processor failed for step {step}: {reason}")]
    ProcessorFailure { step: u64, reason: String },

    #[error("session shutting down")]
    Shutdown,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse category used to pick a process exit code. Ordered worst-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// Everything completed (Shutdown, or only non-fatal errors occurred).
    Ok = 0,
    /// A non-fatal error occurred (PredictorUnavailable, ProcessorFailure)
    /// but the session otherwise completed.
    Degraded = 1,
    FileIo = 2,
    ProtocolViolation = 3,
    TransportFault = 4,
    TransportInit = 5,
    Config = 6,
}

impl PipelineError {
    /// Classify this error for exit-code purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::TransportInit { .. } => ErrorCategory::TransportInit,
            PipelineError::TransportFault { .. } => ErrorCategory::TransportFault,
            PipelineError::ProtocolViolation(_) => ErrorCategory::ProtocolViolation,
            PipelineError::FileIo { .. } => ErrorCategory::FileIo,
            PipelineError::PredictorUnavailable(_) => ErrorCategory::Degraded,
            PipelineError::ProcessorFailure { .. } => ErrorCategory::Degraded,
            PipelineError::Shutdown => ErrorCategory::Ok,
            PipelineError::Config(_) => ErrorCategory::Config,
        }
    }

    /// Process exit code for this category: 0 on normal end (including
    /// non-fatal degradation), non-zero per fatal category.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Ok | ErrorCategory::Degraded => 0,
            ErrorCategory::FileIo => 1,
            ErrorCategory::ProtocolViolation => 2,
            ErrorCategory::TransportFault => 3,
            ErrorCategory::TransportInit => 4,
            ErrorCategory::Config => 5,
        }
    }
}

/// Reduce a set of worker results down to the single worst error. The main
/// coordinator joins every worker before applying this, so one stream's
/// fault never prevents the other stream from finishing.
pub fn worst(results: Vec<Result<()>>) -> std::result::Result<(), PipelineError> {
    let mut worst: Option<PipelineError> = None;
    for r in results {
        if let Err(e) = r {
            match &worst {
                Some(w) if w.category() >= e.category() => {}
                _ => worst = Some(e),
            }
        }
    }
    match worst {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_picks_highest_category() {
        let results = vec![
            Ok(()),
            Err(PipelineError::FileIo {
                path: "a.bin".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            }),
            Err(PipelineError::ProtocolViolation("bad alert byte".into())),
        ];
        let err = worst(results).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn all_ok_or_degraded_exits_zero() {
        let results = vec![
            Ok(()),
            Err(PipelineError::ProcessorFailure {
                step: 3,
                reason: "nonzero exit".into(),
            }),
        ];
        let err = worst(results).unwrap_err();
        assert_eq!(err.exit_code(), 0);
    }
}
