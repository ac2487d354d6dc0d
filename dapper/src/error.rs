use thiserror::Error;

/// Failures that callers need to tell apart from generic errors.
#[derive(Debug, Error)]
pub enum DapperError {
    #[error("contextless builds are not supported by buildx bake")]
    ContextlessBake,

    #[error("contextless builds cannot copy the source into the image, use --mode bind")]
    ContextlessCopy,

    #[error("could not find the {0} executable in PATH")]
    EngineNotFound(String),

    #[error("`{command}` failed with {}", describe_status(.status))]
    CommandFailed { command: String, status: Option<i32> },

    #[error("malformed image environment: {0}")]
    MalformedEnvironment(String),

    #[error("invalid mode {0:?}, expected one of bind, cp or auto")]
    InvalidMode(String),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_owned(),
    }
}

impl DapperError {
    /// Exit code of the backend command, if that is what failed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            DapperError::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }
}
