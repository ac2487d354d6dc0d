use anyhow::Result;
use std::convert::Infallible;

/// Textual command boundary to the container engine binary.
///
/// Every method takes the engine sub command and its arguments, e.g.
/// `["build", "-t", "app:main", "."]`. Failures are returned as they are,
/// nothing is retried.
pub trait ContainerEngine {
    /// Runs to completion with the standard streams inherited.
    fn exec(&mut self, args: &[String]) -> Result<()>;

    /// Runs to completion with `stdin` fed to the child.
    fn exec_with_stdin(&mut self, stdin: &[u8], args: &[String]) -> Result<()>;

    /// Runs to completion and returns stdout and stderr combined.
    fn exec_with_output(&mut self, args: &[String]) -> Result<Vec<u8>>;

    /// Replaces the current process with the engine. Only returns on failure.
    fn exec_replace(&mut self, args: &[String]) -> Result<Infallible>;
}
