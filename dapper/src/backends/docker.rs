use anyhow::Result;
use log::debug;
use std::{
    convert::Infallible,
    io::{ErrorKind, Write},
    path::PathBuf,
    process::{Command, ExitStatus, Stdio},
};

use crate::{error::DapperError, services::ContainerEngine};

const DOCKER: &str = "docker";

pub struct DockerEngine {
    docker: PathBuf,
}

impl DockerEngine {
    /// Looks up the docker binary in `PATH`.
    pub fn locate() -> Result<DockerEngine> {
        let docker =
            which::which(DOCKER).map_err(|_| DapperError::EngineNotFound(DOCKER.to_owned()))?;
        debug!("using {:?}", docker);

        Ok(DockerEngine { docker })
    }

    fn command(&self, args: &[String]) -> Command {
        debug!("running {:?} {:?}", self.docker, args);

        let mut command = Command::new(&self.docker);
        command.args(args);
        command
    }
}

fn check(args: &[String], status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }

    debug!("failed running {} {:?}: {}", DOCKER, args, status);
    Err(DapperError::CommandFailed {
        command: format!("{} {}", DOCKER, args.join(" ")),
        status: status.code(),
    }
    .into())
}

impl ContainerEngine for DockerEngine {
    fn exec(&mut self, args: &[String]) -> Result<()> {
        let status = self
            .command(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;

        check(args, status)
    }

    fn exec_with_stdin(&mut self, stdin: &[u8], args: &[String]) -> Result<()> {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;

        // Dropping the handle closes the pipe so the engine sees EOF.
        let written = match child.stdin.take() {
            Some(mut pipe) => pipe.write_all(stdin),
            None => Ok(()),
        };

        // The engine may exit without reading everything, its status wins.
        let status = child.wait()?;
        check(args, status)?;

        match written {
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                debug!("{} closed its input early", DOCKER);
                Ok(())
            }
            Err(err) => Err(err.into()),
            Ok(()) => Ok(()),
        }
    }

    fn exec_with_output(&mut self, args: &[String]) -> Result<Vec<u8>> {
        let output = self.command(args).stdin(Stdio::null()).output()?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        check(args, output.status)?;
        Ok(combined)
    }

    #[cfg(unix)]
    fn exec_replace(&mut self, args: &[String]) -> Result<Infallible> {
        use std::os::unix::process::CommandExt;

        debug!("exec {:?} {:?}", self.docker, args);
        let err = Command::new(&self.docker).arg0(DOCKER).args(args).exec();
        Err(err.into())
    }

    #[cfg(not(unix))]
    fn exec_replace(&mut self, args: &[String]) -> Result<Infallible> {
        self.exec(args)?;
        std::process::exit(0)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const PAYLOAD: usize = 4 * 1024 * 1024;

    fn engine(program: &str) -> DockerEngine {
        DockerEngine {
            docker: PathBuf::from(program),
        }
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn early_exit_keeps_the_engine_status() {
        let err = engine("/bin/false")
            .exec_with_stdin(&vec![b'x'; PAYLOAD], &strings(&["buildx", "bake"]))
            .unwrap_err();

        let err = err.downcast_ref::<DapperError>().unwrap();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn unread_input_is_fine_when_the_engine_succeeds() {
        engine("/bin/sh")
            .exec_with_stdin(&vec![b'x'; PAYLOAD], &strings(&["-c", "exit 0"]))
            .unwrap();
    }

    #[test]
    fn input_is_fed_to_the_engine() {
        engine("/bin/sh")
            .exec_with_stdin(b"FROM alpine\n", &strings(&["-c", "grep -q alpine"]))
            .unwrap();
    }

    #[test]
    fn output_is_captured_with_failures() {
        let output = engine("/bin/sh")
            .exec_with_output(&strings(&["-c", "echo out; echo err >&2"]))
            .unwrap();
        assert_eq!(output, b"out\nerr\n");

        let err = engine("/bin/sh")
            .exec_with_output(&strings(&["-c", "exit 3"]))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<DapperError>().unwrap().exit_code(), Some(3));
    }
}
