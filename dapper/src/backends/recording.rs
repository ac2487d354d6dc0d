use anyhow::{anyhow, Result};
use std::{collections::BTreeMap as Map, convert::Infallible};

use crate::{error::DapperError, services::ContainerEngine};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Exec(Vec<String>),
    Stdin(Vec<u8>, Vec<String>),
    Output(Vec<String>),
    Replace(Vec<String>),
}

impl Call {
    pub fn args(&self) -> &[String] {
        match self {
            Call::Exec(args) | Call::Output(args) | Call::Replace(args) => args,
            Call::Stdin(_, args) => args,
        }
    }
}

/// Engine fake that records every invocation. Replies to captured-output
/// commands are looked up by sub command.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub calls: Vec<Call>,
    pub replies: Map<String, Vec<u8>>,
    pub failing: Map<String, i32>,
}

impl RecordingEngine {
    pub fn new() -> RecordingEngine {
        Default::default()
    }

    pub fn reply(mut self, sub_command: &str, output: &str) -> RecordingEngine {
        self.replies
            .insert(sub_command.to_owned(), output.as_bytes().to_vec());
        self
    }

    pub fn fail(mut self, sub_command: &str, code: i32) -> RecordingEngine {
        self.failing.insert(sub_command.to_owned(), code);
        self
    }

    pub fn sub_commands(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| call.args().first().map(|arg| arg.as_str()))
            .collect()
    }

    fn outcome(&self, args: &[String]) -> Result<()> {
        let sub_command = args.first().map(|arg| arg.as_str()).unwrap_or_default();
        match self.failing.get(sub_command) {
            Some(code) => Err(DapperError::CommandFailed {
                command: format!("docker {}", args.join(" ")),
                status: Some(*code),
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl ContainerEngine for RecordingEngine {
    fn exec(&mut self, args: &[String]) -> Result<()> {
        self.calls.push(Call::Exec(args.to_vec()));
        self.outcome(args)
    }

    fn exec_with_stdin(&mut self, stdin: &[u8], args: &[String]) -> Result<()> {
        self.calls.push(Call::Stdin(stdin.to_vec(), args.to_vec()));
        self.outcome(args)
    }

    fn exec_with_output(&mut self, args: &[String]) -> Result<Vec<u8>> {
        self.calls.push(Call::Output(args.to_vec()));
        self.outcome(args)?;

        let sub_command = args.first().map(|arg| arg.as_str()).unwrap_or_default();
        Ok(self.replies.get(sub_command).cloned().unwrap_or_default())
    }

    fn exec_replace(&mut self, args: &[String]) -> Result<Infallible> {
        self.calls.push(Call::Replace(args.to_vec()));
        self.outcome(args)?;
        Err(anyhow!("process replaced"))
    }
}
