//! Runtime configuration declared by the built image through `ENV`.

use anyhow::Result;
use log::{debug, warn};
use std::collections::BTreeMap as Map;

use crate::{
    error::DapperError,
    models::{Mode, ResolvedMode},
};

const SOURCE: &str = "DAPPER_SOURCE";
const CP: &str = "DAPPER_CP";
const SOCKET: &str = "DAPPER_DOCKER_SOCKET";
const MODE: &str = "DAPPER_MODE";
const ENV: &str = "DAPPER_ENV";
const RUN_ARGS: &str = "DAPPER_RUN_ARGS";
const OUTPUT: &str = "DAPPER_OUTPUT";
const SHELL: &str = "DAPPER_SHELL";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Source directory inside the container.
    pub source: String,
    /// Host directory, relative to the working directory, that is mounted or
    /// copied to `source`.
    pub cp: String,
    /// Whether the engine socket is mounted into the container.
    pub socket: bool,
    pub mode: Mode,
    /// `-e` arguments, either `NAME` or `NAME=VALUE`.
    pub env: Vec<String>,
    pub run_args: Vec<String>,
    /// Paths copied back to the host after a batch run.
    pub output: Vec<String>,
    pub shell: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            source: "/source/".into(),
            cp: ".".into(),
            socket: false,
            mode: Mode::Auto,
            env: Vec::new(),
            run_args: Vec::new(),
            output: Vec::new(),
            shell: "/bin/bash".into(),
        }
    }
}

fn fields(value: Option<&String>) -> Vec<String> {
    value
        .map(|value| value.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

impl RuntimeConfig {
    pub fn from_vars(vars: &Map<String, String>) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();

        let non_empty = |key: &str| vars.get(key).filter(|value| !value.is_empty()).cloned();

        let mode = match vars.get(MODE) {
            Some(mode) => mode.parse().unwrap_or_else(|err| {
                warn!("{}, falling back to auto", err);
                Mode::Auto
            }),
            None => Mode::Auto,
        };

        RuntimeConfig {
            source: non_empty(SOURCE).unwrap_or(defaults.source),
            cp: non_empty(CP).unwrap_or(defaults.cp),
            socket: vars.get(SOCKET).map(|value| value == "true").unwrap_or(false),
            mode,
            env: fields(vars.get(ENV)),
            run_args: fields(vars.get(RUN_ARGS)),
            output: fields(vars.get(OUTPUT)),
            shell: non_empty(SHELL).unwrap_or(defaults.shell),
        }
    }

    /// Parses `NAME=VALUE` entries as reported for an image's `.Config.Env`.
    pub fn from_env_list<S: AsRef<str>>(list: &[S]) -> Result<RuntimeConfig> {
        let mut vars = Map::new();

        for item in list {
            let item = item.as_ref();
            let split_index = item.find('=').ok_or_else(|| {
                DapperError::MalformedEnvironment(format!("{:?} is not NAME=VALUE", item))
            })?;

            let (key, value) = item.split_at(split_index);
            debug!("reading env: {}={}", key, &value[1..]);
            vars.insert(key.to_owned(), value[1..].to_owned());
        }

        Ok(RuntimeConfig::from_vars(&vars))
    }

    /// Parses the output of `inspect -f '{{json .Config.Env}}'`.
    pub fn from_inspect_output(output: &[u8]) -> Result<RuntimeConfig> {
        let list: Option<Vec<String>> = serde_json::from_slice(output)
            .map_err(|err| DapperError::MalformedEnvironment(err.to_string()))?;

        RuntimeConfig::from_env_list(&list.unwrap_or_default())
    }

    pub fn resolve_mode(&self, mode_override: Mode) -> ResolvedMode {
        mode_override.resolve(self.mode)
    }

    /// Output paths inside the container, relative ones joined onto `source`.
    pub fn container_output_path(&self, output: &str) -> String {
        if output.starts_with('/') {
            output.to_owned()
        } else {
            format!("{}/{}", self.source.trim_end_matches('/'), output)
        }
    }

    pub fn log(&self, mode_override: Mode) {
        debug!("Source: {}", self.source);
        debug!("Cp: {}", self.cp);
        debug!("Socket: {}", self.socket);
        debug!("Mode: {}", self.resolve_mode(mode_override));
        debug!("Env: {:?}", self.env);
        debug!("Output: {:?}", self.output);
    }
}
