use std::{collections::BTreeMap as Map, fmt, path::PathBuf, str::FromStr};

use crate::error::DapperError;

/// Engine image reference of the form `<repository>:<reference>`.
#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct Tag {
    pub repository: String,
    pub reference: String,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.reference)
    }
}

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerName(pub String);

/// Requested execution mode, either from the command line or the image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Bind,
    Cp,
}

/// What `Mode::Auto` turned into.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResolvedMode {
    Bind,
    Cp,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Auto
    }
}

impl FromStr for Mode {
    type Err = DapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Mode::Auto),
            "bind" => Ok(Mode::Bind),
            "cp" => Ok(Mode::Cp),
            other => Err(DapperError::InvalidMode(other.to_owned())),
        }
    }
}

impl Mode {
    /// Resolves an explicit override against the mode declared by the image.
    /// An explicit `bind` or `cp` wins, `auto` everywhere means bind.
    pub fn resolve(self, declared: Mode) -> ResolvedMode {
        match (self, declared) {
            (Mode::Bind, _) => ResolvedMode::Bind,
            (Mode::Cp, _) => ResolvedMode::Cp,
            (Mode::Auto, Mode::Cp) => ResolvedMode::Cp,
            (Mode::Auto, _) => ResolvedMode::Bind,
        }
    }
}

impl fmt::Display for ResolvedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedMode::Bind => f.write_str("bind"),
            ResolvedMode::Cp => f.write_str("cp"),
        }
    }
}

/// Everything needed to build the environment image and run containers from
/// it. Constructed once from the command line, read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct Dapperfile {
    pub file: PathBuf,
    pub mode: Mode,
    pub socket: bool,
    pub no_out: bool,
    pub quiet: bool,
    pub bake: bool,
    pub keep: bool,
    pub no_context: bool,
    pub cache_from: Vec<String>,
    pub cache_to: Vec<String>,
    pub mount_suffix: Option<String>,
    pub target: Option<String>,
    pub host_arch: Option<String>,
}

/// Build arguments harvested from the Dockerfile and the host environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildArgs {
    pub args: Map<String, String>,
    pub host_arch: Option<String>,
}

/// Facts about the invoking process that end up in container arguments.
#[derive(Clone, Debug)]
pub struct HostContext {
    pub work_dir: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub tty: bool,
    pub docker_host: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_display() {
        let tag = Tag {
            repository: "dapper".into(),
            reference: "feature-x".into(),
        };
        assert_eq!(tag.to_string(), "dapper:feature-x");
    }

    #[test]
    fn mode_resolution() {
        assert_eq!(Mode::Auto.resolve(Mode::Auto), ResolvedMode::Bind);
        assert_eq!(Mode::Auto.resolve(Mode::Cp), ResolvedMode::Cp);
        assert_eq!(Mode::Auto.resolve(Mode::Bind), ResolvedMode::Bind);
        assert_eq!(Mode::Bind.resolve(Mode::Cp), ResolvedMode::Bind);
        assert_eq!(Mode::Cp.resolve(Mode::Bind), ResolvedMode::Cp);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("cp".parse::<Mode>().unwrap(), Mode::Cp);
        assert!(matches!(
            "copy".parse::<Mode>(),
            Err(DapperError::InvalidMode(ref mode)) if mode == "copy"
        ));
    }
}
