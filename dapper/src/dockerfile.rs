//! Dockerfile preprocessing.
//!
//! A `FROM <image>` line directly followed by a comment such as
//!
//! ```text
//! FROM golang:1.22
//! # FROM {"arm64": "arm64v8/golang:1.22", "s390x": "skip"}
//! ```
//!
//! picks its base image by host architecture. `skip` means the whole build
//! does not apply to that architecture.

use anyhow::Result;
use log::{debug, warn};
use std::{
    collections::BTreeMap as Map,
    io::{self, BufRead, Write},
    str,
};

use crate::models::BuildArgs;

/// Build argument that is filled in with the engine's architecture.
pub const HOST_ARCH_ARG: &str = "DAPPER_HOST_ARCH";

const ARCH_COMMENT_PREFIX: &str = "# FROM";
const SKIP: &str = "skip";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDockerfile {
    pub content: Vec<u8>,
    /// Whether any `FROM` line was repointed for the host architecture.
    pub rewritten: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Preprocessed {
    Resolved(ResolvedDockerfile),
    /// The host architecture is excluded, there is nothing to build.
    Skip { arch: String },
}

/// Architecture name to base image, parsed from a `# FROM {...}` comment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchMap(Map<String, String>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchChoice<'a> {
    Skip,
    Image(&'a str),
}

impl ArchMap {
    /// Returns `None` if the line is not an architecture comment at all. A
    /// comment with an unparsable body yields an empty map.
    pub fn parse(line: &str) -> Option<ArchMap> {
        let body = line.strip_prefix(ARCH_COMMENT_PREFIX)?;

        match serde_json::from_str(body.trim()) {
            Ok(map) => Some(ArchMap(map)),
            Err(err) => {
                warn!("ignoring malformed architecture map {:?}: {}", line, err);
                Some(ArchMap::default())
            }
        }
    }

    pub fn choose(&self, arch: &str) -> Option<ArchChoice<'_>> {
        self.0.get(arch).map(|image| match image.as_str() {
            SKIP => ArchChoice::Skip,
            image => ArchChoice::Image(image),
        })
    }
}

fn is_single_image_from(line: &str) -> bool {
    line.starts_with("FROM ") && line.split_whitespace().count() == 2
}

/// Splits the input into raw lines without the `\n` or `\r\n` terminator.
/// Lines are only decoded where they are inspected, so bytes that are not
/// UTF-8 pass through untouched.
fn raw_lines<R: BufRead>(input: R) -> impl Iterator<Item = io::Result<Vec<u8>>> {
    input.split(b'\n').map(|line| {
        line.map(|mut line| {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    })
}

enum State {
    Normal,
    AwaitingArchComment { from_line: Vec<u8> },
}

struct Resolver<'a> {
    host_arch: &'a str,
    state: State,
    out: Vec<u8>,
    rewritten: bool,
}

impl<'a> Resolver<'a> {
    fn emit(&mut self, line: &[u8]) -> Result<()> {
        self.out.write_all(line)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Feeds one line. Returns `false` when the build must be skipped.
    fn feed(&mut self, line: &[u8]) -> Result<bool> {
        let text = str::from_utf8(line).ok();

        match std::mem::replace(&mut self.state, State::Normal) {
            State::Normal => {
                if text.map_or(false, is_single_image_from) {
                    self.state = State::AwaitingArchComment {
                        from_line: line.to_owned(),
                    };
                } else {
                    self.emit(line)?;
                }
            }
            State::AwaitingArchComment { from_line } => match text.and_then(ArchMap::parse) {
                Some(arch_map) => {
                    match arch_map.choose(self.host_arch) {
                        Some(ArchChoice::Skip) => return Ok(false),
                        Some(ArchChoice::Image(image)) => {
                            debug!("using {} for {}", image, self.host_arch);
                            self.emit(format!("FROM {}", image).as_bytes())?;
                            self.rewritten = true;
                        }
                        None => self.emit(&from_line)?,
                    }
                    self.emit(line)?;
                }
                None => {
                    // Not an architecture comment, the line gets the normal treatment.
                    self.emit(&from_line)?;
                    return self.feed(line);
                }
            },
        }

        Ok(true)
    }

    fn finish(mut self) -> Result<ResolvedDockerfile> {
        if let State::AwaitingArchComment { from_line } =
            std::mem::replace(&mut self.state, State::Normal)
        {
            self.emit(&from_line)?;
        }

        Ok(ResolvedDockerfile {
            content: self.out,
            rewritten: self.rewritten,
        })
    }
}

/// Rewrites architecture conditional `FROM` lines for `host_arch`.
pub fn preprocess<R: BufRead>(input: R, host_arch: &str) -> Result<Preprocessed> {
    let mut resolver = Resolver {
        host_arch,
        state: State::Normal,
        out: Vec::new(),
        rewritten: false,
    };

    for line in raw_lines(input) {
        if !resolver.feed(&line?)? {
            return Ok(Preprocessed::Skip {
                arch: host_arch.to_owned(),
            });
        }
    }

    Ok(Preprocessed::Resolved(resolver.finish()?))
}

/// Collects `ARG` names whose value is set in the host environment.
///
/// `DAPPER_HOST_ARCH` is always resolved when declared, through
/// `detect_arch` if the environment does not set it, and is also reported
/// back as the host architecture.
pub fn harvest_build_args<R, L, D>(input: R, lookup: L, mut detect_arch: D) -> Result<BuildArgs>
where
    R: BufRead,
    L: Fn(&str) -> Option<String>,
    D: FnMut() -> String,
{
    let mut build_args = BuildArgs::default();

    for line in raw_lines(input) {
        let line = line?;
        let line = String::from_utf8_lossy(&line);
        let mut fields = line.split_whitespace();

        let (command, declaration) = match (fields.next(), fields.next()) {
            (Some(command), Some(declaration)) => (command, declaration),
            _ => continue,
        };
        if command != "ARG" {
            continue;
        }

        let key = declaration.split('=').next().unwrap_or(declaration);
        let mut value = lookup(key).filter(|value| !value.is_empty());

        if key == HOST_ARCH_ARG {
            if value.is_none() {
                value = Some(match &build_args.host_arch {
                    Some(arch) => arch.clone(),
                    None => detect_arch(),
                });
            }
            build_args.host_arch = value.clone();
        }

        if let Some(value) = value {
            debug!("build arg {}={}", key, value);
            build_args.args.insert(key.to_owned(), value);
        }
    }

    Ok(build_args)
}
