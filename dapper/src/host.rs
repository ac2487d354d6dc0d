use anyhow::{Context, Result};
use nix::unistd::{getgid, getuid};
use std::{
    env,
    io::{self, IsTerminal},
};

use crate::models::HostContext;

impl HostContext {
    pub fn capture() -> Result<HostContext> {
        let work_dir = env::current_dir().context("could not determine the working directory")?;

        Ok(HostContext {
            work_dir,
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            tty: io::stdout().is_terminal(),
            docker_host: env::var("DOCKER_HOST").ok(),
        })
    }
}

/// Architecture of this process, named the way container engines name them.
pub fn local_arch() -> &'static str {
    match env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "mips64" if cfg!(target_endian = "little") => "mips64le",
        "loongarch64" => "loong64",
        arch => arch,
    }
}
