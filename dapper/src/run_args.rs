//! Arguments for `run`, in the order the engine's parser expects them:
//! flags first, then the image, then the command.

use crate::{
    environment::RuntimeConfig,
    models::{ContainerName, Dapperfile, HostContext, ResolvedMode, Tag},
    tag::random_token,
};

const SOCKET_PATH: &str = "/var/run/docker.sock";

/// Placeholder command telling the shell entrypoint to read from stdin.
const STDIN_COMMAND: &str = "-";

pub fn container_name(tag: &Tag) -> ContainerName {
    ContainerName(format!("{}-{}", tag.repository, random_token()))
}

fn socket_volume(docker_host: Option<&str>) -> String {
    let host_socket = docker_host
        .and_then(|host| host.strip_prefix("unix://"))
        .filter(|path| !path.is_empty())
        .unwrap_or(SOCKET_PATH);

    format!("{}:{}", host_socket, SOCKET_PATH)
}

fn bind_volume(dapperfile: &Dapperfile, host: &HostContext, env: &RuntimeConfig) -> String {
    let suffix = match &dapperfile.mount_suffix {
        Some(suffix) if !suffix.is_empty() => format!(":{}", suffix),
        _ => String::new(),
    };

    format!(
        "{}/{}:{}{}",
        host.work_dir.display(),
        env.cp,
        env.source,
        suffix
    )
}

/// Builds the arguments following `run`.
///
/// `shell` replaces the entrypoint for interactive sessions; when it is set
/// and `command` is empty the shell is told to read from stdin.
pub fn run_args(
    dapperfile: &Dapperfile,
    host: &HostContext,
    tag: &Tag,
    env: &RuntimeConfig,
    name: &ContainerName,
    shell: Option<&str>,
    command: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-i".into(), "--name".into(), name.0.clone()];

    if host.tty {
        args.push("-t".into());
    }

    if env.socket || dapperfile.socket {
        args.push("-v".into());
        args.push(socket_volume(host.docker_host.as_deref()));
    }

    if env.resolve_mode(dapperfile.mode) == ResolvedMode::Bind {
        args.push("-v".into());
        args.push(bind_volume(dapperfile, host, env));
    }

    args.push("-e".into());
    args.push(format!("DAPPER_UID={}", host.uid));
    args.push("-e".into());
    args.push(format!("DAPPER_GID={}", host.gid));

    for var in env.env.iter() {
        args.push("-e".into());
        args.push(var.clone());
    }

    if let Some(shell) = shell {
        args.push("--entrypoint".into());
        args.push(shell.into());
        args.push("-e".into());
        args.push("TERM".into());
    }

    args.extend(env.run_args.iter().cloned());
    args.push(tag.to_string());

    match shell {
        Some(_) if command.is_empty() => args.push(STDIN_COMMAND.into()),
        _ => args.extend(command.iter().cloned()),
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mode;
    use std::path::PathBuf;

    fn host() -> HostContext {
        HostContext {
            work_dir: PathBuf::from("/home/dev/app"),
            uid: 1000,
            gid: 100,
            tty: false,
            docker_host: None,
        }
    }

    fn tag() -> Tag {
        Tag {
            repository: "app".into(),
            reference: "main".into(),
        }
    }

    fn name() -> ContainerName {
        ContainerName("app-abc123".into())
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    fn count_flag_pairs(args: &[String], flag: &str, value: &str) -> usize {
        args.windows(2)
            .filter(|pair| pair[0] == flag && pair[1] == value)
            .count()
    }

    #[test]
    fn batch_run_in_bind_mode() {
        let env = RuntimeConfig::from_env_list(&[
            "DAPPER_SOURCE=/go/src/app",
            "DAPPER_ENV=REPO TAG=v1",
            "DAPPER_RUN_ARGS=--privileged",
        ])
        .unwrap();

        let args = run_args(
            &Dapperfile::default(),
            &host(),
            &tag(),
            &env,
            &name(),
            None,
            &strings(&["./scripts/ci", "--verbose"]),
        );

        assert_eq!(
            args,
            strings(&[
                "-i",
                "--name",
                "app-abc123",
                "-v",
                "/home/dev/app/.:/go/src/app",
                "-e",
                "DAPPER_UID=1000",
                "-e",
                "DAPPER_GID=100",
                "-e",
                "REPO",
                "-e",
                "TAG=v1",
                "--privileged",
                "app:main",
                "./scripts/ci",
                "--verbose",
            ])
        );
    }

    #[test]
    fn tty_only_when_attached() {
        let mut host = host();
        host.tty = true;

        let args = run_args(
            &Dapperfile::default(),
            &host,
            &tag(),
            &RuntimeConfig::default(),
            &name(),
            None,
            &[],
        );
        assert_eq!(&args[..4], &strings(&["-i", "--name", "app-abc123", "-t"])[..]);
    }

    #[test]
    fn socket_is_mounted_once() {
        let env = RuntimeConfig::from_env_list(&[
            "DAPPER_DOCKER_SOCKET=true",
            "DAPPER_MODE=bind",
            "DAPPER_OUTPUT=/out/result",
        ])
        .unwrap();
        let dapperfile = Dapperfile {
            socket: true,
            ..Default::default()
        };

        let args = run_args(&dapperfile, &host(), &tag(), &env, &name(), None, &[]);
        assert_eq!(
            count_flag_pairs(&args, "-v", "/var/run/docker.sock:/var/run/docker.sock"),
            1
        );
    }

    #[test]
    fn socket_follows_unix_docker_host() {
        let mut host = host();
        host.docker_host = Some("unix:///run/user/1000/docker.sock".into());
        let dapperfile = Dapperfile {
            socket: true,
            ..Default::default()
        };

        let args = run_args(
            &dapperfile,
            &host,
            &tag(),
            &RuntimeConfig::default(),
            &name(),
            None,
            &[],
        );
        assert_eq!(
            count_flag_pairs(
                &args,
                "-v",
                "/run/user/1000/docker.sock:/var/run/docker.sock"
            ),
            1
        );
    }

    #[test]
    fn copy_mode_has_no_bind_mount() {
        let dapperfile = Dapperfile {
            mode: Mode::Cp,
            ..Default::default()
        };

        let args = run_args(
            &dapperfile,
            &host(),
            &tag(),
            &RuntimeConfig::default(),
            &name(),
            None,
            &[],
        );
        assert!(!args.iter().any(|arg| arg == "-v"));
    }

    #[test]
    fn mount_suffix_is_appended() {
        let env = RuntimeConfig::from_env_list(&["DAPPER_CP=src"]).unwrap();
        let dapperfile = Dapperfile {
            mount_suffix: Some("z".into()),
            ..Default::default()
        };

        let args = run_args(&dapperfile, &host(), &tag(), &env, &name(), None, &[]);
        assert_eq!(
            count_flag_pairs(&args, "-v", "/home/dev/app/src:/source/:z"),
            1
        );
    }

    #[test]
    fn shell_without_command_reads_stdin() {
        let args = run_args(
            &Dapperfile::default(),
            &host(),
            &tag(),
            &RuntimeConfig::default(),
            &name(),
            Some("/bin/bash"),
            &[],
        );

        assert_eq!(
            &args[args.len() - 7..],
            &strings(&[
                "DAPPER_GID=100",
                "--entrypoint",
                "/bin/bash",
                "-e",
                "TERM",
                "app:main",
                "-",
            ])[..]
        );
    }

    #[test]
    fn shell_with_command_runs_it() {
        let args = run_args(
            &Dapperfile::default(),
            &host(),
            &tag(),
            &RuntimeConfig::default(),
            &name(),
            Some("/bin/sh"),
            &strings(&["-c", "make"]),
        );

        assert_eq!(&args[args.len() - 3..], &strings(&["app:main", "-c", "make"])[..]);
        assert!(!args.iter().any(|arg| arg == "-"));
    }

    #[test]
    fn container_name_uses_repository() {
        let name = container_name(&tag());
        assert!(name.0.starts_with("app-"));
        assert_eq!(name.0.len(), "app-".len() + 8);
    }
}
