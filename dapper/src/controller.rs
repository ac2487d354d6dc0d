use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::{
    collections::BTreeMap as Map,
    convert::Infallible,
    fs,
    io::{self, Read, Write},
    mem,
    path::Path,
};
use tempfile::NamedTempFile;

use crate::{
    dockerfile::{self, Preprocessed, ResolvedDockerfile},
    environment::RuntimeConfig,
    error::DapperError,
    host::local_arch,
    models::{ContainerName, Dapperfile, HostContext, Mode, ResolvedMode, Tag},
    run_args::{container_name, run_args},
    services::ContainerEngine,
};

const STAGE1: &str = "stage1";
const STAGE2: &str = "stage2";
const DEFAULT_GROUP: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome<T> {
    Built(T),
    /// The Dockerfile excludes the host architecture.
    Skipped { arch: String },
}

/// A built image together with the configuration it declares.
#[derive(Clone, Debug)]
pub struct Environment {
    pub tag: Tag,
    pub config: RuntimeConfig,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Purpose {
    Build,
    Run,
}

/// Source paths already copied into the image by the build itself.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CopiedSource {
    cp: String,
    source: String,
}

struct ImageBuild {
    tag: Tag,
    copied: Option<CopiedSource>,
}

struct Prepared {
    build_args: Map<String, String>,
    resolved: ResolvedDockerfile,
}

pub struct Controller {
    engine: Box<dyn ContainerEngine>,
    dapperfile: Dapperfile,
    tag: Tag,
    stdin: Option<Vec<u8>>,
}

impl Controller {
    pub fn init<E>(dapperfile: Dapperfile, engine: E, tag: Tag) -> Controller
    where
        E: 'static + ContainerEngine,
    {
        Controller {
            engine: Box::new(engine),
            dapperfile,
            tag,
            stdin: None,
        }
    }

    /// Dockerfile contents used instead of reading stdin in contextless mode.
    #[cfg(test)]
    fn with_stdin(mut self, stdin: &str) -> Controller {
        self.stdin = Some(stdin.as_bytes().to_vec());
        self
    }

    /// Builds the image only. `extra_args` are handed to the backend build.
    pub fn build(&mut self, extra_args: &[String]) -> Result<BuildOutcome<Tag>> {
        Ok(match self.build_image(extra_args, Purpose::Build)? {
            BuildOutcome::Built(build) => BuildOutcome::Built(build.tag),
            BuildOutcome::Skipped { arch } => BuildOutcome::Skipped { arch },
        })
    }

    /// Builds the image for running and reads back its configuration,
    /// layering the source into the image when it is not bind mounted.
    pub fn build_environment(&mut self) -> Result<BuildOutcome<Environment>> {
        if self.dapperfile.no_context && self.dapperfile.mode == Mode::Cp {
            return Err(DapperError::ContextlessCopy.into());
        }

        let build = match self.build_image(&[], Purpose::Run)? {
            BuildOutcome::Built(build) => build,
            BuildOutcome::Skipped { arch } => return Ok(BuildOutcome::Skipped { arch }),
        };

        let config = self.read_env(&build.tag)?;

        if config.resolve_mode(self.dapperfile.mode) == ResolvedMode::Cp {
            let wanted = CopiedSource {
                cp: config.cp.clone(),
                source: config.source.clone(),
            };

            if build.copied.as_ref() != Some(&wanted) {
                if self.dapperfile.no_context {
                    return Err(DapperError::ContextlessCopy.into());
                }

                let content = format!("FROM {}\nCOPY {} {}", build.tag, config.cp, config.source);
                self.build_with_content(&build.tag, &content)?;
            }
        }

        Ok(BuildOutcome::Built(Environment {
            tag: build.tag,
            config,
        }))
    }

    /// Runs `command` in a fresh container, copies the declared outputs back
    /// and removes the container unless asked to keep it.
    pub fn run(&mut self, host: &HostContext, command: &[String]) -> Result<BuildOutcome<()>> {
        let environment = match self.build_environment()? {
            BuildOutcome::Built(environment) => environment,
            BuildOutcome::Skipped { arch } => return Ok(BuildOutcome::Skipped { arch }),
        };

        debug!("running build in {}", environment.tag);
        let name = container_name(&environment.tag);
        let args = run_args(
            &self.dapperfile,
            host,
            &environment.tag,
            &environment.config,
            &name,
            None,
            command,
        );

        let result = self.run_container(host, &name, args, &environment.config);
        self.release_container(&name);

        result.map(BuildOutcome::Built)
    }

    /// Hands the terminal over to an interactive shell in a fresh container.
    /// On success this never returns.
    pub fn shell(
        &mut self,
        host: &HostContext,
        command: &[String],
    ) -> Result<BuildOutcome<Infallible>> {
        let environment = match self.build_environment()? {
            BuildOutcome::Built(environment) => environment,
            BuildOutcome::Skipped { arch } => return Ok(BuildOutcome::Skipped { arch }),
        };

        debug!("running shell in {}", environment.tag);
        let name = container_name(&environment.tag);
        let mut args: Vec<String> = vec!["run".into(), "--rm".into()];
        args.extend(run_args(
            &self.dapperfile,
            host,
            &environment.tag,
            &environment.config,
            &name,
            Some(&environment.config.shell),
            command,
        ));

        match self.engine.exec_replace(&args)? {}
    }

    fn run_container(
        &mut self,
        host: &HostContext,
        name: &ContainerName,
        args: Vec<String>,
        config: &RuntimeConfig,
    ) -> Result<()> {
        let mut run = vec!["run".to_owned()];
        run.extend(args);
        self.engine.exec(&run)?;

        if config.resolve_mode(self.dapperfile.mode) == ResolvedMode::Bind || self.dapperfile.no_out
        {
            return Ok(());
        }

        for output in config.output.iter() {
            let container_path = config.container_output_path(output);
            // Relative outputs land under the source tree, absolute ones as is.
            let target_dir = host.work_dir.join(parent_dir(output));

            fs::create_dir_all(&target_dir)
                .with_context(|| format!("could not create output directory {:?}", target_dir))?;

            let target = target_dir.to_string_lossy().into_owned();
            info!("docker cp {} {}", container_path, target);
            let cp = vec![
                "cp".to_owned(),
                format!("{}:{}", name.0, container_path),
                target,
            ];
            if let Err(err) = self.engine.exec(&cp) {
                warn!("error copying back {:?}: {}", output, err);
            }
        }

        Ok(())
    }

    fn release_container(&mut self, name: &ContainerName) {
        if self.dapperfile.keep {
            info!("keeping build container {}", name.0);
            return;
        }

        debug!("deleting temp container {}", name.0);
        let rm = vec!["rm".to_owned(), "-fv".to_owned(), name.0.clone()];
        if let Err(err) = self.engine.exec_with_output(&rm) {
            warn!("error deleting temp container {}: {}", name.0, err);
        }
    }

    fn build_image(
        &mut self,
        extra_args: &[String],
        purpose: Purpose,
    ) -> Result<BuildOutcome<ImageBuild>> {
        if self.dapperfile.bake && self.dapperfile.no_context {
            return Err(DapperError::ContextlessBake.into());
        }

        let prepared = match self.prepare()? {
            BuildOutcome::Built(prepared) => prepared,
            BuildOutcome::Skipped { arch } => {
                info!("skipping build on {}", arch);
                return Ok(BuildOutcome::Skipped { arch });
            }
        };

        debug!("building {} using {:?}", self.tag, self.dapperfile.file);
        let build = if self.dapperfile.bake {
            self.build_graph(prepared, extra_args, purpose)?
        } else {
            self.build_classic(prepared, extra_args)?
        };

        Ok(BuildOutcome::Built(build))
    }

    fn read_dockerfile(&mut self) -> Result<Vec<u8>> {
        if self.dapperfile.no_context {
            if let Some(stdin) = self.stdin.take() {
                return Ok(stdin);
            }

            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("could not read the Dockerfile from stdin")?;
            return Ok(buffer);
        }

        fs::read(&self.dapperfile.file)
            .with_context(|| format!("could not read {:?}", self.dapperfile.file))
    }

    /// Harvests build args, settles the host architecture and resolves the
    /// architecture conditional base images.
    fn prepare(&mut self) -> Result<BuildOutcome<Prepared>> {
        let source = self.read_dockerfile()?;

        let arch_override = self.dapperfile.host_arch.clone();
        let engine = &mut self.engine;
        let mut detected: Option<String> = None;
        let mut detect = || match &arch_override {
            Some(arch) => arch.clone(),
            None => detected
                .get_or_insert_with(|| detect_host_arch(engine.as_mut()))
                .clone(),
        };

        let harvested =
            dockerfile::harvest_build_args(&source[..], |key| std::env::var(key).ok(), &mut detect)?;
        let host_arch = match (&arch_override, harvested.host_arch) {
            (Some(arch), _) => arch.clone(),
            (None, Some(arch)) => arch,
            (None, None) => detect(),
        };
        debug!("host architecture {}", host_arch);

        Ok(match dockerfile::preprocess(&source[..], &host_arch)? {
            Preprocessed::Resolved(resolved) => BuildOutcome::Built(Prepared {
                build_args: harvested.args,
                resolved,
            }),
            Preprocessed::Skip { arch } => BuildOutcome::Skipped { arch },
        })
    }

    fn build_classic(&mut self, prepared: Prepared, extra_args: &[String]) -> Result<ImageBuild> {
        let mut args = vec!["build".to_owned()];
        if extra_args.is_empty() {
            args.push("-t".into());
            args.push(self.tag.to_string());
        }

        if self.dapperfile.quiet {
            args.push("-q".into());
        }

        if let Some(target) = &self.dapperfile.target {
            args.push("--target".into());
            args.push(target.clone());
        }

        for (key, value) in prepared.build_args.iter() {
            args.push("--build-arg".into());
            args.push(format!("{}={}", key, value));
        }

        if self.dapperfile.no_context {
            args.push("-".into());
            args.extend(extra_args.iter().cloned());
            self.engine
                .exec_with_stdin(&prepared.resolved.content, &args)?;
        } else {
            let tempfile = self.tempfile(&prepared.resolved.content)?;

            args.push("-f".into());
            args.push(tempfile.path().to_string_lossy().into_owned());
            if extra_args.is_empty() {
                args.push(".".into());
            } else {
                args.extend(extra_args.iter().cloned());
            }

            let result = self.engine.exec(&args);
            remove_tempfile(tempfile);
            result?;
        }

        Ok(ImageBuild {
            tag: self.tag.clone(),
            copied: None,
        })
    }

    fn build_graph(
        &mut self,
        prepared: Prepared,
        extra_args: &[String],
        purpose: Purpose,
    ) -> Result<ImageBuild> {
        let tag = self.tag.to_string();
        let context = extra_args
            .first()
            .cloned()
            .unwrap_or_else(|| ".".to_owned());

        let mut stage1 = bake::Target {
            context,
            tags: vec![tag],
            target: self.dapperfile.target.clone(),
            args: prepared.build_args,
            dockerfile: self.dapperfile.file.to_string_lossy().into_owned(),
            outputs: vec!["type=docker".into()],
            cache_from: self.dapperfile.cache_from.clone(),
            cache_to: self.dapperfile.cache_to.clone(),
            ..Default::default()
        };

        if prepared.resolved.rewritten {
            stage1.dockerfile_inline =
                Some(String::from_utf8_lossy(&prepared.resolved.content).into_owned());
        }

        let mut file = bake::File::default();
        let mut default_group = bake::Group {
            targets: vec![STAGE1.into()],
        };

        // The image does not exist yet, so only the explicit mode decides
        // whether the source is copied in by a second stage.
        let mut copied = None;
        if purpose == Purpose::Run && self.dapperfile.mode.resolve(Mode::Auto) == ResolvedMode::Cp
        {
            let defaults = RuntimeConfig::default();
            let mut contexts = Map::new();
            contexts.insert(STAGE1.to_owned(), bake::target_context(STAGE1));

            let stage2 = bake::Target {
                context: stage1.context.clone(),
                contexts,
                dockerfile_inline: Some(format!(
                    "FROM {}\nCOPY {} {}",
                    STAGE1, defaults.cp, defaults.source
                )),
                cache_from: mem::take(&mut stage1.cache_from),
                cache_to: mem::take(&mut stage1.cache_to),
                outputs: mem::take(&mut stage1.outputs),
                tags: mem::take(&mut stage1.tags),
                ..Default::default()
            };

            default_group.targets.push(STAGE2.into());
            file.targets.insert(STAGE2.into(), stage2);
            copied = Some(CopiedSource {
                cp: defaults.cp,
                source: defaults.source,
            });
        }

        file.targets.insert(STAGE1.into(), stage1);
        file.groups.insert(DEFAULT_GROUP.into(), default_group);

        let bakefile = file.to_vec()?;
        let args: Vec<String> = vec!["buildx".into(), "bake".into(), "-f".into(), "-".into()];
        self.engine.exec_with_stdin(&bakefile, &args)?;

        Ok(ImageBuild {
            tag: self.tag.clone(),
            copied,
        })
    }

    fn build_with_content(&mut self, tag: &Tag, content: &str) -> Result<()> {
        let tempfile = self.tempfile(content.as_bytes())?;

        let args = vec![
            "build".to_owned(),
            "-t".to_owned(),
            tag.to_string(),
            "-f".to_owned(),
            tempfile.path().to_string_lossy().into_owned(),
            ".".to_owned(),
        ];

        let result = self.engine.exec(&args);
        remove_tempfile(tempfile);
        result
    }

    /// Writes a Dockerfile next to the original one. It is removed when the
    /// handle is dropped.
    fn tempfile(&self, content: &[u8]) -> Result<NamedTempFile> {
        let file = &self.dapperfile.file;
        let dir = match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let prefix = format!(
            "{}.",
            file.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Dockerfile".to_owned())
        );

        let mut tempfile = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(dir)
            .context("could not create a temporary Dockerfile")?;
        tempfile.write_all(content)?;
        tempfile.flush()?;

        Ok(tempfile)
    }

    fn read_env(&mut self, tag: &Tag) -> Result<RuntimeConfig> {
        let args = vec![
            "inspect".to_owned(),
            "-f".to_owned(),
            "{{json .Config.Env}}".to_owned(),
            tag.to_string(),
        ];

        let output = self.engine.exec_with_output(&args).map_err(|err| {
            error!("failed to run docker {:?}: {}", args, err);
            err
        })?;

        let config = RuntimeConfig::from_inspect_output(&output)?;
        config.log(self.dapperfile.mode);

        Ok(config)
    }
}

fn remove_tempfile(tempfile: NamedTempFile) {
    let path = tempfile.path().to_path_buf();
    debug!("deleting tempfile {:?}", path);
    if let Err(err) = tempfile.close() {
        error!("failed to delete tempfile {:?}: {}", path, err);
    }
}

fn detect_host_arch(engine: &mut dyn ContainerEngine) -> String {
    let args = vec![
        "version".to_owned(),
        "-f".to_owned(),
        "{{.Server.Arch}}".to_owned(),
    ];

    match engine.exec_with_output(&args) {
        Ok(output) => {
            let arch = String::from_utf8_lossy(&output).trim().to_owned();
            if arch.is_empty() {
                local_arch().to_owned()
            } else {
                arch
            }
        }
        Err(err) => {
            debug!("could not query the engine architecture: {}", err);
            local_arch().to_owned()
        }
    }
}

/// Directory part of a slash separated path, `.` if there is none.
fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => ".",
    }
}
