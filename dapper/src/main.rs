use anyhow::{Context, Result};
use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::{debug, LevelFilter};
use std::{
    env,
    io::{stdout, Write},
    path::PathBuf,
    process,
};
use structopt::{clap::AppSettings, StructOpt};

use backends::DockerEngine;
use controller::{BuildOutcome, Controller};
use error::DapperError;
use models::{Dapperfile, HostContext, Mode};

mod backends;
mod controller;
mod dockerfile;
mod environment;
mod error;
mod host;
mod models;
mod run_args;
mod services;
mod tag;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "dapper",
    about = "Docker build wrapper: builds an environment from a Dockerfile and runs commands in it.",
    setting = AppSettings::TrailingVarArg,
    setting = AppSettings::AllowLeadingHyphen
)]
struct Opt {
    #[structopt(short, long, default_value = "Dockerfile.dapper", parse(from_os_str))]
    /// Dockerfile to build from.
    file: PathBuf,

    #[structopt(short, long)]
    /// Build the environment only, extra arguments go to the build.
    build: bool,

    #[structopt(short, long, conflicts_with = "build")]
    /// Launch an interactive shell in the environment.
    shell: bool,

    #[structopt(short = "k", long)]
    /// Mount the docker socket into the container.
    socket: bool,

    #[structopt(short, long, default_value = "auto", possible_values = &["auto", "bind", "cp"])]
    /// How the source gets into the container.
    mode: Mode,

    #[structopt(short = "O", long)]
    /// Do not copy the declared outputs back in copy mode.
    no_out: bool,

    #[structopt(short, long)]
    /// Make the build quiet.
    quiet: bool,

    #[structopt(short, long)]
    /// Print debugging output.
    debug: bool,

    #[structopt(short = "C", long, default_value = ".", parse(from_os_str))]
    /// Directory to change to before doing anything.
    directory: PathBuf,

    #[structopt(long)]
    /// Keep the build container after the run.
    keep: bool,

    #[structopt(short = "X", long)]
    /// Build without a context, reading the Dockerfile from stdin.
    no_context: bool,

    #[structopt(long)]
    /// Build with docker buildx bake.
    bake: bool,

    #[structopt(long, number_of_values = 1)]
    /// Cache sources for bake builds.
    cache_from: Vec<String>,

    #[structopt(long, number_of_values = 1)]
    /// Cache destinations for bake builds.
    cache_to: Vec<String>,

    #[structopt(long)]
    /// Suffix appended to the source bind mount, e.g. `z` or `cached`.
    mount_suffix: Option<String>,

    #[structopt(long)]
    /// Build stage to target.
    target: Option<String>,

    #[structopt(long)]
    /// Architecture to resolve `# FROM` maps for instead of the engine's.
    host_arch: Option<String>,

    #[structopt(name = "ARGS")]
    /// Command to run, or extra build arguments with --build.
    args: Vec<String>,
}

impl Opt {
    fn dapperfile(&self) -> Dapperfile {
        Dapperfile {
            file: self.file.clone(),
            mode: self.mode,
            socket: self.socket,
            no_out: self.no_out,
            quiet: self.quiet,
            bake: self.bake,
            keep: self.keep,
            no_context: self.no_context,
            cache_from: self.cache_from.clone(),
            cache_to: self.cache_to.clone(),
            mount_suffix: self.mount_suffix.clone(),
            target: self.target.clone(),
            host_arch: self.host_arch.clone(),
        }
    }
}

fn init_logging(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();

    match env::var("LOG") {
        Ok(filters) => {
            builder.parse_filters(&filters);
        }
        Err(_) => {
            let level = if debug {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            };
            builder.filter_level(level);
        }
    }

    builder.init();
}

fn main() {
    let opt = Opt::from_args();
    init_logging(opt.debug);

    if let Err(err) = dapper(opt) {
        let code = err
            .downcast_ref::<DapperError>()
            .and_then(DapperError::exit_code)
            .unwrap_or(1);

        eprintln!("Error: {:?}", err);
        process::exit(code);
    }
}

fn dapper(opt: Opt) -> Result<()> {
    env::set_current_dir(&opt.directory)
        .with_context(|| format!("could not change directory to {:?}", opt.directory))?;

    let dapperfile = opt.dapperfile();
    if !dapperfile.no_context && !dapperfile.file.exists() {
        return Err(anyhow::anyhow!("could not find {:?}", dapperfile.file));
    }

    let engine = DockerEngine::locate()?;
    let tag = tag::current_tag();
    let mut controller = Controller::init(dapperfile, engine, tag);

    let outcome = if opt.build {
        skipped(controller.build(&opt.args)?)
    } else if opt.shell {
        let host = HostContext::capture()?;
        skipped(controller.shell(&host, &opt.args)?)
    } else {
        let host = HostContext::capture()?;
        skipped(controller.run(&host, &opt.args)?)
    };

    if let Some(arch) = outcome {
        print_skipped(&arch)?;
    }

    Ok(())
}

fn skipped<T>(outcome: BuildOutcome<T>) -> Option<String> {
    match outcome {
        BuildOutcome::Built(_) => None,
        BuildOutcome::Skipped { arch } => Some(arch),
    }
}

fn print_skipped(arch: &str) -> Result<()> {
    debug!("nothing to build on {}", arch);

    let mut stdout = stdout();
    stdout
        .queue(style::PrintStyledContent("INFO: ".cyan().bold()))?
        .queue(style::Print(format!(
            "skipping build, {} is excluded by the Dockerfile.\n",
            arch
        )))?
        .flush()?;

    Ok(())
}
