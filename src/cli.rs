use clap::{ArgAction, Parser};

use crate::run::PlanOptions;
use crate::version::{parse_command_spec, CommandSpec};

#[derive(Debug, Parser)]
#[command(
    name = "dockerized",
    about = "Run command-line tools inside disposable containers.",
    override_usage = "dockerized [options] <command>[:version] [arguments]",
    disable_help_flag = true
)]
#[command(version)]
pub struct Cli {
    /// Installation directory with the bundled compose and env files
    #[arg(long, env = "DOCKERIZED_ROOT", value_name = "PATH")]
    pub root_dir: Option<String>,

    /// Rebuild the container before running it
    #[arg(long)]
    pub build: bool,

    /// Pull the latest version of the container (before building it, with --build)
    #[arg(long)]
    pub pull: bool,

    /// Do not use cache when building the container (with --build)
    #[arg(long)]
    pub no_cache: bool,

    /// Print the image digest of the command
    #[arg(long)]
    pub digest: bool,

    /// List the available commands
    #[arg(long)]
    pub commands: bool,

    /// Start a shell inside the command container
    #[arg(long)]
    pub shell: bool,

    /// Override the default entrypoint of the command container
    #[arg(long, value_name = "ENTRYPOINT")]
    pub entrypoint: Option<String>,

    /// Expose a port to the host, e.g. -p 8080 or -p 80:8080
    #[arg(short = 'p', value_name = "PORT")]
    pub port: Option<String>,

    /// Log what dockerized is doing
    #[arg(short, long)]
    pub verbose: bool,

    /// Show this help
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub help: bool,

    /// <command>[:version] followed by the arguments passed to it
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// The requested command, if any. Everything after it belongs to the
    /// command itself.
    pub fn command_spec(&self) -> Option<CommandSpec> {
        self.command
            .first()
            .filter(|name| !name.is_empty())
            .map(|name| parse_command_spec(name))
    }

    pub fn command_args(&self) -> Vec<String> {
        self.command.iter().skip(1).cloned().collect()
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            shell: self.shell,
            entrypoint: self.entrypoint.clone(),
            port: self.port.clone(),
        }
    }
}
