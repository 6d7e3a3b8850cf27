use std::path::PathBuf;

use tracing::info;

use super::{help, image, versions};
use crate::cli::Cli;
use crate::env::Environment;
use crate::error::{DockerizedError, Result};
use crate::host::HostContext;
use crate::run::engine::stdio_is_terminal;
use crate::run::signal::listen_for_signals;
use crate::run::{CancellationToken, DockerComposeEngine, RunExecutor, RunPlanner};
use crate::session::Session;
use crate::version::VersionRequest;

/// Runs one invocation and returns the process exit code.
pub async fn execute(cli: Cli) -> Result<i32> {
    let process_env = Environment::from_process();
    let host = HostContext::from_process(cli.root_dir.clone().map(PathBuf::from), &process_env)?;
    let session = Session::open(host, process_env)?;

    if cli.commands {
        help::print_commands(&session)?;
        return Ok(0);
    }

    let spec = match cli.command_spec() {
        Some(spec) if !cli.help => spec,
        _ => {
            help::print_help(&session)?;
            return Ok(if cli.help { 0 } else { 1 });
        }
    };
    if spec.name.starts_with('-') {
        return Err(DockerizedError::UnknownOption(spec.name));
    }

    let session = match &spec.version {
        Some(VersionRequest::List) => {
            versions::execute(&session, &spec.name).await?;
            return Ok(0);
        }
        Some(VersionRequest::Exact(version)) => session.with_version(&spec.name, version)?,
        None => session,
    };

    let project = session.load_catalog()?;
    let request = RunPlanner::new(&session.host.cwd, session.host.hostname.clone())
        .with_tty(stdio_is_terminal())
        .plan(&project, &spec.name, cli.command_args(), &cli.plan_options())?;

    let engine = DockerComposeEngine::new(&session.env);
    if cli.build {
        image::build(&engine, &project, &spec.name, cli.pull, cli.no_cache).await?;
    } else if cli.pull {
        image::pull(&engine, &project, &spec.name).await?;
        if !cli.digest {
            return Ok(0);
        }
    }
    if cli.digest {
        println!("{}", image::digest(&engine, &project, &spec.name).await?);
        return Ok(0);
    }

    let cancel = CancellationToken::new();
    let listener = listen_for_signals(cancel.clone());
    let result = RunExecutor::new(engine).run(&project, &request, &cancel).await;
    listener.abort();

    result?;
    info!("{} finished", spec.name);
    Ok(0)
}
