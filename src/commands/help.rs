use std::fmt::Write;

use crate::error::Result;
use crate::session::Session;

/// Usage text followed by the sorted command list of the catalog.
pub fn render(commands: &[&str]) -> String {
    let mut commands = commands.to_vec();
    commands.sort_unstable();

    let mut out = String::new();
    out.push_str("Usage: dockerized [options] <command>[:version] [arguments]\n\n");
    out.push_str("Examples:\n");
    out.push_str("  dockerized go\n");
    out.push_str("  dockerized go:1.8 build\n");
    out.push_str("  dockerized --shell go\n");
    out.push_str("  dockerized go:?\n\n");

    out.push_str("Commands:\n");
    for command in commands {
        let _ = writeln!(out, "  {}", command);
    }
    out.push('\n');

    out.push_str("Options:\n");
    out.push_str("      --build       Rebuild the container before running it.\n");
    out.push_str("      --pull        Pull the latest version of the container (before building it, with --build).\n");
    out.push_str("      --no-cache    Do not use cache when building the container (with --build).\n");
    out.push_str("      --digest      Print the image digest of the command.\n");
    out.push_str("      --commands    List the available commands.\n");
    out.push_str("      --shell       Start a shell inside the command container. Similar to `docker run --entrypoint=sh`.\n");
    out.push_str("      --entrypoint <entrypoint>\n");
    out.push_str("                    Override the default entrypoint of the command container.\n");
    out.push_str("  -p <port>         Exposes given port to host, e.g. -p 8080\n");
    out.push_str("  -p <port>:<port>  Maps host port to container port, e.g. -p 80:8080\n");
    out.push_str("  -v, --verbose     Log what dockerized is doing.\n");
    out.push_str("  -h, --help        Show this help.\n");
    out.push_str("  -V, --version     Print the dockerized version.\n\n");

    out.push_str("Version:\n");
    out.push_str("  :<version>        The version of the command to run, e.g. 1, 1.8, 1.8.1.\n");
    out.push_str("  :?                List all available versions. E.g. `dockerized go:?`\n");
    out.push_str("  :                 Same as ':?' .\n\n");

    out.push_str("Arguments:\n");
    out.push_str("  All arguments after <command> are passed to the command itself.\n");
    out
}

pub fn print_help(session: &Session) -> Result<()> {
    let project = session.load_catalog()?;
    print!("{}", render(&project.service_names()));
    Ok(())
}

/// `--commands`: one catalog command per line.
pub fn print_commands(session: &Session) -> Result<()> {
    let project = session.load_catalog()?;
    for name in project.service_names() {
        println!("{}", name);
    }
    Ok(())
}
