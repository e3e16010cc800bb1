use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

mod api;
mod cli;
mod cmd;
mod config;
mod schema;
mod sync;
#[cfg(test)]
mod testutil;
mod utils;

use api::ApiClient;
use config::Config;
use schema::CommandTable;
use utils::output::{Color, color};

/// agint - schema-driven CLI for the agint remote build service.
///
/// The command surface is not hardcoded: at startup the remote service's
/// OpenAPI document is fetched (or read from `OPENAPI_SPEC_PATH`) and
/// rendered into a clap tree:
///
///   agint <group> <command> [args...]
///
/// For command groups on the sync allow-list, the invocation is bracketed
/// by a two-phase directory synchronization: changed local files are
/// uploaded before the command runs, and a server-built snapshot of the
/// remote workspace is downloaded and extracted afterwards.
///
/// Multi-entry dispatch: installing the binary under a group's name
/// (e.g. a `dagify` hardlink) collapses the surface to that group:
///
///   dagify <command> [args...]
///
/// Environment:
///   DOCKER_BUILDER_API_URL   service root (default https://api.agintai.com)
///   AGINT_APIKEY             credential, required
///   DEBUG=1                  verbose logging
///   OPENAPI_SPEC_PATH        local schema override (no network discovery)
///   AGINT_BACKGROUND_SYNC=1  detach the post-command snapshot pull
///
/// Exit codes: 0 success; 1 missing credential, fatal pre-sync failure, or
/// command HTTP/parse failure; 2 CLI usage errors (via clap).
fn main() {
    dotenvy::dotenv().ok();
    utils::init_logging(utils::logging::derive_level(
        0,
        false,
        config::env_flag("DEBUG"),
    ));

    if let Err(e) = try_main() {
        eprintln!("{}", color(Color::Red, format!("Error: {e:#}")));
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let config = Config::from_env()?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let api = Arc::new(ApiClient::new(&config)?);

    let spec_doc = match &config.spec_path {
        Some(path) => schema::load_local_spec(path)?,
        None => api.fetch_spec().await?,
    };
    let table = CommandTable::from_spec(&spec_doc);
    if table.groups.is_empty() {
        anyhow::bail!("OpenAPI spec exposes no invocable commands");
    }

    let root_group = invoked_group(&table);
    let matches = cli::build_cli(&table, root_group.as_deref()).get_matches();

    // Re-derive the log level now that the flags are parsed.
    utils::logging::set_log_level(utils::logging::derive_level(
        matches.get_count("log_verbosity"),
        matches.get_flag("log_quiet"),
        config.debug,
    ));

    let (group, command, cmd_matches) = match &root_group {
        Some(g) => {
            let (command, cmd_matches) = matches
                .subcommand()
                .context("No command given")?;
            (g.clone(), command.to_string(), cmd_matches)
        }
        None => {
            let (group, sub) = matches.subcommand().context("No command group given")?;
            let (command, cmd_matches) = sub.subcommand().context("No command given")?;
            (group.to_string(), command.to_string(), cmd_matches)
        }
    };

    let spec = table
        .find(&group, &command)
        .with_context(|| format!("Unknown command: {group} {command}"))?;

    cmd::execute_command(&config, api, spec, cmd_matches).await
}

/// If the binary was invoked under a schema group's name (hardlink or
/// rename), that group becomes the root command surface.
fn invoked_group(table: &CommandTable) -> Option<String> {
    let argv0 = std::env::args().next()?;
    let stem = Path::new(&argv0).file_stem()?.to_str()?;
    table.groups.contains_key(stem).then(|| stem.to_string())
}
