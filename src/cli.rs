/*!
cli.rs - dynamic CLI surface.

Renders the declarative `CommandTable` into a `clap` command tree at
startup (group -> command -> typed args) and converts parsed matches back
into the JSON request body. Presentation follows the schema's tagged
`ParamKind`:

  Argument -> positional (required honors x-required)
  Flag     -> boolean `--name`
  Opt      -> `--name <VALUE>` (underscores become dashes)

Multi-entry dispatch: when the binary's argv[0] stem names a schema group
(e.g. a `dagify` hardlink), that group's subcommand tree becomes the root
surface and the group level disappears.
*/

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;

use crate::schema::{CommandSpec, CommandTable, ParamKind};

/// Build the full CLI. `root_group` collapses the surface to one group
/// (argv[0] dispatch); `None` exposes every group as a subcommand.
pub fn build_cli(table: &CommandTable, root_group: Option<&str>) -> Command {
    let root = Command::new(root_group.unwrap_or("agint").to_string())
        .about("CLI for the agint remote build service")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .disable_help_subcommand(true)
        .arg(
            Arg::new("log_verbosity")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Increase verbosity (-v, -vv)"),
        )
        .arg(
            Arg::new("log_quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Silence all non-error output"),
        );

    match root_group {
        Some(group) => {
            let mut cmd = root;
            if let Some(specs) = table.groups.get(group) {
                for spec in specs {
                    cmd = cmd.subcommand(build_command(spec));
                }
            }
            cmd
        }
        None => {
            let mut cmd = root;
            for (group, specs) in &table.groups {
                let mut sub = Command::new(group.clone())
                    .about(format!("Commands for {group}"))
                    .subcommand_required(true)
                    .arg_required_else_help(true);
                for spec in specs {
                    sub = sub.subcommand(build_command(spec));
                }
                cmd = cmd.subcommand(sub);
            }
            cmd
        }
    }
}

/// One schema-derived command.
fn build_command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(spec.name.clone());
    if !spec.description.is_empty() {
        cmd = cmd.about(spec.description.clone());
    }
    for param in &spec.params {
        let mut arg = Arg::new(param.name.clone()).help(param.help.clone());
        match param.kind {
            ParamKind::Argument => {
                arg = arg.value_name(param.cli_name.to_uppercase());
                if param.required {
                    arg = arg.required(true);
                }
            }
            ParamKind::Flag => {
                arg = arg
                    .long(param.cli_name.replace('_', "-"))
                    .action(ArgAction::SetTrue);
            }
            ParamKind::Opt => {
                arg = arg
                    .long(param.cli_name.replace('_', "-"))
                    .value_name(param.cli_name.to_uppercase());
                if param.required {
                    arg = arg.required(true);
                }
            }
        }
        if !matches!(param.kind, ParamKind::Flag)
            && !param.required
            && let Some(default) = &param.default
        {
            arg = arg.default_value(default_to_str(default));
        }
        cmd = cmd.arg(arg);
    }
    cmd
}

/// Render a schema default into the CLI string clap expects.
fn default_to_str(default: &Value) -> String {
    match default {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert parsed matches back into the JSON request body, coercing each
/// value by its schema type tag. Flags always contribute their boolean;
/// absent optional values contribute nothing.
pub fn body_from_matches(
    spec: &CommandSpec,
    matches: &ArgMatches,
) -> serde_json::Map<String, Value> {
    let mut body = serde_json::Map::new();
    for param in &spec.params {
        match param.kind {
            ParamKind::Flag => {
                body.insert(param.name.clone(), Value::Bool(matches.get_flag(&param.name)));
            }
            ParamKind::Argument | ParamKind::Opt => {
                if let Some(raw) = matches.get_one::<String>(&param.name) {
                    body.insert(param.name.clone(), param.ty.coerce(raw));
                }
            }
        }
    }
    body
}
