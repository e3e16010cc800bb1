/*!
invoke.rs - proxy one schema-derived command to the remote service.

Flow:
  1. build the JSON body from parsed matches (typed coercion in cli.rs)
  2. expand parameter values that name readable files (incl. /dev/fd entries)
  3. append the credential and, when stdin is piped, its captured text
  4. wrap the HTTP call in the sync orchestrator (pre-upload / post-pull)
  5. render the response:
       stderr field  - base64-decoded, written verbatim to our stderr
       stdout field  - printed only when our stdout is not a terminal
       HTTP 400      - structured error object, assembled and returned
                       as the fatal error message
*/

use anyhow::{Result, bail};
use clap::ArgMatches;
use serde_json::Value;
use std::io::{IsTerminal, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::api::{ApiClient, CommandReply, decode_b64_text};
use crate::cli::body_from_matches;
use crate::config::Config;
use crate::log_debug;
use crate::schema::CommandSpec;
use crate::sync::SyncOrchestrator;
use crate::utils::text::clean_formatted_text;

/// Execute one derived command end to end.
pub async fn execute_command(
    config: &Config,
    api: Arc<ApiClient>,
    spec: &CommandSpec,
    matches: &ArgMatches,
) -> Result<()> {
    let group = spec
        .path
        .trim_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let mut body = body_from_matches(spec, matches);
    for value in body.values_mut() {
        if let Value::String(s) = value {
            let expanded = read_file_like(s);
            if expanded != *s {
                *value = Value::String(expanded);
            }
        }
    }
    body.insert("agint_apikey".into(), Value::String(config.api_key.clone()));

    if !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        if std::io::stdin().read_to_string(&mut piped).is_ok() {
            let piped = piped.trim().to_string();
            log_debug!("Added stdin data (length={})", piped.len());
            body.insert("stdin".into(), Value::String(piped));
        }
    }

    let working_dir = std::env::current_dir()?;
    let orchestrator = SyncOrchestrator::new(
        Arc::clone(&api),
        working_dir,
        config.background_sync,
    );

    let body = Value::Object(body);
    orchestrator
        .around(&group, || run_remote(&api, spec, &body))
        .await
}

/// The EXECUTE step: proxy the call and render the reply.
async fn run_remote(api: &ApiClient, spec: &CommandSpec, body: &Value) -> Result<()> {
    match api.execute(&spec.method, &spec.path, body).await? {
        CommandReply::BadRequest(data) => {
            bail!("{}", format_bad_request(&data));
        }
        CommandReply::Ok(data) => {
            render_success(&data);
            Ok(())
        }
    }
}

/// Assemble the user-facing message from a structured 400 error object:
/// decoded stderr, then stdout, then the exception string, de-duplicated,
/// with terminal formatting stripped.
fn format_bad_request(data: &Value) -> String {
    let Some(obj) = data.as_object() else {
        return data.to_string();
    };

    let stderr = obj
        .get("stderr")
        .and_then(|v| v.as_str())
        .and_then(decode_b64_text)
        .unwrap_or_default();
    let stdout = obj
        .get("stdout")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let exception = obj
        .get("exception")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut parts: Vec<String> = Vec::new();
    for part in [stderr, stdout, exception] {
        if !part.is_empty() && !parts.contains(&part) {
            parts.push(part);
        }
    }
    if parts.is_empty() {
        return data.to_string();
    }
    clean_formatted_text(&parts.join("\n"))
}

/// Render a successful command reply.
fn render_success(data: &Value) {
    // stderr is always surfaced; written raw so the terminal keeps any
    // ANSI formatting the remote tool produced.
    if let Some(raw) = data.get("stderr").and_then(|v| v.as_str())
        && !raw.is_empty()
    {
        let text = decode_b64_text(raw).unwrap_or_else(|| raw.to_string());
        let mut err = std::io::stderr();
        let _ = err.write_all(text.as_bytes());
        let _ = err.flush();
    }

    if let Some(out) = data.get("stdout").and_then(|v| v.as_str())
        && !out.is_empty()
        && !std::io::stdout().is_terminal()
    {
        print!("{out}");
        let _ = std::io::stdout().flush();
    }
}

/// Replace a parameter value naming a readable file (including `/dev/fd/*`
/// process substitutions) with that file's contents. Anything unreadable
/// passes through verbatim.
fn read_file_like(value: &str) -> String {
    if value.starts_with("/dev/fd/") || Path::new(value).exists() {
        match std::fs::read_to_string(value) {
            Ok(content) => return content,
            Err(e) => {
                log_debug!("Failed to read from {value}: {e}");
            }
        }
    }
    value.to_string()
}
