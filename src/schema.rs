/*!
schema.rs - OpenAPI schema model and declarative command table.

The remote service publishes its command surface as an OpenAPI document
(`GET /openapi.json`). This module turns that document into a static,
declarative table consumed by `cli.rs`:

  CommandTable
    groups: group name -> [CommandSpec]
  CommandSpec  { path, method, name, description, params }
  ParamSpec    { name, cli_name, kind, ty, required, default, help }
  ParamKind    Argument | Flag | Opt   (CLI presentation, tagged variant)
  ParamType    Str | Int | Num | Bool | List | Obj

Rules:
  - paths grouped by first segment; `/health` skipped
  - command name = second path segment
  - request body schema from requestBody.content["application/json"].schema,
    `$ref` resolved against the document, `anyOf` collapsed to its first
    typed member
  - `openapi_extra` carries x-is-argument / x-is-flag / x-required / x-cli-name
  - `agint_apikey` and `stdin` properties are injected automatically and
    never surfaced as CLI parameters
*/

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

/// Body properties that are filled in by the client, not the user.
const HIDDEN_PARAMS: &[&str] = &["agint_apikey", "stdin"];

/// Primitive type tag from the OpenAPI `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    Num,
    Bool,
    List,
    Obj,
}

impl ParamType {
    pub fn from_openapi(s: &str) -> Self {
        match s {
            "integer" => ParamType::Int,
            "number" => ParamType::Num,
            "boolean" => ParamType::Bool,
            "array" => ParamType::List,
            "object" => ParamType::Obj,
            _ => ParamType::Str,
        }
    }

    /// Coerce a raw CLI string into a JSON value. Values that do not parse
    /// as the declared type fall back to plain strings so the server sees
    /// exactly what the user typed.
    pub fn coerce(&self, raw: &str) -> Value {
        match self {
            ParamType::Int => raw
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            ParamType::Num => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(raw.to_string())),
            ParamType::Bool => {
                let l = raw.to_ascii_lowercase();
                match l.as_str() {
                    "true" | "1" | "yes" | "y" => Value::Bool(true),
                    "false" | "0" | "no" | "n" => Value::Bool(false),
                    _ => Value::String(raw.to_string()),
                }
            }
            ParamType::List => Value::Array(
                raw.split(',')
                    .map(|s| Value::String(s.trim().to_string()))
                    .collect(),
            ),
            ParamType::Obj => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
            }
            ParamType::Str => Value::String(raw.to_string()),
        }
    }
}

/// How a parameter is presented on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Positional argument.
    Argument,
    /// Boolean `--flag`.
    Flag,
    /// Named `--option <VALUE>`.
    Opt,
}

/// One request-body property, with its CLI presentation metadata.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    /// Body property name.
    pub name: String,
    /// Name used on the CLI (x-cli-name override, else the property name).
    pub cli_name: String,
    pub kind: ParamKind,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub help: String,
}

impl ParamSpec {
    fn from_property(name: &str, prop: &Value) -> Self {
        let extra = prop.get("openapi_extra");
        let get_flag = |key: &str| {
            extra
                .and_then(|e| e.get(key))
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        };

        let kind = if get_flag("x-is-argument") {
            ParamKind::Argument
        } else if get_flag("x-is-flag") {
            ParamKind::Flag
        } else {
            ParamKind::Opt
        };

        let cli_name = extra
            .and_then(|e| e.get("x-cli-name"))
            .and_then(|v| v.as_str())
            .unwrap_or(name)
            .to_string();

        // `anyOf` (nullable unions) collapses to its first typed member.
        let ty_str = prop
            .get("type")
            .and_then(|v| v.as_str())
            .or_else(|| {
                prop.get("anyOf")?
                    .as_array()?
                    .iter()
                    .find_map(|t| t.get("type").and_then(|v| v.as_str()))
            })
            .unwrap_or("string");

        ParamSpec {
            name: name.to_string(),
            cli_name,
            kind,
            ty: ParamType::from_openapi(ty_str),
            required: get_flag("x-required"),
            default: prop.get("default").filter(|v| !v.is_null()).cloned(),
            help: prop
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// One invocable operation derived from the schema.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Full request path (e.g. `/dagify/build`).
    pub path: String,
    /// Uppercased HTTP method.
    pub method: String,
    /// CLI command name (second path segment).
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

/// The full derived command surface, grouped by root path segment.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    pub groups: BTreeMap<String, Vec<CommandSpec>>,
}

impl CommandTable {
    /// Build the table from a parsed OpenAPI document.
    pub fn from_spec(spec: &Value) -> Self {
        let mut groups: BTreeMap<String, Vec<CommandSpec>> = BTreeMap::new();

        let Some(paths) = spec.get("paths").and_then(|v| v.as_object()) else {
            return Self::default();
        };

        for (path_str, path_item) in paths {
            if path_str == "/health" {
                continue;
            }
            let parts: Vec<&str> = path_str.trim_matches('/').split('/').collect();
            if parts.len() < 2 || parts[0].is_empty() {
                continue;
            }
            let group = parts[0].to_string();
            let command = parts[1].to_string();

            let Some(item) = path_item.as_object() else {
                continue;
            };
            for (method, operation) in item {
                let m = method.to_ascii_lowercase();
                if !matches!(m.as_str(), "get" | "post" | "put" | "patch" | "delete") {
                    continue;
                }
                let body_schema = extract_body_schema(operation, spec);
                let mut params = Vec::new();
                if let Some(props) = body_schema.get("properties").and_then(|v| v.as_object()) {
                    for (pname, pspec) in props {
                        if HIDDEN_PARAMS.contains(&pname.as_str()) {
                            continue;
                        }
                        params.push(ParamSpec::from_property(pname, pspec));
                    }
                }

                groups.entry(group.clone()).or_default().push(CommandSpec {
                    path: path_str.clone(),
                    method: m.to_ascii_uppercase(),
                    name: command.clone(),
                    description: operation
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    params,
                });
            }
        }

        Self { groups }
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Look up one command within a group.
    pub fn find(&self, group: &str, command: &str) -> Option<&CommandSpec> {
        self.groups
            .get(group)?
            .iter()
            .find(|c| c.name == command)
    }
}

/// Extract the JSON request-body schema from an operation, resolving a
/// top-level `$ref` against the document.
fn extract_body_schema(operation: &Value, spec: &Value) -> Value {
    let schema = operation
        .get("requestBody")
        .and_then(|v| v.get("content"))
        .and_then(|v| v.get("application/json"))
        .and_then(|v| v.get("schema"))
        .cloned()
        .unwrap_or(Value::Null);

    if let Some(r) = schema.get("$ref").and_then(|v| v.as_str()) {
        // "#/components/schemas/Foo" -> walk the document
        let mut current = spec;
        for part in r.split('/').skip(1) {
            match current.get(part) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        return current.clone();
    }

    if schema.is_object() { schema } else { Value::Null }
}

/// Read a local OpenAPI document (the `OPENAPI_SPEC_PATH` override).
pub fn load_local_spec(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read local OpenAPI spec: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in local OpenAPI spec: {}", path.display()))
}
