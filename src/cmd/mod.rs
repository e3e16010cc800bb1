/*!
Command dispatcher module.

Every schema-derived invocation funnels through one path: `invoke.rs`
builds the request body from parsed matches, brackets the HTTP proxy call
with the sync orchestrator, and renders the response.

Conventions:
  - `execute_command` returns `anyhow::Result<()>`; `main` maps errors to
    exit code 1.
  - rendering helpers stay pure where possible so they are testable
    without a live service.
*/

pub mod invoke;

pub use invoke::execute_command;
