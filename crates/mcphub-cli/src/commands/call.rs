//! Invoking a single tool.

use anyhow::Context;
use serde_json::Value;

use crate::AppContext;

/// Parse the argument string of `call`. Empty input means no arguments.
fn parse_args(raw: &str) -> anyhow::Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    let value: Value = serde_json::from_str(raw).context("arguments must be valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("arguments must be a JSON object");
    }
    Ok(value)
}

/// Call `name` and print its result. Returns false if the tool reported an error.
pub async fn run(ctx: &AppContext, name: &str, raw_args: &str) -> anyhow::Result<bool> {
    let arguments = parse_args(raw_args)?;

    let host = ctx.host();
    host.initialize().await;
    let outcome = host.call_tool(name, arguments).await;
    host.shutdown().await;

    let result = outcome.map_err(|e| {
        let e: mcphub_core::Error = e.into();
        anyhow::anyhow!(mcphub_core::error::format_error_with_suggestion(&e))
    })?;

    if result.is_error {
        eprintln!("Tool returned an error:");
        eprintln!("{}", result.text());
    } else {
        println!("{}", result.text());
    }

    Ok(!result.is_error)
}
