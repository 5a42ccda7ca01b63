//! Server status and configuration checks.

use chrono::{DateTime, Local, Utc};

use mcphub_core::IssueSeverity;
use mcphub_mcp::{ClientStatus, ConfigLoader};

use crate::AppContext;

/// Format a datetime for display.
fn format_time(dt: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = dt.with_timezone(&Local);
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format one status row.
fn format_status(status: &ClientStatus) -> String {
    let mut line = format!(
        "{:<20} {:<13} {:>5} {:>9} {:>7}",
        status.server_name,
        status.status.to_string(),
        status.tools_count,
        status.resources_count,
        status.prompts_count
    );
    if let Some(ref connected_at) = status.connected_at {
        line.push_str(&format!("  since {}", format_time(connected_at)));
    }
    if let Some(ref error) = status.error_message {
        line.push_str(&format!("  error: {}", error));
    }
    line
}

/// Connect to every server and print a status table.
pub async fn status(ctx: &AppContext) -> anyhow::Result<()> {
    if ctx.servers.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    let host = ctx.host();
    host.initialize().await;

    println!(
        "{:<20} {:<13} {:>5} {:>9} {:>7}",
        "SERVER", "STATUS", "TOOLS", "RESOURCES", "PROMPTS"
    );
    for status in host.get_status().values() {
        println!("{}", format_status(status));
    }
    for (name, config) in &ctx.servers {
        if !config.enabled {
            println!("{:<20} {:<13}", name, "disabled");
        }
    }

    host.shutdown().await;
    Ok(())
}

/// Print validation issues of every configured server. Returns false on errors.
pub fn check(ctx: &AppContext) -> bool {
    match ctx.config.servers_file() {
        Some(path) => println!("Servers file: {}", path.display()),
        None => println!("Servers file: none found"),
    }

    if ctx.servers.is_empty() {
        println!("No MCP servers configured.");
        return true;
    }

    let mut ok = true;
    for (name, config) in &ctx.servers {
        let result = ConfigLoader::validate(name, config);
        let state = if config.enabled { "" } else { " (disabled)" };

        if result.issues.is_empty() {
            println!("  ✓ {} [{}]{}", name, config.transport_type, state);
            continue;
        }

        let marker = if result.is_ok() { "!" } else { "✗" };
        println!("  {} {} [{}]{}", marker, name, config.transport_type, state);
        for issue in &result.issues {
            let level = match issue.severity {
                IssueSeverity::Error => "error",
                IssueSeverity::Warning => "warning",
            };
            println!("      {}: {}: {}", level, issue.field, issue.message);
        }
        ok &= result.is_ok();
    }

    ok
}
