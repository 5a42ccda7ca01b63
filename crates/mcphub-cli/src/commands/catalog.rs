//! Listing of the aggregated tools, resources and prompts.

use mcphub_mcp::{to_function_specs, ToolFormat};

use crate::AppContext;

/// Print the tool catalogue, either as text or as converted specifications.
pub async fn tools(ctx: &AppContext, format: Option<ToolFormat>) -> anyhow::Result<()> {
    let host = ctx.host();
    host.initialize().await;
    let tools = host.get_all_tools();
    host.shutdown().await;

    if let Some(format) = format {
        let specs = to_function_specs(&tools, format);
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("Tools ({}):", tools.len());
    for (name, tool) in &tools {
        match tool.description.as_deref() {
            Some(description) => println!("  {} - {}", name, description),
            None => println!("  {}", name),
        }
    }
    Ok(())
}

/// Print every resource of the connected servers.
pub async fn resources(ctx: &AppContext) -> anyhow::Result<()> {
    let host = ctx.host();
    host.initialize().await;
    let resources = host.get_all_resources();
    host.shutdown().await;

    if resources.is_empty() {
        println!("No resources available.");
        return Ok(());
    }

    println!("Resources ({}):", resources.len());
    for (uri, resource) in &resources {
        let mime = resource.mime_type.as_deref().unwrap_or("unknown");
        println!("  {} ({}) [{}]", uri, resource.name, mime);
        if let Some(ref description) = resource.description {
            println!("      {}", description);
        }
    }
    Ok(())
}

/// Print every prompt of the connected servers with its arguments.
pub async fn prompts(ctx: &AppContext) -> anyhow::Result<()> {
    let host = ctx.host();
    host.initialize().await;
    let prompts = host.get_all_prompts();
    host.shutdown().await;

    if prompts.is_empty() {
        println!("No prompts available.");
        return Ok(());
    }

    println!("Prompts ({}):", prompts.len());
    for (name, prompt) in &prompts {
        match prompt.description.as_deref() {
            Some(description) => println!("  {} - {}", name, description),
            None => println!("  {}", name),
        }
        for arg in &prompt.arguments {
            let required = if arg.required { " (required)" } else { "" };
            println!("      {}{}", arg.name, required);
        }
    }
    Ok(())
}
