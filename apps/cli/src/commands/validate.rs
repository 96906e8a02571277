//! Validate command.
//!
//! Parses and builds a workflow file without running any step.

use cogflow_core::EngineConfig;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

use crate::template::references;
use crate::workflow_file::WorkflowFile;

#[derive(Serialize)]
struct JsonOutput {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<String>,
    steps: usize,
    scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the validate command.
pub fn execute(file: &Path, json: bool, config: EngineConfig) -> anyhow::Result<()> {
    let checked = WorkflowFile::load(file).and_then(|parsed| {
        parsed.build(config)?;
        Ok(parsed)
    });

    if json {
        let output = match &checked {
            Ok(parsed) => JsonOutput {
                valid: true,
                workflow: Some(parsed.name.clone()),
                steps: parsed.step_count(),
                scopes: parsed.scopes.keys().cloned().collect(),
                error: None,
            },
            Err(err) => JsonOutput {
                valid: false,
                workflow: None,
                steps: 0,
                scopes: Vec::new(),
                error: Some(format!("{:#}", err)),
            },
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        if checked.is_err() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let parsed = checked?;
    println!("{}", "cogflow validate".bold().cyan());
    println!();
    println!("  {} {}", "✓".green(), parsed.name.bold());
    println!("  Steps:  {}", parsed.step_count());
    if !parsed.scopes.is_empty() {
        println!("  Scopes: {}", parsed.scopes.keys().cloned().collect::<Vec<_>>().join(", "));
    }

    let forced: Vec<String> = parsed
        .steps
        .iter()
        .chain(parsed.scopes.values().flat_map(|scope| &scope.steps))
        .flat_map(|step| [&step.command, &step.chat, &step.agent, &step.initial_state])
        .flatten()
        .flat_map(|template| references(template))
        .filter(|(_, forcing)| *forcing)
        .map(|(name, _)| name)
        .collect();
    if !forced.is_empty() {
        println!("  Reads:  {}", forced.join(", "));
    }
    Ok(())
}
