//! Run command.
//!
//! Builds a workflow file, runs it against the target and prints a
//! per-step report.

use anyhow::Context;
use cogflow_core::{EngineConfig, RepeatOutput, RunReport, StepStatus, StepSummary};
use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::Path;
use tabled::{Table, Tabled, settings::Style};

use crate::template::value_text;
use crate::workflow_file::WorkflowFile;

/// Execute the run command.
pub async fn execute(
    file: &Path,
    target: Option<String>,
    json: bool,
    config: EngineConfig,
) -> anyhow::Result<()> {
    let workflow_file = WorkflowFile::load(file)?;
    let workflow = workflow_file.build(config)?;

    if !json {
        println!("{}", format!("cogflow run {}", workflow.name()).bold().cyan());
        if let Some(target) = &target {
            println!("  Target: {}", target);
        }
        println!();
    }

    let report = workflow.run(target).await.map_err(|err| {
        let step = err.root_step().unwrap_or("-").to_string();
        anyhow::Error::new(err).context(format!("Workflow '{}' failed at step '{}'", workflow.name(), step))
    })?;

    if json {
        output_json(&report)?;
    } else {
        output_human(&report);
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport {
    #[serde(flatten)]
    summary: cogflow_core::RunSummary,
    outputs: Map<String, Value>,
}

fn output_json(report: &RunReport) -> anyhow::Result<()> {
    let outputs = report
        .summaries()
        .iter()
        .filter(|step| step.status == StepStatus::Completed)
        .filter_map(|step| step_value(report, &step.name).map(|value| (step.name.clone(), value)))
        .collect();

    let output = JsonReport { summary: report.summary(), outputs };
    println!("{}", serde_json::to_string_pretty(&output).context("Failed to serialize run report")?);
    Ok(())
}

/// JSON form of a completed step value, if it is one the CLI produces.
fn step_value(report: &RunReport, name: &str) -> Option<Value> {
    if let Ok(Some(text)) = report.output::<String>(name) {
        return Some(Value::String(text.as_ref().clone()));
    }
    let repeat = report.output::<RepeatOutput>(name).ok().flatten()?;
    Some(json!({
        "final_state": repeat.final_state(),
        "outputs": repeat.outputs(),
        "iterations": repeat.iteration_count(),
        "broke": repeat.broke(),
    }))
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl StepRow {
    fn new(step: &StepSummary, report: &RunReport) -> Self {
        let detail = match step.status {
            StepStatus::Completed => step_value(report, &step.name).map(|value| preview(&value)),
            _ => step.reason.clone().or_else(|| step.error.clone()),
        };
        Self {
            name: step.name.clone(),
            kind: step.kind.to_string(),
            mode: format!("{:?}", step.mode).to_lowercase(),
            status: step.status.to_string(),
            duration: step.duration_ms.map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms)),
            detail: detail.unwrap_or_default(),
        }
    }
}

/// First line of a value, shortened for the table.
fn preview(value: &Value) -> String {
    let text = match value {
        Value::Object(repeat) => repeat.get("final_state").map(value_text).unwrap_or_default(),
        other => value_text(other),
    };
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 60 {
        format!("{}...", line.chars().take(57).collect::<String>())
    } else {
        line.to_string()
    }
}

fn output_human(report: &RunReport) {
    let summaries = report.summaries();
    let rows: Vec<StepRow> = summaries.iter().map(|step| StepRow::new(step, report)).collect();

    if rows.is_empty() {
        println!("{}", "No steps declared.".yellow());
    } else {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    let completed = summaries.iter().filter(|s| s.status == StepStatus::Completed).count();
    let skipped = summaries.iter().filter(|s| s.status == StepStatus::Skipped).count();
    println!();
    println!(
        "{} {} completed, {} skipped in {}ms",
        "✓".green().bold(),
        completed,
        skipped,
        report.duration_ms()
    );
}
