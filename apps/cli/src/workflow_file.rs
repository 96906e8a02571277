//! Workflow files.
//!
//! A workflow file is a TOML document:
//!
//! ```toml
//! name = "refine"
//!
//! [[steps]]
//! name = "draft"
//! chat = "Write a haiku about {{target}}"
//!
//! [[steps]]
//! name = "polish"
//! repeat = "review"
//! max_iterations = 3
//! initial_state = "{{draft}}"
//!
//! [[scopes.review.steps]]
//! name = "critique"
//! chat = "Improve: {{state}}"
//! break_if = "(?i)perfect"
//!
//! [scopes.review.outputs]
//! state = "{{critique}}"
//! output = "{{critique}}"
//! ```

use anyhow::{Context, bail};
use cogflow_cogs::{
    AgentCog, AgentInput, AgentOutput, ChatCog, ChatInput, ChatOutput, CommandCog, CommandInput,
    CommandOutput, MockModel,
};
use cogflow_core::{
    EngineConfig, IterationOutputs, RepeatConfig, Scope, Step, StepContext, StepResult, Workflow,
    break_loop, fail, skip,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::template::{parse_value, references, render};

/// Parsed workflow file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowFile {
    /// Workflow name.
    pub name: String,
    /// Main scope steps.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Execution scopes for repeats.
    #[serde(default)]
    pub scopes: BTreeMap<String, ScopeSpec>,
    /// Chat cog settings.
    #[serde(default)]
    pub chat: ChatSettings,
    /// Agent cog settings.
    #[serde(default)]
    pub agent: AgentSettings,
}

/// A named execution scope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeSpec {
    /// Steps of one iteration.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Per-iteration outputs.
    pub outputs: Option<OutputsSpec>,
}

/// Templates evaluated after each iteration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputsSpec {
    /// Next state. The state is carried over unchanged when absent.
    pub state: Option<String>,
    /// Collected value.
    pub output: Option<String>,
}

/// One step.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Step name. Generated from the kind when absent.
    pub name: Option<String>,
    /// Shell command template.
    pub command: Option<String>,
    /// Chat prompt template.
    pub chat: Option<String>,
    /// Agent prompt template.
    pub agent: Option<String>,
    /// Scope to repeat.
    pub repeat: Option<String>,
    /// Run without blocking the walk.
    #[serde(default)]
    pub background: bool,
    /// Keep non-zero command exits as output.
    #[serde(default)]
    pub allow_failure: bool,
    /// Skip when the output is blank.
    #[serde(default)]
    pub skip_if_empty: bool,
    /// Break the enclosing repeat when the output matches.
    pub break_if: Option<String>,
    /// Abort the run when the output matches.
    pub fail_if: Option<String>,
    /// Iteration limit for repeats.
    pub max_iterations: Option<usize>,
    /// Initial state template for repeats.
    pub initial_state: Option<String>,
    /// Working directory for commands and agents.
    pub working_dir: Option<PathBuf>,
}

/// Chat model settings.
///
/// The CLI ships no network model client: chat steps run on
/// [`MockModel`], which echoes the prompt. `model` only sets the model id
/// reported in outputs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSettings {
    /// Model id given to the mock model.
    pub model: Option<String>,
    /// System prompt for every chat step.
    pub system: Option<String>,
}

/// Agent program settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSettings {
    /// Program to launch. Defaults to `claude`.
    pub program: Option<String>,
    /// Program arguments. Defaults to `-p` for the default program.
    #[serde(default)]
    pub args: Vec<String>,
}

enum Action<'a> {
    Command(&'a str),
    Chat(&'a str),
    Agent(&'a str),
    Repeat(&'a str),
}

impl StepSpec {
    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<unnamed>".to_string())
    }

    fn action(&self) -> anyhow::Result<Action<'_>> {
        let actions: Vec<Action<'_>> = [
            self.command.as_deref().map(Action::Command),
            self.chat.as_deref().map(Action::Chat),
            self.agent.as_deref().map(Action::Agent),
            self.repeat.as_deref().map(Action::Repeat),
        ]
        .into_iter()
        .flatten()
        .collect();

        match <[Action<'_>; 1]>::try_from(actions) {
            Ok([action]) => Ok(action),
            Err(found) => bail!(
                "step {} must set exactly one of command, chat, agent or repeat (found {})",
                self.label(),
                found.len()
            ),
        }
    }

    fn checks(&self) -> anyhow::Result<OutputChecks> {
        let compile = |pattern: &Option<String>, field: &str| -> anyhow::Result<Option<Regex>> {
            pattern
                .as_deref()
                .map(|p| Regex::new(p).with_context(|| format!("step {}: invalid {} pattern", self.label(), field)))
                .transpose()
        };
        Ok(OutputChecks {
            skip_if_empty: self.skip_if_empty,
            break_if: compile(&self.break_if, "break_if")?,
            fail_if: compile(&self.fail_if, "fail_if")?,
        })
    }

    fn templates(&self) -> Vec<&str> {
        [&self.command, &self.chat, &self.agent, &self.initial_state]
            .into_iter()
            .filter_map(|t| t.as_deref())
            .collect()
    }
}

/// Signals derived from a step's text output.
#[derive(Debug, Clone, Default)]
struct OutputChecks {
    skip_if_empty: bool,
    break_if: Option<Regex>,
    fail_if: Option<Regex>,
}

impl OutputChecks {
    fn is_empty(&self) -> bool {
        !self.skip_if_empty && self.break_if.is_none() && self.fail_if.is_none()
    }

    fn apply(&self, text: String) -> StepResult<String> {
        if let Some(pattern) = &self.fail_if
            && pattern.is_match(&text)
        {
            return Err(fail(format!("output matched fail_if /{}/", pattern)));
        }
        if let Some(pattern) = &self.break_if
            && pattern.is_match(&text)
        {
            return Err(break_loop(format!("output matched break_if /{}/", pattern)));
        }
        if self.skip_if_empty && text.trim().is_empty() {
            return Err(skip("output is empty"));
        }
        Ok(text)
    }
}

/// Cogs shared by every step of a workflow.
struct Cogs {
    chat: Arc<ChatCog>,
    agent: Arc<AgentCog>,
}

impl Cogs {
    fn new(file: &WorkflowFile) -> Self {
        let model = MockModel::new(file.chat.model.clone().unwrap_or_else(|| "mock".to_string()));
        let mut chat = ChatCog::new(Arc::new(model));
        if let Some(system) = &file.chat.system {
            chat = chat.with_system_prompt(system.clone());
        }

        let agent = match &file.agent.program {
            Some(program) => AgentCog::new(program.clone(), file.agent.args.clone()),
            None => AgentCog::default(),
        };

        Self { chat: Arc::new(chat), agent: Arc::new(agent) }
    }
}

impl WorkflowFile {
    /// Reads and parses a workflow file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid workflow file {}", path.display()))
    }

    /// Parses workflow TOML.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let file: Self = toml::from_str(content).context("Failed to parse workflow TOML")?;
        file.check()?;
        Ok(file)
    }

    /// Number of steps across all scopes.
    pub fn step_count(&self) -> usize {
        self.steps.len() + self.scopes.values().map(|scope| scope.steps.len()).sum::<usize>()
    }

    /// Structural checks beyond what the engine validates.
    fn check(&self) -> anyhow::Result<()> {
        for spec in self.steps.iter().chain(self.scopes.values().flat_map(|scope| &scope.steps)) {
            let action = spec.action()?;
            let checks = spec.checks()?;
            if let Action::Repeat(_) = action {
                if !checks.is_empty() || spec.allow_failure {
                    bail!("step {}: output checks do not apply to repeat steps", spec.label());
                }
            } else if spec.max_iterations.is_some() || spec.initial_state.is_some() {
                bail!("step {}: max_iterations and initial_state only apply to repeat steps", spec.label());
            }
            for template in spec.templates() {
                for (name, _) in references(template) {
                    if spec.name.as_deref() == Some(name.as_str()) {
                        bail!("step {} references itself", name);
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds the engine workflow.
    pub fn build(&self, config: EngineConfig) -> anyhow::Result<Workflow> {
        let cogs = Cogs::new(self);
        let mut workflow = Workflow::new(self.name.clone()).with_config(config);

        for spec in &self.steps {
            workflow.step(build_step(spec, &cogs)?)?;
        }

        for (name, scope_spec) in &self.scopes {
            let mut scope = Scope::new(name.clone());
            for spec in &scope_spec.steps {
                scope.add(build_step(spec, &cogs)?)?;
            }
            if let Some(outputs) = &scope_spec.outputs {
                install_outputs(&mut scope, outputs);
            }
            workflow.add_scope(scope)?;
        }

        workflow.validate()?;
        Ok(workflow)
    }
}

fn build_step(spec: &StepSpec, cogs: &Cogs) -> anyhow::Result<Step> {
    let checks = Arc::new(spec.checks()?);
    let working_dir = spec.working_dir.clone();

    let step = match spec.action()? {
        Action::Command(template) => {
            let template = template.to_string();
            let cog = Arc::new(CommandCog::new().allow_failure(spec.allow_failure));
            Step::cog_with(
                cog,
                move |ctx: StepContext| command_input(template.clone(), working_dir.clone(), ctx),
                move |output: CommandOutput| checks.apply(output.stdout.trim_end().to_string()),
            )
        }
        Action::Chat(template) => {
            let template = template.to_string();
            Step::cog_with(
                Arc::clone(&cogs.chat),
                move |ctx: StepContext| chat_input(template.clone(), ctx),
                move |output: ChatOutput| checks.apply(output.response),
            )
        }
        Action::Agent(template) => {
            let template = template.to_string();
            Step::cog_with(
                Arc::clone(&cogs.agent),
                move |ctx: StepContext| agent_input(template.clone(), working_dir.clone(), ctx),
                move |output: AgentOutput| checks.apply(output.response),
            )
        }
        Action::Repeat(scope) => {
            let initial = spec.initial_state.clone();
            Step::repeat(
                scope,
                move |ctx: StepContext| initial_state(initial.clone(), ctx),
                RepeatConfig { max_iterations: spec.max_iterations },
            )
        }
    };

    let step = match &spec.name {
        Some(name) => step.named(name.clone()),
        None => step,
    };
    Ok(if spec.background { step.background() } else { step })
}

fn install_outputs(scope: &mut Scope, outputs: &OutputsSpec) {
    let state_template = outputs.state.clone();
    let output_template = outputs.output.clone();
    scope.outputs(move |ctx: StepContext| {
        iteration_outputs(state_template.clone(), output_template.clone(), ctx)
    });
}

async fn command_input(
    template: String,
    working_dir: Option<PathBuf>,
    ctx: StepContext,
) -> StepResult<CommandInput> {
    let input = CommandInput::new(render(&template, &ctx).await?);
    Ok(match working_dir {
        Some(dir) => input.in_dir(dir),
        None => input,
    })
}

async fn chat_input(template: String, ctx: StepContext) -> StepResult<ChatInput> {
    Ok(ChatInput::new(render(&template, &ctx).await?))
}

async fn agent_input(
    template: String,
    working_dir: Option<PathBuf>,
    ctx: StepContext,
) -> StepResult<AgentInput> {
    let input = AgentInput::new(render(&template, &ctx).await?);
    Ok(match working_dir {
        Some(dir) => input.in_dir(dir),
        None => input,
    })
}

async fn initial_state(template: Option<String>, ctx: StepContext) -> StepResult<Value> {
    match template {
        Some(template) => Ok(parse_value(&render(&template, &ctx).await?)),
        None => Ok(Value::Null),
    }
}

async fn iteration_outputs(
    state_template: Option<String>,
    output_template: Option<String>,
    ctx: StepContext,
) -> StepResult<IterationOutputs> {
    let state = match state_template {
        Some(template) => parse_value(&render(&template, &ctx).await?),
        None => ctx.state().cloned().unwrap_or_default(),
    };
    let output = match output_template {
        Some(template) => Some(parse_value(&render(&template, &ctx).await?)),
        None => None,
    };
    Ok(IterationOutputs { state, output })
}
