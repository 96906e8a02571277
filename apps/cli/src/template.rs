//! `{{placeholder}}` interpolation for workflow files.
//!
//! Placeholders:
//! - `{{target}}`, `{{state}}`, `{{iteration}}` read the run and iteration
//! - `{{name}}` forces step `name` and inserts its text
//! - `{{name?}}` inserts the text only if the step already completed

use cogflow_core::{EngineError, RepeatOutput, StepContext, StepResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)(\?)?\s*\}\}").expect("placeholder regex should be valid")
});

/// Step names referenced by a template, with whether the read forces.
pub fn references(template: &str) -> Vec<(String, bool)> {
    PLACEHOLDER
        .captures_iter(template)
        .filter(|caps| !matches!(&caps[1], "target" | "state" | "iteration"))
        .map(|caps| (caps[1].to_string(), caps.get(2).is_none()))
        .collect()
}

/// Renders `template` against the step context.
pub async fn render(template: &str, ctx: &StepContext) -> StepResult<String> {
    // Collected up front so no regex state is held across awaits.
    let placeholders: Vec<(usize, usize, &str, bool)> = PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str();
            Some((whole.start(), whole.end(), key, caps.get(2).is_some()))
        })
        .collect();

    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for (start, end, key, optional) in placeholders {
        rendered.push_str(&template[last..start]);
        last = end;

        match key {
            "target" => rendered.push_str(ctx.target().unwrap_or_default()),
            "state" => rendered.push_str(&ctx.state().map(value_text).unwrap_or_default()),
            "iteration" => {
                if let Some(index) = ctx.iteration() {
                    rendered.push_str(&index.to_string());
                }
            }
            name if optional => rendered.push_str(&peek_text(ctx, name)?.unwrap_or_default()),
            name => rendered.push_str(&require_text(ctx, name).await?),
        }
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// Text of a step value, forcing evaluation.
async fn require_text(ctx: &StepContext, name: &str) -> Result<String, EngineError> {
    match ctx.require::<String>(name).await {
        Ok(text) => Ok(text.as_ref().clone()),
        Err(EngineError::OutputType { .. }) => {
            let repeat = ctx.require::<RepeatOutput>(name).await?;
            Ok(value_text(repeat.final_state()))
        }
        Err(err) => Err(err),
    }
}

/// Text of a step value if it is already available.
fn peek_text(ctx: &StepContext, name: &str) -> Result<Option<String>, EngineError> {
    match ctx.peek::<String>(name) {
        Ok(text) => Ok(text.map(|t| t.as_ref().clone())),
        Err(EngineError::OutputType { .. }) => {
            Ok(ctx.peek::<RepeatOutput>(name)?.map(|repeat| value_text(repeat.final_state())))
        }
        Err(err) => Err(err),
    }
}

/// Strings render bare, everything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Reads rendered text back into a state value: JSON when it parses,
/// otherwise a string.
pub fn parse_value(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_references_skip_builtins() {
        let refs = references("{{target}} {{ readme }} {{gemfile?}} {{state}}");
        assert_eq!(refs, vec![("readme".to_string(), true), ("gemfile".to_string(), false)]);
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("plain")), "plain");
        assert_eq!(value_text(&json!(3)), "3");
        assert_eq!(value_text(&Value::Null), "");
        assert_eq!(value_text(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(" 4\n"), json!(4));
        assert_eq!(parse_value("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_value("hello world"), json!("hello world"));
    }
}
