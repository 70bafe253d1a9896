//! Prompts sent to command line agents. Each one asks for a single JSON
//! object so the reply can be parsed without a provider specific protocol.

use std::fmt::Write;

use crate::plan::Step;

/// Create planning prompt
pub fn planning_prompt(objective: &str) -> String {
    format!(
        r#"Break the following objective into a short sequence of concrete, executable steps.

## Objective
{}

## Output Format
Reply with a single JSON object and nothing else:

```json
{{"title": "<short title for the objective>", "steps": ["<step 1>", "<step 2>"]}}
```
"#,
        objective
    )
}

/// Create execution prompt for one step
pub fn execution_prompt(step_description: &str, context: &str) -> String {
    format!(
        r#"Carry out the following step of a larger plan.

## Step
{}

## Results of previous steps
{}

## Output Format
Reply with a single JSON object and nothing else:

```json
{{
  "succeeded": true,
  "output": "<result of the step>",
  "producedCode": "<optional code that performs the step, or null>",
  "next": "continueToNext | retry | modifyPlan | complete"
}}
```

Use "retry" to attempt this step again, "modifyPlan" when the remaining steps
no longer make sense, and "complete" when the objective is already achieved.
"#,
        step_description, context
    )
}

/// Create revision prompt after a failed step
pub fn revision_prompt(title: &str, completed_steps: &[Step], failed_step: &Step) -> String {
    let mut history = String::new();
    for (i, step) in completed_steps.iter().enumerate() {
        let _ = writeln!(
            history,
            "{}. {}\n   Result: {}",
            i + 1,
            step.description,
            step.result.as_deref().unwrap_or("(none)")
        );
    }
    if history.is_empty() {
        history.push_str("(none)\n");
    }

    format!(
        r#"A plan needs to be revised after a step failed.

## Objective
{}

## Steps already executed
{}
## Failed step
{}
Result: {}

## Output Format
Reply with a single JSON object containing the steps that should replace the
failed step and everything after it:

```json
{{"steps": ["<step>", "<step>"]}}
```
"#,
        title,
        history,
        failed_step.description,
        failed_step.result.as_deref().unwrap_or("(none)")
    )
}

/// Create feedback prompt for the current plan state
pub fn feedback_prompt(plan_summary: &str) -> String {
    format!(
        r#"Review the state of the following plan and suggest improvements.

{}

## Output Format
Reply with a single JSON object and nothing else:

```json
{{"suggestions": ["<suggestion>", "<suggestion>"]}}
```
"#,
        plan_summary
    )
}
