//! Phase prompts built from role profiles
//!
//! A role is data: title, goal, backstory. Every phase gets the same
//! message shape; only the values differ.

use phaseline_config::RoleProfile;
use phaseline_llm::{CURRENT_SPECIFICATION, Message, READ_RESOURCE, WRITE_ARTIFACT};
use phaseline_store::RunRecord;

/// Upper bound on the text carried over from each upstream phase
pub const MAX_UPSTREAM_CHARS: usize = 24_000;

/// Output of an upstream phase handed to its dependents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamOutput {
    pub phase: String,
    pub text: String,
}

fn system_prompt(role: &RoleProfile) -> String {
    let mut prompt = format!("You are the {}.\nYour goal: {}\n", role.title, role.goal);
    if !role.backstory.trim().is_empty() {
        prompt.push('\n');
        prompt.push_str(role.backstory.trim());
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nWhen you produce files, call the `{WRITE_ARTIFACT}` tool with a relative `path` and \
         the full `content` if tools are available. Otherwise emit each file as a fenced code \
         block whose info string names it, for example ```rust path=src/main.rs. Use \
         `{READ_RESOURCE}` with name `{CURRENT_SPECIFICATION}` to read the current \
         specification when it is offered.\n"
    ));
    prompt
}

fn truncate(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (&text[..cut], true),
        None => (text, false),
    }
}

/// Messages for one phase attempt
#[must_use]
pub fn build_messages(
    role: &RoleProfile,
    phase: &str,
    request: &str,
    upstream: &[UpstreamOutput],
) -> Vec<Message> {
    let mut user = format!("Phase: {phase}\n\nRequest:\n{}\n", request.trim());
    for output in upstream {
        let (text, truncated) = truncate(output.text.trim(), MAX_UPSTREAM_CHARS);
        user.push_str(&format!("\n## Output of phase `{}`\n\n{text}\n", output.phase));
        if truncated {
            user.push_str("\n(truncated)\n");
        }
    }
    vec![Message::system(system_prompt(role)), Message::user(user)]
}

/// Request text for the iteration after `previous`.
///
/// Carries the original request, the feedback, how each phase ended and the
/// previous outputs and files, each truncated to [`MAX_UPSTREAM_CHARS`].
#[must_use]
pub fn continuation_request(previous: &RunRecord, feedback: &str) -> String {
    let mut text = format!(
        "{}\n\n## Feedback on iteration {}\n\n{}\n\n## Previous iteration\n\nRun {} of `{}` ended {}.\n",
        previous.request.trim(),
        previous.iteration,
        feedback.trim(),
        previous.short_id(),
        previous.workflow_id,
        previous.status,
    );
    for phase in &previous.phases {
        text.push_str(&format!("- `{}`: {}", phase.phase, phase.status));
        if let Some(failure) = &phase.failure {
            text.push_str(&format!(" ({failure})"));
        }
        text.push('\n');
    }
    for phase in &previous.phases {
        let Some(output) = phase.output.as_deref().filter(|o| !o.trim().is_empty()) else {
            continue;
        };
        let (output, truncated) = truncate(output.trim(), MAX_UPSTREAM_CHARS);
        text.push_str(&format!("\n## Previous output of phase `{}`\n\n{output}\n", phase.phase));
        if truncated {
            text.push_str("\n(truncated)\n");
        }
    }
    if !previous.artifacts.is_empty() {
        text.push_str("\n## Files from the previous iteration\n");
        for artifact in &previous.artifacts {
            let (content, truncated) = truncate(&artifact.content, MAX_UPSTREAM_CHARS);
            text.push_str(&format!("\n`{}`:\n~~~\n{content}\n~~~\n", artifact.path));
            if truncated {
                text.push_str("(truncated)\n");
            }
        }
    }
    text.push_str(
        "\nAddress the feedback. Rewrite any file that changes with its full content and \
         create new files as needed.\n",
    );
    text
}
