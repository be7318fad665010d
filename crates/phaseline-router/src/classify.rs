//! Complexity classification
//!
//! The heuristic is deliberately simple and reproducible:
//!
//! - input tokens: `ceil(chars / 4)` over the prepared prompt
//! - output tokens: a fixed allowance per task type
//! - score: task-type weight (implementation/design 2, testing 1, other 0)
//!   plus a size band (< 2000 input tokens 0, < 8000 1, otherwise 2)
//! - complexity: score 0-1 Low, 2 Medium, 3+ High

use phaseline_llm::Message;
use phaseline_utils::{Complexity, TaskType};
use serde::Serialize;

pub const CHARS_PER_TOKEN: u64 = 4;

const SMALL_INPUT_TOKENS: u64 = 2_000;
const LARGE_INPUT_TOKENS: u64 = 8_000;

/// What the router needs to know about a phase attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProfile {
    pub phase: String,
    pub task_type: TaskType,
    /// Characters in the prepared prompt
    pub input_chars: u64,
}

impl TaskProfile {
    #[must_use]
    pub fn new(phase: impl Into<String>, task_type: TaskType, input_chars: u64) -> Self {
        Self {
            phase: phase.into(),
            task_type,
            input_chars,
        }
    }

    #[must_use]
    pub fn from_messages(phase: impl Into<String>, task_type: TaskType, messages: &[Message]) -> Self {
        let chars = messages
            .iter()
            .map(|m| m.content.chars().count() as u64)
            .sum();
        Self::new(phase, task_type, chars)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub score: u8,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Classification {
    /// Tokens the backend's context must hold
    #[must_use]
    pub fn context_needed(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[must_use]
pub fn estimate_tokens(chars: u64) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN)
}

#[must_use]
pub fn output_allowance(task_type: TaskType) -> u64 {
    match task_type {
        TaskType::Specification => 1_500,
        TaskType::Design => 2_500,
        TaskType::Implementation => 6_000,
        TaskType::Testing => 4_000,
        TaskType::Review | TaskType::Other => 2_000,
    }
}

fn type_weight(task_type: TaskType) -> u8 {
    match task_type {
        TaskType::Implementation | TaskType::Design => 2,
        TaskType::Testing => 1,
        TaskType::Specification | TaskType::Review | TaskType::Other => 0,
    }
}

fn size_band(input_tokens: u64) -> u8 {
    if input_tokens < SMALL_INPUT_TOKENS {
        0
    } else if input_tokens < LARGE_INPUT_TOKENS {
        1
    } else {
        2
    }
}

#[must_use]
pub fn classify(task: &TaskProfile) -> Classification {
    let input_tokens = estimate_tokens(task.input_chars);
    let score = type_weight(task.task_type) + size_band(input_tokens);
    let complexity = match score {
        0 | 1 => Complexity::Low,
        2 => Complexity::Medium,
        _ => Complexity::High,
    };
    Classification {
        task_type: task.task_type,
        complexity,
        score,
        input_tokens,
        output_tokens: output_allowance(task.task_type),
    }
}
