use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::Path;

use crate::types::{Instruction, VerificationResult};

/// A step counts as done when the model is more sure than this.
pub const ACCEPT_THRESHOLD: f64 = 0.8;

/// The step-advance rule on its own: move on iff the result clears the
/// threshold and a next step exists.
pub fn should_advance(confidence: f64, current: usize, last: usize) -> bool {
    confidence > ACCEPT_THRESHOLD && current < last
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved from one step to the next.
    Moved { from: usize, to: usize },
    /// The final step passed; the index stays on it.
    Finished,
    Stay,
}

/// Where a student is in an ordered list of steps. Owned by one session;
/// advances at most one step per verification.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSession {
    steps: Vec<String>,
    current: usize,
}

impl StepSession {
    pub fn new(steps: Vec<String>) -> Self {
        Self { steps, current: 0 }
    }

    pub fn from_instruction(instruction: &Instruction) -> Self {
        Self::new(instruction.steps())
    }

    /// Resumes at `index`, clamped onto the last step.
    pub fn resume(steps: Vec<String>, index: usize) -> Self {
        let current = index.min(steps.len().saturating_sub(1));
        Self { steps, current }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_step(&self) -> Option<&str> {
        self.steps.get(self.current).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.steps.len()
    }

    pub fn apply(&mut self, result: &VerificationResult) -> Advance {
        if self.steps.is_empty() {
            return Advance::Stay;
        }
        let last = self.steps.len() - 1;
        if should_advance(result.confidence, self.current, last) {
            let from = self.current;
            self.current += 1;
            Advance::Moved {
                from,
                to: self.current,
            }
        } else if result.confidence > ACCEPT_THRESHOLD {
            Advance::Finished
        } else {
            Advance::Stay
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResult {
    pub step: usize,
    pub confidence: f64,
    pub feedback: String,
}

/// A student's saved progress through one instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub instruction_id: String,
    pub current_step: usize,
    #[serde(default)]
    pub completed_steps: Vec<usize>,
    #[serde(default)]
    pub results: Vec<RecordedResult>,
}

impl Progress {
    pub fn new(instruction_id: impl Into<String>) -> Self {
        Self {
            instruction_id: instruction_id.into(),
            current_step: 0,
            completed_steps: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Records one verification of `step` and where the session ended up.
    pub fn record(&mut self, step: usize, result: &VerificationResult, advance: Advance) {
        self.results.push(RecordedResult {
            step,
            confidence: result.confidence,
            feedback: result.feedback.clone(),
        });
        match advance {
            Advance::Moved { from, to } => {
                self.mark_completed(from);
                self.current_step = to;
            }
            Advance::Finished => self.mark_completed(step),
            Advance::Stay => {}
        }
    }

    fn mark_completed(&mut self, step: usize) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
    }

    pub fn is_complete(&self, step_count: usize) -> bool {
        step_count > 0 && (0..step_count).all(|s| self.completed_steps.contains(&s))
    }
}

/// Loads saved progress for `instruction_id`, or starts fresh when there is
/// none (or it belongs to another instruction).
pub fn load_progress(path: &Path, instruction_id: &str) -> anyhow::Result<Progress> {
    if !path.exists() {
        return Ok(Progress::new(instruction_id));
    }
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let progress: Progress = serde_json::from_reader(reader)?;
    if progress.instruction_id != instruction_id {
        return Ok(Progress::new(instruction_id));
    }
    Ok(progress)
}

pub fn save_progress(path: &Path, progress: &Progress) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    serde_json::to_writer_pretty(file, progress)?;
    Ok(())
}
