//! Destructive-operation confirmation.
//!
//! Executors never talk to stdin directly; they ask a [`Gate`], which applies
//! the tri-state [`ConfirmPolicy`] and the prompter. A `yes to all` answer
//! upgrades the gate to assume-yes for the rest of the run.

use std::io::{BufRead, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPolicy {
    /// Ask the prompter for each destructive operation.
    Prompt,
    /// Proceed without asking (`--yes`).
    AssumeYes,
    /// Decline without asking (dry runs and non-interactive sessions).
    AssumeNo,
}

impl ConfirmPolicy {
    pub fn should_prompt(&self) -> bool {
        matches!(self, ConfirmPolicy::Prompt)
    }
}

/// Answer from the prompter.
#[derive(Debug, Clone, Copy)]
pub struct Confirmation {
    pub confirmed: bool,
    /// Apply the same answer to every later prompt in this run.
    pub apply_to_all: bool,
}

pub trait Prompter: Send + Sync {
    fn confirm(&self, prompt: &str) -> anyhow::Result<Confirmation>;
}

/// Interactive prompter reading `y`/`n`/`a` from stdin.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, prompt: &str) -> anyhow::Result<Confirmation> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{prompt} [y/N/a]: ")?;
        stderr.flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        let answer = answer.trim().to_ascii_lowercase();
        Ok(Confirmation {
            confirmed: matches!(answer.as_str(), "y" | "yes" | "a" | "all"),
            apply_to_all: matches!(answer.as_str(), "a" | "all"),
        })
    }
}

/// Policy-holding gate shared by every executor in a run.
pub struct Gate {
    policy: Mutex<ConfirmPolicy>,
    prompter: Box<dyn Prompter>,
}

impl Gate {
    pub fn new(policy: ConfirmPolicy, prompter: Box<dyn Prompter>) -> Self {
        Self {
            policy: Mutex::new(policy),
            prompter,
        }
    }

    pub fn assume_yes() -> Self {
        Self::new(ConfirmPolicy::AssumeYes, Box::new(StdinPrompter))
    }

    /// Whether the operation may proceed. `Ok(false)` means the user
    /// declined; prompter I/O failures are errors.
    pub fn allow(&self, prompt: &str) -> anyhow::Result<bool> {
        let policy = *self.policy.lock().unwrap();
        match policy {
            ConfirmPolicy::AssumeYes => Ok(true),
            ConfirmPolicy::AssumeNo => Ok(false),
            ConfirmPolicy::Prompt => {
                let answer = self.prompter.confirm(prompt)?;
                if answer.apply_to_all && answer.confirmed {
                    *self.policy.lock().unwrap() = ConfirmPolicy::AssumeYes;
                }
                Ok(answer.confirmed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedPrompter {
        answers: Vec<Confirmation>,
        cursor: AtomicUsize,
    }

    impl Prompter for ScriptedPrompter {
        fn confirm(&self, _prompt: &str) -> anyhow::Result<Confirmation> {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers[index])
        }
    }

    fn gate_with(answers: Vec<Confirmation>) -> Gate {
        Gate::new(
            ConfirmPolicy::Prompt,
            Box::new(ScriptedPrompter {
                answers,
                cursor: AtomicUsize::new(0),
            }),
        )
    }

    #[test]
    fn assume_yes_never_prompts() {
        let gate = Gate::new(ConfirmPolicy::AssumeYes, Box::new(StdinPrompter));
        assert!(gate.allow("delete branch?").unwrap());
    }

    #[test]
    fn assume_no_declines_without_prompting() {
        let gate = Gate::new(ConfirmPolicy::AssumeNo, Box::new(StdinPrompter));
        assert!(!gate.allow("delete branch?").unwrap());
    }

    #[test]
    fn apply_to_all_upgrades_to_assume_yes() {
        let gate = gate_with(vec![Confirmation {
            confirmed: true,
            apply_to_all: true,
        }]);
        assert!(gate.allow("first?").unwrap());
        // Second call would index out of bounds if it still prompted
        assert!(gate.allow("second?").unwrap());
    }

    #[test]
    fn decline_does_not_upgrade() {
        let gate = gate_with(vec![
            Confirmation {
                confirmed: false,
                apply_to_all: false,
            },
            Confirmation {
                confirmed: true,
                apply_to_all: false,
            },
        ]);
        assert!(!gate.allow("first?").unwrap());
        assert!(gate.allow("second?").unwrap());
    }
}
