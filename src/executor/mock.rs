//! Scripted executor for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{command_line, CommandExecutor, CommandOutput};

struct Rule {
    pattern: String,
    responses: VecDeque<io::Result<CommandOutput>>,
    last: CommandOutput,
}

type CallHook = Box<dyn Fn() + Send + Sync>;

/// Answers invocations from rules matched against the rendered command line
/// (`<tool> <args...>`, arguments trimmed). Queued responses are consumed in
/// order; the final one repeats. Unmatched commands succeed with no output.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    hooks: Mutex<Vec<(String, CallHook)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Respond to commands containing `pattern`. Later rules win.
    pub(crate) fn respond(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.respond_seq(pattern, vec![output])
    }

    pub(crate) fn respond_seq(&self, pattern: &str, outputs: Vec<CommandOutput>) -> &Self {
        let last = outputs.last().cloned().unwrap_or_default();
        lock(&self.rules).push(Rule {
            pattern: pattern.to_string(),
            responses: outputs.into_iter().map(Ok).collect(),
            last,
        });
        self
    }

    /// Make commands containing `pattern` fail to spawn.
    pub(crate) fn fail_spawn(&self, pattern: &str) -> &Self {
        lock(&self.rules).push(Rule {
            pattern: pattern.to_string(),
            responses: VecDeque::from([Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no such tool",
            ))]),
            last: CommandOutput::failed(-1, "no such tool"),
        });
        self
    }

    /// Run `hook` whenever a command containing `pattern` is executed, before
    /// it is answered.
    pub(crate) fn on_call(&self, pattern: &str, hook: impl Fn() + Send + Sync + 'static) -> &Self {
        lock(&self.hooks).push((pattern.to_string(), Box::new(hook)));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub(crate) fn calls_containing(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.contains(needle))
            .collect()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, tool: &str, args: &[String]) -> io::Result<CommandOutput> {
        let line = command_line(tool, args);
        lock(&self.calls).push(line.clone());
        for (pattern, hook) in lock(&self.hooks).iter() {
            if line.contains(pattern.as_str()) {
                hook();
            }
        }

        let mut rules = lock(&self.rules);
        let Some(rule) = rules.iter_mut().rev().find(|rule| line.contains(&rule.pattern)) else {
            return Ok(CommandOutput::ok(""));
        };
        if rule.responses.len() > 1 {
            if let Some(next) = rule.responses.pop_front() {
                return next;
            }
        }
        match rule.responses.front() {
            Some(Err(err)) => Err(io::Error::new(err.kind(), err.to_string())),
            _ => Ok(rule.last.clone()),
        }
    }
}
