//! Operator prompts.
//!
//! Answers are read from the controlling terminal (`/dev/tty`), never from
//! stdin, so archsetup keeps working when it is started through a pipe
//! (`curl ... | sh`). Secrets are read with echo disabled.
//!
//! `ScriptedPrompter` replays canned answers for tests and headless runs.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};

use crossterm::style::Stylize;
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, Termios};
use tracing::debug;

use crate::error::{InstallError, Result};
use crate::types::Secret;

/// Source of operator answers.
pub trait Prompter {
    /// Show a line of text.
    fn say(&mut self, message: &str) -> Result<()>;

    /// Ask a question and return the answer without its line terminator.
    ///
    /// End of input is a `Cancelled` error.
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Ask for a secret without echoing it.
    fn ask_secret(&mut self, question: &str) -> Result<Secret>;

    /// Ask with a default used for an empty answer.
    fn ask_with_default(&mut self, question: &str, default: &str) -> Result<String> {
        let answer = self.ask(&format!("{} [{}]", question, default))?;
        let answer = answer.trim();
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer.to_string())
        }
    }
}

fn strip_line_ending(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

// ============================================================================
// Terminal prompter
// ============================================================================

/// Restores the saved terminal attributes on drop.
struct EchoGuard {
    tty: File,
    original: Termios,
}

impl EchoGuard {
    fn disable(tty: &File) -> Result<Self> {
        let tty = tty.try_clone()?;
        let original = tcgetattr(&tty)
            .map_err(|e| InstallError::system(format!("cannot read terminal attributes: {}", e)))?;
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        silent.local_flags.insert(LocalFlags::ECHONL);
        tcsetattr(&tty, SetArg::TCSANOW, &silent)
            .map_err(|e| InstallError::system(format!("cannot disable echo: {}", e)))?;
        Ok(Self { tty, original })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(&self.tty, SetArg::TCSANOW, &self.original) {
            debug!("Failed to restore terminal attributes: {}", e);
        }
    }
}

/// Prompter bound to `/dev/tty`.
pub struct TtyPrompter {
    reader: BufReader<File>,
    writer: File,
}

impl TtyPrompter {
    /// Open the controlling terminal.
    ///
    /// # Errors
    ///
    /// `Precondition` when the process has no controlling terminal.
    pub fn open() -> Result<Self> {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .map_err(|e| {
                InstallError::precondition(format!(
                    "no controlling terminal ({}); use 'install --config FILE --yes' for unattended runs",
                    e
                ))
            })?;
        let writer = tty.try_clone()?;
        Ok(Self {
            reader: BufReader::new(tty),
            writer,
        })
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(InstallError::cancelled("terminal input closed"));
        }
        Ok(strip_line_ending(line))
    }

    fn write_question(&mut self, question: &str) -> Result<()> {
        write!(self.writer, "{} ", question.bold())?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Prompter for TtyPrompter {
    fn say(&mut self, message: &str) -> Result<()> {
        writeln!(self.writer, "{}", message)?;
        Ok(())
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        self.write_question(question)?;
        self.read_line()
    }

    fn ask_secret(&mut self, question: &str) -> Result<Secret> {
        self.write_question(question)?;
        let guard = EchoGuard::disable(self.reader.get_ref())?;
        let line = self.read_line();
        drop(guard);
        line.map(Secret::new)
    }
}

// ============================================================================
// Scripted prompter
// ============================================================================

/// Replays a fixed list of answers and records everything shown.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    transcript: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }

    /// Questions and messages in the order they were shown.
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next_answer(&mut self) -> Result<String> {
        self.answers
            .pop_front()
            .ok_or_else(|| InstallError::cancelled("no more scripted answers"))
    }
}

impl Prompter for ScriptedPrompter {
    fn say(&mut self, message: &str) -> Result<()> {
        self.transcript.push(message.to_string());
        Ok(())
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        self.transcript.push(question.to_string());
        self.next_answer()
    }

    fn ask_secret(&mut self, question: &str) -> Result<Secret> {
        self.transcript.push(question.to_string());
        self.next_answer().map(Secret::new)
    }
}
