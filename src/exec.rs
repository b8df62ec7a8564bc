//! Subprocess command model.
//!
//! Worker, minimization, cleansing and merge modes all re-invoke this
//! binary with an edited copy of the original argv. `Command` keeps that
//! argv as data so flags and positional arguments can be stripped or added
//! before execution.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::{DriverError, DriverResult};
use crate::flags::flag_value;

#[derive(Debug, Clone)]
pub struct Command {
    args: Vec<String>,
    output_file: Option<PathBuf>,
    combined: bool,
}

impl Command {
    pub fn new(args: &[String]) -> Self {
        Self {
            args: args.to_vec(),
            output_file: None,
            combined: false,
        }
    }

    /// Remove every `-name=value` token for this flag name.
    pub fn remove_flag(&mut self, name: &str) {
        self.args.retain(|arg| flag_value(arg, name).is_none());
    }

    pub fn has_argument(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Remove every token equal to `arg`.
    pub fn remove_argument(&mut self, arg: &str) {
        self.args.retain(|a| a != arg);
    }

    pub fn add_flag(&mut self, name: &str, value: &str) {
        self.args.push(format!("-{name}={value}"));
    }

    pub fn add_argument(&mut self, arg: &str) {
        self.args.push(arg.to_string());
    }

    /// Route the child's stdout to this file.
    pub fn set_output_file(&mut self, path: &Path) {
        self.output_file = Some(path.to_path_buf());
    }

    /// Route the child's stderr wherever its stdout goes.
    pub fn combine_out_and_err(&mut self) {
        self.combined = true;
    }

    fn std_command(&self) -> DriverResult<std::process::Command> {
        let program = self
            .args
            .first()
            .ok_or_else(|| DriverError::Subprocess("empty command".to_string()))?;
        let mut cmd = std::process::Command::new(program);
        cmd.args(&self.args[1..]);
        Ok(cmd)
    }

    /// Run to completion, honoring the output redirection. Returns the exit
    /// code; death by signal maps to 1.
    pub fn execute(&self) -> DriverResult<i32> {
        let mut cmd = self.std_command()?;
        if let Some(path) = &self.output_file {
            let out = File::create(path)?;
            if self.combined {
                let err = out.try_clone()?;
                cmd.stderr(Stdio::from(err));
            }
            cmd.stdout(Stdio::from(out));
        }
        let status = cmd
            .status()
            .map_err(|e| DriverError::Subprocess(format!("{}: {e}", self.args[0])))?;
        Ok(status.code().unwrap_or(1))
    }

    /// Run to completion capturing stdout and stderr as one string. Returns
    /// (exit code, combined output).
    pub fn execute_capture(&self) -> DriverResult<(i32, String)> {
        let mut cmd = self.std_command()?;
        let out = cmd
            .output()
            .map_err(|e| DriverError::Subprocess(format!("{}: {e}", self.args[0])))?;
        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok((out.status.code().unwrap_or(1), text))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Copy `args`, dropping every token that is a `-x1=...` or `-x2=...` flag.
/// Relative order of the remaining tokens is preserved.
pub fn clone_args_without(args: &[String], x1: &str, x2: &str) -> Vec<String> {
    args.iter()
        .filter(|arg| flag_value(arg, x1).is_none() && flag_value(arg, x2).is_none())
        .cloned()
        .collect()
}

/// Extract the crash signature a child printed: the substring starting at
/// `DEDUP_TOKEN:` and ending before the next newline. Empty if the marker is
/// absent or the line is unterminated.
pub fn dedup_token_from_output(s: &str) -> String {
    let Some(beg) = s.find("DEDUP_TOKEN:") else {
        return String::new();
    };
    let Some(len) = s[beg..].find('\n') else {
        return String::new();
    };
    s[beg..beg + len].to_string()
}
