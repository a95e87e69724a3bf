//! Process-start specifications and the argument quoting they rely on.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// Everything needed to start an agent process.
///
/// The caller that spawns it owns the resulting child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    /// Escaped argument string; see [`escape_process_argument`].
    pub arguments: String,
    pub working_dir: PathBuf,
    pub use_shell_execute: bool,
    pub create_no_window: bool,
    pub load_user_profile: bool,
    pub raise_exit_events: bool,
}

impl ProcessSpec {
    /// The argument string split back into tokens.
    pub fn argv(&self) -> Vec<String> {
        split_process_arguments(&self.arguments)
    }

    /// A command ready to spawn. The child is killed if its handle is
    /// dropped.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.argv())
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Quote `arg` so [`split_process_arguments`] yields it back unchanged.
///
/// Arguments without whitespace or quotes pass through verbatim. Others
/// are wrapped in double quotes; embedded quotes and any backslashes that
/// precede a quote are escaped.
pub fn escape_process_argument(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_owned();
    }
    if !arg.chars().any(|c| c.is_whitespace() || c == '"') {
        return arg.to_owned();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat_n('\\', backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat_n('\\', backslashes * 2));
    out.push('"');
    out
}

/// Split an argument string into tokens.
///
/// Whitespace outside quotes separates tokens and `"` toggles quoting.
/// `2n` backslashes before a quote produce `n` backslashes and toggle;
/// `2n+1` produce `n` backslashes and a literal quote. Other backslashes
/// are literal.
pub fn split_process_arguments(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut backslashes = 0usize;

    for c in line.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                in_token = true;
            }
            '"' => {
                current.extend(std::iter::repeat_n('\\', backslashes / 2));
                if backslashes % 2 == 1 {
                    current.push('"');
                } else {
                    quoted = !quoted;
                }
                backslashes = 0;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                current.extend(std::iter::repeat_n('\\', backslashes));
                backslashes = 0;
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.extend(std::iter::repeat_n('\\', backslashes));
                backslashes = 0;
                current.push(c);
                in_token = true;
            }
        }
    }
    current.extend(std::iter::repeat_n('\\', backslashes));
    if in_token {
        args.push(current);
    }
    args
}
