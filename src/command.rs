//! Command description and privilege elevation

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Prompt that the elevation wrapper prints when it wants the secret.
///
/// Distinctive on purpose so the scenario runner can recognise it without
/// confusing it with prompts from the wrapped program.
pub const ELEVATION_PROMPT: &str = "[procpilot] elevation password: ";

/// Shell used for [`Command::shell`] commands.
const SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Program {
    Exec { program: String, args: Vec<String> },
    Shell(String),
}

/// A command to run: program and arguments (or a shell string), working
/// directory, environment overrides and whether it needs elevated privileges.
///
/// Built once by the caller, then handed to a runner. The builder methods
/// consume `self`, so a finished `Command` is never mutated.
///
/// # Examples
///
/// ```
/// use procpilot::Command;
///
/// let cmd = Command::new("lpadmin")
///     .args(["-p", "office", "-E"])
///     .env("LANG", "C")
///     .elevated(true);
/// assert!(cmd.needs_elevation());
///
/// let sh = Command::shell("systemctl is-active clamav-daemon || true");
/// assert_eq!(sh.argv()[0], "/bin/sh");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: Program,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    needs_elevation: bool,
}

impl Command {
    /// A program executed directly, without a shell.
    pub fn new(program: impl Into<String>) -> Self {
        Self::from_program(Program::Exec {
            program: program.into(),
            args: Vec::new(),
        })
    }

    /// A string interpreted by `/bin/sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::from_program(Program::Shell(script.into()))
    }

    fn from_program(program: Program) -> Self {
        Self {
            program,
            cwd: None,
            env: Vec::new(),
            needs_elevation: false,
        }
    }

    /// Append one argument. Ignored for shell commands.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let Program::Exec { args, .. } = &mut self.program {
            args.push(arg.into());
        }
        self
    }

    /// Append several arguments. Ignored for shell commands.
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, a| cmd.arg(a))
    }

    /// Working directory for the child.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add or override an environment variable for the child.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Mark the command as needing elevated privileges.
    pub fn elevated(mut self, needs_elevation: bool) -> Self {
        self.needs_elevation = needs_elevation;
        self
    }

    /// Whether the command asked for elevation.
    pub fn needs_elevation(&self) -> bool {
        self.needs_elevation
    }

    /// Working directory, if overridden.
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Environment overrides, in insertion order.
    pub fn envs(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.env.iter().map(|(k, v)| (k, v))
    }

    /// The argument vector, without any elevation prefix.
    pub fn argv(&self) -> Vec<String> {
        match &self.program {
            Program::Exec { program, args } => std::iter::once(program.clone())
                .chain(args.iter().cloned())
                .collect(),
            Program::Shell(script) => vec![SHELL.to_string(), "-c".to_string(), script.clone()],
        }
    }

    /// The argument vector to actually spawn.
    ///
    /// When elevation is requested and the current process is not already
    /// privileged, the command is prefixed with `sudo -S -p <prompt> --`, so the
    /// password is read from the child's input stream instead of the environment.
    pub fn spawn_argv(&self, prompt: &str) -> (Vec<String>, bool) {
        if !self.needs_elevation || is_privileged() {
            return (self.argv(), false);
        }
        (elevation_prefix(prompt).chain(self.argv()).collect(), true)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.program {
            Program::Exec { program, args } => {
                write!(f, "{program}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                Ok(())
            }
            Program::Shell(script) => write!(f, "sh -c {script:?}"),
        }
    }
}

fn elevation_prefix(prompt: &str) -> impl Iterator<Item = String> + '_ {
    ["sudo", "-S", "-p", prompt, "--"]
        .into_iter()
        .map(str::to_string)
}

/// Whether this process already runs with an effective uid of root.
pub fn is_privileged() -> bool {
    rustix::process::geteuid().is_root()
}

/// A secret such as an elevation password.
///
/// Supplied by the caller for a single run. Its `Debug` output is redacted so it
/// cannot leak through logging of surrounding structures.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// The cleartext value, for writing to the child only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret::new(s)
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_argv() {
        let cmd = Command::new("lpstat").arg("-p").args(["-d"]);
        assert_eq!(cmd.argv(), ["lpstat", "-p", "-d"]);
        assert_eq!(cmd.to_string(), "lpstat -p -d");
    }

    #[test]
    fn test_shell_argv() {
        let cmd = Command::shell("echo hi | tr a-z A-Z").arg("ignored");
        assert_eq!(cmd.argv(), ["/bin/sh", "-c", "echo hi | tr a-z A-Z"]);
    }

    #[test]
    fn test_no_elevation_requested() {
        let cmd = Command::new("id");
        let (argv, wrapped) = cmd.spawn_argv(ELEVATION_PROMPT);
        assert!(!wrapped);
        assert_eq!(argv, ["id"]);
    }

    #[test]
    fn test_elevation_prefix() {
        let cmd = Command::new("apt-get").arg("update").elevated(true);
        let (argv, wrapped) = cmd.spawn_argv(ELEVATION_PROMPT);
        if is_privileged() {
            assert!(!wrapped);
            assert_eq!(argv, ["apt-get", "update"]);
        } else {
            assert!(wrapped);
            assert_eq!(
                argv,
                ["sudo", "-S", "-p", ELEVATION_PROMPT, "--", "apt-get", "update"]
            );
        }
    }

    #[test]
    fn test_elevation_prefix_borrows_prompt() {
        let prompt = String::from("pw? ");
        let prefix: Vec<String> = elevation_prefix(&prompt).collect();
        assert_eq!(prefix, ["sudo", "-S", "-p", "pw? ", "--"]);
    }

    #[test]
    fn test_secret_debug_redacted() {
        let s = Secret::new("hunter2");
        assert_eq!(format!("{s:?}"), "Secret(********)");
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn test_cwd_and_env() {
        let cmd = Command::new("pwd").current_dir("/tmp").env("A", "1");
        assert_eq!(cmd.cwd(), Some(Path::new("/tmp")));
        assert_eq!(cmd.envs().count(), 1);
    }
}
