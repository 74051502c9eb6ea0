//! Type-safe arguments for account management.
//!
//! Passwords are only ever passed through `stdin_payload`.

use std::path::PathBuf;

use super::path_arg;
use crate::tool_args::{OutputMode, ToolArgs};
use crate::types::Secret;

/// `useradd -m -G GROUPS -s SHELL USER`
#[derive(Debug, Clone)]
pub struct UseraddArgs {
    pub username: String,
    pub groups: Vec<String>,
    pub shell: String,
}

impl UseraddArgs {
    /// Regular account in `wheel` with bash as login shell.
    pub fn wheel_user(username: &str) -> Self {
        Self {
            username: username.to_string(),
            groups: vec!["wheel".to_string()],
            shell: "/bin/bash".to_string(),
        }
    }
}

impl ToolArgs for UseraddArgs {
    fn program(&self) -> &'static str {
        "useradd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-m".to_string()];
        if !self.groups.is_empty() {
            args.push("-G".to_string());
            args.push(self.groups.join(","));
        }
        args.push("-s".to_string());
        args.push(self.shell.clone());
        args.push(self.username.clone());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `chpasswd`, fed `user:password` on stdin.
#[derive(Debug, Clone)]
pub struct ChpasswdArgs {
    pub username: String,
    pub password: Secret,
}

impl ToolArgs for ChpasswdArgs {
    fn program(&self) -> &'static str {
        "chpasswd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn stdin_payload(&self) -> Option<String> {
        Some(format!("{}:{}", self.username, self.password.expose()))
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `passwd -l USER`: lock password login.
#[derive(Debug, Clone)]
pub struct PasswdLockArgs {
    pub username: String,
}

impl ToolArgs for PasswdLockArgs {
    fn program(&self) -> &'static str {
        "passwd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-l".to_string(), self.username.clone()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `usermod -aG GROUPS USER`
#[derive(Debug, Clone)]
pub struct UsermodAppendGroupsArgs {
    pub username: String,
    pub groups: Vec<String>,
}

impl ToolArgs for UsermodAppendGroupsArgs {
    fn program(&self) -> &'static str {
        "usermod"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-aG".to_string(),
            self.groups.join(","),
            self.username.clone(),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `chsh -s SHELL USER`
#[derive(Debug, Clone)]
pub struct ChshArgs {
    pub username: String,
    pub shell: String,
}

impl ToolArgs for ChshArgs {
    fn program(&self) -> &'static str {
        "chsh"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-s".to_string(), self.shell.clone(), self.username.clone()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `chown -R USER:USER PATH`
#[derive(Debug, Clone)]
pub struct ChownArgs {
    pub username: String,
    pub path: PathBuf,
}

impl ToolArgs for ChownArgs {
    fn program(&self) -> &'static str {
        "chown"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-R".to_string(),
            format!("{0}:{0}", self.username),
            path_arg(&self.path),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// Run a program as another user:
/// `sudo -H -u USER env [-C DIR] K=V... PROGRAM ARGS...`.
#[derive(Debug, Clone)]
pub struct RunAsUserArgs {
    pub username: String,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub command: String,
    pub args: Vec<String>,
    pub output: OutputMode,
}

impl RunAsUserArgs {
    pub fn new(username: &str, command: &str) -> Self {
        Self {
            username: username.to_string(),
            workdir: None,
            env: Vec::new(),
            command: command.to_string(),
            args: Vec::new(),
            output: OutputMode::Stream,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

impl ToolArgs for RunAsUserArgs {
    fn program(&self) -> &'static str {
        "sudo"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "-H".to_string(),
            "-u".to_string(),
            self.username.clone(),
            "env".to_string(),
        ];
        if let Some(ref dir) = self.workdir {
            args.push("-C".to_string());
            args.push(path_arg(dir));
        }
        args.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        args.push(self.command.clone());
        args.extend(self.args.iter().cloned());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn output_mode(&self) -> OutputMode {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_useradd_wheel_user() {
        let args = UseraddArgs::wheel_user("alice");
        assert_eq!(
            args.to_command().command_line(),
            "useradd -m -G wheel -s /bin/bash alice"
        );
    }

    #[test]
    fn test_chpasswd_keeps_password_off_command_line() {
        let args = ChpasswdArgs {
            username: "alice".to_string(),
            password: Secret::new("hunter2"),
        };
        let cmd = args.to_command();
        assert_eq!(cmd.command_line(), "chpasswd");
        assert_eq!(cmd.stdin.as_deref(), Some("alice:hunter2"));
        assert!(!format!("{}", cmd).contains("hunter2"));
    }

    #[test]
    fn test_run_as_user_builder() {
        let args = RunAsUserArgs::new("alice", "makepkg")
            .workdir("/tmp/yay-bin")
            .env("MAKEFLAGS", "-j4")
            .arg("-si")
            .arg("--noconfirm");
        assert_eq!(
            args.to_command().command_line(),
            "sudo -H -u alice env -C /tmp/yay-bin MAKEFLAGS=-j4 makepkg -si --noconfirm"
        );
    }

    #[test]
    fn test_usermod_joins_groups() {
        let args = UsermodAppendGroupsArgs {
            username: "alice".to_string(),
            groups: vec!["libvirt".to_string(), "kvm".to_string()],
        };
        assert_eq!(args.to_cli_args(), vec!["-aG", "libvirt,kvm", "alice"]);
    }

    #[test]
    fn test_passwd_lock() {
        let args = PasswdLockArgs {
            username: "root".to_string(),
        };
        assert_eq!(args.to_command().command_line(), "passwd -l root");
    }
}
