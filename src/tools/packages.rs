//! Type-safe arguments for package and download tools.

use std::fmt;
use std::path::PathBuf;

use super::path_arg;
use crate::tool_args::{OutputMode, ToolArgs};

/// `pacman -S[yu] --needed --noconfirm PACKAGES...`
#[derive(Debug, Clone, Default)]
pub struct PacmanInstallArgs {
    pub packages: Vec<String>,
    /// Refresh databases and upgrade first (`-Syu`)
    pub refresh: bool,
}

impl PacmanInstallArgs {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            refresh: false,
        }
    }
}

impl ToolArgs for PacmanInstallArgs {
    fn program(&self) -> &'static str {
        "pacman"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let op = if self.refresh { "-Syu" } else { "-S" };
        let mut args = vec![
            op.to_string(),
            "--needed".to_string(),
            "--noconfirm".to_string(),
        ];
        args.extend(self.packages.iter().cloned());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Stream
    }
}

/// Sort method for mirror ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorSortMethod {
    /// Sort by download rate (fastest first).
    #[default]
    Rate,
    /// Sort by last synchronization time.
    Age,
    /// Sort by mirror score.
    Score,
}

impl MirrorSortMethod {
    /// Get the reflector argument value.
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorSortMethod::Rate => "rate",
            MirrorSortMethod::Age => "age",
            MirrorSortMethod::Score => "score",
        }
    }
}

impl fmt::Display for MirrorSortMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rank mirrors with reflector.
///
/// # Field to Flag Mapping
///
/// | Rust Field  | CLI Flag     | Notes |
/// |-------------|--------------|-------|
/// | `countries` | `--country`  | Comma-joined; omitted when empty |
/// | `latest`    | `--latest`   | Most recently synced N mirrors |
/// | `sort`      | `--sort`     | Default: rate |
/// | `protocol`  | `--protocol` | Default: https |
/// | `save`      | `--save`     | Mirrorlist to overwrite |
///
/// # Network Requirement
///
/// reflector fails with a non-zero exit when no mirror status can be
/// downloaded; callers treat that as a reason to fall back, not to abort.
#[derive(Debug, Clone)]
pub struct ReflectorArgs {
    pub countries: Vec<String>,
    pub latest: u32,
    pub sort: MirrorSortMethod,
    pub protocol: String,
    pub save: PathBuf,
}

impl Default for ReflectorArgs {
    fn default() -> Self {
        Self {
            countries: Vec::new(),
            latest: 20,
            sort: MirrorSortMethod::Rate,
            protocol: "https".to_string(),
            save: PathBuf::from("/etc/pacman.d/mirrorlist"),
        }
    }
}

impl ToolArgs for ReflectorArgs {
    fn program(&self) -> &'static str {
        "reflector"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.countries.is_empty() {
            args.push("--country".to_string());
            args.push(self.countries.join(","));
        }
        args.extend([
            "--latest".to_string(),
            self.latest.to_string(),
            "--sort".to_string(),
            self.sort.as_str().to_string(),
            "--protocol".to_string(),
            self.protocol.clone(),
            "--save".to_string(),
            path_arg(&self.save),
        ]);
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `curl -fsSL -o OUTPUT URL`
#[derive(Debug, Clone)]
pub struct CurlDownloadArgs {
    pub url: String,
    pub output: PathBuf,
}

impl ToolArgs for CurlDownloadArgs {
    fn program(&self) -> &'static str {
        "curl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-fsSL".to_string(),
            "-o".to_string(),
            path_arg(&self.output),
            self.url.clone(),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `git clone --depth 1 URL DEST`
#[derive(Debug, Clone)]
pub struct GitCloneArgs {
    pub url: String,
    pub dest: PathBuf,
}

impl ToolArgs for GitCloneArgs {
    fn program(&self) -> &'static str {
        "git"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            self.url.clone(),
            path_arg(&self.dest),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacman_install() {
        let args = PacmanInstallArgs::new(["zsh", "git"]);
        assert_eq!(
            args.to_command().command_line(),
            "pacman -S --needed --noconfirm zsh git"
        );
    }

    #[test]
    fn test_pacman_refresh() {
        let args = PacmanInstallArgs {
            packages: vec!["reflector".to_string()],
            refresh: true,
        };
        assert_eq!(args.to_cli_args()[0], "-Syu");
    }

    #[test]
    fn test_mirror_sort_method_default() {
        assert_eq!(MirrorSortMethod::default(), MirrorSortMethod::Rate);
        assert_eq!(MirrorSortMethod::Score.to_string(), "score");
    }

    #[test]
    fn test_reflector_with_countries() {
        let args = ReflectorArgs {
            countries: vec!["US".to_string(), "DE".to_string()],
            ..Default::default()
        };
        assert_eq!(
            args.to_command().command_line(),
            "reflector --country US,DE --latest 20 --sort rate --protocol https --save /etc/pacman.d/mirrorlist"
        );
    }

    #[test]
    fn test_reflector_without_countries_omits_flag() {
        let args = ReflectorArgs::default();
        assert!(!args.to_cli_args().contains(&"--country".to_string()));
    }

    #[test]
    fn test_curl_download() {
        let args = CurlDownloadArgs {
            url: "https://archlinux.org/mirrorlist/?country=all".to_string(),
            output: PathBuf::from("/tmp/mirrorlist"),
        };
        assert_eq!(args.to_cli_args()[..3], ["-fsSL", "-o", "/tmp/mirrorlist"]);
    }
}
