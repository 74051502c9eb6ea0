//! Idempotent configuration file edits.
//!
//! Every persistent edit archsetup makes (pacman.conf, makepkg.conf,
//! mkinitcpio.conf, locale.gen, shell rc files, unit overrides) is a pure
//! `&str -> String` function from this module, applied through `apply_edit`.
//!
//! # Invariant
//!
//! For every edit `f` and input `s`: `f(&f(s)) == f(s)`. Directives are
//! replaced in place, managed blocks are regenerated between their
//! markers, and sections are only added when absent. Nothing is blindly
//! appended.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tool_runner::Executor;

/// Mode for configuration files archsetup writes.
pub const CONFIG_FILE_MODE: u32 = 0o644;

fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(str::to_string).collect()
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Key of a `KEY = value`, `KEY=value` or bare `KEY` line, and whether the
/// line is commented out.
fn line_key(line: &str) -> Option<(&str, bool)> {
    let trimmed = line.trim_start();
    let commented = trimmed.starts_with('#');
    let body = trimmed.trim_start_matches('#').trim_start();
    let key = body
        .split(|c: char| c == '=' || c.is_whitespace())
        .next()
        .unwrap_or("");
    if key.is_empty() { None } else { Some((key, commented)) }
}

fn is_section_header(line: &str) -> bool {
    line.trim_start().starts_with('[')
}

/// Index where a new line for `section` is inserted: after the section's
/// last non-blank line.
fn section_insert_index(lines: &[String], section: &str) -> Option<usize> {
    let header = format!("[{}]", section);
    let start = lines.iter().position(|l| l.trim() == header)?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| is_section_header(l))
        .map(|i| start + 1 + i)
        .unwrap_or(lines.len());
    let mut insert = end;
    while insert > start + 1 && lines[insert - 1].trim().is_empty() {
        insert -= 1;
    }
    Some(insert)
}

/// Set `key` to the exact line `rendered`.
///
/// An active line for `key` is replaced; otherwise a commented-out one is
/// (uncommenting it); otherwise `rendered` is added at the end of
/// `section`, or at the end of the file without a section. Extra active
/// lines for the same key are dropped.
pub fn set_directive(content: &str, section: Option<&str>, key: &str, rendered: &str) -> String {
    let mut lines = split_lines(content);

    let active = lines
        .iter()
        .position(|l| matches!(line_key(l), Some((k, false)) if k == key));
    let commented = lines
        .iter()
        .position(|l| matches!(line_key(l), Some((k, true)) if k == key));

    match active.or(commented) {
        Some(idx) => {
            lines[idx] = rendered.to_string();
            let mut i = 0;
            lines.retain(|l| {
                let keep = i == idx || !matches!(line_key(l), Some((k, false)) if k == key);
                i += 1;
                keep
            });
        }
        None => {
            let at = section
                .and_then(|s| section_insert_index(&lines, s))
                .unwrap_or(lines.len());
            lines.insert(at, rendered.to_string());
        }
    }
    join_lines(&lines)
}

/// Enable an INI-style section such as `[multilib]`.
///
/// A commented-out section is uncommented together with its commented
/// body lines. A missing one is appended with `body`.
pub fn enable_section(content: &str, name: &str, body: &[&str]) -> String {
    let header = format!("[{}]", name);
    let mut lines = split_lines(content);

    if lines.iter().any(|l| l.trim() == header) {
        return join_lines(&lines);
    }

    let commented = lines.iter().position(|l| {
        let t = l.trim();
        t.starts_with('#') && t.trim_start_matches('#').trim() == header
    });

    match commented {
        Some(idx) => {
            lines[idx] = header;
            for line in lines.iter_mut().skip(idx + 1) {
                let t = line.trim();
                if !t.starts_with('#') || !t.contains('=') {
                    break;
                }
                *line = t.trim_start_matches('#').trim_start().to_string();
            }
        }
        None => {
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(header);
            lines.extend(body.iter().map(|l| l.to_string()));
        }
    }
    join_lines(&lines)
}

fn block_markers(id: &str) -> (String, String) {
    (
        format!("# >>> archsetup: {} >>>", id),
        format!("# <<< archsetup: {} <<<", id),
    )
}

/// Insert or regenerate the block marked with `id`.
pub fn upsert_managed_block(content: &str, id: &str, body: &str) -> String {
    let (begin, end) = block_markers(id);
    let mut lines = split_lines(content);

    let mut block = vec![begin.clone()];
    block.extend(body.lines().map(str::to_string));
    block.push(end.clone());

    let begin_idx = lines.iter().position(|l| l.trim() == begin);
    let end_idx = lines.iter().position(|l| l.trim() == end);

    match (begin_idx, end_idx) {
        (Some(b), Some(e)) if b < e => {
            lines.splice(b..=e, block);
        }
        _ => {
            // drop a dangling marker before appending a fresh block
            lines.retain(|l| l.trim() != begin && l.trim() != end);
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.extend(block);
        }
    }
    join_lines(&lines)
}

/// Uncomment every `#Server = ...` line of a downloaded mirrorlist.
pub fn uncomment_servers(content: &str) -> String {
    let lines: Vec<String> = content
        .lines()
        .map(|l| {
            let t = l.trim_start();
            let body = t.trim_start_matches('#').trim_start();
            if t.starts_with('#') && body.starts_with("Server") && body.contains('=') {
                body.to_string()
            } else {
                l.to_string()
            }
        })
        .collect();
    join_lines(&lines)
}

/// Replace the `HOOKS=(...)` array of mkinitcpio.conf.
pub fn set_mkinitcpio_hooks(content: &str, hooks: &[&str]) -> String {
    set_directive(content, None, "HOOKS", &format!("HOOKS=({})", hooks.join(" ")))
}

/// Enable `locale` in locale.gen.
///
/// Entries are matched by their locale field and uncommented as written,
/// so `en_US` enables `en_US ISO-8859-1` with the charset the file lists.
/// A locale the file does not list is appended only when its name carries
/// the charset (`de_DE.UTF-8` → `de_DE.UTF-8 UTF-8`).
pub fn enable_locale(content: &str, locale: &str) -> String {
    let names_locale = |entry: &str| entry.split_whitespace().next() == Some(locale);
    let mut lines = split_lines(content);

    if lines
        .iter()
        .any(|l| !l.trim_start().starts_with('#') && names_locale(l))
    {
        return join_lines(&lines);
    }

    let commented = lines.iter().position(|l| {
        let trimmed = l.trim_start();
        trimmed.starts_with('#') && names_locale(trimmed.trim_start_matches('#'))
    });
    match (commented, locale.split_once('.')) {
        (Some(idx), _) => {
            lines[idx] = lines[idx].trim_start().trim_start_matches('#').trim().to_string();
        }
        (None, Some((_, charset))) => lines.push(format!("{} {}", locale, charset)),
        (None, None) => warn!("locale.gen has no entry for {}, leaving it disabled", locale),
    }
    join_lines(&lines)
}

/// Read `path`, apply `edit` and write the result back if it changed.
///
/// A missing file is edited as empty. Returns whether the file changed.
pub fn apply_edit<F>(exec: &dyn Executor, path: &Path, edit: F) -> Result<bool>
where
    F: FnOnce(&str) -> String,
{
    let current = exec.read_to_string(path)?.unwrap_or_default();
    let updated = edit(&current);
    if updated == current {
        debug!("{} already up to date", path.display());
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        if !exec.exists(parent) {
            exec.create_dir_all(parent)?;
        }
    }
    exec.write_file(path, &updated, CONFIG_FILE_MODE)?;
    info!("Updated {}", path.display());
    Ok(true)
}
