//! Per-service environment files on the target host.
//!
//! `{stack_path}/{service}.env`, plain `KEY=VALUE` lines, mode 0600. Files are
//! created empty and never overwritten on creation; edits rewrite the whole
//! file through a `.tmp` sibling and a rename.

use std::time::Duration;

use crate::descriptor::compose::env_file_name;
use crate::error::{first_line, Error, Result};
use crate::remote::RemoteExecutor;
use crate::runtime;
use crate::utils::shell;

pub struct EnvFiles<'a> {
    remote: &'a dyn RemoteExecutor,
    stack_path: String,
    timeout: Duration,
}

impl<'a> EnvFiles<'a> {
    pub fn new(remote: &'a dyn RemoteExecutor, stack_path: &str, timeout: Duration) -> Self {
        Self {
            remote,
            stack_path: stack_path.to_string(),
            timeout,
        }
    }

    pub fn path(&self, service: &str) -> String {
        shell::join_remote(&self.stack_path, &env_file_name(service))
    }

    /// Create an empty env file unless one exists.
    pub fn ensure(&self, service: &str) -> Result<()> {
        self.remote
            .run_checked(&runtime::mkdir_p(&self.stack_path), self.timeout)?;
        self.remote.run_checked(
            &runtime::create_private_if_absent(&self.path(service)),
            self.timeout,
        )?;
        Ok(())
    }

    pub fn list(&self, service: &str) -> Result<Vec<(String, String)>> {
        Ok(parse_entries(&self.read(service)?))
    }

    pub fn set(&self, service: &str, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        if value.contains('\n') || value.contains('\r') {
            return Err(Error::validation_invalid_argument(
                "value",
                "environment values cannot span lines",
                Some(key.to_string()),
            ));
        }

        let current = self.read(service)?;
        self.replace(service, &set_entry(&current, key, value))?;
        log_status!("env", "Set {} for {}", key, service);
        Ok(())
    }

    /// Remove `key`. Returns false when it was not set.
    pub fn unset(&self, service: &str, key: &str) -> Result<bool> {
        validate_key(key)?;
        let current = self.read(service)?;
        let (next, removed) = unset_entry(&current, key);
        if removed {
            self.replace(service, &next)?;
            log_status!("env", "Removed {} from {}", key, service);
        }
        Ok(removed)
    }

    fn read(&self, service: &str) -> Result<String> {
        let output = self
            .remote
            .run_checked(&runtime::read_if_exists(&self.path(service)), self.timeout)?;
        Ok(output.stdout)
    }

    fn replace(&self, service: &str, content: &str) -> Result<()> {
        self.remote
            .run_checked(&runtime::mkdir_p(&self.stack_path), self.timeout)?;

        let path = self.path(service);
        let tmp = format!("{}.tmp", path);
        let result = self
            .remote
            .run_checked(&runtime::write_private_file(&tmp, content), self.timeout)
            .and_then(|_| {
                self.remote
                    .run_checked(&runtime::move_file(&tmp, &path), self.timeout)
            });

        if let Err(err) = result {
            match self.remote.run(&runtime::remove_file(&tmp), self.timeout) {
                Ok(out) if !out.success => log_status!(
                    "env",
                    "Could not remove {}: {}",
                    tmp,
                    first_line(&out.stderr).unwrap_or("unknown error")
                ),
                Err(e) => log_status!("env", "Could not remove {}: {}", tmp, e.message),
                _ => {}
            }
            return Err(err);
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Ok(());
    }
    Err(Error::validation_invalid_argument(
        "key",
        format!("'{}' is not a valid environment variable name", key),
        None,
    ))
}

/// `KEY=VALUE` pairs in file order. Comments and malformed lines are skipped.
pub fn parse_entries(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

fn line_key(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    line.split_once('=').map(|(k, _)| k.trim())
}

/// Replace `key`'s line in place, or append it. Other lines are kept as-is.
pub fn set_entry(text: &str, key: &str, value: &str) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        if line_key(line) == Some(key) {
            if !replaced {
                lines.push(format!("{}={}", key, value));
                replaced = true;
            }
            continue;
        }
        lines.push(line.to_string());
    }
    if !replaced {
        lines.push(format!("{}={}", key, value));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Drop every line for `key`. Returns the new text and whether anything was removed.
pub fn unset_entry(text: &str, key: &str) -> (String, bool) {
    let kept: Vec<&str> = text.lines().filter(|l| line_key(l) != Some(key)).collect();
    let removed = kept.len() != text.lines().count();
    if kept.is_empty() {
        return (String::new(), removed);
    }
    let mut out = kept.join("\n");
    out.push('\n');
    (out, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place_and_keeps_comments() {
        let text = "# app\nDATABASE_URL=postgres://old\nDEBUG=0\n";
        let out = set_entry(text, "DATABASE_URL", "postgres://new");
        assert_eq!(out, "# app\nDATABASE_URL=postgres://new\nDEBUG=0\n");
    }

    #[test]
    fn set_appends_new_keys() {
        assert_eq!(set_entry("", "A", "1"), "A=1\n");
        assert_eq!(set_entry("A=1", "B", "x=y"), "A=1\nB=x=y\n");
    }

    #[test]
    fn duplicate_keys_collapse_on_set() {
        assert_eq!(set_entry("A=1\nA=2\n", "A", "3"), "A=3\n");
    }

    #[test]
    fn unset_reports_whether_key_existed() {
        let (out, removed) = unset_entry("A=1\nB=2\n", "A");
        assert!(removed);
        assert_eq!(out, "B=2\n");

        let (out, removed) = unset_entry("B=2\n", "A");
        assert!(!removed);
        assert_eq!(out, "B=2\n");

        assert_eq!(unset_entry("A=1\n", "A"), (String::new(), true));
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let entries = parse_entries("# c\n\nA=1\nnot a pair\nB = two words\n");
        assert_eq!(
            entries,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), " two words".to_string())
            ]
        );
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("DATABASE_URL").is_ok());
        assert!(validate_key("_X1").is_ok());
        assert!(validate_key("1X").is_err());
        assert!(validate_key("A-B").is_err());
        assert!(validate_key("").is_err());
    }
}
