use std::time::Duration;

use crate::error::{first_line, Error, Result};
use crate::remote::RemoteExecutor;
use crate::runtime;
use crate::utils::shell;

use super::version;

pub const DESCRIPTOR_FILE: &str = "docker-compose.yml";

/// The stack's Compose file on the target host.
///
/// Content is cached after the first read and dropped on every write, so one
/// store should live for exactly one orchestration run.
pub struct DescriptorStore<'a> {
    remote: &'a dyn RemoteExecutor,
    stack_path: String,
    path: String,
    timeout: Duration,
    cache: Option<String>,
}

impl<'a> DescriptorStore<'a> {
    pub fn new(remote: &'a dyn RemoteExecutor, stack_path: &str, timeout: Duration) -> Self {
        Self {
            remote,
            stack_path: stack_path.to_string(),
            path: shell::join_remote(stack_path, DESCRIPTOR_FILE),
            timeout,
            cache: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn tmp_path(&self) -> String {
        format!("{}.tmp", self.path)
    }

    /// Raw descriptor text; empty when the file does not exist.
    pub fn read(&mut self) -> Result<String> {
        if let Some(cached) = &self.cache {
            return Ok(cached.clone());
        }
        let command = runtime::read_if_exists(&self.path);
        let output = self.remote.run_checked(&command, self.timeout)?;
        self.cache = Some(output.stdout.clone());
        Ok(output.stdout)
    }

    /// Recorded version of `image_name`, 0 when absent.
    pub fn current_version(&mut self, image_name: &str) -> Result<u32> {
        let text = self.read()?;
        version::extract(&text, image_name)
    }

    /// Validate `content` on the host and swap it in atomically.
    pub fn write(&mut self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(Error::descriptor_invalid("refusing to write an empty descriptor"));
        }

        self.cache = None;
        self.remote
            .run_checked(&runtime::mkdir_p(&self.stack_path), self.timeout)?;

        let tmp = self.tmp_path();
        let result = self.write_tmp_and_swap(&tmp, content);
        if result.is_err() {
            self.discard_tmp(&tmp);
        }
        result
    }

    fn write_tmp_and_swap(&self, tmp: &str, content: &str) -> Result<()> {
        self.remote
            .run_checked(&runtime::write_file(tmp, content), self.timeout)?;

        let validation = self
            .remote
            .run(&runtime::compose_validate(tmp), self.timeout)?;
        if !validation.success {
            let reason = first_line(&validation.stderr)
                .or_else(|| first_line(&validation.stdout))
                .unwrap_or("validator exited non-zero without output")
                .to_string();
            log_status!("descriptor", "Validation failed: {}", reason);
            return Err(Error::descriptor_invalid(reason));
        }

        self.remote
            .run_checked(&runtime::move_file(tmp, &self.path), self.timeout)?;
        Ok(())
    }

    fn discard_tmp(&self, tmp: &str) {
        match self.remote.run(&runtime::remove_file(tmp), self.timeout) {
            Ok(out) if out.success => {}
            Ok(out) => log_status!(
                "descriptor",
                "Could not remove {}: {}",
                tmp,
                first_line(&out.stderr).unwrap_or("unknown error")
            ),
            Err(err) => log_status!("descriptor", "Could not remove {}: {}", tmp, err.message),
        }
    }
}
