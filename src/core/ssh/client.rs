use crate::defaults::SshDefaults;
use crate::error::{Error, Result};
use crate::remote::{CommandOutput, RemoteExecutor, SourceSync};
use crate::server::Server;
use crate::utils::shell;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const REMOTE_KILL_GRACE_SECS: u64 = 5;

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the server host is localhost/127.0.0.1/::1.
    pub is_local: bool,
    connect_timeout_secs: u64,
    server_alive_interval_secs: u64,
}

impl SshClient {
    pub fn from_server(server: &Server, options: &SshDefaults) -> Result<Self> {
        let identity_file = match &server.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(
                        server.id.clone(),
                        expanded,
                    ));
                }
                Some(expanded)
            }
            _ => None,
        };

        let is_local = is_local_host(&server.host);
        if is_local {
            log_status!("ssh", "Server '{}' is localhost, using local execution", server.id);
        }

        Ok(Self {
            host: server.host.clone(),
            user: server.user.clone(),
            port: server.port,
            identity_file,
            is_local,
            connect_timeout_secs: options.connect_timeout_secs,
            server_alive_interval_secs: options.server_alive_interval_secs,
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Never prompt; a stalled connection must not outlive the deadline.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.server_alive_interval_secs),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());
        args
    }

    /// `command` bounded by coreutils `timeout` on the far side. Killing the
    /// local ssh client does not stop a remote process that has no tty.
    fn remote_command(command: &str, timeout: Duration) -> String {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        format!(
            "timeout --kill-after={} {} sh -c {}",
            REMOTE_KILL_GRACE_SECS,
            secs.max(1),
            shell::quote_path(command)
        )
    }

    /// The process that runs `command` on the target.
    fn transport(&self, command: &str, timeout: Duration) -> Command {
        if self.is_local {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            return cmd;
        }
        let mut cmd = Command::new("ssh");
        cmd.args(self.build_ssh_args(&Self::remote_command(command, timeout)));
        cmd
    }

    fn execute(&self, command: &str, timeout: Duration, echo: bool) -> Result<CommandOutput> {
        let mut cmd = self.transport(command, timeout);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::internal_io(e.to_string(), Some(spawn_context(self.is_local))))?;

        let stdout = child.stdout.take().map(|s| drain(s, echo));
        let stderr = child.stderr.take().map(|s| drain(s, echo));

        let status = wait_with_deadline(&mut child, timeout)
            .map_err(|e| Error::internal_io(e.to_string(), Some("wait for command".to_string())))?;

        // Readers are left detached on timeout; a grandchild may still hold the pipes.
        let Some(status) = status else {
            return Err(Error::remote_command_timeout(command, timeout));
        };

        Ok(CommandOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            success: status.success(),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

impl RemoteExecutor for SshClient {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.execute(command, timeout, false)
    }

    fn run_streaming(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.execute(command, timeout, true)
    }
}

impl SourceSync for SshClient {
    /// Stream a gzipped tarball of `local_dir` into `remote_dir`.
    fn sync_dir(&self, local_dir: &Path, remote_dir: &str, timeout: Duration) -> Result<()> {
        if !local_dir.is_dir() {
            return Err(Error::validation_invalid_argument(
                "context",
                format!("build context {} is not a directory", local_dir.display()),
                None,
            ));
        }

        let local = local_dir.to_string_lossy().to_string();
        let remote_command = format!(
            "mkdir -p {dir} && tar -xzf - -C {dir}",
            dir = shell::quote_path(remote_dir)
        );

        let mut tar = Command::new("tar")
            .args(["-czf", "-", "-C", &local, "."])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::internal_io(e.to_string(), Some("spawn tar".to_string())))?;

        let archive = tar
            .stdout
            .take()
            .ok_or_else(|| Error::internal_unexpected("tar stdout was not captured"))?;

        let mut receiver = self.transport(&remote_command, timeout);
        receiver
            .stdin(Stdio::from(archive))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match receiver.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = tar.kill();
                let _ = tar.wait();
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(spawn_context(self.is_local)),
                ));
            }
        };

        let tar_stderr = tar.stderr.take().map(|s| drain(s, false));
        let stdout = child.stdout.take().map(|s| drain(s, false));
        let stderr = child.stderr.take().map(|s| drain(s, false));

        let started = Instant::now();
        let status = wait_with_deadline(&mut child, timeout)
            .map_err(|e| Error::internal_io(e.to_string(), Some("wait for sync".to_string())))?;

        let remaining = timeout.saturating_sub(started.elapsed()).max(POLL_INTERVAL);
        let tar_status = wait_with_deadline(&mut tar, remaining)
            .map_err(|e| Error::internal_io(e.to_string(), Some("wait for tar".to_string())))?;

        let (Some(status), Some(tar_status)) = (status, tar_status) else {
            return Err(Error::remote_command_timeout(
                format!("sync {} -> {}", local, remote_dir),
                timeout,
            ));
        };

        let tar_stderr = collect(tar_stderr);
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !tar_status.success() {
            return CommandOutput {
                stdout: String::new(),
                stderr: tar_stderr,
                success: false,
                exit_code: tar_status.code().unwrap_or(-1),
            }
            .into_result(&format!("tar -czf - -C {} .", local))
            .map(|_| ());
        }

        CommandOutput {
            stdout,
            stderr,
            success: status.success(),
            exit_code: status.code().unwrap_or(-1),
        }
        .into_result(&remote_command)
        .map(|_| ())
    }
}

fn spawn_context(is_local: bool) -> String {
    if is_local {
        "spawn sh".to_string()
    } else {
        "spawn ssh".to_string()
    }
}

/// Poll `child` until it exits or `timeout` elapses. On expiry the child is
/// killed and reaped, and `None` is returned.
pub(crate) fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Read a pipe to the end on its own thread, optionally echoing to stderr.
fn drain<R: Read + Send + 'static>(mut pipe: R, echo: bool) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if echo {
                        let mut err = io::stderr().lock();
                        let _ = err.write_all(&buf[..n]);
                        let _ = err.flush();
                    }
                    captured.extend_from_slice(&buf[..n]);
                }
            }
        }
        captured
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}
