//! External Command Execution
//!
//! Spawns untrusted commands inside a workspace with a wall-clock limit.
//! On unix each command leads its own process group, and the whole group is
//! killed when the call returns, times out or is cancelled, so runner
//! workers never outlive the workspace. Output is read incrementally and
//! only the last `max_output_bytes` of each stream are kept.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::types::{Result, VerigenError};

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stderr if non-empty, else stdout; for error messages
    pub fn failure_message(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if text.is_empty() {
            format!("process exited with status {:?}", self.exit_code)
        } else {
            text.to_string()
        }
    }
}

pub struct CommandSpec<'a> {
    /// Name used in errors and logs
    pub tool: &'a str,
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub envs: Vec<(&'static str, String)>,
    pub limit: Duration,
    pub max_output_bytes: usize,
}

pub async fn run_command(spec: CommandSpec<'_>) -> Result<CommandOutput> {
    let Some((program, args)) = spec.argv.split_first() else {
        return Err(VerigenError::sandbox_failed(spec.tool, "empty command"));
    };

    debug!("Spawning {} for {}: {:?}", program, spec.tool, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        VerigenError::sandbox_failed(spec.tool, format!("failed to spawn '{}': {}", program, e))
    })?;
    #[cfg(unix)]
    let _group = child.id().map(ProcessGroup);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let max = spec.max_output_bytes;
    let collect = async {
        let (status, stdout, stderr) =
            tokio::join!(child.wait(), read_tail(stdout, max), read_tail(stderr, max));
        Ok::<_, std::io::Error>((status?, stdout?, stderr?))
    };

    let (status, stdout, stderr) = timeout(spec.limit, collect)
        .await
        .map_err(|_| VerigenError::SandboxTimeout {
            tool: spec.tool.to_string(),
            duration: spec.limit,
        })?
        .map_err(|e| VerigenError::sandbox_failed(spec.tool, format!("wait failed: {}", e)))?;

    Ok(CommandOutput {
        exit_code: status.code(),
        success: status.success(),
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
    })
}

/// Kills the process group it names when dropped
#[cfg(unix)]
struct ProcessGroup(u32);

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Ok(pgid) = i32::try_from(self.0) else {
            return;
        };
        // ESRCH once every member has exited
        if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL)
            && e != nix::errno::Errno::ESRCH
        {
            debug!("Failed to kill process group {}: {}", pgid, e);
        }
    }
}

/// Rolling window over the last `max` bytes of a stream
#[derive(Debug)]
struct Tail {
    bytes: VecDeque<u8>,
    max: usize,
    dropped: usize,
}

impl Tail {
    fn new(max: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(max.min(READ_CHUNK_BYTES)),
            max,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let excess = (self.bytes.len() + chunk.len()).saturating_sub(self.max);
        let from_buffer = excess.min(self.bytes.len());
        self.bytes.drain(..from_buffer);
        self.bytes.extend(&chunk[excess - from_buffer..]);
        self.dropped += excess;
    }

    /// Keep the tail; test runners print their summary last
    fn into_string(mut self) -> String {
        let text = String::from_utf8_lossy(self.bytes.make_contiguous()).into_owned();
        if self.dropped == 0 {
            text
        } else {
            format!("[... {} bytes truncated]\n{}", self.dropped, text)
        }
    }
}

async fn read_tail<R>(reader: Option<R>, max: usize) -> std::io::Result<Tail>
where
    R: AsyncRead + Unpin,
{
    let mut tail = Tail::new(max);
    let Some(mut reader) = reader else {
        return Ok(tail);
    };
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(tail);
        }
        tail.push(&buf[..n]);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec<'a>(argv: &'a [String], cwd: &'a Path, limit: Duration) -> CommandSpec<'a> {
        CommandSpec {
            tool: "test",
            argv,
            cwd,
            envs: vec![("VERIGEN_TEST", "1".to_string())],
            limit,
            max_output_bytes: 1024,
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_output_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let argv = argv(&["sh", "-c", "echo $VERIGEN_TEST; echo err >&2"]);
        let out = run_command(spec(&argv, dir.path(), Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "1");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let argv = argv(&["sh", "-c", "echo broken >&2; exit 3"]);
        let out = run_command(spec(&argv, dir.path(), Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.failure_message(), "broken");
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let argv = argv(&["sleep", "5"]);
        let err = run_command(spec(&argv, dir.path(), Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, VerigenError::SandboxTimeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let argv = argv(&["definitely-not-a-real-binary-xyz"]);
        let err = run_command(spec(&argv, dir.path(), Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, VerigenError::SandboxExecutionFailed { .. }));
    }

    #[test]
    fn test_truncation_keeps_tail() {
        let mut tail = Tail::new(4);
        tail.push(b"0123");
        tail.push(b"456789");
        let text = tail.into_string();
        assert!(text.ends_with("6789"));
        assert!(text.starts_with("[... 6 bytes truncated]"));

        let mut short = Tail::new(16);
        short.push(b"ok");
        assert_eq!(short.into_string(), "ok");
    }

    #[tokio::test]
    async fn test_chatty_output_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let argv = argv(&["sh", "-c", "yes line | head -c 500000; echo done"]);
        let output = run_command(spec(&argv, dir.path(), Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.stdout.starts_with("[... "));
        assert!(output.stdout.ends_with("done\n"));
        assert!(output.stdout.len() < 1024 + 64);
    }

    /// Dead or reaped-pending (zombie) according to procfs
    #[cfg(target_os = "linux")]
    fn is_gone(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let argv = argv(&["sh", "-c", "sleep 30 & echo $! > worker.pid; wait"]);
        let err = run_command(spec(&argv, dir.path(), Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, VerigenError::SandboxTimeout { .. }));

        let pid = std::fs::read_to_string(dir.path().join("worker.pid")).unwrap();
        let pid = pid.trim().to_string();
        let mut gone = false;
        for _ in 0..50 {
            if is_gone(&pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "background worker {} survived the timeout", pid);
    }
}
