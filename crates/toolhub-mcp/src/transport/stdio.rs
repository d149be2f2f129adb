//! Standard I/O transport.
//!
//! Spawns the server as a child process and exchanges newline-delimited JSON
//! over its stdin/stdout. Stderr is inherited so server diagnostics reach the
//! user's terminal.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::Channel;
use crate::error::TransportError;

/// How long a child gets to exit after SIGTERM before it is killed.
const GRACEFUL_EXIT: std::time::Duration = std::time::Duration::from_secs(2);

/// Child-process channel.
pub struct StdioChannel {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    pid: Option<u32>,
    connected: AtomicBool,
}

impl StdioChannel {
    /// Spawn `command` with `args`, extra environment and working directory.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<Self, TransportError> {
        debug!(command = command, args = ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;
        let pid = child.id();

        debug!(pid = ?pid, "MCP server process spawned");

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            pid,
            connected: AtomicBool::new(true),
        })
    }

    /// Process ID of the child, if it was still running at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[async_trait]
impl Channel for StdioChannel {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        stdin.write_all(b"\n").await.map_err(TransportError::WriteError)?;
        stdin.flush().await.map_err(TransportError::WriteError)?;

        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut stdout = self.stdout.lock().await;

        loop {
            if !self.is_connected() {
                return Ok(None);
            }

            let mut line = String::new();
            let bytes_read = stdout
                .read_line(&mut line)
                .await
                .map_err(TransportError::ReadError)?;

            if bytes_read == 0 {
                self.connected.store(false, Ordering::SeqCst);
                return Ok(None);
            }

            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            return Ok(Some(message.to_string()));
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(pid = ?self.pid, "Closing MCP server process");
        let mut child = self.child.lock().await;

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

                tokio::select! {
                    _ = child.wait() => {
                        debug!("MCP server exited gracefully");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(GRACEFUL_EXIT) => {
                        warn!(pid = pid, "MCP server did not exit after SIGTERM, killing");
                    }
                }
            }
        }

        let _ = child.kill().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    async fn spawn_cat() -> StdioChannel {
        StdioChannel::spawn("cat", &[], &HashMap::new(), None)
            .await
            .expect("cat should be available on the test host")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_channel_echo() {
        // 'cat' echoes every line back
        let channel = spawn_cat().await;

        assert!(channel.is_connected());

        channel.send(r#"{"test": "hello"}"#).await.unwrap();
        let response = channel.receive().await.unwrap();
        assert_eq!(response.as_deref(), Some(r#"{"test": "hello"}"#));

        channel.close().await.unwrap();
        assert!(!channel.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_after_close_fails() {
        let channel = spawn_cat().await;
        channel.close().await.unwrap();
        channel.close().await.unwrap();

        let result = channel.send("test").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(channel.receive().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let channel = spawn_cat().await;
        channel.send("").await.unwrap();
        channel.send("{}").await.unwrap();
        assert_eq!(channel.receive().await.unwrap().as_deref(), Some("{}"));
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let result =
            StdioChannel::spawn("definitely-not-a-real-binary-xyz", &[], &HashMap::new(), None).await;
        match result {
            Err(e) => assert_eq!(e.reason(), crate::error::FailureReason::Refused),
            Ok(_) => panic!("spawn should fail"),
        }
    }
}
