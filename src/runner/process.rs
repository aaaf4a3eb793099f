use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use super::{Invocation, ProcessRunner, RunError, ToolOutput};

/// Runs invocations as real child processes with a bounded wait.
///
/// On timeout the child is killed and reaped before `TimedOut` is returned.
/// Dropping an in-flight `run` future kills the child as well, so callers
/// cancel by dropping (e.g. losing a `tokio::select!` race).
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError> {
        let program = invocation.program.display().to_string();
        tracing::debug!(%program, args = ?invocation.args, "spawning");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.clone(),
                source,
            })?;

        let outcome = tokio::time::timeout(self.timeout, collect(&mut child)).await;

        let (status, stdout, stderr) = match outcome {
            Ok(result) => result.map_err(|source| RunError::Io {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                tracing::warn!(%program, timeout = ?self.timeout, "killing unresponsive process");
                if let Err(e) = child.kill().await {
                    tracing::warn!(%program, "kill failed: {e}");
                }
                return Err(RunError::TimedOut {
                    program,
                    timeout: self.timeout,
                });
            }
        };

        let output = ToolOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };
        tracing::debug!(%program, status = %output.status_text(), "process exited");
        Ok(output)
    }
}

/// Wait for exit while draining both pipes, so a chatty child cannot block
/// on a full pipe buffer.
async fn collect(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err, status) = tokio::try_join!(read_pipe(stdout), read_pipe(stderr), child.wait())?;
    Ok((status, out, err))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("/bin/sh", vec!["-c".into(), script.into()])
    }

    /// True once the pid is gone or only a zombie awaiting reaping.
    fn terminated(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state == "Z" || state == "X"),
        }
    }

    async fn wait_for_pid(file: &Path) -> String {
        for _ in 0..100 {
            if let Ok(pid) = std::fs::read_to_string(file)
                && !pid.trim().is_empty()
            {
                return pid.trim().to_string();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("child never wrote its pid");
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let out = runner
            .run(&sh("echo hello; echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.status_text(), "exit code 3");
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let out = runner
            .run(&sh("i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.lines().count(), 20000);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let runner = SystemRunner::new(Duration::from_secs(1));
        let err = runner
            .run(&Invocation::new("/nonexistent/VBoxManage", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }), "{err}");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn hung_process_times_out_and_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());

        let runner = SystemRunner::new(Duration::from_millis(500));
        let started = Instant::now();
        let err = runner.run(&sh(&script)).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, RunError::TimedOut { .. }), "{err}");
        assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(terminated(pid.trim()), "pid {pid} still alive");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_the_future_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());

        let runner = SystemRunner::new(Duration::from_secs(60));
        let invocation = sh(&script);
        let cancelled =
            tokio::time::timeout(Duration::from_millis(300), runner.run(&invocation)).await;
        assert!(cancelled.is_err());

        let pid = wait_for_pid(&pid_file).await;
        let mut dead = false;
        for _ in 0..100 {
            if terminated(&pid) {
                dead = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(dead, "pid {pid} survived cancellation");
    }
}
