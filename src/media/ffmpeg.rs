//! External tool invocation helpers.
//!
//! Every invocation carries an explicit deadline: a wedged encoder must
//! never stall a worker indefinitely.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// ffmpeg command with the noise suppressed.
pub fn silent_ffmpeg() -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-nostats", "-nostdin", "-loglevel", "error"]);
    cmd
}

/// Runs a command to completion, killing it once the deadline expires.
pub fn run_with_deadline(cmd: &mut Command, deadline: Duration) -> Result<()> {
    let tool = tool_name(cmd);
    let mut child = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("failed to spawn {}", tool))?;

    let status = wait_with_deadline(&mut child, &tool, deadline)?;
    if !status.success() {
        return Err(anyhow!("{} exited with {}", tool, status));
    }
    Ok(())
}

/// Like [`run_with_deadline`] but captures stdout.
///
/// Both pipes are drained concurrently while the child runs; a tool whose
/// output exceeds the OS pipe buffer must not block against a parent that
/// is only polling for exit.
pub fn capture_with_deadline(cmd: &mut Command, deadline: Duration) -> Result<String> {
    let tool = tool_name(cmd);
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {}", tool))?;

    let stdout_drain = drain_pipe(child.stdout.take());
    let stderr_drain = drain_pipe(child.stderr.take());

    let status = wait_with_deadline(&mut child, &tool, deadline)?;

    let stdout = stdout_drain.join().unwrap_or_default();
    let stderr = stderr_drain.join().unwrap_or_default();

    if !status.success() {
        return Err(anyhow!(
            "{} exited with {}: {}",
            tool,
            status,
            stderr.trim()
        ));
    }
    Ok(stdout)
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

/// Byte size of a produced artifact.
pub fn output_size(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("failed to stat output file {}", path.display()))?;
    Ok(metadata.len())
}

fn tool_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn wait_with_deadline(child: &mut Child, tool: &str, deadline: Duration) -> Result<ExitStatus> {
    let started = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to wait for {}", tool))?
        {
            return Ok(status);
        }
        if started.elapsed() >= deadline {
            if let Err(err) = child.kill() {
                warn!("Failed to kill timed-out {}: {}", tool, err);
            }
            let _ = child.wait();
            return Err(anyhow!("{} timed out after {:?}", tool, deadline));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
