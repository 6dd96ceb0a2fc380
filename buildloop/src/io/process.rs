//! Child process execution with a wall-clock timeout and bounded capture.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of a finished (or killed) child.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Leading bytes drained but not kept because of the output limit.
    pub dropped_bytes: usize,
    pub timed_out: bool,
}

/// Spawn `cmd`, feed `stdin`, and wait at most `timeout`.
///
/// stdin, stdout and stderr are serviced on their own threads, so neither a
/// chatty child nor one that ignores its input can deadlock the wait. On timeout the child
/// is killed and reaped before returning with `timed_out = true`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain_tail(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || drain_tail(stderr, output_limit_bytes));

    // Fed from its own thread so the timeout still applies to a child that never reads.
    let stdin_writer = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                if let Err(err) = pipe.write_all(&input) {
                    warn!(err = %err, "failed to write full stdin payload");
                }
            }))
        }
        None => None,
    };

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    if let Some(writer) = stdin_writer
        && writer.join().is_err()
    {
        warn!("stdin writer thread panicked");
    }
    let (stdout, stdout_dropped) = join_reader(stdout_reader).context("join stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_reader).context("join stderr")?;
    let dropped_bytes = stdout_dropped + stderr_dropped;
    if dropped_bytes > 0 {
        warn!(dropped_bytes, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        dropped_bytes,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

/// Read to EOF, keeping the last `limit` bytes and counting what was dropped.
///
/// Agents print their final status last, so the tail is what must survive.
fn drain_tail<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut window: VecDeque<u8> = VecDeque::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        window.extend(&chunk[..n]);
        if window.len() > limit {
            let excess = window.len() - limit;
            window.drain(..excess);
            dropped += excess;
        }
    }
    Ok((window.into(), dropped))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_stderr_and_stdin() {
        let output = run_with_timeout(
            sh("cat; echo oops >&2"),
            Some(b"payload"),
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(output.stdout, b"payload");
        assert_eq!(output.stderr, b"oops\n");
    }

    #[test]
    fn kills_child_on_timeout() {
        let output = run_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(200), 1000)
            .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn keeps_tail_beyond_limit() {
        let output = run_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"ghij");
        assert_eq!(output.dropped_bytes, 6);
    }

    #[test]
    fn reports_nonzero_exit() {
        let output =
            run_with_timeout(sh("exit 3"), None, Duration::from_secs(10), 1000).expect("run");
        assert_eq!(output.status.code(), Some(3));
    }
}
