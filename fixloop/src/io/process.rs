//! Helpers for running child processes with timeouts, bounded output, and
//! live line streaming.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::interrupt::Interrupt;

/// How often a streaming wait checks the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(200);

const SPAWN_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Stdout followed by stderr as lossy UTF-8, with truncation notices.
    pub fn combined_text(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).to_string();
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        buf
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    // Fed from its own thread so a child that writes before it reads cannot
    // stall us ahead of the timeout. Dropping the handle closes the pipe.
    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        thread::spawn(move || {
            // A child that exits without reading stdin closes the pipe; that is not our failure.
            if let Err(e) = child_stdin.write_all(&input) {
                warn!(err = %e, "child closed stdin early");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    // Grandchildren may keep the pipes open after a kill; leave the readers
    // detached instead of blocking on them.
    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) = if timed_out {
        ((Vec::new(), 0), (Vec::new(), 0))
    } else {
        (
            join_output(stdout_handle).context("join stdout")?,
            join_output(stderr_handle).context("join stderr")?,
        )
    };

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Exit of a streamed command.
#[derive(Debug)]
pub struct StreamedExit {
    pub status: ExitStatus,
    /// The interrupt flag fired and the child was killed.
    pub interrupted: bool,
}

/// Shared writer that receives forwarded output lines.
pub type LineSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Sink that forwards to the operator's stdout.
pub fn stdout_sink() -> LineSink {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

/// Run a command with no timeout, forwarding stdout and stderr line by line to
/// `sink` as they arrive.
///
/// The wait polls `interrupt`; when it fires the child is killed and reaped
/// rather than left running.
#[instrument(skip_all)]
pub fn run_command_streaming(
    mut cmd: Command,
    sink: LineSink,
    interrupt: &Interrupt,
) -> Result<StreamedExit> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning streamed child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_sink = sink.clone();
    let stdout_handle = thread::spawn(move || forward_lines(stdout, stdout_sink));
    let stderr_handle = thread::spawn(move || forward_lines(stderr, sink));

    let (status, interrupted) = wait_interruptibly(&mut child, interrupt)?;

    if interrupted {
        // Grandchildren may still hold the pipes; do not wait on the readers.
        debug!("leaving output forwarders detached after interrupt");
        return Ok(StreamedExit {
            status,
            interrupted,
        });
    }

    for handle in [stdout_handle, stderr_handle] {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(err = %e, "output forwarding failed"),
            Err(_) => warn!("output forwarding thread panicked"),
        }
    }

    debug!(exit_code = ?status.code(), interrupted, "streamed command finished");
    Ok(StreamedExit {
        status,
        interrupted,
    })
}

fn wait_interruptibly(child: &mut Child, interrupt: &Interrupt) -> Result<(ExitStatus, bool)> {
    loop {
        if interrupt.is_triggered() {
            warn!("interrupted, killing child process");
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            return Ok((status, true));
        }
        if let Some(status) = child
            .wait_timeout(INTERRUPT_POLL)
            .context("wait for command")?
        {
            return Ok((status, false));
        }
    }
}

fn forward_lines<R: Read>(reader: R, sink: LineSink) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let mut writer = sink
            .lock()
            .map_err(|_| anyhow!("output sink poisoned"))?;
        // Flush each line for real-time visibility.
        writer.write_all(&line).context("forward line")?;
        writer.flush().context("flush forwarded line")?;
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// Check that `program` can be started from `workdir`.
///
/// Runs `program --version` and only cares whether it spawned; the exit
/// status is ignored since not every tool supports the flag.
#[instrument(skip_all, fields(program = %program))]
pub fn ensure_spawnable(program: &str, workdir: &Path) -> Result<()> {
    let mut cmd = Command::new(program);
    cmd.arg("--version").current_dir(workdir);
    run_command_with_timeout(cmd, None, SPAWN_CHECK_TIMEOUT, 4096)
        .with_context(|| format!("'{program}' could not be started"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CapturedOutput;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_and_bounds_output() {
        let out = run_command_with_timeout(
            sh("printf 'abcdef'; printf 'err' >&2"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 2);
        assert!(out.combined_text().contains("[stdout truncated 2 bytes]"));
        assert!(out.combined_text().contains("err"));
    }

    #[test]
    fn kills_on_timeout() {
        let start = Instant::now();
        let out = run_command_with_timeout(
            sh("exec sleep 30"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn feeds_stdin() {
        let out = run_command_with_timeout(
            sh("cat"),
            Some(b"payload"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(out.stdout, b"payload");
    }

    #[test]
    fn streams_both_pipes_to_sink() {
        let captured = CapturedOutput::new();
        let exit = run_command_streaming(
            sh("echo out; echo err >&2; exit 3"),
            captured.sink(),
            &Interrupt::new(),
        )
        .expect("run");
        assert_eq!(exit.status.code(), Some(3));
        assert!(!exit.interrupted);
        let text = captured.text();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[test]
    fn interrupt_kills_streamed_child() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let start = Instant::now();
        let exit = run_command_streaming(sh("exec sleep 30"), CapturedOutput::new().sink(), &interrupt)
            .expect("run");
        assert!(exit.interrupted);
        assert!(!exit.status.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn large_stdin_does_not_block_a_child_that_writes_first() {
        let input = vec![b'x'; 1_000_000];
        let start = Instant::now();
        let out = run_command_with_timeout(
            sh("head -c 200000 /dev/zero; wc -c"),
            Some(&input),
            Duration::from_secs(20),
            2_000_000,
        )
        .expect("run");

        assert!(!out.timed_out);
        assert!(out.status.success());
        let count = String::from_utf8_lossy(&out.stdout[200_000..]);
        assert_eq!(count.trim(), "1000000");
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn spawn_check_ignores_exit_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(ensure_spawnable("false", temp.path()).is_ok());
        let err = ensure_spawnable("fixloop-definitely-missing-tool", temp.path())
            .expect_err("missing program");
        assert!(format!("{err:#}").contains("could not be started"));
    }
}
