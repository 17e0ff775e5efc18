//! Helpers for running child processes with deadlines.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Result of a child run with inherited standard streams.
#[derive(Debug)]
pub struct InheritedOutcome {
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
}

impl InheritedOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }
}

/// How a streamed child run ended.
#[derive(Debug)]
pub enum StreamOutcome<T> {
    /// The chunk handler produced a value; the child was killed.
    Settled(T),
    /// Stderr closed and the child exited before the handler settled.
    Exited(ExitStatus),
    /// The deadline passed first; the child was killed.
    TimedOut,
}

/// Run a command attached to the parent's stdin/stdout/stderr.
///
/// With `timeout = None` this waits for as long as the child runs.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_inherited(mut cmd: Command, timeout: Option<Duration>) -> Result<InheritedOutcome> {
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    debug!("spawning child process");
    let mut child = spawn(&mut cmd)?;

    let Some(timeout) = timeout else {
        let status = child.wait().context("wait for command")?;
        debug!(exit_code = ?status.code(), "command finished");
        return Ok(InheritedOutcome {
            status: Some(status),
            timed_out: false,
        });
    };

    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => {
            debug!(exit_code = ?status.code(), "command finished");
            Ok(InheritedOutcome {
                status: Some(status),
                timed_out: false,
            })
        }
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            kill_and_reap(&mut child)?;
            Ok(InheritedOutcome {
                status: None,
                timed_out: true,
            })
        }
    }
}

/// Run a command with piped output, feeding stderr chunks to `on_chunk` as
/// they arrive.
///
/// Stdout and stderr are echoed to the parent's streams so the operator still
/// sees them. The first `Some` returned by `on_chunk` kills the child and is
/// returned as [`StreamOutcome::Settled`]. Reader threads are detached rather
/// than joined: grandchildren of the killed process may keep the pipes open.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn stream_stderr<T, F>(
    mut cmd: Command,
    timeout: Option<Duration>,
    mut on_chunk: F,
) -> Result<StreamOutcome<T>>
where
    F: FnMut(&str) -> Option<T>,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = spawn(&mut cmd)?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    thread::spawn(move || {
        let mut parent = std::io::stdout();
        if let Err(err) = std::io::copy(&mut stdout, &mut parent) {
            debug!(err = %err, "stdout echo stopped");
        }
    });

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || forward_chunks(stderr, &tx));

    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let received = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(remaining)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(chunk) => {
                echo_stderr(&chunk);
                if let Some(value) = on_chunk(&chunk) {
                    debug!("stream settled, killing child");
                    kill_and_reap(&mut child)?;
                    return Ok(StreamOutcome::Settled(value));
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("stream deadline passed, killing child");
                kill_and_reap(&mut child)?;
                return Ok(StreamOutcome::TimedOut);
            }
            Err(RecvTimeoutError::Disconnected) => {
                let status = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        child
                            .wait_timeout(remaining)
                            .context("wait for command")?
                    }
                    None => Some(child.wait().context("wait for command")?),
                };
                let Some(status) = status else {
                    warn!("stderr closed but child kept running past deadline, killing");
                    kill_and_reap(&mut child)?;
                    return Ok(StreamOutcome::TimedOut);
                };
                debug!(exit_code = ?status.code(), "stderr closed before settling");
                return Ok(StreamOutcome::Exited(status));
            }
        }
    }
}

fn spawn(cmd: &mut Command) -> Result<Child> {
    match cmd.spawn() {
        Ok(child) => Ok(child),
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            Err(e).with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()))
        }
    }
}

fn kill_and_reap(child: &mut Child) -> Result<()> {
    // The child may already be gone; only the reap has to succeed.
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill failed");
    }
    child.wait().context("wait command after kill")?;
    Ok(())
}

fn forward_chunks<R: Read>(mut reader: R, tx: &mpsc::Sender<String>) {
    let mut chunk = [0u8; 8192];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let text = take_decoded(&mut pending);
                if !text.is_empty() && tx.send(text).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(err = %err, "stderr read failed");
                break;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Decode and drain `pending`, keeping an incomplete UTF-8 sequence at
/// the end for the next read to finish.
fn take_decoded(pending: &mut Vec<u8>) -> String {
    let split = match std::str::from_utf8(pending) {
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        _ => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..split]).into_owned();
    pending.drain(..split);
    text
}

fn echo_stderr(chunk: &str) {
    let mut parent = std::io::stderr();
    if let Err(err) = parent.write_all(chunk.as_bytes()) {
        debug!(err = %err, "stderr echo failed");
    }
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
    fn inherited_reports_exit_status() {
        let ok = run_inherited(sh("exit 0"), Some(Duration::from_secs(10))).expect("run");
        assert!(ok.success());

        let failed = run_inherited(sh("exit 3"), None).expect("run");
        assert!(!failed.success());
        assert_eq!(failed.status.and_then(|s| s.code()), Some(3));
    }

    #[test]
    fn inherited_times_out() {
        let outcome =
            run_inherited(sh("sleep 5"), Some(Duration::from_millis(100))).expect("run");
        assert!(outcome.timed_out);
        assert!(!outcome.success());
    }

    #[test]
    fn stream_settles_on_first_matching_chunk_and_kills_child() {
        let start = Instant::now();
        let outcome = stream_stderr(
            sh("echo 'ready' >&2; sleep 30"),
            Some(Duration::from_secs(10)),
            |chunk| chunk.contains("ready").then(|| chunk.to_string()),
        )
        .expect("stream");

        match outcome {
            StreamOutcome::Settled(chunk) => assert!(chunk.contains("ready")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stream_reports_exit_without_match() {
        let outcome = stream_stderr(sh("echo 'nothing here' >&2; exit 4"), None, |_| {
            None::<()>
        })
        .expect("stream");

        match outcome {
            StreamOutcome::Exited(status) => assert_eq!(status.code(), Some(4)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn stream_times_out() {
        let outcome = stream_stderr(sh("sleep 30"), Some(Duration::from_millis(200)), |_| {
            None::<()>
        })
        .expect("stream");
        assert!(matches!(outcome, StreamOutcome::TimedOut));
    }

    #[test]
    fn stream_deadline_covers_child_that_closed_stderr() {
        let start = Instant::now();
        let outcome = stream_stderr(
            sh("exec 2>&-; sleep 30"),
            Some(Duration::from_millis(300)),
            |_| None::<()>,
        )
        .expect("stream");
        assert!(matches!(outcome, StreamOutcome::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    struct SplitReader(std::collections::VecDeque<Vec<u8>>);

    impl Read for SplitReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let Some(piece) = self.0.pop_front() else {
                return Ok(0);
            };
            buf[..piece.len()].copy_from_slice(&piece);
            Ok(piece.len())
        }
    }

    #[test]
    fn forwarded_chunks_keep_characters_split_across_reads() {
        let bytes = "café ✓".as_bytes();
        let reader = SplitReader(
            [&bytes[..4], &bytes[4..7], &bytes[7..]]
                .iter()
                .map(|piece| piece.to_vec())
                .collect(),
        );
        let (tx, rx) = mpsc::channel();
        forward_chunks(reader, &tx);
        drop(tx);

        let chunks: Vec<String> = rx.iter().collect();
        assert_eq!(chunks.concat(), "café ✓");
        assert!(chunks.iter().all(|chunk| !chunk.contains('\u{FFFD}')));
    }

    #[test]
    fn truncated_trailing_sequence_is_flushed_lossily() {
        let reader = SplitReader([b"ok".to_vec(), vec![0xE2, 0x9C]].into_iter().collect());
        let (tx, rx) = mpsc::channel();
        forward_chunks(reader, &tx);
        drop(tx);
        assert_eq!(rx.iter().collect::<String>(), "ok\u{FFFD}");
    }

    #[test]
    fn spawn_failure_names_program() {
        let err = run_inherited(Command::new("docseed-no-such-program"), None).unwrap_err();
        assert!(format!("{err:#}").contains("docseed-no-such-program"));
    }
}
