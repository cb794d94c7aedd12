//! Bounded invocation of external programs
//!
//! Speech synthesis, audio playback and text extraction all shell out.
//! Every call here carries a deadline; on expiry the child is killed and
//! the call is abandoned.

use std::io::{Read, Write};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

const WAIT_POLL: Duration = Duration::from_millis(20);
const STDERR_LIMIT: usize = 300;

/// Errors from a bounded external invocation
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("i/o error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run `command` to completion, feeding `input` on stdin, within `timeout`
///
/// Stdout is discarded. Stderr is drained while the child runs so a
/// chatty program cannot stall on a full pipe; a non-zero exit is
/// reported with its head.
pub fn run_with_timeout(
    mut command: Command,
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<(), ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();

    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!(command = ?command, "running external program");
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stderr = child.stderr.take().map(drain);

    if let Some(bytes) = input {
        // stdin is dropped at the end of this block, closing the pipe
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(source) = stdin.write_all(bytes) {
                abandon(&mut child);
                return Err(ProcessError::Io { program, source });
            }
        }
    }

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    return Ok(());
                }
                return Err(ProcessError::Failed {
                    program,
                    code: status.code(),
                    stderr: stderr.map(collect_head).unwrap_or_default(),
                });
            }
            Ok(None) if Instant::now() >= deadline => {
                abandon(&mut child);
                return Err(ProcessError::Timeout {
                    program,
                    after: timeout,
                });
            }
            Ok(None) => thread::sleep(WAIT_POLL),
            Err(source) => {
                abandon(&mut child);
                return Err(ProcessError::Io { program, source });
            }
        }
    }
}

fn abandon(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Read stderr to the end on its own thread, keeping only the head
///
/// The thread is detached when the child is abandoned; it ends once every
/// holder of the pipe has exited.
fn drain(mut pipe: ChildStderr) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let keep = STDERR_LIMIT * 4;
        let mut head = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = keep.saturating_sub(head.len());
                    head.extend_from_slice(&buf[..n.min(room)]);
                }
            }
        }
        head
    })
}

fn collect_head(reader: JoinHandle<Vec<u8>>) -> String {
    let bytes = reader.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes)
        .trim()
        .chars()
        .take(STDERR_LIMIT)
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_success_with_stdin() {
        let result = run_with_timeout(
            sh("read line && test \"$line\" = hello"),
            Some(b"hello\n"),
            Duration::from_secs(5),
        );
        assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn test_non_zero_exit_reports_stderr() {
        let err = run_with_timeout(sh("echo broken >&2; exit 3"), None, Duration::from_secs(5))
            .unwrap_err();
        match err {
            ProcessError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_noisy_stderr_does_not_stall() {
        let started = Instant::now();
        let result = run_with_timeout(
            sh(r#"i=0; while [ $i -lt 4000 ]; do echo "warning: bad object $i in xref table" >&2; i=$((i+1)); done; exit 0"#),
            None,
            Duration::from_secs(10),
        );
        assert!(result.is_ok(), "{:?}", result);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_noisy_failure_keeps_stderr_head() {
        let err = run_with_timeout(
            sh("echo first >&2; head -c 200000 /dev/zero | tr '\\0' x >&2; exit 2"),
            None,
            Duration::from_secs(10),
        )
        .unwrap_err();
        match err {
            ProcessError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert!(stderr.starts_with("first"));
                assert_eq!(stderr.chars().count(), STDERR_LIMIT);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run_with_timeout(sh("sleep 5"), None, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program() {
        let err = run_with_timeout(
            Command::new("/nonexistent/definitely-not-here"),
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
