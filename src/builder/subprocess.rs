//! Progress-enriched subprocess driving.
//!
//! Each long-running command gets its stdout and stderr piped into line
//! readers feeding one channel, while a coordinator selects among process
//! exit, a 10 second ticker, and forwarded lines. cmake status lines
//! (`-- `, minus probe noise) and anything mentioning an error are surfaced
//! verbatim; the ticker keeps quiet phases visibly alive.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::consts;
use crate::errors::BuildError;
use crate::progress::{Progress, ProgressFn, emit};

/// Runs `command` to completion, emitting `phase`-tagged progress events.
///
/// The child is killed if the returned future is dropped. A non-zero exit
/// maps to [`BuildError::CommandFailed`] carrying the phase name.
pub async fn run_with_progress(
    mut command: Command,
    phase: &str,
    progress: Option<&ProgressFn>,
) -> Result<(), BuildError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| BuildError::Spawn {
        command: phase.to_string(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (tx, mut rx) = mpsc::channel::<String>(64);
    if let Some(stdout) = stdout {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut ticker = tokio::time::interval(consts::SUBPROCESS_TICK);
    ticker.tick().await; // the first tick fires immediately

    let mut lines_open = true;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            line = rx.recv(), if lines_open => {
                match line {
                    Some(line) => emit(
                        progress,
                        Progress::Message(format!(
                            "{phase}: {line} (elapsed: {}s)",
                            start.elapsed().as_secs()
                        )),
                    ),
                    None => lines_open = false,
                }
            }
            _ = ticker.tick() => {
                emit(
                    progress,
                    Progress::Message(format!(
                        "{phase} (elapsed: {}s)",
                        start.elapsed().as_secs()
                    )),
                );
            }
        }
    };

    // Let the readers drain to EOF; bounded in case a grandchild keeps the
    // pipe open after the direct child exited.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while let Some(line) = rx.recv().await {
            emit(
                progress,
                Progress::Message(format!(
                    "{phase}: {line} (elapsed: {}s)",
                    start.elapsed().as_secs()
                )),
            );
        }
    })
    .await;

    if !status.success() {
        return Err(BuildError::CommandFailed {
            command: phase.to_string(),
            code: status.code(),
        });
    }

    emit(
        progress,
        Progress::Message(format!(
            "{phase} (completed in {}s)",
            start.elapsed().as_secs()
        )),
    );
    Ok(())
}

/// Runs `command` silently and returns its trimmed stdout.
pub async fn run_capture(mut command: Command, phase: &str) -> Result<String, BuildError> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| BuildError::Spawn {
            command: phase.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(BuildError::CommandFailed {
            command: phase.to_string(),
            code: output.status.code(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn forward_lines(reader: impl AsyncRead + Unpin, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !should_forward(&line) {
            continue;
        }
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Which output lines are worth relaying: cmake status lines minus the
/// `Looking for`/`Performing Test` probe spam, plus anything that smells
/// like a failure.
fn should_forward(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.starts_with("-- ") {
        return !trimmed.starts_with("-- Looking for") && !trimmed.starts_with("-- Performing Test");
    }
    let lower = trimmed.to_lowercase();
    lower.contains("error") || lower.contains("failed")
}
