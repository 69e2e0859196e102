//! Child-process driving for CLI-backed workers.
//!
//! External tools report progress on stdout/stderr; their lines become the
//! worker's status strings. Cancellation kills the child and terminates the
//! sequence with `Error::Cancelled`.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

fn spawn_line_reader(
    reader: impl AsyncRead + Unpin + Send + 'static,
    tx: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

/// Run `cmd`, forwarding each non-empty output line as a status prefixed
/// with `label`.
///
/// A missing binary is a permanent error (retries cannot install it); a
/// non-zero exit is retryable and carries the last error-looking line for
/// diagnostics.
pub async fn stream_command(
    mut cmd: Command,
    label: &str,
    status_tx: &mpsc::Sender<Result<String>>,
    cancel: &CancellationToken,
) -> Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::missing_input(format!("{label} binary not found: {e}"))
        } else {
            Error::worker(format!("Failed to spawn {label}: {e}"))
        }
    })?;

    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, line_tx.clone());
    }
    drop(line_tx);

    let mut last_error_line: Option<String> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(Error::Cancelled);
            }
            line = line_rx.recv() => match line {
                Some(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!("{label}: {trimmed}");
                    if trimmed.to_ascii_lowercase().contains("error") {
                        last_error_line = Some(trimmed.to_string());
                    }
                    let _ = status_tx.send(Ok(format!("{label}: {trimmed}"))).await;
                }
                // Both pipes reached EOF; the child is exiting.
                None => break,
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::worker(format!("Failed to wait for {label}: {e}")))?;

    if !status.success() {
        let detail = last_error_line.unwrap_or_else(|| "no error output".to_string());
        return Err(Error::worker(format!(
            "{label} exited with code {}: {detail}",
            status.code().unwrap_or(-1)
        )));
    }

    Ok(())
}
