//! Asynchronous append-only JSONL writer.
//!
//! A bounded channel of operations feeds one background task per file. The
//! task owns the file handle and a 1 MiB buffered sink; callers only ever
//! touch the channel. Two send flavors implement the backpressure policy:
//! `write` awaits capacity (signals and paper trades, where record integrity
//! beats latency) and `try_write` drops on a full channel (metrics, which
//! are periodic and replaceable).

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

const SINK_BUFFER_BYTES: usize = 1 << 20;

enum Op {
    Write(serde_json::Value),
    Flush(oneshot::Sender<io::Result<()>>),
    Close(oneshot::Sender<io::Result<()>>),
}

pub struct JsonlWriter {
    path: PathBuf,
    tx: mpsc::Sender<Op>,
    task: tokio::task::JoinHandle<()>,
}

impl JsonlWriter {
    /// Open (append) the target file, creating parent directories, and spawn
    /// the writer task.
    pub async fn create(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let capacity = if buffer_size == 0 { 1_000 } else { buffer_size };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating output directory {}", parent.display()))?;
            }
        }

        let file = open_append(&path)
            .await
            .with_context(|| format!("opening output file {}", path.display()))?;

        let (tx, rx) = mpsc::channel(capacity);
        let task_path = path.clone();
        let task = tokio::spawn(async move {
            writer_loop(task_path, file, rx).await;
        });

        Ok(Self { path, tx, task })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enqueue one record, waiting for channel capacity if the writer is
    /// behind. Used for signals and paper trades.
    pub async fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).context("encoding record")?;
        self.tx
            .send(Op::Write(value))
            .await
            .map_err(|_| anyhow::anyhow!("writer task for {} is gone", self.path.display()))
    }

    /// Enqueue one record without waiting; on a full channel the record is
    /// dropped with a warning. Used for metrics snapshots.
    pub fn try_write<T: Serialize>(&self, value: &T) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                error!(error = %err, path = %self.path.display(), "failed to encode record");
                return false;
            }
        };
        match self.tx.try_send(Op::Write(value)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(path = %self.path.display(), "writer channel full, dropping record");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(path = %self.path.display(), "writer task gone, dropping record");
                false
            }
        }
    }

    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Op::Flush(done_tx))
            .await
            .map_err(|_| anyhow::anyhow!("writer task for {} is gone", self.path.display()))?;
        done_rx.await.context("writer task dropped flush ack")??;
        Ok(())
    }

    /// Flush and stop the writer task. Any write error that was swallowed on
    /// the hot path surfaces here.
    pub async fn close(self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Op::Close(done_tx)).await.is_err() {
            // Task already exited; nothing left to flush.
            let _ = self.task.await;
            return Ok(());
        }
        let result = done_rx.await.context("writer task dropped close ack")?;
        let _ = self.task.await;
        result.with_context(|| format!("closing {}", self.path.display()))
    }
}

async fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(BufWriter::with_capacity(SINK_BUFFER_BYTES, file))
}

async fn writer_loop(path: PathBuf, mut sink: BufWriter<File>, mut rx: mpsc::Receiver<Op>) {
    let mut last_err: Option<io::Error> = None;

    while let Some(op) = rx.recv().await {
        match op {
            Op::Write(value) => {
                let line = match serde_json::to_vec(&value) {
                    Ok(line) => line,
                    Err(err) => {
                        error!(error = %err, path = %path.display(), "failed to serialize record, skipping");
                        continue;
                    }
                };
                if let Err(err) = write_line(&mut sink, &line).await {
                    warn!(error = %err, path = %path.display(), "write failed, reopening file");
                    // One reopen attempt; a dead disk surfaces on close.
                    match open_append(&path).await {
                        Ok(reopened) => {
                            sink = reopened;
                            if let Err(err2) = write_line(&mut sink, &line).await {
                                error!(error = %err2, path = %path.display(), "write failed after reopen, dropping record");
                                last_err = Some(err2);
                            }
                        }
                        Err(err2) => {
                            error!(error = %err2, path = %path.display(), "reopen failed, dropping record");
                            last_err = Some(err2);
                        }
                    }
                }
            }
            Op::Flush(done) => {
                let _ = done.send(sink.flush().await);
            }
            Op::Close(done) => {
                let mut result = sink.flush().await;
                if result.is_ok() {
                    if let Some(err) = last_err.take() {
                        result = Err(err);
                    }
                }
                let _ = done.send(result);
                return;
            }
        }
    }

    // All senders dropped without an explicit close: best-effort flush.
    let _ = sink.flush().await;
}

async fn write_line(sink: &mut BufWriter<File>, line: &[u8]) -> io::Result<()> {
    sink.write_all(line).await?;
    sink.write_all(b"\n").await
}
