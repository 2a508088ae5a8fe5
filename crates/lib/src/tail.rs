//! Line source: follow a growing log file like `tail -F -n0`.
//!
//! Reading starts at the end of the file. The follower reopens the path when the
//! file is rotated (replaced by a new file) and rewinds when it is truncated.
//! Wake-ups come from a `notify` watcher on the parent directory, with a poll
//! interval as fallback for filesystems that do not deliver events.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BUFFER_LINES: usize = 256;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TailError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot seek to end of {}: {source}", path.display())]
    Seek {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Line source tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailConfig {
    /// Capacity of the line queue; the reader waits when it is full.
    pub buffer_lines: usize,
    /// Fallback re-check interval when no filesystem event arrives.
    pub poll_interval: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            buffer_lines: DEFAULT_BUFFER_LINES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Identity of the file behind a path, used to notice rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<FileId> {
    None
}

enum Flow {
    /// Reached end of available data; wait for growth.
    Idle,
    /// Cancelled or consumer gone.
    Stop,
}

/// An open follower positioned at the end of the file.
pub struct LineSource {
    path: PathBuf,
    reader: BufReader<File>,
    pos: u64,
    id: Option<FileId>,
    partial: Vec<u8>,
    config: TailConfig,
}

impl LineSource {
    /// Open `path` and seek to its end. Fails if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>, config: TailConfig) -> Result<Self, TailError> {
        let path = path.into();
        let (mut file, id) = open_with_id(&path).await?;
        let pos = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(|source| TailError::Seek {
                path: path.clone(),
                source,
            })?;
        log::debug!("tail: opened {} at offset {}", path.display(), pos);
        Ok(Self {
            path,
            reader: BufReader::new(file),
            pos,
            id,
            partial: Vec::new(),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the reader task. The returned receiver yields lines in file order and
    /// closes when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<String>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.buffer_lines.max(1));
        let handle = tokio::spawn(self.run(tx, cancel));
        (rx, handle)
    }

    async fn run(mut self, tx: mpsc::Sender<String>, cancel: CancellationToken) {
        let wake = Arc::new(Notify::new());
        let _watcher = match watch_parent(&self.path, wake.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!(
                    "tail: file events unavailable for {}, polling only: {}",
                    self.path.display(),
                    e
                );
                None
            }
        };
        loop {
            if let Flow::Stop = self.drain(&tx, &cancel).await {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            if let Flow::Stop = self.check_rotation(&tx, &cancel).await {
                break;
            }
        }
        log::debug!("tail: stopped following {}", self.path.display());
    }

    /// Read and forward every complete line currently available.
    async fn drain(&mut self, tx: &mpsc::Sender<String>, cancel: &CancellationToken) -> Flow {
        loop {
            let n = match self.reader.read_until(b'\n', &mut self.partial).await {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("tail read error on {}: {}", self.path.display(), e);
                    return Flow::Idle;
                }
            };
            self.pos += n as u64;
            if self.partial.last() != Some(&b'\n') {
                return Flow::Idle;
            }
            let Some(line) = take_line(&mut self.partial) else {
                log::warn!("tail: skipping non-UTF-8 line in {}", self.path.display());
                continue;
            };
            tokio::select! {
                _ = cancel.cancelled() => return Flow::Stop,
                res = tx.send(line) => {
                    if res.is_err() {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    /// Reopen on rotation, rewind on truncation.
    async fn check_rotation(
        &mut self,
        tx: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Flow {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            // Between rename and re-create; keep the old handle until the new file shows up.
            Err(_) => return Flow::Idle,
        };
        let current = file_id(&meta);
        if current.is_some() && current != self.id {
            // Lines written to the old file before the switch.
            if let Flow::Stop = self.drain(tx, cancel).await {
                return Flow::Stop;
            }
            match open_with_id(&self.path).await {
                Ok((file, id)) => {
                    log::info!("tail: {} was rotated, reopening", self.path.display());
                    self.reader = BufReader::new(file);
                    self.pos = 0;
                    self.id = id;
                    self.partial.clear();
                }
                Err(e) => log::warn!("tail: reopen failed: {}", e),
            }
            return Flow::Idle;
        }
        if meta.len() < self.pos {
            log::info!("tail: {} was truncated, rewinding", self.path.display());
            match self.reader.seek(SeekFrom::Start(0)).await {
                Ok(_) => {
                    self.pos = 0;
                    self.partial.clear();
                }
                Err(e) => log::warn!("tail: rewind failed: {}", e),
            }
        }
        Flow::Idle
    }
}

async fn open_with_id(path: &Path) -> Result<(File, Option<FileId>), TailError> {
    let open_err = |source: std::io::Error| TailError::Open {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(open_err)?;
    let meta = file.metadata().await.map_err(open_err)?;
    Ok((file, file_id(&meta)))
}

/// Split off a complete line (terminator stripped). `None` if not UTF-8.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let mut bytes = std::mem::take(buf);
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    String::from_utf8(bytes).ok()
}

fn watch_parent(path: &Path, wake: Arc<Notify>) -> Result<RecommendedWatcher, notify::Error> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            wake.notify_one();
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
