//! Media sources for a publishing session.
//!
//! `LocalMediaTransport` pumps frames from a source in the background:
//! files are read in fixed-size chunks at the configured frame interval and
//! rewound at end of file; webcams are captured through `nokhwa` on a
//! blocking thread (cargo feature `webcam`). Frames are counted, not encoded
//! or packetized.
//!
//! `start` only succeeds once the first frame has been read. A pump that
//! dies later records the reason in its `StreamStats`, which the owning
//! session reports as a stopped stream.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{NetError, NetResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Webcam(u32),
    File(PathBuf),
}

#[derive(Debug, Default)]
pub struct StreamStats {
    frames: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl StreamStats {
    pub fn record(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Mark the pump as dead. The first reason wins.
    pub fn fail(&self, reason: String) {
        self.failure.lock().get_or_insert(reason);
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }
}

/// A running stream. Dropping it cancels the pump.
pub struct StreamHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Arc<StreamStats>,
}

impl StreamHandle {
    pub fn new(cancel: CancellationToken, task: Option<JoinHandle<()>>, stats: Arc<StreamStats>) -> Self {
        Self { cancel, task, stats }
    }

    /// Handle with no pump behind it.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), None, Arc::default())
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    /// Cancel the pump and wait for it to exit. Stats stay readable.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn start(&self, source: &MediaSource) -> NetResult<StreamHandle>;
}

#[derive(Debug, Clone)]
pub struct LocalMediaTransport {
    frame_interval: Duration,
    chunk_bytes: usize,
}

impl LocalMediaTransport {
    pub fn new(frame_interval: Duration, chunk_bytes: usize) -> Self {
        Self { frame_interval, chunk_bytes }
    }

    async fn start_file(&self, path: &Path) -> NetResult<StreamHandle> {
        let mut file = open_file(path).await?;
        let mut frame = vec![0u8; self.chunk_bytes];
        match file.read(&mut frame).await {
            Ok(n) if n > 0 => {}
            Ok(_) => return Err(NetError::stream(format!("{} is empty", path.display()))),
            Err(e) => return Err(NetError::stream(format!("{}: {e}", path.display()))),
        }
        let cancel = CancellationToken::new();
        let stats = Arc::new(StreamStats::default());
        stats.record();
        let task = tokio::spawn(pump_file(
            file,
            frame,
            self.frame_interval,
            cancel.clone(),
            Arc::clone(&stats),
        ));
        Ok(StreamHandle::new(cancel, Some(task), stats))
    }

    #[cfg(feature = "webcam")]
    async fn start_camera(&self, index: u32) -> NetResult<StreamHandle> {
        let cancel = CancellationToken::new();
        let stats = Arc::new(StreamStats::default());
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            let stats = Arc::clone(&stats);
            move || camera::capture(index, ready_tx, cancel, stats)
        });
        match ready_rx.await {
            Ok(Ok(())) => Ok(StreamHandle::new(cancel, Some(task), stats)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NetError::stream(format!("camera {index}: capture thread exited"))),
        }
    }

    #[cfg(not(feature = "webcam"))]
    async fn start_camera(&self, index: u32) -> NetResult<StreamHandle> {
        Err(NetError::stream(format!(
            "camera {index} unavailable: built without the `webcam` feature"
        )))
    }
}

#[async_trait]
impl MediaTransport for LocalMediaTransport {
    async fn start(&self, source: &MediaSource) -> NetResult<StreamHandle> {
        let handle = match source {
            MediaSource::File(path) => self.start_file(path).await?,
            MediaSource::Webcam(index) => self.start_camera(*index).await?,
        };
        debug!(?source, "media stream started");
        Ok(handle)
    }
}

async fn open_file(path: &Path) -> NetResult<File> {
    let file = File::open(path)
        .await
        .map_err(|e| NetError::stream(format!("{}: {e}", path.display())))?;
    let meta = file
        .metadata()
        .await
        .map_err(|e| NetError::stream(format!("{}: {e}", path.display())))?;
    if !meta.is_file() {
        return Err(NetError::stream(format!("{} is not a regular file", path.display())));
    }
    if meta.len() == 0 {
        return Err(NetError::stream(format!("{} is empty", path.display())));
    }
    Ok(file)
}

async fn pump_file(
    mut file: File,
    mut frame: Vec<u8>,
    interval: Duration,
    cancel: CancellationToken,
    stats: Arc<StreamStats>,
) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately and the first frame is already read
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match file.read(&mut frame).await {
            Ok(0) => {
                if let Err(e) = file.rewind().await {
                    warn!("media rewind failed: {e}");
                    stats.fail(format!("rewind failed: {e}"));
                    break;
                }
            }
            Ok(_) => stats.record(),
            Err(e) => {
                warn!("media read failed: {e}");
                stats.fail(format!("read failed: {e}"));
                break;
            }
        }
    }
    debug!(frames = stats.frames(), "media pump stopped");
}

#[cfg(feature = "webcam")]
mod camera {
    use std::sync::Arc;

    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::{Camera, NokhwaError};
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    use super::StreamStats;
    use crate::error::{NetError, NetResult};

    fn open(index: u32) -> Result<Camera, NokhwaError> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)?;
        camera.open_stream()?;
        camera.frame()?;
        Ok(camera)
    }

    /// Runs on a blocking thread until `cancel` fires or a frame fails.
    pub(super) fn capture(
        index: u32,
        ready: oneshot::Sender<NetResult<()>>,
        cancel: CancellationToken,
        stats: Arc<StreamStats>,
    ) {
        let mut camera = match open(index) {
            Ok(camera) => camera,
            Err(e) => {
                let _ = ready.send(Err(NetError::stream(format!("camera {index} unavailable: {e}"))));
                return;
            }
        };
        info!(index, format = ?camera.camera_format(), "camera opened");
        stats.record();
        if ready.send(Ok(())).is_err() {
            return;
        }
        while !cancel.is_cancelled() {
            match camera.frame() {
                Ok(_) => stats.record(),
                Err(e) => {
                    warn!(index, "camera capture failed: {e}");
                    stats.fail(format!("camera {index}: {e}"));
                    break;
                }
            }
        }
        if let Err(e) = camera.stop_stream() {
            debug!(index, "camera stop failed: {e}");
        }
    }
}
