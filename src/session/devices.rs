//! Device access seams: permissions and the camera

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::{Error, Result};

/// A device that needs the user's consent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Microphone,
    Camera,
}

impl DeviceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Camera => "camera",
        }
    }
}

/// Grants or denies device access
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Ask for access; `false` means denied
    async fn request(&self, device: DeviceKind) -> bool;
}

/// Grants everything; desktop audio stacks ask at the OS level
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedPermissions;

#[async_trait]
impl PermissionProvider for GrantedPermissions {
    async fn request(&self, _device: DeviceKind) -> bool {
        true
    }
}

/// A camera frame, already JPEG-compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub jpeg: Vec<u8>,
}

/// Source of camera frames
///
/// `latest_frame` must return immediately; the sampler never waits on the
/// camera.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Whether opening needs camera permission
    fn needs_permission(&self) -> bool {
        true
    }

    /// Start producing frames
    ///
    /// # Errors
    ///
    /// Returns error if the camera cannot be opened
    async fn open(&self) -> Result<()>;

    /// Most recent frame, if one is ready
    fn latest_frame(&self) -> Option<VideoFrame>;

    /// Stop producing frames
    async fn close(&self);
}

/// No camera attached; sessions run audio-only
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCamera;

#[async_trait]
impl FrameSource for NoCamera {
    fn needs_permission(&self) -> bool {
        false
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        None
    }

    async fn close(&self) {}
}

/// Replays JPEG files from disk as camera frames
///
/// `path` may be a single `.jpg` file or a directory of them; directory
/// frames are cycled in name order.
#[derive(Debug)]
pub struct FileFrameSource {
    path: PathBuf,
    frames: Mutex<Vec<VideoFrame>>,
    cursor: AtomicUsize,
}

impl FileFrameSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    async fn load(path: &Path) -> Result<Vec<VideoFrame>> {
        let meta = tokio::fs::metadata(path).await?;
        let mut files = Vec::new();
        if meta.is_dir() {
            let mut dir = tokio::fs::read_dir(path).await?;
            while let Some(entry) = dir.next_entry().await? {
                let p = entry.path();
                let is_jpeg = p
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
                if is_jpeg {
                    files.push(p);
                }
            }
            files.sort();
        } else {
            files.push(path.to_path_buf());
        }

        let mut frames = Vec::with_capacity(files.len());
        for file in files {
            frames.push(VideoFrame {
                jpeg: tokio::fs::read(&file).await?,
            });
        }
        Ok(frames)
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    fn needs_permission(&self) -> bool {
        false
    }

    async fn open(&self) -> Result<()> {
        let frames = Self::load(&self.path).await?;
        if frames.is_empty() {
            return Err(Error::Config(format!(
                "no JPEG frames in {}",
                self.path.display()
            )));
        }
        tracing::info!(path = %self.path.display(), frames = frames.len(), "camera file opened");
        if let Ok(mut guard) = self.frames.lock() {
            *guard = frames;
        }
        self.cursor.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        let frames = self.frames.try_lock().ok()?;
        if frames.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % frames.len();
        frames.get(index).cloned()
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.frames.lock() {
            guard.clear();
        }
    }
}
