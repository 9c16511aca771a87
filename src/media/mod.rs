// Local media boundary
// Capture itself is a platform concern; the engine only needs tracks it can attach and stop

pub mod attachment;

pub use attachment::ImageAttachment;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::MediaConfig;
use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to one capture track
///
/// Clones share the same track: a peer connection holding a clone sees the
/// track end as soon as any holder stops it.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub kind: TrackKind,
    pub id: String,
    live: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id && self.is_live() == other.is_live()
    }
}

impl Eq for LocalTrack {}

/// Tracks handed out by a media source for the lifetime of the session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    pub fn live_tracks(&self) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(|t| t.is_live())
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|t| !t.is_live())
    }

    /// End every track; the device is released once all are stopped
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Supplies local capture
pub trait MediaSource: Send + Sync {
    fn acquire(&self) -> Result<LocalMedia, MediaError>;
}

/// Media source that hands out track descriptors for the configured kinds
pub struct StaticMediaSource {
    audio: bool,
    video: bool,
}

impl StaticMediaSource {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            audio: config.audio,
            video: config.video,
        }
    }
}

impl MediaSource for StaticMediaSource {
    fn acquire(&self) -> Result<LocalMedia, MediaError> {
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, "local-audio"));
        }
        if self.video {
            tracks.push(LocalTrack::new(TrackKind::Video, "local-video"));
        }

        if tracks.is_empty() {
            return Err(MediaError::Unavailable("no capture devices enabled".to_string()));
        }

        Ok(LocalMedia {
            stream_id: "local".to_string(),
            tracks,
        })
    }
}
