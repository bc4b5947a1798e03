use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Sender, TrySendError};
use image::RgbaImage;
use tracing::{debug, info, warn};

/// Frames queued for the writer before new ones are dropped.
const QUEUE_DEPTH: usize = 8;

/// Suffixes tried when a session directory name is already taken.
const MAX_DIR_ATTEMPTS: u32 = 1000;

/// Writes composited frames as a numbered PNG sequence, one directory per
/// recording session.
///
/// PNG encoding and disk writes happen on a worker thread. Producing a frame
/// is not free: the caller reads the output back from the GPU synchronously,
/// which lowers the preview frame rate while a session is active. Callers
/// gate that readback on [`Recorder::wants_frame`], so a slow disk drops
/// frames instead of adding readbacks whose results would be discarded.
pub struct Recorder {
    root: PathBuf,
    session: Option<Session>,
}

struct Session {
    dir: PathBuf,
    sender: Sender<(u64, RgbaImage)>,
    worker: JoinHandle<u64>,
    next_frame: u64,
    dropped: u64,
}

impl Recorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            session: None,
        }
    }

    /// Whether a frame submitted now would be queued. Callers check this
    /// before an expensive capture so a backed-up writer skips the readback.
    pub fn wants_frame(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.sender.is_full())
    }

    /// Starts a new session or finishes the current one. Returns whether a
    /// session is active afterwards.
    pub fn toggle(&mut self) -> Result<bool> {
        match self.session.take() {
            Some(session) => {
                session.finish()?;
                Ok(false)
            }
            None => {
                self.session = Some(Session::start(&self.root)?);
                Ok(true)
            }
        }
    }

    /// Queues `frame` when recording; otherwise does nothing.
    pub fn submit(&mut self, frame: RgbaImage) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.sender.try_send((session.next_frame, frame)) {
            Ok(()) => session.next_frame += 1,
            Err(TrySendError::Full(_)) => {
                session.dropped += 1;
                debug!(dropped = session.dropped, "recorder queue full; dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(dir = %session.dir.display(), "recorder writer exited; stopping recording");
                if let Some(session) = self.session.take() {
                    let _ = session.finish();
                }
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.finish() {
                warn!(error = %err, "failed to finish recording");
            }
        }
    }
}

impl Session {
    fn start(root: &Path) -> Result<Self> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let dir = create_session_dir(root, stamp)?;

        let (sender, receiver) = bounded::<(u64, RgbaImage)>(QUEUE_DEPTH);
        let worker_dir = dir.clone();
        let worker = thread::Builder::new()
            .name("frame-recorder".into())
            .spawn(move || {
                let mut written = 0;
                for (index, frame) in receiver {
                    let path = worker_dir.join(format!("frame-{index:05}.png"));
                    match frame.save(&path) {
                        Ok(()) => written += 1,
                        Err(err) => warn!(path = %path.display(), error = %err, "failed to write frame"),
                    }
                }
                written
            })
            .context("failed to start recorder thread")?;

        info!(dir = %dir.display(), "recording started");
        Ok(Self {
            dir,
            sender,
            worker,
            next_frame: 0,
            dropped: 0,
        })
    }

    fn finish(self) -> Result<()> {
        let Session {
            dir,
            sender,
            worker,
            dropped,
            ..
        } = self;
        drop(sender);
        let written = worker
            .join()
            .map_err(|_| anyhow!("recorder thread panicked"))?;
        info!(dir = %dir.display(), written, dropped, "recording stopped");
        Ok(())
    }
}

/// Creates a fresh `session-<stamp>` directory under `root`, appending a
/// counter when a session with the same stamp already exists.
fn create_session_dir(root: &Path, stamp: u128) -> Result<PathBuf> {
    fs::create_dir_all(root)
        .with_context(|| format!("failed to create recording root {}", root.display()))?;
    for attempt in 0..MAX_DIR_ATTEMPTS {
        let name = match attempt {
            0 => format!("session-{stamp}"),
            n => format!("session-{stamp}-{n}"),
        };
        let dir = root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to create recording directory {}", dir.display())
                })
            }
        }
    }
    bail!("no free recording directory for session {stamp} under {}", root.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_numbered_frames_per_session() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path());

        recorder.submit(RgbaImage::new(4, 4));
        assert!(!recorder.wants_frame());

        assert!(recorder.toggle().unwrap());
        for _ in 0..3 {
            recorder.submit(RgbaImage::new(4, 4));
        }
        assert!(!recorder.toggle().unwrap());

        let sessions: Vec<_> = fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(sessions.len(), 1);
        let session = sessions[0].as_ref().unwrap().path();
        for index in 0..3 {
            assert!(session.join(format!("frame-{index:05}.png")).exists());
        }
        assert!(!session.join("frame-00003.png").exists());
    }

    #[test]
    fn wants_frames_only_while_recording() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path());
        assert!(!recorder.wants_frame());

        assert!(recorder.toggle().unwrap());
        assert!(recorder.wants_frame());

        assert!(!recorder.toggle().unwrap());
        assert!(!recorder.wants_frame());
    }

    #[test]
    fn sessions_with_the_same_stamp_get_separate_directories() {
        let root = tempfile::tempdir().unwrap();
        let first = create_session_dir(root.path(), 42).unwrap();
        let second = create_session_dir(root.path(), 42).unwrap();
        let third = create_session_dir(root.path(), 42).unwrap();

        assert_eq!(first, root.path().join("session-42"));
        assert_eq!(second, root.path().join("session-42-1"));
        assert_eq!(third, root.path().join("session-42-2"));
    }

    #[test]
    fn back_to_back_sessions_do_not_overwrite_each_other() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(root.path());
        for _ in 0..2 {
            assert!(recorder.toggle().unwrap());
            recorder.submit(RgbaImage::new(2, 2));
            assert!(!recorder.toggle().unwrap());
        }

        let sessions: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(sessions.len(), 2);
        for session in sessions {
            assert!(session.join("frame-00000.png").exists());
        }
    }
}
