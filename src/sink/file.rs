//! Recording sink: one output stream per camera.
//!
//! Streams are created lazily from the first frame of each camera, so no
//! frame size has to be configured up front. The output path is
//! `{folder}{camera name}{suffix}`; the folder is created on demand.
//!
//! A frame whose size differs from the size its stream was created with is
//! rejected (error returned, nothing written); the stream keeps its size.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use super::writer::{FourCc, StreamSpec, StreamWriter, WriterFactory};
use super::{FrameSink, SinkFlow};
use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordingSettings {
    /// Prefix for output paths; normally ends with a path separator.
    pub folder: String,
    pub fps: f64,
    pub four_cc: FourCc,
    pub suffix: String,
}

struct Recording {
    writer: Box<dyn StreamWriter>,
    width: u32,
    height: u32,
    path: PathBuf,
    frames: u64,
}

pub struct RecordingSink {
    settings: RecordingSettings,
    factory: Box<dyn WriterFactory>,
    streams: HashMap<usize, Recording>,
}

impl RecordingSink {
    pub fn new(settings: RecordingSettings, factory: Box<dyn WriterFactory>) -> Self {
        Self {
            settings,
            factory,
            streams: HashMap::new(),
        }
    }

    /// Number of streams currently open.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// Size a camera's stream was created with, if it exists.
    pub fn stream_size(&self, source_id: usize) -> Option<(u32, u32)> {
        self.streams.get(&source_id).map(|r| (r.width, r.height))
    }

    pub fn output_path(&self, source_name: &str) -> PathBuf {
        let name: String = source_name
            .chars()
            .map(|c| if std::path::is_separator(c) { '_' } else { c })
            .collect();
        PathBuf::from(format!(
            "{}{}{}",
            self.settings.folder, name, self.settings.suffix
        ))
    }

    fn create_stream(&self, frame: &Frame) -> Result<Recording> {
        let path = self.output_path(&frame.source_name);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let spec = StreamSpec {
            width: frame.width,
            height: frame.height,
            fps: self.settings.fps,
            four_cc: self.settings.four_cc,
        };
        let writer = self.factory.create(&path, &spec)?;
        log::debug!(
            "video file {} created: size={}x{}, fps={}, four_cc={}",
            path.display(),
            spec.width,
            spec.height,
            spec.fps,
            spec.four_cc
        );
        Ok(Recording {
            writer,
            width: frame.width,
            height: frame.height,
            path,
            frames: 0,
        })
    }
}

impl FrameSink for RecordingSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn handle(&mut self, frame: &Frame) -> Result<SinkFlow> {
        if !self.streams.contains_key(&frame.source_id) {
            let recording = self.create_stream(frame)?;
            self.streams.insert(frame.source_id, recording);
        }
        let recording = self
            .streams
            .get_mut(&frame.source_id)
            .ok_or_else(|| anyhow!("no stream for source {}", frame.source_id))?;

        if frame.dimensions() != (recording.width, recording.height) {
            return Err(anyhow!(
                "{} is {}x{} but {} was created at {}x{}; frame rejected",
                frame,
                frame.width,
                frame.height,
                recording.path.display(),
                recording.width,
                recording.height
            ));
        }
        recording.writer.write(frame)?;
        recording.frames += 1;
        Ok(SinkFlow::Continue)
    }

    fn close(&mut self) -> Result<()> {
        for (_, mut recording) in self.streams.drain() {
            match recording.writer.finish() {
                Ok(()) => log::debug!(
                    "file {} closed after {} frames",
                    recording.path.display(),
                    recording.frames
                ),
                Err(e) => log::warn!("closing {} failed: {:#}", recording.path.display(), e),
            }
        }
        Ok(())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawImage;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Counts creations, writes and finishes without touching the disk.
    #[derive(Clone, Default)]
    struct CountingFactory {
        created: Arc<Mutex<Vec<(PathBuf, StreamSpec)>>>,
        writes: Arc<AtomicUsize>,
        finishes: Arc<AtomicUsize>,
    }

    struct CountingWriter {
        writes: Arc<AtomicUsize>,
        finishes: Arc<AtomicUsize>,
        finished: bool,
    }

    impl StreamWriter for CountingWriter {
        fn write(&mut self, _frame: &Frame) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            if !self.finished {
                self.finished = true;
                self.finishes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    impl WriterFactory for CountingFactory {
        fn create(&self, path: &Path, spec: &StreamSpec) -> Result<Box<dyn StreamWriter>> {
            self.created
                .lock()
                .unwrap()
                .push((path.to_path_buf(), spec.clone()));
            Ok(Box::new(CountingWriter {
                writes: Arc::clone(&self.writes),
                finishes: Arc::clone(&self.finishes),
                finished: false,
            }))
        }
    }

    fn settings(folder: &str) -> RecordingSettings {
        RecordingSettings {
            folder: folder.to_string(),
            fps: 3.0,
            four_cc: FourCc::MJPG,
            suffix: ".mjpg".to_string(),
        }
    }

    fn make_frame(source_id: usize, name: &str, width: u32, height: u32) -> Frame {
        let image = RawImage {
            data: vec![0; (width * height * 3) as usize],
            width,
            height,
        };
        Frame::with_timestamp(source_id, name, "t", image)
    }

    #[test]
    fn one_stream_per_source_created_on_first_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = format!("{}/videos/", dir.path().display());
        let factory = CountingFactory::default();
        let mut sink = RecordingSink::new(settings(&folder), Box::new(factory.clone()));

        sink.handle(&make_frame(0, "Lobby", 4, 2))?;
        sink.handle(&make_frame(0, "Lobby", 4, 2))?;
        sink.handle(&make_frame(1, "Dock", 8, 6))?;

        let created = factory.created.lock().unwrap().clone();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].0, PathBuf::from(format!("{folder}Lobby.mjpg")));
        assert_eq!((created[0].1.width, created[0].1.height), (4, 2));
        assert_eq!((created[1].1.width, created[1].1.height), (8, 6));
        assert_eq!(factory.writes.load(Ordering::SeqCst), 3);
        assert_eq!(sink.stream_size(1), Some((8, 6)));
        assert!(dir.path().join("videos").is_dir());
        Ok(())
    }

    #[test]
    fn mismatched_dimensions_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = format!("{}/", dir.path().display());
        let factory = CountingFactory::default();
        let mut sink = RecordingSink::new(settings(&folder), Box::new(factory.clone()));

        sink.handle(&make_frame(0, "Lobby", 4, 2))?;
        let err = sink.handle(&make_frame(0, "Lobby", 8, 6)).unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(factory.writes.load(Ordering::SeqCst), 1);
        assert_eq!(sink.stream_size(0), Some((4, 2)));
        Ok(())
    }

    #[test]
    fn close_finishes_each_stream_exactly_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = format!("{}/", dir.path().display());
        let factory = CountingFactory::default();
        let mut sink = RecordingSink::new(settings(&folder), Box::new(factory.clone()));

        sink.handle(&make_frame(0, "Lobby", 4, 2))?;
        sink.handle(&make_frame(1, "Dock", 4, 2))?;
        sink.close()?;
        sink.close()?;
        drop(sink);

        assert_eq!(factory.finishes.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn separators_in_names_do_not_escape_the_folder() {
        let sink = RecordingSink::new(settings("videos/"), Box::new(CountingFactory::default()));
        assert_eq!(
            sink.output_path("gate/north"),
            PathBuf::from("videos/gate_north.mjpg")
        );
    }
}
