use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cam_relay::{
    open_handles, parse_registry, CaptureSettings, DefaultWriterFactory, FourCc, Frame,
    FrameSink, FrameSource, Pipeline, PipelineSettings, PreviewDisplay, PushError, RawImage,
    RecordingSettings, RecordingSink, SinkFlow, SourceError, SourceHandle, SourceInfo,
    StatusMonitor,
};

const REGISTRY: &str = "\
active,name,descriptor
+,Lobby,stub://lobby?width=8&height=6&fps=100
-,Attic,stub://attic
+,Dock,stub://dock?width=4&height=4&fps=100
";

fn settings(queue_capacity: usize) -> PipelineSettings {
    PipelineSettings {
        queue_capacity,
        capture: CaptureSettings {
            read_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(10),
            full_backoff: Duration::from_millis(2),
            report_every: 10,
        },
        dispatch_poll: Duration::from_millis(5),
        shutdown_poll: Duration::from_millis(10),
    }
}

fn sources(registry: &str) -> Vec<SourceHandle> {
    let infos = parse_registry(registry.as_bytes()).unwrap();
    open_handles(&infos).unwrap()
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Records `(source_id, first pixel)` of every frame, optionally slowly.
#[derive(Clone, Default)]
struct Collecting {
    seen: Arc<Mutex<Vec<(usize, u8)>>>,
    delay: Duration,
}

impl Collecting {
    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl FrameSink for Collecting {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn handle(&mut self, frame: &Frame) -> Result<SinkFlow> {
        thread::sleep(self.delay);
        self.seen
            .lock()
            .unwrap()
            .push((frame.source_id, frame.image()[0]));
        Ok(SinkFlow::Continue)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Failing;

impl FrameSink for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn handle(&mut self, _frame: &Frame) -> Result<SinkFlow> {
        Err(anyhow!("device unplugged"))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A camera that never comes up.
struct Unreachable {
    opens: Arc<AtomicUsize>,
}

impl FrameSource for Unreachable {
    fn open(&mut self) -> Result<(), SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(SourceError::Open {
            descriptor: "rtsp://10.0.0.9/stream".into(),
            reason: "connection refused".into(),
        })
    }

    fn read_frame(&mut self, _timeout: Duration) -> Result<RawImage, SourceError> {
        Err(SourceError::NotOpen)
    }

    fn close(&mut self) {}
}

#[test]
fn two_cameras_are_recorded_to_separate_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = format!("{}/videos/", dir.path().display());
    let recording = RecordingSink::new(
        RecordingSettings {
            folder: folder.clone(),
            fps: 3.0,
            four_cc: FourCc::RGB3,
            suffix: ".rgb".into(),
        },
        Box::new(DefaultWriterFactory),
    );
    let probe = Collecting::default();
    let mut pipeline = Pipeline::start(
        sources(REGISTRY),
        vec![Box::new(probe.clone()), Box::new(recording)],
        Arc::new(StatusMonitor::disabled()),
        settings(2),
    )?;

    assert!(wait_until(Duration::from_secs(5), || {
        let seen = probe.seen.lock().unwrap();
        seen.iter().any(|(id, _)| *id == 0) && seen.iter().any(|(id, _)| *id == 1)
    }));
    let report = pipeline.stop().expect("first stop reports");

    assert!(report.queue_peak <= 2);
    assert!(report.per_source[&0] > 0);
    assert!(report.per_source[&1] > 0);
    assert_eq!(report.captures.len(), 2);
    assert_eq!(report.captures[1].source_name, "Dock");

    let lobby = std::fs::metadata(format!("{folder}Lobby.rgb"))?.len();
    let dock = std::fs::metadata(format!("{folder}Dock.rgb"))?.len();
    assert_eq!(lobby, report.per_source[&0] * 8 * 6 * 3);
    assert_eq!(dock, report.per_source[&1] * 4 * 4 * 3);
    Ok(())
}

#[test]
fn frames_of_one_camera_keep_capture_order() -> Result<()> {
    let registry = "\
active,name,descriptor
+,Lobby,stub://lobby?width=2&height=2&fps=50
+,Dock,stub://dock?width=2&height=2&fps=50
";
    let probe = Collecting::default();
    let mut pipeline = Pipeline::start(
        sources(registry),
        vec![Box::new(probe.clone())],
        Arc::new(StatusMonitor::disabled()),
        settings(8),
    )?;
    assert!(wait_until(Duration::from_secs(5), || probe.count() >= 40));
    pipeline.stop();

    let mut per_source: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
    for (id, seq) in probe.seen.lock().unwrap().iter() {
        per_source.entry(*id).or_default().push(*seq);
    }
    assert_eq!(per_source.len(), 2);
    for (id, seqs) in per_source {
        assert!(
            seqs.windows(2).all(|w| w[0] < w[1]),
            "source {id} out of order: {seqs:?}"
        );
    }
    Ok(())
}

#[test]
fn slow_sink_with_single_slot_queue_throttles_capture() -> Result<()> {
    let registry = "\
active,name,descriptor
+,Lobby,stub://lobby?width=2&height=2&fps=0
+,Dock,stub://dock?width=2&height=2&fps=0
";
    let probe = Collecting {
        delay: Duration::from_millis(20),
        ..Collecting::default()
    };
    let mut pipeline = Pipeline::start(
        sources(registry),
        vec![Box::new(probe.clone())],
        Arc::new(StatusMonitor::disabled()),
        settings(1),
    )?;
    assert!(wait_until(Duration::from_secs(5), || probe.count() >= 10));
    let report = pipeline.stop().expect("report");

    assert_eq!(report.queue_peak, 1);
    let skipped: u64 = report.captures.iter().map(|c| c.reads_skipped).sum();
    assert!(skipped > 0, "workers must skip reads while the queue is full");
    assert_eq!(report.frames_dispatched as usize, probe.count());
    Ok(())
}

#[test]
fn failing_sink_does_not_starve_the_next_one() -> Result<()> {
    let probe = Collecting::default();
    let mut pipeline = Pipeline::start(
        sources(REGISTRY),
        vec![Box::new(Failing), Box::new(probe.clone())],
        Arc::new(StatusMonitor::disabled()),
        settings(4),
    )?;
    assert!(wait_until(Duration::from_secs(5), || probe.count() >= 10));
    let report = pipeline.stop().expect("report");

    assert_eq!(report.frames_dispatched as usize, probe.count());
    assert_eq!(report.sink_failures.get("failing"), Some(&report.frames_dispatched));
    Ok(())
}

#[test]
fn unreachable_camera_does_not_block_the_others_or_shutdown() -> Result<()> {
    let opens = Arc::new(AtomicUsize::new(0));
    let mut handles = sources(REGISTRY);
    handles.push(SourceHandle::new(
        SourceInfo {
            id: 2,
            name: "Gate".into(),
            descriptor: "rtsp://10.0.0.9/stream".into(),
        },
        Box::new(Unreachable {
            opens: Arc::clone(&opens),
        }),
    ));
    let mut settings = settings(4);
    settings.capture.reconnect_delay = Duration::from_secs(30);

    let probe = Collecting::default();
    let mut pipeline = Pipeline::start(
        handles,
        vec![Box::new(probe.clone())],
        Arc::new(StatusMonitor::disabled()),
        settings,
    )?;
    assert!(wait_until(Duration::from_secs(5), || {
        probe.count() >= 10 && opens.load(Ordering::SeqCst) >= 1
    }));

    // The 30 s reconnect delay is cut short by the stop token.
    let started = Instant::now();
    let report = pipeline.stop().expect("report");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!report.per_source.contains_key(&2));
    assert_eq!(report.captures[2].frames_captured, 0);
    Ok(())
}

#[test]
fn flaky_camera_keeps_delivering() -> Result<()> {
    let registry = "\
active,name,descriptor
+,Yard,stub://yard?width=2&height=2&fps=0&drop=0.3
";
    let probe = Collecting::default();
    let mut settings = settings(4);
    settings.capture.reconnect_delay = Duration::from_millis(1);
    let mut pipeline = Pipeline::start(
        sources(registry),
        vec![Box::new(probe.clone())],
        Arc::new(StatusMonitor::disabled()),
        settings,
    )?;
    assert!(wait_until(Duration::from_secs(5), || probe.count() >= 30));
    let report = pipeline.stop().expect("report");

    assert!(report.captures[0].read_failures > 0);
    assert!(report.frames_dispatched >= 30);
    Ok(())
}

#[test]
fn display_quit_key_stops_the_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let quit = Arc::new(AtomicBool::new(false));
    let display = PreviewDisplay::new(dir.path().join("preview"), Arc::clone(&quit));
    let mut pipeline = Pipeline::start(
        sources(REGISTRY),
        vec![Box::new(display)],
        Arc::new(StatusMonitor::disabled()),
        settings(2),
    )?;
    let lobby = dir.path().join("preview").join("Lobby.jpg");
    assert!(wait_until(Duration::from_secs(5), || lobby.is_file()));

    quit.store(true, Ordering::SeqCst);
    let stop = pipeline.stop_token();
    assert!(wait_until(Duration::from_secs(5), || stop.is_stopped()));
    pipeline.wait();

    pipeline.stop().expect("report");
    assert!(!lobby.exists(), "display release removes snapshots");
    Ok(())
}

#[test]
fn stop_is_idempotent_and_closes_the_queue() -> Result<()> {
    let mut pipeline = Pipeline::start(
        sources(REGISTRY),
        Vec::new(),
        Arc::new(StatusMonitor::disabled()),
        settings(2),
    )?;
    let queue = Arc::clone(pipeline.queue());
    assert!(wait_until(Duration::from_secs(5), || queue.peak_len() > 0));

    assert!(pipeline.stop().is_some());
    assert!(pipeline.stop().is_none());
    assert!(queue.is_closed());

    let image = RawImage::rgb(vec![0; 3], 1, 1)?;
    let late = Frame::new(0, "Lobby", image);
    assert!(matches!(queue.try_push(late), Err(PushError::Closed(_))));
    Ok(())
}
