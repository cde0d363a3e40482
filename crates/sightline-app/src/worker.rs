//! Scan worker: one background recognition loop plus one foreground
//! display tick, both pulling from the same shared camera.
//!
//! Every recognition task (face, object, text) is the same scaffold
//! parameterized by a `detect(frame) -> Option<R>` step. Results travel
//! to the single foreground consumer over a bounded channel; the worker
//! threads never touch UI-visible state themselves.

use sightline_hw::{RgbFrame, SharedCamera};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Lifecycle of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Accepted,
    TimedOut,
    Cancelled,
}

const STATE_SCANNING: u8 = 1;
const STATE_ACCEPTED: u8 = 2;
const STATE_TIMED_OUT: u8 = 3;
const STATE_CANCELLED: u8 = 4;

fn decode_state(raw: u8) -> ScanState {
    match raw {
        STATE_SCANNING => ScanState::Scanning,
        STATE_ACCEPTED => ScanState::Accepted,
        STATE_TIMED_OUT => ScanState::TimedOut,
        STATE_CANCELLED => ScanState::Cancelled,
        _ => ScanState::Idle,
    }
}

/// Events delivered to the foreground consumer.
pub enum ScanEvent<R> {
    /// Display frame (already vertically flipped).
    Frame(RgbFrame),
    /// Qualifying recognition result; the scan has stopped.
    Accepted(R),
    /// The scan gave up after the configured timeout; sent exactly once.
    TimedOut,
}

/// Consumer of display frames. The foreground loop is the only place
/// these land, preserving the single-writer-to-UI discipline.
pub trait DisplaySink {
    fn publish(&mut self, frame: RgbFrame);
}

/// Sink that only counts frames, for headless runs and tests.
#[derive(Default)]
pub struct CountingSink {
    pub frames: u64,
}

impl DisplaySink for CountingSink {
    fn publish(&mut self, frame: RgbFrame) {
        self.frames += 1;
        if self.frames % 128 == 0 {
            tracing::debug!(frames = self.frames, width = frame.width, "display feed running");
        }
    }
}

pub struct ScanOptions {
    /// Wall-clock limit for the whole scan; `None` scans until a result
    /// or cancellation.
    pub timeout: Option<Duration>,
    /// Pause between recognition iterations (the text task paces at one
    /// second; face and object run as fast as frames arrive).
    pub pace: Duration,
    /// Foreground display tick rate.
    pub display_fps: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            pace: Duration::ZERO,
            display_fps: 30,
        }
    }
}

/// Handle to a running scan.
pub struct ScanHandle {
    cancel: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    camera: SharedCamera,
    threads: Vec<JoinHandle<()>>,
}

impl ScanHandle {
    pub fn state(&self) -> ScanState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    /// Cancel the scan (screen-leave semantics): stop both loops, wait
    /// for them, release the camera. Cancellation is cooperative — an
    /// in-flight recognition call finishes before the loop notices —
    /// and no result is delivered afterwards. Safe to call after the
    /// scan already accepted or timed out.
    pub fn cancel(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        // only a scan still in flight transitions to Cancelled
        let _ = self.state.compare_exchange(
            STATE_SCANNING,
            STATE_CANCELLED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.camera.release();
    }

    /// Wait for both loops to finish without forcing cancellation, then
    /// release the camera. Used after an `Accepted`/`TimedOut` event.
    pub fn finish(mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.camera.release();
    }
}

/// Deliver a terminal event without wedging cancellation: retry while
/// the channel is full, giving up once the scan is cancelled or the
/// receiver is gone. A blocking send here could park the recognition
/// thread forever against a consumer that stopped draining, and
/// `ScanHandle::cancel` joins that thread. The terminal state is already
/// recorded in the state flag before this runs.
fn send_terminal<R>(
    events: &mpsc::Sender<ScanEvent<R>>,
    cancel: &AtomicBool,
    mut event: ScanEvent<R>,
) {
    loop {
        match events.try_send(event) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(undelivered)) => {
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                event = undelivered;
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

/// Start a scan: acquire the camera, spawn the recognition loop and
/// the display tick.
///
/// The recognition loop pulls a frame, treats a failed read as "nothing
/// detected this tick", runs `detect`, and stops on the first `Some`.
/// The display tick independently pulls frames, flips them for display,
/// and drops ticks whenever the channel is full or a read fails.
pub fn start_scan<R, F>(
    camera: SharedCamera,
    mut detect: F,
    options: ScanOptions,
    events: mpsc::Sender<ScanEvent<R>>,
) -> ScanHandle
where
    R: Send + 'static,
    F: FnMut(&RgbFrame) -> Option<R> + Send + 'static,
{
    camera.acquire();

    let cancel = Arc::new(AtomicBool::new(false));
    let state = Arc::new(AtomicU8::new(STATE_SCANNING));
    let ScanOptions { timeout, pace, display_fps } = options;

    let mut threads = Vec::with_capacity(2);

    {
        let camera = camera.clone();
        let cancel = cancel.clone();
        let state = state.clone();
        let events = events.clone();
        let handle = std::thread::Builder::new()
            .name("sightline-scan".into())
            .spawn(move || {
                let started = Instant::now();
                loop {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Some(limit) = timeout {
                        if started.elapsed() >= limit {
                            state.store(STATE_TIMED_OUT, Ordering::SeqCst);
                            send_terminal(&events, &cancel, ScanEvent::TimedOut);
                            tracing::info!("scan timed out");
                            break;
                        }
                    }

                    match camera.get_frame() {
                        Ok(frame) => {
                            if let Some(result) = detect(&frame) {
                                if cancel.load(Ordering::SeqCst) {
                                    // cancelled while the detect call was in flight
                                    break;
                                }
                                state.store(STATE_ACCEPTED, Ordering::SeqCst);
                                send_terminal(&events, &cancel, ScanEvent::Accepted(result));
                                break;
                            }
                        }
                        Err(e) => {
                            // no new data this tick
                            tracing::trace!(error = %e, "frame read failed, skipping tick");
                        }
                    }

                    if !pace.is_zero() {
                        std::thread::sleep(pace);
                    }
                }
                tracing::debug!("recognition loop exited");
            })
            .expect("failed to spawn recognition thread");
        threads.push(handle);
    }

    {
        let camera = camera.clone();
        let cancel = cancel.clone();
        let state = state.clone();
        let interval = Duration::from_secs_f64(1.0 / display_fps.max(1) as f64);
        let handle = std::thread::Builder::new()
            .name("sightline-display".into())
            .spawn(move || {
                while !cancel.load(Ordering::SeqCst)
                    && state.load(Ordering::SeqCst) == STATE_SCANNING
                {
                    let tick_start = Instant::now();
                    if let Ok(frame) = camera.get_frame() {
                        // a full channel means the consumer is behind; skip the tick
                        let _ = events.try_send(ScanEvent::Frame(frame.flip_vertical()));
                    }
                    let elapsed = tick_start.elapsed();
                    if elapsed < interval {
                        std::thread::sleep(interval - elapsed);
                    }
                }
                tracing::debug!("display tick exited");
            })
            .expect("failed to spawn display thread");
        threads.push(handle);
    }

    ScanHandle { cancel, state, camera, threads }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_hw::camera::{CameraError, FrameSource};
    use std::sync::atomic::AtomicUsize;

    struct FakeSource {
        width: u32,
        height: u32,
    }

    impl FrameSource for FakeSource {
        fn read(&mut self) -> Result<RgbFrame, CameraError> {
            Ok(RgbFrame {
                data: vec![128; (self.width * self.height * 3) as usize],
                width: self.width,
                height: self.height,
            })
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    fn fake_camera() -> SharedCamera {
        SharedCamera::with_opener(
            0,
            8,
            8,
            Arc::new(|_, w, h| {
                Ok(Box::new(FakeSource { width: w, height: h }) as Box<dyn FrameSource>)
            }),
        )
    }

    fn dead_camera() -> SharedCamera {
        SharedCamera::with_opener(
            0,
            8,
            8,
            Arc::new(|_, _, _| Err(CameraError::DeviceNotFound("/dev/video0".into()))),
        )
    }

    /// Drain events until the channel closes or a terminal event arrives.
    fn collect_terminal(rx: &mut mpsc::Receiver<ScanEvent<u32>>) -> (u64, Vec<&'static str>) {
        let mut frames = 0u64;
        let mut terminals = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            match event {
                ScanEvent::Frame(_) => frames += 1,
                ScanEvent::Accepted(_) => terminals.push("accepted"),
                ScanEvent::TimedOut => terminals.push("timed_out"),
            }
        }
        (frames, terminals)
    }

    #[test]
    fn test_accepts_and_stops() {
        let camera = fake_camera();
        let (tx, mut rx) = mpsc::channel(32);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let handle = start_scan(
            camera.clone(),
            move |_frame| {
                // accept on the third frame
                if calls2.fetch_add(1, Ordering::SeqCst) == 2 {
                    Some(7u32)
                } else {
                    None
                }
            },
            ScanOptions::default(),
            tx,
        );

        let (_, terminals) = collect_terminal(&mut rx);
        assert_eq!(terminals, vec!["accepted"]);
        assert_eq!(handle.state(), ScanState::Accepted);
        handle.finish();
        assert!(!camera.is_open(), "finish must release the camera");
    }

    #[test]
    fn test_timeout_fires_exactly_once() {
        // zero qualifying detections for the whole window
        let camera = fake_camera();
        let (tx, mut rx) = mpsc::channel(128);

        let handle = start_scan(
            camera,
            |_frame| None::<u32>,
            ScanOptions {
                timeout: Some(Duration::from_millis(50)),
                pace: Duration::from_millis(5),
                display_fps: 1000,
            },
            tx,
        );

        let (_, terminals) = collect_terminal(&mut rx);
        assert_eq!(terminals, vec!["timed_out"]);
        assert_eq!(handle.state(), ScanState::TimedOut);
        handle.finish();
    }

    #[test]
    fn test_cancel_delivers_no_result() {
        let camera = fake_camera();
        let (tx, mut rx) = mpsc::channel(8);

        let handle = start_scan(
            camera.clone(),
            |_frame| None::<u32>,
            ScanOptions::default(),
            tx,
        );

        std::thread::sleep(Duration::from_millis(20));
        handle.cancel();
        assert!(!camera.is_open(), "cancel must release the camera");

        let (_, terminals) = collect_terminal(&mut rx);
        assert!(terminals.is_empty(), "no partial result after cancellation");
    }

    #[test]
    fn test_cancel_returns_while_terminal_send_is_pending() {
        // the channel is full and the consumer has stopped draining when
        // the timeout fires; cancel must still stop the loops
        let camera = fake_camera();
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(ScanEvent::Frame(RgbFrame {
            data: vec![0; 8 * 8 * 3],
            width: 8,
            height: 8,
        }))
        .ok();

        let handle = start_scan(
            camera.clone(),
            |_frame| None::<u32>,
            ScanOptions {
                timeout: Some(Duration::ZERO),
                pace: Duration::from_millis(1),
                display_fps: 100,
            },
            tx,
        );

        // let the recognition loop hit the timeout with nowhere to send
        std::thread::sleep(Duration::from_millis(30));
        handle.cancel();
        assert!(!camera.is_open(), "cancel must release the camera");

        // only the prefilled frame is left; no terminal event landed
        assert!(matches!(rx.blocking_recv(), Some(ScanEvent::Frame(_))));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_cancel_state_transition() {
        let camera = fake_camera();
        let (tx, _rx) = mpsc::channel::<ScanEvent<u32>>(8);
        let handle = start_scan(camera, |_f| None, ScanOptions::default(), tx);
        assert_eq!(handle.state(), ScanState::Scanning);
        // receiver dropped: sends fail but the loops keep polling until cancelled
        handle.cancel();
    }

    #[test]
    fn test_dead_camera_keeps_scanning_until_timeout() {
        // read failures are "nothing this tick", not fatal
        let camera = dead_camera();
        let (tx, mut rx) = mpsc::channel(8);

        let handle = start_scan(
            camera,
            |_frame| Some(1u32),
            ScanOptions {
                timeout: Some(Duration::from_millis(40)),
                pace: Duration::from_millis(5),
                display_fps: 100,
            },
            tx,
        );

        let (frames, terminals) = collect_terminal(&mut rx);
        assert_eq!(frames, 0, "no frames can be displayed from a dead camera");
        assert_eq!(terminals, vec!["timed_out"]);
        handle.finish();
    }

    #[test]
    fn test_display_frames_are_flipped() {
        // device frame has a bright top row; display frames must not
        let camera = SharedCamera::with_opener(
            0,
            4,
            4,
            Arc::new(|_, w, h| {
                struct Gradient {
                    width: u32,
                    height: u32,
                }
                impl FrameSource for Gradient {
                    fn read(&mut self) -> Result<RgbFrame, CameraError> {
                        let mut data = vec![0u8; (self.width * self.height * 3) as usize];
                        for px in data.iter_mut().take((self.width * 3) as usize) {
                            *px = 255;
                        }
                        Ok(RgbFrame { data, width: self.width, height: self.height })
                    }
                    fn resolution(&self) -> (u32, u32) {
                        (self.width, self.height)
                    }
                }
                Ok(Box::new(Gradient { width: w, height: h }) as Box<dyn FrameSource>)
            }),
        );

        let (tx, mut rx) = mpsc::channel::<ScanEvent<u32>>(8);
        let handle = start_scan(camera, |_f| None, ScanOptions::default(), tx);

        let mut checked = false;
        for _ in 0..16 {
            match rx.blocking_recv() {
                Some(ScanEvent::Frame(frame)) => {
                    // bright row must now be at the bottom
                    assert_eq!(frame.data[0], 0);
                    let last_row = frame.data.len() - (frame.width * 3) as usize;
                    assert_eq!(frame.data[last_row], 255);
                    checked = true;
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
        assert!(checked, "expected at least one display frame");
        handle.cancel();
    }
}
