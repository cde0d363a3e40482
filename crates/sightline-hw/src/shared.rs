//! Shared camera resource.
//!
//! One physical camera feeds the foreground display tick and a background
//! recognition worker at the same time, so the device lives behind a single
//! cloneable handle. The handle owns the only mutex in the capture path:
//! a release can never race a read.
//!
//! Release semantics follow the resource contract, not the clone count:
//! `release()` from any clone closes the device for all of them, and the
//! next `acquire()` reopens it fresh.

use crate::camera::{CameraError, FrameSource, V4lSource};
use crate::frame::RgbFrame;
use std::sync::{Arc, Mutex};

pub type Opener =
    dyn Fn(u32, u32, u32) -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync;

struct CameraState {
    device: Option<Box<dyn FrameSource>>,
}

/// Cloneable handle to the single shared camera.
#[derive(Clone)]
pub struct SharedCamera {
    source_id: u32,
    width: u32,
    height: u32,
    opener: Arc<Opener>,
    state: Arc<Mutex<CameraState>>,
}

impl SharedCamera {
    /// Create a closed handle for `/dev/video{source_id}` with the given
    /// capture/display resolution. No device is touched until `acquire`.
    pub fn new(source_id: u32, width: u32, height: u32) -> Self {
        Self::with_opener(source_id, width, height, Arc::new(|id, w, h| {
            V4lSource::open(id, w, h).map(|s| Box::new(s) as Box<dyn FrameSource>)
        }))
    }

    /// Create a handle with a custom device opener. Used by tests to stand
    /// in a fake frame source and to count open calls.
    pub fn with_opener(source_id: u32, width: u32, height: u32, opener: Arc<Opener>) -> Self {
        Self {
            source_id,
            width,
            height,
            opener,
            state: Arc::new(Mutex::new(CameraState { device: None })),
        }
    }

    /// Open the device if it is closed; a no-op when already open, so the
    /// configured resolution is never reapplied to a live handle.
    ///
    /// An open failure is absorbed here: it is logged, the handle stays
    /// closed, and every subsequent `get_frame` reports failure.
    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.device.is_some() {
            return;
        }
        match (self.opener)(self.source_id, self.width, self.height) {
            Ok(device) => {
                let (w, h) = device.resolution();
                tracing::info!(source = self.source_id, width = w, height = h, "camera acquired");
                state.device = Some(device);
            }
            Err(e) => {
                tracing::warn!(source = self.source_id, error = %e, "could not access the camera");
            }
        }
    }

    /// Read the next available frame, rescaled to the configured display
    /// resolution with area interpolation.
    ///
    /// Fails with [`CameraError::NotOpen`] after `release` (or after a
    /// failed `acquire`); a read failure is "no new data this tick" for
    /// callers, never fatal.
    pub fn get_frame(&self) -> Result<RgbFrame, CameraError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let device = state.device.as_mut().ok_or(CameraError::NotOpen)?;
        let raw = device.read()?;
        Ok(raw.resize_area(self.width, self.height))
    }

    /// Close the device for every clone of this handle. Idempotent; the
    /// next `acquire` reopens it.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.device.take().is_some() {
            tracing::info!(source = self.source_id, "camera released");
        }
    }

    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .device
            .is_some()
    }

    /// Configured display resolution.
    pub fn display_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        width: u32,
        height: u32,
        fill: u8,
    }

    impl FrameSource for FakeSource {
        fn read(&mut self) -> Result<RgbFrame, CameraError> {
            Ok(RgbFrame {
                data: vec![self.fill; (self.width * self.height * 3) as usize],
                width: self.width,
                height: self.height,
            })
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    fn counting_camera(opens: Arc<AtomicUsize>) -> SharedCamera {
        SharedCamera::with_opener(
            0,
            4,
            4,
            Arc::new(move |_, w, h| {
                let n = opens.fetch_add(1, Ordering::SeqCst) as u8;
                Ok(Box::new(FakeSource { width: w, height: h, fill: n }) as Box<dyn FrameSource>)
            }),
        )
    }

    #[test]
    fn test_acquire_twice_is_single_open() {
        // the second acquire leaves the open device untouched
        let opens = Arc::new(AtomicUsize::new(0));
        let camera = counting_camera(opens.clone());

        camera.acquire();
        camera.acquire();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(camera.is_open());
    }

    #[test]
    fn test_release_then_reacquire_opens_fresh_device() {
        // release closes for everyone; the next acquire reopens
        let opens = Arc::new(AtomicUsize::new(0));
        let camera = counting_camera(opens.clone());

        camera.acquire();
        let first = camera.get_frame().unwrap();
        camera.release();

        assert!(camera.get_frame().is_err(), "read between release and reacquire must fail");

        camera.acquire();
        let second = camera.get_frame().unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 2);
        // the fake fills frames with the open ordinal, proving a fresh device
        assert_ne!(first.data[0], second.data[0]);
    }

    #[test]
    fn test_get_frame_unopened_reports_failure() {
        let camera = counting_camera(Arc::new(AtomicUsize::new(0)));
        assert!(matches!(camera.get_frame(), Err(CameraError::NotOpen)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let camera = counting_camera(Arc::new(AtomicUsize::new(0)));
        camera.acquire();
        camera.release();
        camera.release();
        assert!(!camera.is_open());
    }

    #[test]
    fn test_release_through_clone_invalidates_all() {
        let camera = counting_camera(Arc::new(AtomicUsize::new(0)));
        camera.acquire();
        let other = camera.clone();
        other.release();
        assert!(camera.get_frame().is_err());
    }

    #[test]
    fn test_failed_open_is_absorbed() {
        let camera = SharedCamera::with_opener(
            3,
            4,
            4,
            Arc::new(|_, _, _| Err(CameraError::DeviceNotFound("/dev/video3".into()))),
        );
        camera.acquire();
        assert!(!camera.is_open());
        assert!(camera.get_frame().is_err());
    }

    #[test]
    fn test_get_frame_rescales_to_display_resolution() {
        let camera = SharedCamera::with_opener(
            0,
            4,
            4,
            Arc::new(|_, _, _| {
                // device delivers 8x8 regardless of the request
                Ok(Box::new(FakeSource { width: 8, height: 8, fill: 200 }) as Box<dyn FrameSource>)
            }),
        );
        camera.acquire();
        let frame = camera.get_frame().unwrap();
        assert_eq!((frame.width, frame.height), (4, 4));
    }
}
