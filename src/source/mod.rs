//! Media decoding capability used by the detector.
//!
//! A [FrameSource] hands out decoded RGB frames by index. The detector never talks
//! to a decoder directly; it walks a source through a [SourceGuard], which releases the
//! underlying resources once the walk (or anything that fails during it) is done.

mod ffmpeg;
mod memory;

use std::ops::{Deref, DerefMut};

pub use ffmpeg::FfmpegSource;
pub use memory::MemorySource;

/// A single decoded video frame.
pub type Frame = image::RgbImage;

/// Something that can produce decoded frames for a single video.
pub trait FrameSource {
    /// Total duration of the video, in seconds.
    fn duration(&self) -> f64;

    /// Native frame rate of the video, in frames per second.
    fn frame_rate(&self) -> f64;

    /// Returns the frame at `index`, or `None` if it could not be decoded.
    fn frame(&mut self, index: u64) -> Option<Frame>;

    /// Releases the underlying decoding resources.
    ///
    /// Must be safe to call more than once. Once released, every frame request returns `None`.
    fn release(&mut self);

    /// Returns the frame displayed at `timestamp` (seconds).
    fn frame_at(&mut self, timestamp: f64) -> Option<Frame> {
        let index = (timestamp * self.frame_rate()).floor();
        if !index.is_finite() || index < 0.0 {
            return None;
        }
        self.frame(index as u64)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn duration(&self) -> f64 {
        (**self).duration()
    }

    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    fn frame(&mut self, index: u64) -> Option<Frame> {
        (**self).frame(index)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn frame_at(&mut self, timestamp: f64) -> Option<Frame> {
        (**self).frame_at(timestamp)
    }
}

/// Owns a [FrameSource] and releases it when dropped.
pub struct SourceGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> SourceGuard<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: FrameSource> Deref for SourceGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.source
    }
}

impl<S: FrameSource> DerefMut for SourceGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        tracing::trace!("releasing frame source");
        self.source.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn solid(value: u8) -> Frame {
        Frame::from_pixel(4, 4, image::Rgb([value, value, value]))
    }

    #[test]
    fn test_frame_at_uses_floor_of_time_times_fps() {
        let frames = (0..10).map(|i| Some(solid(i as u8))).collect();
        let mut source = MemorySource::new(frames, 2.0);

        // 1.9s at 2 fps => index 3
        let frame = source.frame_at(1.9).unwrap();
        assert_eq!(frame.get_pixel(0, 0)[0], 3);
        assert!(source.frame_at(-1.0).is_none());
        assert!(source.frame_at(5.0).is_none());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mut source = MemorySource::new(vec![Some(solid(1))], 1.0);
        {
            let mut guard = SourceGuard::new(&mut source);
            assert!(guard.frame(0).is_some());
        }
        assert!(source.is_released());
        assert_eq!(source.release_count(), 1);
        assert!(source.frame(0).is_none());
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let mut source = MemorySource::new(vec![Some(solid(1))], 1.0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SourceGuard::new(&mut source);
            panic!("search blew up");
        }));
        assert!(result.is_err());
        assert!(source.is_released());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut source = MemorySource::new(vec![Some(solid(1))], 1.0);
        source.release();
        source.release();
        assert!(source.is_released());
        assert!(source.frame_at(0.0).is_none());
    }
}
