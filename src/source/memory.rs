use super::{Frame, FrameSource};

/// A [FrameSource] backed by frames held in memory.
///
/// Missing entries (`None`) behave like frames that failed to decode. The duration is
/// derived from the number of frames and the frame rate.
#[derive(Debug, Clone)]
pub struct MemorySource {
    frames: Vec<Option<Frame>>,
    frame_rate: f64,
    duration: f64,
    release_count: usize,
}

impl MemorySource {
    pub fn new(frames: Vec<Option<Frame>>, frame_rate: f64) -> Self {
        let duration = if frame_rate > 0.0 {
            frames.len() as f64 / frame_rate
        } else {
            0.0
        };
        Self {
            frames,
            frame_rate,
            duration,
            release_count: 0,
        }
    }

    /// Returns `true` once [FrameSource::release] has been called.
    pub fn is_released(&self) -> bool {
        self.release_count > 0
    }

    /// Number of times [FrameSource::release] was called.
    pub fn release_count(&self) -> usize {
        self.release_count
    }
}

impl FrameSource for MemorySource {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn frame(&mut self, index: u64) -> Option<Frame> {
        if self.is_released() {
            return None;
        }
        let index = usize::try_from(index).ok()?;
        self.frames.get(index).cloned().flatten()
    }

    fn release(&mut self) {
        self.frames.clear();
        self.release_count += 1;
    }
}
