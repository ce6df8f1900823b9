extern crate ffmpeg_next;

use std::path::{Path, PathBuf};

use super::{Frame, FrameSource};
use crate::{Error, Result};

// FFmpeg's internal time base (AV_TIME_BASE), used for container-level seeks and durations.
const AV_TIME_BASE: f64 = 1_000_000.0;

// AV_NOPTS_VALUE: the timestamp is unknown.
const NO_PTS: i64 = i64::MIN;

// Converts a timestamp in `time_base` units to seconds.
fn ts_to_secs(ts: i64, time_base: f64) -> Option<f64> {
    (ts != NO_PTS).then(|| ts as f64 * time_base)
}

/// Wraps the `FFmpeg` video decoder and the RGB converter that feeds the fingerprinter.
struct VideoDecoder {
    decoder: ffmpeg_next::codec::decoder::Video,
    converter: ffmpeg_next::software::scaling::context::Context,
}

impl VideoDecoder {
    fn build_threading_config() -> ffmpeg_next::codec::threading::Config {
        let mut config = ffmpeg_next::codec::threading::Config::default();
        config.count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        config.kind = ffmpeg_next::codec::threading::Type::Frame;
        config
    }

    fn from_stream(stream: ffmpeg_next::format::stream::Stream, threaded: bool) -> Result<Self> {
        let ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let mut decoder = ctx.decoder();

        if threaded {
            decoder.set_threading(Self::build_threading_config());
        }

        let decoder = decoder.video()?;
        let converter = decoder.converter(ffmpeg_next::format::Pixel::RGB24)?;

        Ok(Self { decoder, converter })
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::packet::Packet) -> Result<()> {
        Ok(self.decoder.send_packet(packet)?)
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(self.decoder.send_eof()?)
    }

    fn receive_frame(&mut self, frame: &mut ffmpeg_next::frame::Video) -> Result<()> {
        Ok(self.decoder.receive_frame(frame)?)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    // Converts a decoded frame into packed RGB. If the input format or size changed mid-stream,
    // a new converter is built for the incoming frame and swapped in.
    fn convert_frame(&mut self, frame: &ffmpeg_next::frame::Video) -> Result<Frame> {
        let mut rgb = ffmpeg_next::frame::Video::empty();
        match self.converter.run(frame, &mut rgb) {
            Ok(()) => (),
            Err(ffmpeg_next::Error::InputChanged) => {
                let mut converter = ffmpeg_next::software::scaling::context::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    ffmpeg_next::format::Pixel::RGB24,
                    frame.width(),
                    frame.height(),
                    ffmpeg_next::software::scaling::Flags::BILINEAR,
                )?;
                converter.run(frame, &mut rgb)?;
                self.converter = converter;
            }
            Err(e) => return Err(e.into()),
        }
        rgb_to_image(&rgb).ok_or(Error::FFmpegError(ffmpeg_next::Error::InvalidData))
    }
}

// Copies a packed RGB24 frame into an owned image, dropping any row padding.
fn rgb_to_image(frame: &ffmpeg_next::frame::Video) -> Option<Frame> {
    let (width, height) = (frame.width(), frame.height());
    let stride = frame.stride(0);
    let row_len = width as usize * 3;
    let data = frame.data(0);

    let mut buf = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        buf.extend_from_slice(data.get(start..start + row_len)?);
    }

    Frame::from_raw(width, height, buf)
}

/// A [FrameSource] that decodes frames from a video file using `FFmpeg`.
///
/// Every frame request seeks to the closest preceding keyframe and decodes forward
/// until the requested frame is reached. Decoding errors are logged and reported as
/// a missing frame.
pub struct FfmpegSource {
    path: PathBuf,
    input: Option<ffmpeg_next::format::context::Input>,
    decoder: Option<VideoDecoder>,
    stream_idx: usize,
    time_base: f64,
    start_time: f64,
    frame_rate: f64,
    duration: f64,
}

impl FfmpegSource {
    /// Opens the best video stream in the file at `path`.
    ///
    /// `ffmpeg_next::init()` must have been called beforehand.
    pub fn open(path: impl AsRef<Path>, threaded: bool) -> Result<Self> {
        let path = path.as_ref();
        let input = ffmpeg_next::format::input(&path)?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| Error::NoVideoStream(path.to_owned()))?;
        let stream_idx = stream.index();
        let time_base = f64::from(stream.time_base());
        // Frame timestamps are offset by this amount (e.g., remuxed MPEG-TS, MP4 edit lists).
        let start_time = ts_to_secs(stream.start_time(), time_base).unwrap_or(0.0);

        let mut frame_rate = f64::from(stream.avg_frame_rate());
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            frame_rate = f64::from(stream.rate());
        }
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            tracing::warn!("unable to determine frame rate for {}", path.display());
            return Err(Error::NoVideoStream(path.to_owned()));
        }

        // Prefer the frame count, then the stream duration. Some containers (e.g., Matroska)
        // only store the duration in the format context.
        let duration = if stream.frames() > 0 {
            stream.frames() as f64 / frame_rate
        } else if stream.duration() > 0 {
            stream.duration() as f64 * time_base
        } else {
            input.duration().max(0) as f64 / AV_TIME_BASE
        };

        let decoder = VideoDecoder::from_stream(stream, threaded)?;

        tracing::debug!(
            frame_rate,
            duration,
            start_time,
            "opened video stream {} in {}",
            stream_idx,
            path.display()
        );

        Ok(Self {
            path: path.to_owned(),
            input: Some(input),
            decoder: Some(decoder),
            stream_idx,
            time_base,
            start_time,
            frame_rate,
            duration,
        })
    }

    /// Returns the path of the underlying video file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // Seeks to the keyframe at or before `target` (seconds from the start of the stream) and
    // decodes forward until a frame at (or just past) the target is found.
    fn decode_at(&mut self, target: f64) -> Result<Option<Frame>> {
        let (Some(input), Some(decoder)) = (self.input.as_mut(), self.decoder.as_mut()) else {
            return Ok(None);
        };

        let target = target + self.start_time;
        let target_ts = (target * AV_TIME_BASE) as i64;
        input.seek(target_ts, i64::MIN..target_ts.saturating_add(1))?;
        decoder.flush();

        // Accept frames within half a frame period of the target.
        let tolerance = 0.5 / self.frame_rate;
        let (stream_idx, time_base) = (self.stream_idx, self.time_base);
        let mut frame = ffmpeg_next::frame::Video::empty();

        let reached = |frame: &ffmpeg_next::frame::Video| {
            match frame
                .timestamp()
                .or_else(|| frame.pts())
                .and_then(|ts| ts_to_secs(ts, time_base))
            {
                Some(t) => t + tolerance >= target,
                // No timing info; the first decoded frame after the seek is the best guess.
                None => true,
            }
        };

        for (s, p) in input.packets() {
            if s.index() != stream_idx {
                continue;
            }
            if let Err(e) = decoder.send_packet(&p) {
                tracing::trace!("dropping packet: {}", e);
                continue;
            }
            while decoder.receive_frame(&mut frame).is_ok() {
                if reached(&frame) {
                    return decoder.convert_frame(&frame).map(Some);
                }
            }
        }

        // Drain frames still buffered in the decoder.
        decoder.send_eof()?;
        while decoder.receive_frame(&mut frame).is_ok() {
            if reached(&frame) {
                return decoder.convert_frame(&frame).map(Some);
            }
        }

        Ok(None)
    }
}

impl FrameSource for FfmpegSource {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn frame(&mut self, index: u64) -> Option<Frame> {
        let target = index as f64 / self.frame_rate;
        if target >= self.duration {
            return None;
        }
        match self.decode_at(target) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(
                    index,
                    "failed to decode frame from {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    fn release(&mut self) {
        if self.input.is_some() || self.decoder.is_some() {
            tracing::trace!("closing {}", self.path.display());
        }
        self.decoder = None;
        self.input = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ts_to_secs() {
        let time_base = 1.0 / 90_000.0;
        assert_eq!(ts_to_secs(0, time_base), Some(0.0));
        assert!((ts_to_secs(126_000, time_base).unwrap() - 1.4).abs() < 1e-9);
        assert_eq!(ts_to_secs(-2, 0.5), Some(-1.0));
        assert_eq!(ts_to_secs(NO_PTS, time_base), None);
    }

    #[test]
    fn test_open_missing_file() {
        ffmpeg_next::init().unwrap();
        assert!(FfmpegSource::open("/definitely/not/here.mkv", false).is_err());
    }
}
