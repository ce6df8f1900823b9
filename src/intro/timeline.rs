use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Fingerprint, Fingerprinter, SimilarityMatrix};
use crate::source::FrameSource;
use crate::{Error, Result};

/// Fingerprints of a video sampled at a fixed rate. This is the result of walking a
/// [FrameSource] with [Timeline::build].
///
/// The struct contains the raw `(timestamp, fingerprint)` data as well as the parameters used
/// to generate it. When built from a file, the MD5 of the file header is included so that a
/// cached timeline can be matched against the video it was computed from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub(crate) sampling_rate: f64,
    pub(crate) hash_size: u32,
    pub(crate) data: Vec<(f64, Fingerprint)>,
    pub(crate) md5: Option<String>,
}

impl Timeline {
    /// Samples `source` at `0, 1/rate, 2/rate, ...` up to (excluding) its duration and
    /// fingerprints each frame.
    ///
    /// Timestamps whose frame cannot be decoded are skipped. The source is not released.
    pub fn build<S: FrameSource + ?Sized>(
        source: &mut S,
        sampling_rate: f64,
        fingerprinter: &Fingerprinter,
    ) -> Self {
        let span = tracing::span!(tracing::Level::TRACE, "build_timeline");
        let _enter = span.enter();

        let duration = source.duration();
        let mut data = Vec::new();
        let mut skipped = 0usize;

        if sampling_rate > 0.0 && sampling_rate.is_finite() {
            for k in 0u64.. {
                let timestamp = k as f64 / sampling_rate;
                if !(timestamp < duration) {
                    break;
                }
                match source
                    .frame_at(timestamp)
                    .and_then(|frame| fingerprinter.fingerprint(&frame))
                {
                    Some(fingerprint) => data.push((timestamp, fingerprint)),
                    None => {
                        tracing::trace!(timestamp, "no frame available; skipping sample");
                        skipped += 1;
                    }
                }
            }
        }

        tracing::debug!(
            duration,
            samples = data.len(),
            skipped,
            "finished sampling video"
        );

        Self {
            sampling_rate,
            hash_size: fingerprinter.hash_size(),
            data,
            md5: None,
        }
    }

    /// Builds a timeline from precomputed entries. Entries are sorted by timestamp.
    pub fn from_entries(
        sampling_rate: f64,
        hash_size: u32,
        mut data: Vec<(f64, Fingerprint)>,
    ) -> Self {
        data.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            sampling_rate,
            hash_size,
            data,
            md5: None,
        }
    }

    pub(crate) fn with_md5(mut self, md5: String) -> Self {
        self.md5 = Some(md5);
        self
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    /// MD5 of the header of the video this timeline was built from, if any.
    pub fn md5(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn entries(&self) -> &[(f64, Fingerprint)] {
        &self.data
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.data.iter().map(|(t, _)| *t).collect()
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.data.iter().map(|(_, fp)| *fp).collect()
    }

    /// Computes the pairwise similarity matrix of this timeline.
    pub fn similarity_matrix(&self) -> SimilarityMatrix {
        SimilarityMatrix::from_fingerprints(&self.fingerprints())
    }

    /// Returns `true` if this timeline was generated with the given parameters.
    pub fn matches(&self, sampling_rate: f64, hash_size: u32) -> bool {
        self.sampling_rate == sampling_rate && self.hash_size == hash_size
    }

    /// Returns where the timeline for `video` is cached on disk (alongside the video).
    pub fn cache_path(video: impl AsRef<Path>) -> PathBuf {
        video.as_ref().with_extension(super::TIMELINE_FILE_EXT)
    }

    /// Load a timeline from a path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::TimelineDataNotFound(path.to_owned()));
        }
        let f = std::fs::File::open(path)?;
        Ok(bincode::deserialize_from(std::io::BufReader::new(f))?)
    }

    /// Write this timeline to a path.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = std::io::BufWriter::new(std::fs::File::create(path.as_ref())?);
        bincode::serialize_into(&mut f, self)?;
        Ok(())
    }
}
