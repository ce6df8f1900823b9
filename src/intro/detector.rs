#[cfg(feature = "rayon")]
extern crate rayon;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Candidate, Fingerprinter, SearchParams, SimilarityMatrix, Timeline};
use crate::source::{FfmpegSource, FrameSource, SourceGuard};
use crate::{util, Error, Result};

/// Outcome of running intro detection on a single video.
///
/// When no intro is found, only `found` is set. This serializes to `{"found": false}`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl DetectionResult {
    pub fn not_found() -> Self {
        Self::default()
    }
}

impl From<Candidate> for DetectionResult {
    fn from(c: Candidate) -> Self {
        Self {
            found: true,
            start_time: Some(c.start_time),
            end_time: Some(c.end_time),
            duration: Some(c.duration),
            confidence: Some(c.similarity_score),
        }
    }
}

/// Finds a repeated intro within individual videos.
///
/// The detector samples frames at a fixed rate, fingerprints them, builds a self-similarity
/// matrix and then searches it for a pair of near-identical frame sequences. The best
/// match is reported as the intro.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use refrain::intro::Detector;
///
/// let detector = Detector::default()
///     .with_min_intro_length(Duration::from_secs(5))
///     .with_similarity_threshold(0.85);
/// let result = detector.detect_path("episode-01.mkv").unwrap();
/// if result.found {
///     println!("intro at {:?}-{:?}", result.start_time, result.end_time);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Detector {
    min_intro_length: Duration,
    max_intro_length: Duration,
    similarity_threshold: f64,
    sampling_rate: f64,
    hash_size: u32,
    threaded_decoding: bool,
    use_cache: bool,
    write_cache: bool,
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            min_intro_length: Duration::from_secs_f32(super::DEFAULT_MIN_INTRO_LENGTH),
            max_intro_length: Duration::from_secs_f32(super::DEFAULT_MAX_INTRO_LENGTH),
            similarity_threshold: super::DEFAULT_SIMILARITY_THRESHOLD,
            sampling_rate: super::DEFAULT_SAMPLING_RATE,
            hash_size: super::DEFAULT_HASH_SIZE,
            threaded_decoding: false,
            use_cache: false,
            write_cache: false,
        }
    }
}

impl Detector {
    /// Returns a new [Detector] with the provided `min_intro_length`.
    pub fn with_min_intro_length(mut self, min_intro_length: Duration) -> Self {
        self.min_intro_length = min_intro_length;
        self
    }

    /// Returns a new [Detector] with the provided `max_intro_length`.
    pub fn with_max_intro_length(mut self, max_intro_length: Duration) -> Self {
        self.max_intro_length = max_intro_length;
        self
    }

    /// Returns a new [Detector] with the provided `similarity_threshold`.
    pub fn with_similarity_threshold(mut self, similarity_threshold: f64) -> Self {
        self.similarity_threshold = similarity_threshold;
        self
    }

    /// Returns a new [Detector] with the provided `sampling_rate` (samples per second).
    pub fn with_sampling_rate(mut self, sampling_rate: f64) -> Self {
        self.sampling_rate = sampling_rate;
        self
    }

    /// Returns a new [Detector] with the provided fingerprint `hash_size`.
    pub fn with_hash_size(mut self, hash_size: u32) -> Self {
        self.hash_size = hash_size;
        self
    }

    /// Returns a new [Detector] with `threaded_decoding` set to the provided value.
    pub fn with_threaded_decoding(mut self, threaded_decoding: bool) -> Self {
        self.threaded_decoding = threaded_decoding;
        self
    }

    /// Returns a new [Detector] that reuses timelines cached alongside each video.
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Returns a new [Detector] that writes computed timelines alongside each video.
    pub fn with_write_cache(mut self, write_cache: bool) -> Self {
        self.write_cache = write_cache;
        self
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if !(8..=super::MAX_HASH_SIZE).contains(&self.hash_size) {
            return Err(Error::InvalidConfig(format!(
                "hash_size must be between 8 and {}, got {}",
                super::MAX_HASH_SIZE,
                self.hash_size
            )));
        }
        if !self.sampling_rate.is_finite() || self.sampling_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sampling_rate must be a positive number, got {}",
                self.sampling_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::InvalidConfig(format!(
                "similarity_threshold must be in [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.min_intro_length > self.max_intro_length {
            return Err(Error::InvalidConfig(format!(
                "min_intro_length ({:?}) exceeds max_intro_length ({:?})",
                self.min_intro_length, self.max_intro_length
            )));
        }
        Ok(())
    }

    fn search_params(&self) -> SearchParams {
        SearchParams::new(
            self.min_intro_length,
            self.max_intro_length,
            self.similarity_threshold,
            self.sampling_rate,
        )
    }

    /// Samples and fingerprints `source`. The source is left open.
    pub fn build_timeline<S: FrameSource + ?Sized>(&self, source: &mut S) -> Timeline {
        Timeline::build(source, self.sampling_rate, &Fingerprinter::new(self.hash_size))
    }

    /// Runs the candidate search over a similarity matrix and its timestamps.
    pub fn find_intro_candidates(
        &self,
        matrix: &SimilarityMatrix,
        times: &[f64],
    ) -> Vec<Candidate> {
        super::find_intro_candidates(matrix, times, &self.search_params())
    }

    /// Detects the intro in an already computed timeline.
    pub fn detect_timeline(&self, timeline: &Timeline) -> DetectionResult {
        let mut params = self.search_params();
        if timeline.sampling_rate() > 0.0 {
            params.sampling_rate = timeline.sampling_rate();
        }

        let times = timeline.timestamps();
        let matrix = timeline.similarity_matrix();
        let candidates = super::find_intro_candidates(&matrix, &times, &params);

        match candidates.into_iter().next() {
            Some(best) => best.into(),
            None => DetectionResult::not_found(),
        }
    }

    /// Detects the intro in the video behind `source`.
    ///
    /// The source is released before this returns, whether or not detection succeeds.
    pub fn detect_intro<S: FrameSource>(&self, source: S) -> Result<DetectionResult> {
        let mut source = SourceGuard::new(source);
        self.validate()?;

        let timeline = self.build_timeline(&mut *source);
        Ok(self.detect_timeline(&timeline))
    }

    // Loads the cached timeline for `video`, if it exists and is still valid.
    fn cached_timeline(&self, video: &Path) -> Result<Option<Timeline>> {
        let cache_path = Timeline::cache_path(video);
        if !cache_path.exists() {
            return Ok(None);
        }

        let md5 = util::compute_header_md5sum(video)?;
        match Timeline::from_path(&cache_path) {
            Ok(timeline)
                if timeline.md5() == Some(md5.as_str())
                    && timeline.matches(self.sampling_rate, self.hash_size) =>
            {
                tracing::debug!("using cached timeline for {}", video.display());
                Ok(Some(timeline))
            }
            Ok(_) => {
                tracing::debug!("ignoring stale timeline for {}", video.display());
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("unable to read {}: {}", cache_path.display(), e);
                Ok(None)
            }
        }
    }

    // Decodes `video` and builds its timeline. The decoder is closed before this returns.
    fn decode_timeline(&self, video: &Path) -> Result<Timeline> {
        let md5 = util::compute_header_md5sum(video)?;
        let mut source = SourceGuard::new(FfmpegSource::open(video, self.threaded_decoding)?);

        tracing::debug!("starting frame sampling for {}", video.display());
        let timeline = self.build_timeline(&mut *source).with_md5(md5);
        tracing::debug!(
            samples = timeline.len(),
            "completed frame sampling for {}",
            video.display()
        );

        Ok(timeline)
    }

    /// Builds the timeline for a video file and writes it to disk alongside the video.
    ///
    /// If caching is enabled and a valid cached timeline already exists, it is returned as-is.
    pub fn analyze_path(&self, video: impl AsRef<Path>) -> Result<Timeline> {
        let span = tracing::span!(tracing::Level::TRACE, "analyze_path");
        let _enter = span.enter();

        let video = video.as_ref();
        self.validate()?;

        if self.use_cache {
            if let Some(timeline) = self.cached_timeline(video)? {
                tracing::info!("skipping analysis for {}", video.display());
                return Ok(timeline);
            }
        }

        let timeline = self.decode_timeline(video)?;
        timeline.write_to(Timeline::cache_path(video))?;
        Ok(timeline)
    }

    /// Detects the intro in a video file.
    ///
    /// Fails if the file cannot be opened or contains no video stream. A video in which no
    /// repeated sequence is found is **not** an error.
    pub fn detect_path(&self, video: impl AsRef<Path>) -> Result<DetectionResult> {
        let span = tracing::span!(tracing::Level::TRACE, "detect_path");
        let _enter = span.enter();

        let video = video.as_ref();
        self.validate()?;

        let cached = if self.use_cache {
            self.cached_timeline(video)?
        } else {
            None
        };
        let timeline = match cached {
            Some(timeline) => timeline,
            None => {
                let timeline = self.decode_timeline(video)?;
                if self.write_cache {
                    timeline.write_to(Timeline::cache_path(video))?;
                }
                timeline
            }
        };

        Ok(self.detect_timeline(&timeline))
    }

    /// Builds the timeline for each video and writes it alongside the video.
    ///
    /// Returns the number of videos analyzed successfully. Failures are logged and skipped.
    pub fn analyze<P: AsRef<Path> + Sync>(&self, videos: &[P], threading: bool) -> usize {
        let analyze_one = |video: &P| -> bool {
            let video = video.as_ref();
            match self.analyze_path(video) {
                Ok(timeline) => {
                    tracing::info!(samples = timeline.len(), "analyzed {}", video.display());
                    true
                }
                Err(e) => {
                    tracing::error!("failed to analyze {}: {}", video.display(), e);
                    false
                }
            }
        };

        let mut analyzed = 0;

        if cfg!(feature = "rayon") && threading {
            #[cfg(feature = "rayon")]
            {
                analyzed = videos.par_iter().filter(|v| analyze_one(*v)).count();
            }
        } else {
            analyzed = videos.iter().filter(|v| analyze_one(*v)).count();
        }

        analyzed
    }

    /// Runs detection on each video and collects the results by file name.
    ///
    /// A video that fails (e.g., cannot be opened) is logged and left out of the results; it
    /// never stops the rest of the batch. If `threading` is set and the `rayon` feature is
    /// enabled, videos are processed in parallel, each with its own decoder.
    pub fn run<P: AsRef<Path> + Sync>(
        &self,
        videos: &[P],
        threading: bool,
    ) -> BTreeMap<String, DetectionResult> {
        self.run_with(videos, threading, |video| self.detect_path(video))
    }

    // Applies `detect` to each video. Failures are logged and omitted from the results.
    fn run_with<P, F>(
        &self,
        videos: &[P],
        threading: bool,
        detect: F,
    ) -> BTreeMap<String, DetectionResult>
    where
        P: AsRef<Path> + Sync,
        F: Fn(&Path) -> Result<DetectionResult> + Sync,
    {
        let detect_one = |video: &P| -> Option<(String, DetectionResult)> {
            let video = video.as_ref();
            let name = video
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| video.display().to_string());

            tracing::info!("processing {}...", name);
            match detect(video) {
                Ok(result) => Some((name, result)),
                Err(e) => {
                    tracing::error!("failed to process {}: {}", video.display(), e);
                    None
                }
            }
        };

        let mut results = BTreeMap::new();

        if cfg!(feature = "rayon") && threading {
            #[cfg(feature = "rayon")]
            {
                results = videos.par_iter().filter_map(detect_one).collect();
            }
        } else {
            results.extend(videos.iter().filter_map(detect_one));
        }

        results
    }

    /// Runs detection on every supported video found (recursively) under `dir`.
    pub fn detect_dir(
        &self,
        dir: impl AsRef<Path>,
        threading: bool,
    ) -> Result<BTreeMap<String, DetectionResult>> {
        let videos = util::find_video_files(&[dir.as_ref().to_owned()], false)?;
        tracing::info!("found {} video files", videos.len());
        Ok(self.run(&videos, threading))
    }
}
