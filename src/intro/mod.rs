mod detector;
mod fingerprint;
mod search;
mod similarity;
mod timeline;

pub use detector::{DetectionResult, Detector};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use search::{find_intro_candidates, Candidate, SearchParams};
pub use similarity::SimilarityMatrix;
pub use timeline::Timeline;

/// Default minimum intro length (seconds).
///
/// A repeated sequence is only reported as an intro if it runs for at least this long.
pub const DEFAULT_MIN_INTRO_LENGTH: f32 = 2.0;

/// Default maximum intro length (seconds).
///
/// Also bounds how far apart the two occurrences of an intro may start.
pub const DEFAULT_MAX_INTRO_LENGTH: f32 = 30.0;

/// Default similarity threshold.
///
/// Two fingerprints are considered a match if their similarity (1 - normalized Hamming
/// distance) is strictly above this value.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Default sampling rate (samples per second).
///
/// At 0.5, one frame is fingerprinted every two seconds of video.
pub const DEFAULT_SAMPLING_RATE: f64 = 0.5;

/// Default fingerprint hash size.
///
/// Frames are downscaled to `hash_size x hash_size` before the DCT. Must be at least 8.
pub const DEFAULT_HASH_SIZE: u32 = 16;

/// Largest accepted fingerprint hash size.
pub const MAX_HASH_SIZE: u32 = 256;

/// Maximum number of candidates kept after overlap filtering.
pub const MAX_CANDIDATES: usize = 5;

/// Number of diagonal cells averaged when probing a pair of samples.
pub const LOOKAHEAD_SAMPLES: usize = 20;

static TIMELINE_FILE_EXT: &str = "intro.bin";
