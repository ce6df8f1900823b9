use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// File extensions picked up when searching directories for videos.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv"];

// Number of header bytes used for file sniffing and cache validation.
const HEADER_LEN: usize = 8192;

/// Formats the given [Duration] as "MM:SS.ss"
pub fn format_time(t: Duration) -> String {
    let minutes = t.as_secs() / 60;
    let seconds = t.as_secs_f64() - (minutes * 60) as f64;
    format!("{:02}:{:05.2}", minutes, seconds)
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    std::fs::File::open(path)?
        .take(HEADER_LEN as u64)
        .read_to_end(&mut buf)?;
    Ok(buf)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Checks if the given path points to a valid video file.
///
/// If `full` is set to **false**, only the file header will be checked. This is a very cheap
/// operation, but it does not guarantee validity. If set to **true**, FFmpeg will be used to
/// check that the file contains at least one video stream - note that this is more expensive,
/// but much more accurate.
pub fn is_valid_video_file(path: impl AsRef<Path>, full: bool) -> bool {
    let path = path.as_ref();

    if !full {
        return match read_header(path) {
            Ok(buf) => infer::is_video(&buf),
            Err(_) => false,
        };
    }

    match ffmpeg_next::format::input(&path) {
        Ok(input) => input
            .streams()
            .any(|s| s.parameters().medium() == ffmpeg_next::util::media::Type::Video),
        Err(_) => false,
    }
}

fn collect_video_files(dir: &Path, full: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_video_files(&path, full, out)?;
        } else if has_supported_extension(&path) && is_valid_video_file(&path, full) {
            out.push(path);
        }
    }

    Ok(())
}

/// Expands the given paths into a sorted list of video files.
///
/// Directories are walked recursively and only files with one of the [SUPPORTED_EXTENSIONS]
/// are considered. Files passed in explicitly skip the extension check, but are still validated.
pub fn find_video_files(paths: &[PathBuf], full: bool) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(Error::PathNotFound(path.clone()));
        }
        if path.is_dir() {
            collect_video_files(path, full, &mut videos)?;
        } else if is_valid_video_file(path, full) {
            videos.push(path.clone());
        } else {
            tracing::warn!("skipping {}: not a valid video file", path.display());
        }
    }

    videos.sort();
    videos.dedup();

    Ok(videos)
}

pub(crate) fn compute_header_md5sum(video: impl AsRef<Path>) -> Result<String> {
    let buf = read_header(video.as_ref())?;
    let hash = format!("{:x}", md5::compute(&buf));
    Ok(hash)
}

/// Returns the underlying FFmpeg version integer.
pub fn ffmpeg_version() -> u32 {
    ffmpeg_next::util::version()
}

/// Returns the underlying FFmpeg version string.
pub fn ffmpeg_version_string() -> String {
    let version_int = ffmpeg_version();

    // Reference: https://github.com/FFmpeg/FFmpeg/blob/130d19bf2044ac76372d1b97ab87ab283c8b37f8/libavutil/version.h#L64
    format!(
        "{}.{}.{}",
        version_int >> 16,             // MAJOR
        (version_int & 0x00FF00) >> 8, // MINOR
        version_int & 0xFF             // MICRO
    )
}
