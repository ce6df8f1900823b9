use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, CommandFactory, ErrorKind, Parser, Subcommand};

use refrain::evaluate;
use refrain::intro::{self, DetectionResult, Detector};
use refrain::util;

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(after_help = "Displays info about refrain and its dependencies.")]
    Info,

    #[clap(
        arg_required_else_help = true,
        after_help = "Decode one or more video files into a timeline of frame fingerprints. The timeline is written to disk alongside each analyzed video file, and can be reused by the 'detect' command with --use-cache."
    )]
    Analyze {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Video files or directories to analyze."
        )]
        paths: Vec<PathBuf>,

        #[clap(
            long,
            default_value_t = intro::DEFAULT_SAMPLING_RATE,
            value_parser = clap::value_parser!(f64),
            help = "Number of frames to fingerprint per second of video. Raising this number can improve the accuracy of the result, at the cost of performance (the search is quadratic in the number of samples)."
        )]
        sampling_rate: f64,

        #[clap(
            long,
            default_value_t = intro::DEFAULT_HASH_SIZE,
            value_parser = clap::value_parser!(u32),
            help = "Frames are downscaled to hash_size x hash_size before fingerprinting. Must be between 8 and 256."
        )]
        hash_size: u32,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Enable multi-threaded decoding in FFmpeg."
        )]
        threaded_decoding: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Re-analyze all videos and ignore any existing timelines on disk."
        )]
        force: bool,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Search each video for a repeated sequence of frames (the intro). Results for all videos are written to a single JSON file keyed by file name."
    )]
    Detect {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Video files or directories to search for intros in."
        )]
        paths: Vec<PathBuf>,

        #[clap(
            short,
            long,
            default_value = "detected_intros.json",
            value_parser = clap::value_parser!(PathBuf),
            help = "Path of the JSON file to write results to."
        )]
        output: PathBuf,

        #[clap(
            long,
            default_value_t = intro::DEFAULT_MIN_INTRO_LENGTH,
            value_parser = clap::value_parser!(f32),
            help = "Minimum intro duration, in seconds."
        )]
        min_length: f32,

        #[clap(
            long,
            default_value_t = intro::DEFAULT_MAX_INTRO_LENGTH,
            value_parser = clap::value_parser!(f32),
            help = "Maximum intro duration, in seconds. This also limits how far apart the two occurrences of the intro can start."
        )]
        max_length: f32,

        #[clap(
            long,
            default_value_t = intro::DEFAULT_SIMILARITY_THRESHOLD,
            value_parser = clap::value_parser!(f64),
            help = "Similarity above which two frames are considered a match. The range is 0 (no match) to 1 (exact match)."
        )]
        threshold: f64,

        #[clap(
            long,
            default_value_t = intro::DEFAULT_SAMPLING_RATE,
            value_parser = clap::value_parser!(f64),
            help = "Number of frames to fingerprint per second of video."
        )]
        sampling_rate: f64,

        #[clap(
            long,
            default_value_t = intro::DEFAULT_HASH_SIZE,
            value_parser = clap::value_parser!(u32),
            help = "Frames are downscaled to hash_size x hash_size before fingerprinting. Must be between 8 and 256."
        )]
        hash_size: u32,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Reuse timelines written by the 'analyze' command instead of decoding the videos again."
        )]
        use_cache: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Write the timeline of each decoded video to disk so later runs can use --use-cache."
        )]
        write_cache: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Enable multi-threaded decoding in FFmpeg."
        )]
        threaded_decoding: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Process videos in parallel."
        )]
        threading: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Do not display results of the search in stdout."
        )]
        no_display: bool,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Score the results of a previous 'detect' run against ground-truth annotations. A prediction counts as correct if its IoU with the annotation is above 0.5."
    )]
    Evaluate {
        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "JSON file written by the 'detect' command."
        )]
        predictions: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "JSON file with the expected start_time and end_time of each intro, keyed by file name."
        )]
        annotations: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "By default, video files are validated using FFmpeg, which is extremely accurate. Setting this flag will switch to just checking file headers."
    )]
    file_headers_only: bool,
}

impl Cli {
    fn validate(&self) {
        if let Some(msg) = self.invalid_value() {
            let mut cmd = Cli::command();
            cmd.error(ErrorKind::InvalidValue, msg).exit();
        }
    }

    // Comparisons are written so that NaN fails them.
    fn invalid_value(&self) -> Option<String> {
        let check_sampling = |sampling_rate: f64, hash_size: u32| {
            if !(sampling_rate > 0.0 && sampling_rate.is_finite()) {
                Some("sampling_rate must be a positive number".to_owned())
            } else if !(8..=intro::MAX_HASH_SIZE).contains(&hash_size) {
                Some(format!(
                    "hash_size must be between 8 and {}",
                    intro::MAX_HASH_SIZE
                ))
            } else {
                None
            }
        };

        match self.command {
            Commands::Info | Commands::Evaluate { .. } => None,
            Commands::Analyze {
                sampling_rate,
                hash_size,
                ..
            } => check_sampling(sampling_rate, hash_size),
            Commands::Detect {
                min_length,
                max_length,
                threshold,
                sampling_rate,
                hash_size,
                ..
            } => {
                if !(min_length >= 0.0 && max_length >= min_length && max_length.is_finite()) {
                    Some("min_length must be between 0 and max_length".to_owned())
                } else if !(0.0..=1.0).contains(&threshold) {
                    Some("threshold must be between 0 and 1".to_owned())
                } else {
                    check_sampling(sampling_rate, hash_size)
                }
            }
        }
    }

    fn find_video_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        match util::find_video_files(paths, !self.file_headers_only) {
            Err(e) => {
                let mut cmd = Cli::command();
                cmd.error(ErrorKind::InvalidValue, e.to_string()).exit();
            }
            Ok(v) if v.is_empty() => {
                let mut cmd = Cli::command();
                cmd.error(
                    ErrorKind::InvalidValue,
                    "no valid video files found in provided paths",
                )
                .exit();
            }
            Ok(v) => v,
        }
    }
}

fn display_results(results: &BTreeMap<String, DetectionResult>) {
    for (name, result) in results {
        println!("\n{}\n", name);
        match (result.found, result.start_time, result.end_time) {
            (true, Some(start), Some(end)) => println!(
                "* Intro - {}-{} (duration: {:.2}s, confidence: {:.3})",
                util::format_time(Duration::from_secs_f64(start)),
                util::format_time(Duration::from_secs_f64(end)),
                result.duration.unwrap_or(end - start),
                result.confidence.unwrap_or_default(),
            ),
            _ => println!("* Intro - N/A"),
        }
    }
}

fn main() -> refrain::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    ffmpeg_next::init()?;

    let args = Cli::parse();
    args.validate();

    match args.command {
        Commands::Analyze {
            sampling_rate,
            hash_size,
            threaded_decoding,
            force,
            ref paths,
        } => {
            let videos = args.find_video_files(paths);
            let detector = Detector::default()
                .with_sampling_rate(sampling_rate)
                .with_hash_size(hash_size)
                .with_threaded_decoding(threaded_decoding)
                .with_use_cache(!force);
            let analyzed = detector.analyze(&videos, true);
            println!("Analyzed {} of {} videos.", analyzed, videos.len());
        }
        Commands::Detect {
            ref output,
            min_length,
            max_length,
            threshold,
            sampling_rate,
            hash_size,
            use_cache,
            write_cache,
            threaded_decoding,
            threading,
            no_display,
            ref paths,
        } => {
            let videos = args.find_video_files(paths);
            println!("Found {} video files to process.", videos.len());

            let detector = Detector::default()
                .with_min_intro_length(Duration::from_secs_f32(min_length))
                .with_max_intro_length(Duration::from_secs_f32(max_length))
                .with_similarity_threshold(threshold)
                .with_sampling_rate(sampling_rate)
                .with_hash_size(hash_size)
                .with_threaded_decoding(threaded_decoding)
                .with_use_cache(use_cache)
                .with_write_cache(write_cache);
            let results = detector.run(&videos, threading);

            if !no_display {
                display_results(&results);
            }

            let f = std::fs::File::create(output)?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(f), &results)?;
            println!("\nResults written to {}", output.display());
        }
        Commands::Evaluate {
            ref predictions,
            ref annotations,
        } => {
            let predictions = evaluate::load_predictions(predictions)?;
            let annotations = evaluate::load_annotations(annotations)?;
            let metrics = evaluate::evaluate(&predictions, &annotations);
            println!("Accuracy: {:.4}", metrics.accuracy);
            println!("Mean IoU: {:.4}", metrics.mean_iou);
            println!("Correct: {}/{}", metrics.correct, metrics.total);
        }
        Commands::Info => {
            println!("FFmpeg version: {}", util::ffmpeg_version_string());
        }
    }

    Ok(())
}
