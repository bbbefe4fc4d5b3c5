//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download media files referenced by URLs into a local directory.
///
/// URLs come from positional arguments, a catalog file (JSON array or one URL
/// per line), or stdin. Each URL becomes one queued, cancellable download;
/// Ctrl-C cancels everything still running.
#[derive(Parser, Debug)]
#[command(name = "video-dl")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Catalog file with items to download
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// JSON config file with default options
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory downloads are written to
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Preferred quality label for catalog items that declare one
    #[arg(long, value_name = "QUALITY")]
    pub quality: Option<String>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Largest accepted response body in bytes
    #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_size: Option<u64>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["video-dl"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.concurrency.is_none());
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn test_cli_positional_urls_and_options() {
        let args = Args::try_parse_from([
            "video-dl",
            "-o",
            "/tmp/videos",
            "--quality",
            "hd720",
            "-c",
            "2",
            "https://example.com/a.mp4",
            "https://example.com/b.mp4",
        ])
        .unwrap();
        assert_eq!(args.urls.len(), 2);
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/videos")));
        assert_eq!(args.quality.as_deref(), Some("hd720"));
        assert_eq!(args.concurrency, Some(2));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["video-dl", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["video-dl", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["video-dl", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_concurrency_out_of_range_rejected() {
        assert!(Args::try_parse_from(["video-dl", "-c", "0"]).is_err());
        assert!(Args::try_parse_from(["video-dl", "-c", "101"]).is_err());
        assert!(Args::try_parse_from(["video-dl", "-c", "100"]).is_ok());
    }

    #[test]
    fn test_cli_max_size_must_be_positive() {
        assert!(Args::try_parse_from(["video-dl", "--max-size", "0"]).is_err());
        let args = Args::try_parse_from(["video-dl", "--max-size", "1048576"]).unwrap();
        assert_eq!(args.max_size, Some(1_048_576));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["video-dl", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
