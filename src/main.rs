use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod downloader;
mod error;
mod paster;
mod png;
mod server;
mod utils;

use config::{
    DEFAULT_FRAGMENT_HEADER, DEFAULT_FRAGMENTS, DEFAULT_MIRRORS, DEFAULT_OUTPUT, FetchConfig,
    RetryConfig,
};

#[derive(Parser)]
#[command(name = "pngfetch")]
#[command(about = "Fetch PNG fragments from mirrors in parallel and stitch them together")]
#[command(version = "1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(short = 't', long, help = "worker count", default_value_t = 1)]
    threads: usize,
    #[arg(short = 'n', long, help = "image id", default_value_t = 1)]
    image: u32,
    #[arg(long = "mirror", help = "mirror base URL, repeatable")]
    mirrors: Vec<String>,
    #[arg(long, help = "fragments per image", default_value_t = DEFAULT_FRAGMENTS)]
    fragments: usize,
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    #[arg(long, help = "directory for downloaded fragments", default_value = ".")]
    work_dir: PathBuf,
    #[arg(long, help = "retries per request", default_value_t = 5)]
    max_retries: u32,
    #[arg(long, help = "per-request timeout", default_value_t = 30)]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Stack local PNG fragments top to bottom
    Cat {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,
    },
    /// Serve fragments from a directory like a mirror
    Serve {
        #[arg(short, long, help = "directory holding 0.png, 1.png, ...")]
        dir: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        #[arg(short, long, default_value_t = 2520)]
        port: u16,
        #[arg(long, default_value_t = DEFAULT_FRAGMENTS)]
        fragments: usize,
    },
}

impl Cli {
    fn fetch_config(&self) -> FetchConfig {
        let mirrors = if self.mirrors.is_empty() {
            DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect()
        } else {
            self.mirrors.clone()
        };
        FetchConfig {
            mirrors,
            image: self.image,
            threads: self.threads,
            fragments: self.fragments,
            work_dir: self.work_dir.clone(),
            output: self.output.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryConfig {
                max_retries: self.max_retries,
                ..RetryConfig::default()
            },
            ..FetchConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Cat { files, output }) => {
            let files = files.clone();
            let output = output.clone();
            let header =
                tokio::task::spawn_blocking(move || paster::paste(&files, &output, false))
                    .await??;
            info!(width = header.width, height = header.height, "done");
        }
        Some(Commands::Serve {
            dir,
            address,
            port,
            fragments,
        }) => {
            server::startup(
                dir.clone(),
                address.clone(),
                *port,
                *fragments,
                DEFAULT_FRAGMENT_HEADER.to_string(),
            )
            .await?;
        }
        None => {
            let config = cli.fetch_config();
            let output = config.output.clone();
            let header = downloader::fetch(config).await?;
            info!(
                width = header.width,
                height = header.height,
                output = %output.display(),
                "done"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::fragment_path;
    use crate::png::test_util::fragment;
    use crate::png::{SimplePng, is_png};
    use std::sync::Arc;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["pngfetch"]).unwrap();
        let config = cli.fetch_config();
        assert_eq!(config.threads, 1);
        assert_eq!(config.image, 1);
        assert_eq!(config.mirrors.len(), 3);
        assert_eq!(config.output, PathBuf::from("all.png"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_threads_and_image() {
        let cli = Cli::try_parse_from(["pngfetch", "-t", "5", "-n", "3"]).unwrap();
        let config = cli.fetch_config();
        assert_eq!(config.threads, 5);
        assert_eq!(config.image, 3);
        assert!(config.mirrors[0].starts_with("http://ece252-1"));
    }

    #[test]
    fn test_cli_cat_requires_files() {
        assert!(Cli::try_parse_from(["pngfetch", "cat"]).is_err());
        let cli = Cli::try_parse_from(["pngfetch", "cat", "a.png", "b.png", "-o", "x.png"]).unwrap();
        match cli.command {
            Some(Commands::Cat { files, output }) => {
                assert_eq!(files.len(), 2);
                assert_eq!(output, PathBuf::from("x.png"));
            }
            _ => panic!("expected cat"),
        }
    }

    /// Five workers against a mirror cycling through fifty fragments.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fetch_end_to_end() {
        let served = tempfile::tempdir().unwrap();
        let mut raws = Vec::new();
        let mut heights = 0;
        for i in 0..50 {
            let height = 1 + (i % 3) as u32;
            let (bytes, raw) = fragment(4, height, i as u8);
            std::fs::write(fragment_path(served.path(), i), bytes).unwrap();
            raws.push(raw);
            heights += height;
        }

        let state = Arc::new(
            server::mirror::MirrorState::from_dir(served.path(), 50, DEFAULT_FRAGMENT_HEADER)
                .unwrap(),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, server::mirror::build_app(state))
                .await
                .unwrap();
        });

        let work = tempfile::tempdir().unwrap();
        let config = FetchConfig {
            mirrors: vec![format!("http://{}/image", addr)],
            threads: 5,
            fragments: 50,
            work_dir: work.path().to_path_buf(),
            output: work.path().join("all.png"),
            ..FetchConfig::default()
        };

        let header = downloader::fetch(config).await.unwrap();

        assert_eq!(header.height, heights);
        assert_eq!(header.width, 4);
        let bytes = std::fs::read(work.path().join("all.png")).unwrap();
        assert!(is_png(&bytes));
        let png = SimplePng::parse(&bytes).unwrap();
        assert_eq!(png.decode_scanlines().unwrap(), raws.concat());
        for i in 0..50 {
            assert!(!fragment_path(work.path(), i).exists());
        }
    }
}
