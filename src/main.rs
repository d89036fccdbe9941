use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use video_archiver::coordinator::delete_from_library;
use video_archiver::media::FfmpegTool;
use video_archiver::pipeline::tag_file;
use video_archiver::player::{MpvPlayer, play_from_library};
use video_archiver::{
    BatchSource, Catalog, Config, Coordinator, Database, DesktopNotifier, DownloadOutcome, Error,
    Metadata, Notifier, Result, cancel_on_signal,
};

/// Archive videos into a tagged local library
#[derive(Debug, Parser)]
#[command(name = "video-archiver", version, about)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["url", "file", "feed", "delete", "prune", "tag", "play"])
))]
struct Cli {
    /// Video page to download
    url: Option<String>,

    /// Download every URL listed in a file (`#` and `//` lines are ignored)
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Download the unread items of a feed
    #[arg(long, value_name = "FEED_URL")]
    feed: Option<String>,

    /// With --feed, include items already marked read
    #[arg(long, requires = "feed")]
    all: bool,

    /// Remove a video and its catalog entry
    #[arg(long, value_name = "URL")]
    delete: Option<String>,

    /// Drop catalog entries whose files no longer exist
    #[arg(long)]
    prune: bool,

    /// Play a video from the library, or stream it if it is not there
    #[arg(long, value_name = "URL")]
    play: Option<String>,

    /// Embed metadata into an existing file
    #[arg(long, num_args = 5, value_names = ["INPUT", "OUTPUT", "URL", "TITLE", "ARTIST"])]
    tag: Option<Vec<String>>,

    /// Configuration file (default: <config_dir>/video-archiver/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

enum Action {
    Download(String),
    Batch(BatchSource),
    Delete(String),
    Prune,
    Play(String),
    Tag {
        input: PathBuf,
        output: PathBuf,
        metadata: Metadata,
    },
}

impl Cli {
    fn action(self) -> Result<Action> {
        if let Some(url) = self.url {
            return Ok(Action::Download(url));
        }
        if let Some(path) = self.file {
            return Ok(Action::Batch(BatchSource::File(path)));
        }
        if let Some(url) = self.feed {
            return Ok(Action::Batch(BatchSource::Feed {
                url,
                include_read: self.all,
            }));
        }
        if let Some(url) = self.delete {
            return Ok(Action::Delete(url));
        }
        if self.prune {
            return Ok(Action::Prune);
        }
        if let Some(url) = self.play {
            return Ok(Action::Play(url));
        }
        match self.tag.as_deref() {
            Some([input, output, url, title, artist]) => Ok(Action::Tag {
                input: PathBuf::from(input),
                output: PathBuf::from(output),
                metadata: Metadata::new(url, title, artist),
            }),
            _ => Err(Error::InvalidArguments(
                "expected a URL, --file, --feed, --delete, --prune, --play or --tag".to_string(),
            )),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            // --help / --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "video-archiver failed");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            DesktopNotifier::detect()
                .notify("Error", &format!("Invalid configuration: {}", e))
                .await;
            return Err(e);
        }
    };
    let notifier = DesktopNotifier::from_config(&config.notifications);

    match cli.action()? {
        Action::Download(url) => {
            let coordinator = open_coordinator(&config, &notifier).await?;
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_signal(cancel.clone()));

            let result = coordinator.download_one(&url, &cancel).await;
            coordinator.close().await;

            match result? {
                DownloadOutcome::Downloaded(path) | DownloadOutcome::AlreadyDownloaded(path) => {
                    println!("{}", path.display());
                }
                DownloadOutcome::InProgressElsewhere => {}
            }
            Ok(ExitCode::SUCCESS)
        }
        Action::Batch(source) => {
            let coordinator = open_coordinator(&config, &notifier).await?;
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_signal(cancel.clone()));

            let result = coordinator.run_batch(source, &cancel).await;
            coordinator.close().await;

            let summary = result?;
            println!("{}", summary);
            if summary.cancelled {
                return Err(Error::Cancelled);
            }
            Ok(ExitCode::SUCCESS)
        }
        Action::Delete(url) => {
            let db = Arc::new(Database::new(&config.database_path()).await?);
            let catalog = Catalog::new(db.clone());
            let deleted = delete_from_library(&catalog, &notifier, &url).await;
            db.pool().close().await;

            Ok(match deleted? {
                Some(entry) => {
                    println!("{}", entry.path.display());
                    ExitCode::SUCCESS
                }
                None => ExitCode::FAILURE,
            })
        }
        Action::Prune => {
            let db = Arc::new(Database::new(&config.database_path()).await?);
            let pruned = Catalog::new(db.clone()).prune().await;
            db.pool().close().await;

            println!("pruned {} entries", pruned?);
            Ok(ExitCode::SUCCESS)
        }
        Action::Play(url) => {
            let player = match MpvPlayer::from_config(&config.tools) {
                Ok(player) => player,
                Err(e) => {
                    notifier.notify("Error", &e.to_string()).await;
                    return Err(e);
                }
            };
            let db = Arc::new(Database::new(&config.database_path()).await?);
            let catalog = Catalog::new(db.clone());
            let played = play_from_library(&catalog, &player, &notifier, &url).await;
            db.pool().close().await;

            played?;
            Ok(ExitCode::SUCCESS)
        }
        Action::Tag {
            input,
            output,
            metadata,
        } => {
            let media = FfmpegTool::from_config(&config.tools)?;
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_signal(cancel.clone()));

            if let Err(e) = tag_file(&media, &input, &output, &metadata, &cancel).await {
                if !e.is_cancelled() {
                    notifier
                        .notify("Error", &format!("{}: {}", metadata.title, e))
                        .await;
                }
                return Err(e);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn open_coordinator(config: &Config, notifier: &DesktopNotifier) -> Result<Coordinator> {
    match Coordinator::from_config(config).await {
        Ok(coordinator) => Ok(coordinator),
        Err(e) => {
            notifier.notify("Error", &e.to_string()).await;
            Err(e)
        }
    }
}
