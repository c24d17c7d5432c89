mod cookies;
mod download;
mod engine;
mod error;
mod extract;
mod file;
mod options;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use download::key::KeySource;
use error::Result;
use extract::{Request, Selection};
use options::Options;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(subcommand)]
    subcmd: SubCmd,

    #[clap(short, long, default_value = "4")]
    /// number of workers downloading segments in parallel
    workers: usize,

    #[clap(short, long)]
    /// file with authentication cookies (Netscape cookies.txt format)
    cookies: Option<PathBuf>,

    #[clap(short, long)]
    /// HTTP referer, defaults to the directory of the playlist URL
    referer: Option<String>,

    #[clap(long)]
    /// leave out segments that failed to download instead of aborting
    skip_missing: bool,

    #[clap(long)]
    /// directory in which the temporary segments directory is created
    temp_dir: Option<PathBuf>,

    #[clap(long)]
    /// enable debug logs
    debug: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about)]
enum SubCmd {
    /// Extract a single stream from a playlist url
    Extract {
        #[clap(short, long, value_parser = url_parser)]
        /// url of the master playlist (or of the media playlist with --media)
        url: Url,

        #[clap(short, long, default_value = "video.mp4")]
        /// output file
        output: PathBuf,

        #[clap(short, long)]
        /// AES key, base64 encoded or an http(s) url to fetch it from
        key: Option<String>,

        #[clap(short = 's', long)]
        /// treat the url as a media playlist and skip variant selection
        media: bool,

        #[clap(long)]
        /// variant index to download instead of asking
        variant: Option<usize>,
    },
    /// Extract every stream listed in a json file
    Batch {
        #[clap(default_value = "download.json")]
        /// json file with entries of url, output and optional variant, mediaPlaylist and key
        file: PathBuf,
    },
}

fn url_parser(url: &str) -> std::result::Result<Url, String> {
    if !url.starts_with("http") {
        return Err("URL must start with http or https".to_string());
    }
    Url::parse(url).map_err(|err| err.to_string())
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let cookies = match &args.cookies {
        Some(path) => cookies::load_cookie_file(path)?,
        None => Vec::new(),
    };

    let options = Options {
        workers: args.workers,
        referer: args.referer,
        cookies,
        skip_missing: args.skip_missing,
        temp_dir: args.temp_dir,
    };
    debug!(
        workers = options.workers,
        cookies = options.cookies.len(),
        referer = ?options.referer,
        "options"
    );

    match args.subcmd {
        SubCmd::Extract {
            url,
            output,
            key,
            media,
            variant,
        } => {
            let key = match key.as_deref() {
                Some(key) => KeySource::from_arg(key)?,
                None => {
                    info!("no AES key given, using the keys named by the playlist");
                    KeySource::Playlist
                }
            };
            let request = Request {
                url,
                output,
                key,
                media_playlist: media,
                selection: variant.map_or(Selection::Prompt, Selection::Index),
            };
            extract::extract(&request, &options).await
        }
        SubCmd::Batch { file } => {
            let summary = file::download_file(&file, &options).await?;
            info!(
                completed = summary.completed,
                skipped = summary.skipped,
                failed = summary.failed,
                "finished reading {}",
                file.display()
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
