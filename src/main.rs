use clap::{Parser, Subcommand};
use photo_compose::config::{self, WorkerConfig};
use photo_compose::fetch::DefaultFetcher;
use photo_compose::imaging::{FontBook, Quality, TextRenderer};
use photo_compose::logsink::{FlushTimer, LogSink, LogSinkLayer};
use photo_compose::pipeline::Composer;
use photo_compose::queue::{Job, SpoolQueue};
use photo_compose::remote::{FtpStore, LocalDirStore, RemoteStore};
use photo_compose::task::{RetryPolicy, ThreadSleeper};
use photo_compose::{output, worker::Worker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "photo-compose")]
#[command(about = "Template-driven photo composition worker")]
#[command(long_about = "\
Template-driven photo composition worker

Jobs are JSON files describing a composition: a background template,
foreground photo layers (crop, rotation, filter, width and position in
percent), text blocks, and a remote destination path. The worker composes
each job, encodes it as JPEG and uploads it over FTP.

Job layout:

  {
    \"type\": \"compose\",
    \"template\": \"https://cdn.example.com/templates/class.jpg\",
    \"layers\": [
      {\"source\": \"https://cdn.example.com/p/1.jpg\", \"width_pct\": 30,
       \"x_pct\": 10, \"y_pct\": 20, \"rotation_deg\": 5, \"filter\": \"nb\"}
    ],
    \"text\": [{\"text\": \"Class of 2024\", \"font\": \"avenir\", \"size\": 40,
              \"color\": \"ffffff\", \"x_pct\": 50, \"y_pct\": 90}],
    \"output_width\": 2000,
    \"destination\": \"/2024/class.jpg\"
  }

Run 'photo-compose gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Worker configuration file
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Job spool directory
    #[arg(long, default_value = "spool", global = true)]
    spool: PathBuf,

    /// Deliver into this local directory instead of the FTP server
    #[arg(long, global = true, value_name = "DIR")]
    dry_run: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every pending job in the spool
    Worker {
        /// Keep polling the spool after it is drained
        #[arg(long)]
        watch: bool,
        /// Poll interval for --watch, in seconds
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
    },
    /// Add a job file to the spool
    Enqueue { job: PathBuf },
    /// Run one job file immediately, with retries, bypassing the spool
    Compose { job: PathBuf },
    /// Delete all pending jobs
    Purge,
    /// Show spool counts and sample job ids
    Status,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Worker { watch, poll_secs } => {
            let services = Services::start(&cli.config, cli.dry_run.as_deref())?;
            let queue = SpoolQueue::open(&cli.spool)?;
            queue.recover_active()?;
            let sleeper = ThreadSleeper;
            let worker = services.worker(&sleeper);
            let report = if watch {
                let stop = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&stop);
                ctrlc::set_handler(move || {
                    tracing::info!("stop requested, finishing current job");
                    flag.store(true, Ordering::Relaxed);
                })?;
                worker.watch(&queue, Duration::from_secs(poll_secs), &stop)
            } else {
                worker.drain(&queue)
            };
            services.shutdown();
            output::print_drain_report(&report?);
        }
        Command::Compose { job } => {
            let job = read_job(&job)?;
            let services = Services::start(&cli.config, cli.dry_run.as_deref())?;
            let sleeper = ThreadSleeper;
            let result = services.worker(&sleeper).run_job(&job);
            services.shutdown();
            let (delivery, attempts) = result?;
            output::print_delivery(&delivery, attempts);
        }
        Command::Enqueue { job } => {
            init_console_logging();
            let job = read_job(&job)?;
            let queue = SpoolQueue::open(&cli.spool)?;
            println!("{}", queue.enqueue(job)?);
        }
        Command::Purge => {
            init_console_logging();
            let removed = SpoolQueue::open(&cli.spool)?.purge()?;
            println!("Purged {} pending job(s)", removed);
        }
        Command::Status => {
            let queue = SpoolQueue::open(&cli.spool)?;
            output::print_status(queue.root(), &queue.status()?);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Long-lived collaborators for the `worker` and `compose` commands.
struct Services {
    config: WorkerConfig,
    store: Arc<dyn RemoteStore>,
    sink: LogSink,
    timer: FlushTimer,
    fetcher: DefaultFetcher,
    renderer: TextRenderer,
}

impl Services {
    fn start(config_path: &Path, dry_run: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = config::load_config(config_path)?;
        let store: Arc<dyn RemoteStore> = match dry_run {
            Some(dir) => Arc::new(LocalDirStore::new(dir)),
            None => Arc::new(FtpStore::new(&config.remote)),
        };

        let sink = LogSink::new(Arc::clone(&store), &config.log_sink);
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .with(LogSinkLayer::new(sink.clone(), config.log_sink.level()))
            .init();
        let timer = sink.spawn_timer();

        init_thread_pool(&config.processing);
        let fetcher = DefaultFetcher::new(config.fetch.timeout())?;
        let renderer = TextRenderer::new(FontBook::load(&config.fonts.directory));
        tracing::info!(
            store = %store.describe(),
            fonts = renderer.fonts().loaded(),
            "worker ready"
        );

        Ok(Self {
            config,
            store,
            sink,
            timer,
            fetcher,
            renderer,
        })
    }

    fn worker<'a>(&'a self, sleeper: &'a ThreadSleeper) -> Worker<'a> {
        Worker {
            composer: Composer {
                fetcher: &self.fetcher,
                renderer: &self.renderer,
                store: self.store.as_ref(),
                staging_dir: self.config.output.staging_dir(),
                quality: Quality::new(self.config.output.jpeg_quality),
            },
            policy: RetryPolicy::from(&self.config.retry),
            sleeper,
        }
    }

    /// Stop the flush timer and push whatever is still buffered.
    fn shutdown(self) {
        self.timer.cancel();
        if let Err(e) = self.sink.flush() {
            eprintln!("log sink: final flush failed: {e}");
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

fn init_console_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn read_job(path: &Path) -> Result<Job, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; config can lower it, not raise it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
