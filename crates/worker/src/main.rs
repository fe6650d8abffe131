#![forbid(unsafe_code)]

use pr_core::Config;
use pr_storage::SqliteQueue;
use pr_worker::{
    ProcessOutcome, QueueProcessor, SubmitPolicy, TaskOutcome, TaskRunner, TracingStat,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_STORAGE_DIR: &str = ".prism";
const DEFAULT_CONFIG_FILE: &str = "prism.json";
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Queue,
    Discover,
    Apply,
    All,
}

impl Mode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queue" => Some(Self::Queue),
            "discover" => Some(Self::Discover),
            "apply" => Some(Self::Apply),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn queue(self) -> bool {
        matches!(self, Self::Queue | Self::All)
    }

    fn discover(self) -> bool {
        matches!(self, Self::Discover | Self::All)
    }

    fn apply(self) -> bool {
        matches!(self, Self::Apply | Self::All)
    }
}

#[derive(Debug)]
struct WorkerConfig {
    storage_dir: PathBuf,
    config_path: PathBuf,
    mode: Mode,
    poll_ms: u64,
    worker_id: String,
    once: bool,
    requeue_stale_ms: Option<u64>,
    submit_attempts: u32,
    submit_backoff_ms: u64,
}

fn usage() -> &'static str {
    "pr_worker: keep table rows, views and search documents in step with graph changes\n\n\
USAGE:\n\
  pr_worker [--storage-dir DIR] [--config FILE] [--mode queue|discover|apply|all]\n\
            [--poll-ms MS] [--worker-id ID] [--once]\n\
            [--submit-attempts N] [--submit-backoff-ms MS]\n\
  pr_worker --requeue-stale-ms MS [--storage-dir DIR]\n\n\
NOTES:\n\
  - Environment fallbacks: PRISM_STORAGE_DIR, PRISM_CONFIG, PRISM_MODE, PRISM_POLL_MS,\n\
    PRISM_WORKER_ID. Log filtering follows RUST_LOG.\n\
  - `--requeue-stale-ms` puts `processing` items untouched for MS back to `queued`\n\
    and exits; the worker loop never does this on its own.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_args() -> Result<WorkerConfig, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut storage_dir: Option<PathBuf> = env_var("PRISM_STORAGE_DIR").map(PathBuf::from);
    let mut config_path: Option<PathBuf> = env_var("PRISM_CONFIG").map(PathBuf::from);
    let mut mode = match env_var("PRISM_MODE") {
        Some(raw) => Mode::parse(&raw).ok_or("PRISM_MODE must be queue, discover, apply or all")?,
        None => Mode::All,
    };
    let mut poll_ms: u64 = env_var("PRISM_POLL_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);
    let mut worker_id: Option<String> = env_var("PRISM_WORKER_ID");
    let mut once = false;
    let mut requeue_stale_ms: Option<u64> = None;
    let defaults = SubmitPolicy::default();
    let mut submit_attempts = defaults.attempts;
    let mut submit_backoff_ms = u64::try_from(defaults.backoff.as_millis()).unwrap_or(1000);

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            "--config" => {
                i += 1;
                let v = args.get(i).ok_or("--config requires FILE")?;
                config_path = Some(PathBuf::from(v));
            }
            "--mode" => {
                i += 1;
                let v = args.get(i).ok_or("--mode requires queue|discover|apply|all")?;
                mode = Mode::parse(v).ok_or("--mode must be queue, discover, apply or all")?;
            }
            "--poll-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--poll-ms requires MS")?;
                poll_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--poll-ms must be an integer (milliseconds)")?;
            }
            "--worker-id" => {
                i += 1;
                let v = args.get(i).ok_or("--worker-id requires ID")?;
                worker_id = Some(v.to_string());
            }
            "--once" => once = true,
            "--requeue-stale-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--requeue-stale-ms requires MS")?;
                requeue_stale_ms = Some(
                    v.parse::<u64>()
                        .map_err(|_| "--requeue-stale-ms must be an integer (milliseconds)")?,
                );
            }
            "--submit-attempts" => {
                i += 1;
                let v = args.get(i).ok_or("--submit-attempts requires N")?;
                submit_attempts = v
                    .parse::<u32>()
                    .map_err(|_| "--submit-attempts must be an integer")?;
            }
            "--submit-backoff-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--submit-backoff-ms requires MS")?;
                submit_backoff_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--submit-backoff-ms must be an integer (milliseconds)")?;
            }
            other => return Err(format!("Unknown arg: {other}\n\n{}", usage())),
        }
        i += 1;
    }

    Ok(WorkerConfig {
        storage_dir: storage_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
        config_path: config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
        mode,
        poll_ms: poll_ms.max(10),
        worker_id: worker_id.unwrap_or_else(|| format!("pr_worker:{}", std::process::id())),
        once,
        requeue_stale_ms,
        submit_attempts: submit_attempts.max(1),
        submit_backoff_ms,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = match parse_args() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let span = tracing::info_span!("worker", worker_id = %cfg.worker_id, pid = std::process::id());
    let _entered = span.enter();

    let stat = Arc::new(TracingStat);
    let mut queue = SqliteQueue::open(&cfg.storage_dir)?.with_stat(stat.clone());

    if let Some(older_than_ms) = cfg.requeue_stale_ms {
        let requeued = queue.requeue_stale(older_than_ms)?;
        tracing::info!(requeued, older_than_ms, "requeued stale items");
        println!("{requeued}");
        return Ok(());
    }

    let config = Config::load(&cfg.config_path)?;
    let processor = QueueProcessor::new(&config, &cfg.storage_dir);
    let runner = TaskRunner {
        storage_dir: &cfg.storage_dir,
        stat,
        policy: SubmitPolicy {
            attempts: cfg.submit_attempts,
            backoff: Duration::from_millis(cfg.submit_backoff_ms),
        },
    };
    tracing::info!(
        mode = ?cfg.mode,
        storage_dir = %cfg.storage_dir.display(),
        config = %cfg.config_path.display(),
        "worker started"
    );

    loop {
        let mut claimed = false;
        let mut failed_infra = false;

        if cfg.mode.queue() {
            match processor.process_next(&mut queue) {
                Ok(ProcessOutcome::Empty) => {}
                Ok(_) => claimed = true,
                Err(err) => {
                    tracing::error!(error = %err, "work queue unavailable");
                    failed_infra = true;
                }
            }
        }
        for (enabled, queue_name) in [
            (cfg.mode.discover(), config.queues.discover.as_str()),
            (cfg.mode.apply(), config.queues.apply.as_str()),
        ] {
            if !enabled {
                continue;
            }
            match runner.run_next(&mut queue, queue_name) {
                Ok(TaskOutcome::Empty) => {}
                Ok(_) => claimed = true,
                Err(err) => {
                    tracing::error!(queue = queue_name, error = %err, "task queue unavailable");
                    failed_infra = true;
                }
            }
        }

        if cfg.once {
            break;
        }
        if failed_infra {
            sleep(ERROR_BACKOFF);
        } else if !claimed {
            sleep(Duration::from_millis(cfg.poll_ms));
        }
    }
    Ok(())
}
