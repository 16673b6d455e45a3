use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::Result;
use image::DynamicImage;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hunter::domain::entities::{LoadedFrom, Tag};
use hunter::domain::errors::HuntError;
use hunter::domain::ports::Target;
use hunter::infrastructure::{CliArgs, ConfigStorage, PipelineConfig, build_pipeline};

const PAUSE_DEMO_DELAY: Duration = Duration::from_millis(500);

fn init_logging(config: &PipelineConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

/// Prints the outcome of one resource and reports it as finished.
struct PrintingTarget {
    resource: String,
    done: mpsc::UnboundedSender<()>,
}

impl Target for PrintingTarget {
    fn on_success(&self, image: Arc<DynamicImage>, loaded_from: LoadedFrom) {
        println!(
            "{}: {}x{} from {loaded_from}",
            self.resource,
            image.width(),
            image.height()
        );
        let _ = self.done.send(());
    }

    fn on_error(&self, error: &HuntError, will_replay: bool) {
        if will_replay {
            println!("{}: {error} (will replay when back online)", self.resource);
        } else {
            println!("{}: {error}", self.resource);
        }
        let _ = self.done.send(());
    }
}

fn load_config() -> Result<(PipelineConfig, CliArgs)> {
    let args = CliArgs::parse();
    let storage = ConfigStorage::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(&args);
    Ok((config, args))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let (config, args) = load_config()?;
    init_logging(&config)?;
    info!(version = hunter::VERSION, "Starting hunter");

    let pipeline = build_pipeline(&config).await?;
    let tag = args.tag.as_deref().map(Tag::named);
    if args.pause_first
        && let Some(tag) = &tag
    {
        pipeline.pause_tag(tag.clone());
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut targets: Vec<Arc<dyn Target>> = Vec::with_capacity(args.resources.len());
    for resource in &args.resources {
        let request = match args.build_request(resource) {
            Ok(request) => request,
            Err(e) => {
                warn!(resource = %resource, error = %e, "skipping invalid request");
                println!("{resource}: {e}");
                continue;
            }
        };
        let target: Arc<dyn Target> = Arc::new(PrintingTarget {
            resource: resource.clone(),
            done: done_tx.clone(),
        });
        pipeline.load(request, &target).await;
        targets.push(target);
    }
    drop(done_tx);

    if args.pause_first
        && let Some(tag) = tag
    {
        tokio::time::sleep(PAUSE_DEMO_DELAY).await;
        println!("resuming tag {tag}");
        pipeline.resume_tag(tag);
    }

    for _ in 0..targets.len() {
        if done_rx.recv().await.is_none() {
            break;
        }
    }

    println!("{}", pipeline.stats());
    pipeline.shutdown_and_wait().await;
    Ok(())
}
