//! dist-tracker CLI: operator tooling for checking an ingestion setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dist_tracker::Tracker;
use dist_tracker::clock::{Clock, SystemClock};
use dist_tracker::config::{Config, Manifest};
use dist_tracker::dispatch::{Dispatcher, MemorySink};
use dist_tracker::emitter::Emitter;
use dist_tracker::model::{Benefit, DeviceContext, ElementInfo, EventEnvelope, PageContext};
use dist_tracker::payload::{EventDetail, EventPayloadBuilder};
use dist_tracker::sequence::SequenceCounter;
use dist_tracker::session::SessionContext;
use dist_tracker::store::{FileStore, Store};
use dist_tracker::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "dist-tracker", about = "Distributor SDK event tracker")]
struct Cli {
    /// Bundled manifest (TOML) consulted after env vars
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,
    /// Device store holding sequence, session and config overrides
    #[arg(long, global = true, default_value = "dist-tracker-store.json")]
    store: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved configuration
    Config,
    /// Send one pageview and wait for the response
    Pageview {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        /// Benefit id for benefit detail pages
        #[arg(long)]
        benefit_id: Option<String>,
        #[arg(long, default_value = "")]
        benefit_name: String,
    },
    /// Send one click and wait for the response
    Click {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        element_id: String,
        #[arg(long, default_value = "")]
        text: String,
        #[arg(long, default_value = "button")]
        tag: String,
    },
    /// Run a tracker against a synthetic visit, then shut it down
    Simulate {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        /// How long the visit lasts
        #[arg(long, default_value_t = 12)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let store: Arc<dyn Store> = Arc::new(FileStore::open(&cli.store)?);
    let manifest = cli.manifest.as_deref().map(Manifest::load).transpose()?;
    let config = Config::resolve(Some(store.as_ref()), manifest.as_ref())?;

    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Pageview {
            url,
            title,
            benefit_id,
            benefit_name,
        } => {
            let mut page = PageContext::new(url, title);
            if let Some(id) = benefit_id {
                page = page.with_benefit(Benefit {
                    id,
                    name: benefit_name,
                    category: None,
                });
            }
            cmd_send_one(&config, store, &page, EventDetail::Pageview).await
        }
        Command::Click {
            url,
            title,
            element_id,
            text,
            tag,
        } => {
            let page = PageContext::new(url, title);
            let element = ElementInfo::new(tag, element_id).text(text);
            cmd_send_one(&config, store, &page, EventDetail::Click { element }).await
        }
        Command::Simulate {
            url,
            title,
            seconds,
        } => cmd_simulate(&config, store, PageContext::new(url, title), seconds).await,
    }
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("Base URL:      {}", config.base_url);
    println!("Ingestion:     {}", config.ingestion_url()?);
    println!("SDK ID:        {}", config.sdk_id);
    println!("Distributor:   {}", config.distributor);
    println!(
        "Benefits API:  {}",
        config.benefits_api_url.as_deref().unwrap_or("-")
    );
    println!(
        "Benefits Key:  {}",
        match &config.benefits_api_key {
            Some(key) if !key.expose_secret().is_empty() => "(set)",
            _ => "-",
        }
    );
    println!(
        "OTLP:          {}",
        config.otel_endpoint.as_deref().unwrap_or("-")
    );
    println!("Log Level:     {}", config.log_level);
    Ok(())
}

/// Build one envelope with the real counter and session, then deliver it
/// synchronously so the operator sees the outcome.
async fn cmd_send_one(
    config: &Config,
    store: Arc<dyn Store>,
    page: &PageContext,
    detail: EventDetail,
) -> anyhow::Result<()> {
    let capture = Arc::new(MemorySink::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let emitter = Emitter::new(
        EventPayloadBuilder::new(config.distributor.clone(), DeviceContext::default()),
        SequenceCounter::new(Arc::clone(&store)),
        SessionContext::new(store, Arc::clone(&clock)),
        capture.clone(),
        clock,
    );
    emitter.emit(page, detail);

    let dispatcher = Dispatcher::new(config)?;
    for envelope in capture.take() {
        print_envelope(&envelope)?;
        dispatcher.deliver(&envelope).await?;
        println!("Delivered to {}", dispatcher.endpoint());
    }
    Ok(())
}

fn print_envelope(envelope: &EventEnvelope) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

async fn cmd_simulate(
    config: &Config,
    store: Arc<dyn Store>,
    page: PageContext,
    seconds: u64,
) -> anyhow::Result<()> {
    let tracker = Tracker::with_dispatcher(config, store, DeviceContext::default())?;
    if let Some(visit_id) = tracker.enter_page(page) {
        println!("Visit {visit_id} started, running for {seconds}s");
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let steps = seconds * 20;
    for step in 0..steps {
        ticker.tick().await;
        let x = (step % 400) as i32;
        let y = ((step * 7) % 800) as i32;
        tracker.record_move(x, y);
        if step % 40 == 0 {
            let element = ElementInfo::new("button", format!("cta-{step}")).text("Claim");
            tracker.track_click(element, x, y);
        }
    }

    if let Some(churn) = tracker.shutdown() {
        churn.await?;
    }
    // Sends are fire-and-forget; give in-flight requests a moment.
    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("Done");
    Ok(())
}
