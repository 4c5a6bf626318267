use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use trendmap::api::{self, AppState};
use trendmap::background;
use trendmap::cache::{CacheError, CacheStore};
use trendmap::config::Config;
use trendmap::feed::{FeedFetcher, HttpFeedSource};
use trendmap::refresh::BatchRefresher;
use trendmap::regions::RegionRegistry;
use trendmap::security::SharedSecret;
use trendmap::server::Server;
use trendmap::trigger::RefreshTrigger;

#[derive(Parser, Debug)]
#[command(name = "trendmap", version, about = "Per-state trending searches, cached")]
struct Cli {
    /// Override TRENDMAP_CACHE_FILE
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP surface until Ctrl-C
    Serve {
        /// Override TRENDMAP_BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one refresh cycle and exit
    Refresh,
    /// Print the cached snapshot and its age
    Show,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = cli.cache_file {
        config.cache_path = path;
    }
    debug!(config = ?config.public_profile(), "configuration loaded");

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            serve(config).await
        }
        Command::Refresh => {
            let ack = build_trigger(&config)?.run().await?;
            println!("{}", serde_json::to_string(&ack)?);
            Ok(())
        }
        Command::Show => show(&config).await,
    }
}

fn build_trigger(config: &Config) -> Result<RefreshTrigger<HttpFeedSource>, Box<dyn Error>> {
    let source = HttpFeedSource::new(&config.endpoint, config.policy.timeout)?;
    let refresher = BatchRefresher::new(FeedFetcher::new(source, config.policy), config.concurrency);
    let trigger = RefreshTrigger::new(
        Arc::new(RegionRegistry::us_states()),
        refresher,
        CacheStore::new(&config.cache_path),
    )
    .with_secret(config.refresh_token.clone().map(SharedSecret::from));
    Ok(trigger)
}

async fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    let trigger = Arc::new(build_trigger(&config)?);
    if config.refresh_token.is_none() {
        warn!("TRENDMAP_REFRESH_TOKEN is unset; /refresh will reject every request");
    }

    let scheduler = config
        .refresh_interval
        .map(|every| background::spawn_periodic(Arc::clone(&trigger), every));

    let router = api::router(AppState {
        trigger,
        freshness: config.freshness,
    });
    let server = Server::bind(&config.bind_addr).await?;
    api::serve(server, router, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    info!("trendmap stopped");
    Ok(())
}

async fn show(config: &Config) -> Result<(), Box<dyn Error>> {
    let store = CacheStore::new(&config.cache_path);
    let served = match store.get_snapshot(config.freshness, Utc::now()).await {
        Ok(served) => served,
        Err(CacheError::Unavailable) => {
            println!("no data available");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    println!(
        "updated {} ({}s ago{})",
        served.record.timestamp.to_rfc3339(),
        served.age.num_seconds(),
        if served.stale { ", stale" } else { "" }
    );
    for (code, label) in served.record.trends.iter() {
        println!("{code}\t{label}");
    }
    Ok(())
}

fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,trendmap=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
