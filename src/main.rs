use anyhow::Result;
use clap::Parser;
use futures::future::join_all;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Use the library instead of redeclaring modules
use tab_suspender::{
    config::{AppConfig, defaults::DEFAULT_CONFIG_FILE},
    job_scheduling::{JobError, TabJobsApi},
    services::{SuspendOutcome, SuspendRequest, TabCheckStatus},
    tabs::{ContentBehaviour, InMemoryBrowser, Tab, TabLoadStatus},
};

const BROWSER_LATENCY: Duration = Duration::from_millis(20);
const PAGE_LOAD_TIME: Duration = Duration::from_millis(1500);

#[derive(Parser)]
#[command(name = "tab-suspender")]
#[command(version)]
#[command(about = "Suspends idle browser tabs through concurrency-limited job queues")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Number of simulated tabs
    #[arg(short, long, default_value_t = 12)]
    tabs: u32,

    /// How many simulated tabs never answer their agent
    #[arg(short, long, default_value_t = 2)]
    unresponsive: u32,

    /// Render a preview before suspending (overrides config)
    #[arg(long)]
    previews: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("tab_suspender={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tab suspender v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load_from_file(&cli.config)?;
    if cli.previews {
        config.suspension.generate_preview = true;
    }
    config.validate()?;
    info!("Configuration loaded from: {}", cli.config);

    let browser = Arc::new(InMemoryBrowser::new(BROWSER_LATENCY));
    populate(&browser, cli.tabs, cli.unresponsive).await;

    let api = TabJobsApi::from_config(browser.clone(), &config)?;

    if let Some(mut previews) = browser.preview_notifications().await {
        let suspension = api.suspension().clone();
        tokio::spawn(async move {
            while let Some(tab_id) = previews.recv().await {
                suspension.on_preview_ready(tab_id).await;
            }
        });
    }

    let shutdown = install_shutdown_handler();
    tokio::select! {
        result = simulate(&api, &browser, &config) => result?,
        _ = shutdown.cancelled() => {
            let cancelled = api.shutdown();
            warn!("Simulation interrupted, cancelled {} jobs", cancelled);
        }
    }

    let health = api.health_check();
    info!("Final queue state: {}", serde_json::to_string(&health)?);
    Ok(())
}

/// Cancelled on the first Ctrl-C
fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully");
                token_clone.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    token
}

/// One active tab, a few pinned/audible/browser pages, the rest plain pages
async fn populate(browser: &Arc<InMemoryBrowser>, count: u32, unresponsive: u32) {
    let mut loading = Vec::new();
    for id in 1..=count {
        let mut tab = Tab::new(id, format!("https://example.com/page/{id}"))
            .with_title(format!("Page {id}"));
        if id == 1 {
            tab = tab.active();
        } else if id % 7 == 0 {
            tab = tab.pinned();
        } else if id % 5 == 0 {
            tab = tab.audible();
        } else if id % 11 == 0 {
            tab.url = "chrome://settings".to_string();
        } else if id % 4 == 0 {
            tab = tab.loading();
            loading.push(tab.id);
        }

        let behaviour = if id > 1 && id <= unresponsive + 1 {
            ContentBehaviour::Unresponsive
        } else if id % 6 == 0 {
            ContentBehaviour::FormInput
        } else {
            ContentBehaviour::Responsive
        };
        browser.insert_tab_with(tab, behaviour).await;
    }

    let loader = browser.clone();
    tokio::spawn(async move {
        sleep(PAGE_LOAD_TIME).await;
        for id in loading {
            loader.set_status(id, TabLoadStatus::Complete).await;
        }
    });
    info!("Simulating {} tabs ({} unresponsive)", count, unresponsive);
}

/// Check every tab, suspend the eligible ones, then discard what was suspended
async fn simulate(
    api: &TabJobsApi,
    browser: &Arc<InMemoryBrowser>,
    config: &AppConfig,
) -> Result<()> {
    let started = Instant::now();
    let tabs = browser.tabs().await;

    let checks = join_all(tabs.iter().map(|tab| api.check().check(tab.clone()))).await;
    let statuses: Vec<_> = tabs
        .iter()
        .zip(checks)
        .filter_map(|(tab, result)| settled("check", tab, result).map(|status| (tab, status)))
        .collect();
    info!(
        "Checks finished: {:?}",
        tally(statuses.iter().map(|(_, status)| *status))
    );

    let request = SuspendRequest {
        generate_preview: config.suspension.generate_preview,
        ..SuspendRequest::default()
    };
    let candidates: Vec<Tab> = statuses
        .iter()
        .filter(|(_, status)| {
            matches!(
                status,
                TabCheckStatus::Normal | TabCheckStatus::Unresponsive
            )
        })
        .map(|(tab, _)| (*tab).clone())
        .collect();
    let suspensions = join_all(
        candidates
            .iter()
            .map(|tab| api.suspension().suspend(tab.clone(), request)),
    )
    .await;
    let suspended: Vec<_> = candidates
        .iter()
        .zip(suspensions)
        .filter_map(|(tab, result)| settled("suspension", tab, result).map(|outcome| (tab, outcome)))
        .collect();
    info!(
        "Suspensions finished: {:?}",
        tally(suspended.iter().map(|(_, outcome)| *outcome))
    );

    let mut discards = Vec::new();
    for (tab, outcome) in &suspended {
        if *outcome == SuspendOutcome::Suspended {
            if let Some(current) = browser.tab(tab.id).await {
                discards.push(api.discard().discard(current));
            }
        }
    }
    let discarded = join_all(discards).await;
    info!(
        "Discards finished: {:?}",
        tally(discarded.into_iter().filter_map(Result::ok))
    );

    info!("Simulation completed in {:?}", started.elapsed());
    Ok(())
}

fn settled<T>(stage: &str, tab: &Tab, result: Result<T, JobError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} of {} failed: {}", stage, tab.id, e);
            None
        }
    }
}

fn tally<K: Eq + Hash>(values: impl Iterator<Item = K>) -> HashMap<K, usize> {
    let mut counts = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}
