use std::sync::Arc;
use std::time::Duration;

mod config;
mod db;
mod diff;
mod error;
mod fetch;
mod fingerprint;
mod models;
mod notify;
mod scheduler;
mod significance;
mod store;

use config::Config;
use db::Repository;
use error::{AppError, Result};
use fetch::HttpFetcher;
use models::NewTrackedPage;
use notify::{LogNotifier, Notifier, WebhookNotifier};
use scheduler::{MonitoringScheduler, SchedulerOptions};
use store::VersionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (scheduler activity and notifications go to stderr)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::load()?;

    match args.get(1).map(String::as_str) {
        Some("add") => cmd_add(&config, &args[2..]).await,
        Some("list") => cmd_list(&config).await,
        Some("remove") => cmd_remove(&config, &args[2..]).await,
        Some("check") => cmd_check(&config, &args[2..]).await,
        Some("pause") => cmd_set_active(&config, &args[2..], false).await,
        Some("resume") => cmd_set_active(&config, &args[2..], true).await,
        Some("stats") => cmd_stats(&config, &args[2..]).await,
        Some("history") => cmd_history(&config, &args[2..]).await,
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        None | Some("run") => run_daemon(&config).await,
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!(
        "pagewatch - monitors web pages for meaningful changes\n\n\
         Usage:\n\
         \x20 pagewatch [run]                    Start the monitoring daemon\n\
         \x20 pagewatch add <url> [minutes]      Track a page (default interval: 1440)\n\
         \x20 pagewatch list                     List tracked pages\n\
         \x20 pagewatch remove <id>              Stop tracking a page\n\
         \x20 pagewatch check <id>               Check a page immediately\n\
         \x20 pagewatch pause <id>               Suspend checks for a page\n\
         \x20 pagewatch resume <id>              Resume checks for a page\n\
         \x20 pagewatch stats <id>               Show version statistics\n\
         \x20 pagewatch history <id>             Show recent change log entries"
    );
}

struct Services {
    repo: Arc<Repository>,
    store: Arc<VersionStore>,
    scheduler: Arc<MonitoringScheduler>,
}

async fn build_services(config: &Config) -> Result<Services> {
    let repo = Arc::new(Repository::new(&config.db_path).await?);
    let store = Arc::new(VersionStore::new(repo.clone()));

    let fetcher = Arc::new(HttpFetcher::new());
    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(endpoint) => Arc::new(WebhookNotifier::new(endpoint.clone())),
        None => Arc::new(LogNotifier),
    };

    let scheduler = Arc::new(MonitoringScheduler::new(
        repo.clone(),
        store.clone(),
        fetcher,
        notifier,
        SchedulerOptions {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_concurrent_checks: config.max_concurrent_checks,
            maintenance_every_ticks: config.maintenance_every_ticks,
            change_log_retention_days: config.change_log_retention_days,
        },
    ));

    Ok(Services {
        repo,
        store,
        scheduler,
    })
}

async fn run_daemon(config: &Config) -> Result<()> {
    let services = build_services(config).await?;

    services.scheduler.start();
    tracing::info!(
        "Watching for changes every {}s (Ctrl-C to stop)",
        config.poll_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    services.scheduler.shutdown().await;

    Ok(())
}

async fn cmd_add(config: &Config, args: &[String]) -> Result<()> {
    let raw_url = args
        .first()
        .ok_or_else(|| AppError::Config("usage: pagewatch add <url> [minutes]".to_string()))?;

    let url = url::Url::parse(raw_url)
        .map_err(|e| AppError::InvalidUrl(format!("{raw_url}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::InvalidUrl(format!(
            "{raw_url}: only http and https are supported"
        )));
    }

    let mut page = NewTrackedPage::new(url.to_string(), config.versioning.clone());
    if let Some(minutes) = args.get(1) {
        page.check_interval_minutes = minutes
            .parse()
            .map_err(|_| AppError::Config(format!("invalid interval: {minutes}")))?;
    }

    let services = build_services(config).await?;
    let page_id = services.repo.insert_page(page).await?;
    println!("Tracking page {page_id}: {url}");

    // Capture the baseline version right away
    match services.scheduler.check_page_now(page_id).await {
        Ok(Some(version_id)) => println!("Stored initial version {version_id}"),
        Ok(None) => println!("Initial fetch failed; will retry on schedule"),
        Err(e) => eprintln!("Initial check failed: {e}"),
    }

    Ok(())
}

async fn cmd_list(config: &Config) -> Result<()> {
    let services = build_services(config).await?;
    let pages = services.repo.get_all_pages().await?;

    if pages.is_empty() {
        println!("No pages tracked. Add one with: pagewatch add <url>");
        return Ok(());
    }

    for page in pages {
        let status = if page.is_active { "active" } else { "paused" };
        let last = page
            .last_checked
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>4}  [{}] {} (every {}m, last checked {})",
            page.id, status, page.url, page.check_interval_minutes, last
        );
    }
    Ok(())
}

async fn cmd_remove(config: &Config, args: &[String]) -> Result<()> {
    let page_id = parse_page_id(args, "remove")?;
    let services = build_services(config).await?;

    if services.repo.delete_page(page_id).await? {
        println!("Removed page {page_id} and its history");
    } else {
        return Err(AppError::PageNotFound(page_id));
    }
    Ok(())
}

async fn cmd_check(config: &Config, args: &[String]) -> Result<()> {
    let page_id = parse_page_id(args, "check")?;
    let services = build_services(config).await?;

    match services.scheduler.check_page_now(page_id).await? {
        Some(version_id) => {
            let version = services
                .store
                .version_by_id(version_id)
                .await?
                .ok_or(AppError::VersionNotFound(version_id))?;
            println!(
                "Stored version {version_id} (score {:.3}): {}",
                version.significance_score, version.store_reason
            );
        }
        None => println!("No significant change"),
    }
    Ok(())
}

async fn cmd_set_active(config: &Config, args: &[String], active: bool) -> Result<()> {
    let command = if active { "resume" } else { "pause" };
    let page_id = parse_page_id(args, command)?;
    let services = build_services(config).await?;

    services
        .repo
        .get_page(page_id)
        .await?
        .ok_or(AppError::PageNotFound(page_id))?;
    services.repo.set_page_active(page_id, active).await?;
    println!(
        "Page {page_id} {}",
        if active { "resumed" } else { "paused" }
    );
    Ok(())
}

async fn cmd_stats(config: &Config, args: &[String]) -> Result<()> {
    let page_id = parse_page_id(args, "stats")?;
    let services = build_services(config).await?;

    let page = services
        .repo
        .get_page(page_id)
        .await?
        .ok_or(AppError::PageNotFound(page_id))?;
    let stats = services.store.stats(page_id).await?;

    println!("{} ({})", page.display_name, page.url);
    println!("  versions:     {}", stats.total_versions);
    println!("  significant:  {}", stats.significant_versions);
    println!("  avg score:    {:.3}", stats.average_score);
    println!("  storage:      {} bytes", stats.storage_bytes);
    println!("  efficiency:   {:.1}%", stats.storage_efficiency() * 100.0);

    if let Some(latest) = services.store.latest_version(page_id, true).await? {
        println!(
            "  last significant change: {} (score {:.3})",
            latest.timestamp.format("%Y-%m-%d %H:%M"),
            latest.significance_score
        );
    }
    Ok(())
}

async fn cmd_history(config: &Config, args: &[String]) -> Result<()> {
    let page_id = parse_page_id(args, "history")?;
    let services = build_services(config).await?;

    services
        .repo
        .get_page(page_id)
        .await?
        .ok_or(AppError::PageNotFound(page_id))?;

    let entries = services.repo.change_logs_for_page(page_id, 20).await?;
    if entries.is_empty() {
        println!("No changes recorded yet");
        return Ok(());
    }

    for entry in entries {
        let notified = if entry.details.notification_sent {
            ", notified"
        } else {
            ""
        };
        println!(
            "{}  {:<15} score {:.3}, {:.1}% changed{}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.change_type.as_str(),
            entry.details.significance_score,
            entry.details.change_percentage,
            notified
        );
    }
    Ok(())
}

fn parse_page_id(args: &[String], command: &str) -> Result<i64> {
    let raw = args
        .first()
        .ok_or_else(|| AppError::Config(format!("usage: pagewatch {command} <id>")))?;
    raw.parse()
        .map_err(|_| AppError::Config(format!("invalid page id: {raw}")))
}
