//! CLI argument parsing and run orchestration.

use std::path::{Path, PathBuf};

use clap::Parser;
use console::style;
use tracing::{info, warn};
use url::Url;

use crate::cancel::CancelToken;
use crate::config::{self, GeneralConfig, SiteConfig};
use crate::download::Downloader;
use crate::error::Error;
use crate::scrape::pagination::{DETAIL_ID_PARAM, DETAIL_MODE};
use crate::scrape::url_builder::build_url;
use crate::scrape::{HttpClient, PageWalker};
use crate::vpn::RotationController;

#[derive(Parser)]
#[command(name = "siterip")]
#[command(about = "Configuration-driven site scraper and downloader")]
#[command(version)]
pub struct Cli {
    /// Site key (config filename without extension) or a direct item URL
    target: String,

    /// Scrape mode, one of the site's configured modes
    mode: Option<String>,

    /// Identifiers to scrape (search terms, category names, item ids)
    identifier: Vec<String>,

    /// Directory holding config.yaml and per-site configs
    #[arg(long, default_value = "configs")]
    config_dir: String,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Re-download files that already exist at the destination
    #[arg(long)]
    overwrite: bool,
}

/// Check if debug mode is enabled (for early logging setup).
pub fn is_debug() -> bool {
    std::env::args().any(|arg| arg == "-d" || arg == "--debug")
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_dir = PathBuf::from(shellexpand::tilde(&cli.config_dir).into_owned());
    let general = config::load_general(&config_dir)?;

    let cancel = CancelToken::new();
    cancel.listen_for_ctrl_c();

    let mut vpn = RotationController::new(general.vpn.clone());
    vpn.start().await;

    let outcome = run_scrape(&cli, &config_dir, &general, &mut vpn, cancel).await;

    // The VPN is torn down whether the run finished, failed or was
    // interrupted.
    vpn.stop().await;

    match outcome {
        Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::Interrupted)) => {
            warn!("run interrupted, exiting cleanly");
            Ok(())
        }
        other => other,
    }
}

async fn run_scrape(
    cli: &Cli,
    config_dir: &Path,
    general: &GeneralConfig,
    vpn: &mut RotationController,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    let fetcher = HttpClient::new(general);

    // A direct URL is matched against configured sites by host and
    // processed as a single detail page.
    if cli.target.starts_with("http://") || cli.target.starts_with("https://") {
        let site = find_site_for_url(config_dir, &cli.target)?;
        let mut downloader = Downloader::new(
            &site,
            general,
            &fetcher,
            vpn,
            cli.overwrite,
            cancel.clone(),
        );
        downloader.process_detail_page(&cli.target).await?;
        return Ok(());
    }

    let site = config::load_site(config_dir, &cli.target)?;
    let Some(mode) = cli.mode.as_deref() else {
        anyhow::bail!("mode is required when scraping a configured site");
    };
    let Some(mode_config) = site.modes.get(mode) else {
        anyhow::bail!("site '{}' has no mode '{}'", cli.target, mode);
    };
    if cli.identifier.is_empty() {
        anyhow::bail!("at least one identifier is required");
    }

    for identifier in &cli.identifier {
        let param_key = if mode == DETAIL_MODE {
            DETAIL_ID_PARAM
        } else {
            mode
        };
        let start_url = build_url(
            &site.base_url,
            &mode_config.url_pattern,
            &site.url_encoding_rules,
            &[(param_key, identifier.as_str())],
        )?;

        info!(site = %cli.target, mode, identifier, "starting scrape");
        let mut downloader = Downloader::new(
            &site,
            general,
            &fetcher,
            vpn,
            cli.overwrite,
            cancel.clone(),
        );

        if mode == DETAIL_MODE {
            downloader.process_detail_page(&start_url).await?;
        } else {
            let mut walker = PageWalker::new(
                &site,
                &general.sleep,
                &fetcher,
                &mut downloader,
                cancel.clone(),
            );
            let stats = walker.walk(mode, identifier, start_url).await?;
            println!(
                "{} {}: {} pages, {} items",
                style("done").green(),
                identifier,
                stats.pages_fetched,
                stats.items_dispatched
            );
        }
    }

    Ok(())
}

/// Find the site config whose base URL shares a host with `url`.
fn find_site_for_url(config_dir: &Path, url: &str) -> anyhow::Result<SiteConfig> {
    let target = Url::parse(url)?;
    let host = target
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL has no host"))?;

    for path in config::site_config_paths(config_dir)? {
        let Some(site_key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let site = match config::load_site(config_dir, site_key) {
            Ok(site) => site,
            Err(err) => {
                warn!(site = site_key, %err, "skipping unparseable site config");
                continue;
            }
        };
        let matches = Url::parse(&site.base_url)
            .ok()
            .and_then(|base| base.host_str().map(|h| h.eq_ignore_ascii_case(host)))
            .unwrap_or(false);
        if matches {
            info!(site = site_key, host, "matched URL to site config");
            return Ok(site);
        }
    }
    anyhow::bail!("no site config matches host '{host}'")
}
