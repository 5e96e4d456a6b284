//! Download orchestration.
//!
//! For each resolved item: rotate the VPN if due, fetch and extract the
//! detail page, filter, resolve the destination, invoke the configured
//! download tool, and relay to the network share when one is the active
//! destination. A failed download is logged and the run continues; only
//! an interrupt escalates.

pub mod progress;

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{DestinationConfig, GeneralConfig, SiteConfig};
use crate::error::{Error, Result};
use crate::scrape::extract::{extract, ItemRecord};
use crate::scrape::filter::should_ignore;
use crate::scrape::pagination::{ItemSink, PageFetcher, ResolvedItem};
use crate::scrape::url_builder::{absolutize, format_pattern};
use crate::transfer::SmbClient;
use crate::vpn::RotationController;

use progress::{adapter_for_command, ProgressStream};

/// Field on the detail page carrying the direct content URL. Absent,
/// the page URL itself is handed to the download tool.
const DOWNLOAD_URL_FIELD: &str = "download_url";

/// Directory (under the working directory) where share-bound downloads
/// are staged before transfer.
const STAGING_DIR: &str = "temp_downloads";

/// Strip every configured invalid substring from a title.
pub fn sanitize_title(title: &str, invalid: &[String]) -> String {
    let mut out = title.to_string();
    for chars in invalid {
        out = out.replace(chars.as_str(), "");
    }
    out
}

/// Destination filename: prefix + sanitized title + suffix + extension.
pub fn build_filename(title: &str, site: &SiteConfig, general: &GeneralConfig) -> String {
    format!(
        "{}{}{}{}",
        site.name_prefix,
        sanitize_title(title, &general.file_naming.invalid_chars),
        site.name_suffix,
        general.file_naming.extension
    )
}

/// Inject curl's progress-meter flag so its output becomes parseable
/// `#` ticks.
fn prepare_command(command: &str) -> String {
    if command.contains("curl") && !command.contains("-#") {
        command.replacen("curl", "curl -#", 1)
    } else {
        command.to_string()
    }
}

/// Run a download command through the shell, feeding its progress stream
/// to the matching adapter. Returns whether the tool reported success.
pub async fn run_download(command: &str, cancel: &CancelToken) -> Result<bool> {
    let command = prepare_command(command);
    let (mut sink, stream) = adapter_for_command(&command);
    debug!(%command, "executing download command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&command);
    match stream {
        ProgressStream::Stdout => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        }
        ProgressStream::Stderr => {
            cmd.stderr(Stdio::piped()).stdout(Stdio::null());
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Download(format!("failed to spawn download command: {e}")))?;

    let reader: Box<dyn AsyncRead + Unpin + Send> = match stream {
        ProgressStream::Stdout => Box::new(
            child
                .stdout
                .take()
                .ok_or_else(|| Error::Download("missing stdout pipe".to_string()))?,
        ),
        ProgressStream::Stderr => Box::new(
            child
                .stderr
                .take()
                .ok_or_else(|| Error::Download("missing stderr pipe".to_string()))?,
        ),
    };
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                sink.finish(false);
                warn!("download interrupted");
                return Err(Error::Interrupted);
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => sink.on_line(&line),
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "error reading tool output");
                    break;
                }
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            sink.finish(false);
            warn!("download interrupted");
            return Err(Error::Interrupted);
        }
        status = child.wait() => {
            status.map_err(|e| Error::Download(format!("wait failed: {e}")))?
        }
    };

    Ok(sink.finish(status.success()))
}

/// Where one download lands, resolved before the tool runs.
enum DownloadPlan {
    Local { path: PathBuf },
    Smb { staged: PathBuf, remote: String },
}

impl DownloadPlan {
    fn download_path(&self) -> &PathBuf {
        match self {
            DownloadPlan::Local { path } => path,
            DownloadPlan::Smb { staged, .. } => staged,
        }
    }
}

pub struct Downloader<'a, F> {
    site: &'a SiteConfig,
    general: &'a GeneralConfig,
    fetcher: &'a F,
    vpn: &'a mut RotationController,
    overwrite: bool,
    cancel: CancelToken,
}

impl<'a, F: PageFetcher + Sync> Downloader<'a, F> {
    pub fn new(
        site: &'a SiteConfig,
        general: &'a GeneralConfig,
        fetcher: &'a F,
        vpn: &'a mut RotationController,
        overwrite: bool,
        cancel: CancelToken,
    ) -> Self {
        Self {
            site,
            general,
            fetcher,
            vpn,
            overwrite,
            cancel,
        }
    }

    /// Process one detail page end to end. Item-level failures are
    /// logged and absorbed; only an interrupt propagates.
    pub async fn process_detail_page(&mut self, page_url: &str) -> Result<()> {
        self.cancel.check()?;
        self.vpn.rotate_if_due().await;

        info!(url = page_url, "processing detail page");
        let body = match self.fetcher.fetch(page_url).await {
            Ok(body) => body,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(url = page_url, %err, "failed to fetch detail page");
                return Ok(());
            }
        };

        let record = self.extract_detail(&body);
        let Some(title) = record
            .get("title")
            .and_then(|v| v.as_text())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
        else {
            warn!(url = page_url, "detail page has no title, skipping item");
            return Ok(());
        };

        if should_ignore(&record, &self.general.ignored) {
            return Ok(());
        }

        let filename = build_filename(&title, self.site, self.general);
        let plan = match self.plan_destination(&filename).await {
            Ok(Some(plan)) => plan,
            Ok(None) => return Ok(()),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(%err, "cannot resolve destination");
                return Ok(());
            }
        };

        let content_url = record
            .get(DOWNLOAD_URL_FIELD)
            .and_then(|v| v.as_text())
            .unwrap_or(page_url);
        let content_url = match absolutize(&self.site.base_url, content_url) {
            Ok(url) => url,
            Err(err) => {
                error!(%err, "bad content URL");
                return Ok(());
            }
        };

        let user_agent = pick_user_agent(&self.general.user_agents);
        let command = match format_pattern(
            &self.site.download.command,
            &[
                (
                    "destination_path",
                    plan.download_path().to_string_lossy().into_owned(),
                ),
                ("url", content_url),
                ("user_agent", user_agent.to_string()),
            ],
        ) {
            Ok(command) => command,
            Err(err) => {
                error!(%err, "bad download command template");
                return Ok(());
            }
        };

        info!(%filename, "downloading");
        match run_download(&command, &self.cancel).await {
            Ok(true) => {
                info!("download completed successfully");
                match self.finalize(&plan).await {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => error!(%err, "share transfer failed, staged file retained"),
                }
            }
            Ok(false) => error!("download failed"),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => error!(%err, "download failed"),
        }

        self.cancel.sleep(self.general.sleep.item_delay()).await
    }

    fn extract_detail(&self, body: &str) -> ItemRecord {
        let document = scraper::Html::parse_document(body);
        extract(document.root_element(), &self.site.scrapers.detail)
    }

    /// Resolve the destination for `filename`. `Ok(None)` means the file
    /// already exists and overwrite is off: nothing to do.
    async fn plan_destination(&self, filename: &str) -> Result<Option<DownloadPlan>> {
        match self.general.destination()? {
            DestinationConfig::Local(local) => {
                let dir = PathBuf::from(shellexpand::tilde(&local.path).into_owned());
                let path = dir.join(filename);
                if !self.overwrite && path.exists() {
                    info!(filename, "file already exists locally, skipping download");
                    return Ok(None);
                }
                std::fs::create_dir_all(&dir)
                    .map_err(|e| Error::Download(format!("cannot create {}: {e}", dir.display())))?;
                Ok(Some(DownloadPlan::Local { path }))
            }
            DestinationConfig::Smb(dest) => {
                let smb = SmbClient::new(dest)?;
                let remote = smb.remote_path(filename);
                if !self.overwrite {
                    match smb.exists(&remote).await {
                        Ok(true) => {
                            info!(filename, "file already exists on share, skipping download");
                            return Ok(None);
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(%err, "could not check share, proceeding with download");
                        }
                    }
                }
                let staging = std::env::current_dir()
                    .map_err(|e| Error::Download(format!("cannot resolve working dir: {e}")))?
                    .join(STAGING_DIR);
                std::fs::create_dir_all(&staging).map_err(|e| {
                    Error::Download(format!("cannot create {}: {e}", staging.display()))
                })?;
                Ok(Some(DownloadPlan::Smb {
                    staged: staging.join(filename),
                    remote,
                }))
            }
        }
    }

    /// Relay a staged file to the share and drop the local copy.
    async fn finalize(&self, plan: &DownloadPlan) -> Result<()> {
        let DownloadPlan::Smb { staged, remote } = plan else {
            return Ok(());
        };
        let DestinationConfig::Smb(dest) = self.general.destination()? else {
            return Ok(());
        };
        let smb = SmbClient::new(dest)?;
        smb.put(staged, remote, &self.cancel).await?;
        if let Err(err) = std::fs::remove_file(staged) {
            warn!(%err, path = %staged.display(), "failed to remove staged file");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<F: PageFetcher + Sync> ItemSink for Downloader<'_, F> {
    async fn handle(&mut self, item: ResolvedItem) -> Result<()> {
        self.process_detail_page(&item.url).await
    }
}

/// Pick a user agent for the download command.
fn pick_user_agent(pool: &[String]) -> &str {
    crate::scrape::http_client::pick_from_pool(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn general(dest_path: &Path, ignored: &[&str]) -> GeneralConfig {
        let yaml = format!(
            r#"
user_agents: ["TestAgent/1.0"]
sleep: {{}}
file_naming:
  extension: ".mp4"
  invalid_chars: [":", "?", "\""]
ignored: [{}]
download_destinations:
  - type: local
    path: "{}"
"#,
            ignored
                .iter()
                .map(|t| format!("\"{t}\""))
                .collect::<Vec<_>>()
                .join(", "),
            dest_path.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn site(command: &str) -> SiteConfig {
        let yaml = format!(
            r#"
base_url: "https://example.com"
modes:
  video:
    url_pattern: "/video/{{video_id}}"
scrapers:
  list:
    container:
      selector: [".results"]
    item:
      selector: ".thumb"
  detail:
    title: "h1"
download:
  command: "{command}"
name_prefix: "pre-"
name_suffix: "-post"
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    struct OnePageFetcher(String);

    #[async_trait::async_trait]
    impl PageFetcher for OnePageFetcher {
        async fn fetch(&self, _url: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_sanitize_title_strips_all_configured() {
        let invalid = vec![":".to_string(), "?".to_string()];
        assert_eq!(sanitize_title("What: is this?", &invalid), "What is this");
    }

    #[test]
    fn test_build_filename_applies_parts_once() {
        let dir = tempfile::tempdir().unwrap();
        let general = general(dir.path(), &[]);
        let site = site("true");
        assert_eq!(
            build_filename("A: Title", &site, &general),
            "pre-A Title-post.mp4"
        );
    }

    #[test]
    fn test_prepare_command_injects_curl_flag() {
        assert_eq!(
            prepare_command("curl -o out https://x"),
            "curl -# -o out https://x"
        );
        assert_eq!(
            prepare_command("curl -# -o out https://x"),
            "curl -# -o out https://x"
        );
        assert_eq!(prepare_command("wget https://x"), "wget https://x");
    }

    #[tokio::test]
    async fn test_run_download_success_and_failure() {
        let cancel = CancelToken::new();
        assert!(run_download("printf '####\\n' 1>&2; exit 0", &cancel)
            .await
            .unwrap());
        assert!(!run_download("printf '##\\n' 1>&2; exit 1", &cancel)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_run_download_interrupted() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run_download("sleep 5", &cancel).await;
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[tokio::test]
    async fn test_existing_local_file_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let general = general(dir.path(), &[]);
        let site = site("touch {destination_path}.ran");
        let fetcher = OnePageFetcher("<html><body><h1>VideoOne</h1></body></html>".to_string());
        let mut vpn = RotationController::new(None);

        std::fs::write(dir.path().join("pre-VideoOne-post.mp4"), b"existing").unwrap();

        let mut downloader =
            Downloader::new(&site, &general, &fetcher, &mut vpn, false, CancelToken::new());
        downloader
            .process_detail_page("https://example.com/video/1")
            .await
            .unwrap();

        assert!(!dir.path().join("pre-VideoOne-post.mp4.ran").exists());
    }

    #[tokio::test]
    async fn test_overwrite_forces_download() {
        let dir = tempfile::tempdir().unwrap();
        let general = general(dir.path(), &[]);
        let site = site("touch {destination_path}.ran");
        let fetcher = OnePageFetcher("<html><body><h1>VideoOne</h1></body></html>".to_string());
        let mut vpn = RotationController::new(None);

        std::fs::write(dir.path().join("pre-VideoOne-post.mp4"), b"existing").unwrap();

        let mut downloader =
            Downloader::new(&site, &general, &fetcher, &mut vpn, true, CancelToken::new());
        downloader
            .process_detail_page("https://example.com/video/1")
            .await
            .unwrap();

        assert!(dir.path().join("pre-VideoOne-post.mp4.ran").exists());
    }

    #[tokio::test]
    async fn test_ignored_item_never_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let general = general(dir.path(), &["videoone"]);
        let site = site("touch {destination_path}.ran");
        let fetcher = OnePageFetcher("<html><body><h1>VideoOne</h1></body></html>".to_string());
        let mut vpn = RotationController::new(None);

        let mut downloader =
            Downloader::new(&site, &general, &fetcher, &mut vpn, false, CancelToken::new());
        downloader
            .process_detail_page("https://example.com/video/1")
            .await
            .unwrap();

        assert!(!dir.path().join("pre-VideoOne-post.mp4.ran").exists());
    }

    fn general_smb() -> GeneralConfig {
        serde_yaml::from_str(
            r#"
user_agents: ["TestAgent/1.0"]
sleep: {}
file_naming:
  extension: ".mp4"
download_destinations:
  - type: smb
    server: nas.local
    share: media
    username: scraper
    password: secret
    path: incoming
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_existing_share_file_short_circuits() {
        use std::os::unix::fs::PermissionsExt;

        // Stub smbclient that logs its arguments and reports every file
        // as present (no NT_STATUS_OBJECT_NAME_NOT_FOUND in its output).
        let bin = tempfile::tempdir().unwrap();
        let log = bin.path().join("smbclient.log");
        let stub = bin.path().join("smbclient");
        std::fs::write(
            &stub,
            format!("#!/bin/sh\necho \"$@\" >> \"{}\"\nexit 0\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        let path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{path}", bin.path().display()));

        let general = general_smb();
        let site = site("touch {destination_path}.ran");
        let fetcher = OnePageFetcher("<html><body><h1>VideoOne</h1></body></html>".to_string());
        let mut vpn = RotationController::new(None);

        let mut downloader =
            Downloader::new(&site, &general, &fetcher, &mut vpn, false, CancelToken::new());
        downloader
            .process_detail_page("https://example.com/video/1")
            .await
            .unwrap();

        // Exactly one stat call against the share, no put and no
        // download command run.
        let calls = std::fs::read_to_string(&log).unwrap();
        assert!(calls.contains("allinfo"));
        assert!(!calls.contains("put"));
        assert_eq!(calls.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_item_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let general = general(dir.path(), &[]);
        let site = site("touch {destination_path}.ran");
        let fetcher = OnePageFetcher("<html><body><h1>VideoOne</h1></body></html>".to_string());
        let mut vpn = RotationController::new(None);

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut downloader = Downloader::new(&site, &general, &fetcher, &mut vpn, false, cancel);
        let result = downloader
            .process_detail_page("https://example.com/video/1")
            .await;

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(!dir.path().join("pre-VideoOne-post.mp4.ran").exists());
    }

    #[tokio::test]
    async fn test_missing_title_skips_item() {
        let dir = tempfile::tempdir().unwrap();
        let general = general(dir.path(), &[]);
        let site = site("touch {destination_path}.ran");
        let fetcher = OnePageFetcher("<html><body><p>no heading</p></body></html>".to_string());
        let mut vpn = RotationController::new(None);

        let mut downloader =
            Downloader::new(&site, &general, &fetcher, &mut vpn, false, CancelToken::new());
        downloader
            .process_detail_page("https://example.com/video/1")
            .await
            .unwrap();

        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
