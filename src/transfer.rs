//! Network-share transfer via the smbclient binary.
//!
//! The share is consumed as a put-file/stat capability: one connection
//! per operation, no pooling. Each operation shells out to `smbclient`,
//! located via PATH at construction.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::process::Command;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::SmbDestination;
use crate::error::{Error, Result};

pub struct SmbClient<'a> {
    dest: &'a SmbDestination,
    binary: PathBuf,
}

impl<'a> SmbClient<'a> {
    pub fn new(dest: &'a SmbDestination) -> Result<Self> {
        let binary = which::which("smbclient")
            .map_err(|_| Error::Transfer("smbclient not found in PATH".to_string()))?;
        Ok(Self { dest, binary })
    }

    /// UNC-style service name, `//server/share`.
    pub fn service(&self) -> String {
        format!("//{}/{}", self.dest.server, self.dest.share)
    }

    /// Path of `filename` within the share.
    pub fn remote_path(&self, filename: &str) -> String {
        if self.dest.path.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.dest.path.trim_end_matches('/'), filename)
        }
    }

    fn command(&self, smb_command: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(self.service())
            .arg("-U")
            .arg(format!("{}%{}", self.dest.username, self.dest.password))
            .arg("-c")
            .arg(smb_command);
        cmd
    }

    /// Whether `remote` already exists on the share. A connection
    /// failure is reported as an error so the caller can decide whether
    /// to proceed.
    pub async fn exists(&self, remote: &str) -> Result<bool> {
        let output = self
            .command(&format!("allinfo \"{remote}\""))
            .output()
            .await
            .map_err(|e| Error::Transfer(format!("failed to spawn smbclient: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("NT_STATUS_OBJECT_NAME_NOT_FOUND")
            || stdout.contains("NT_STATUS_OBJECT_PATH_NOT_FOUND")
        {
            return Ok(false);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transfer(format!(
                "smbclient stat failed: {}",
                stderr.trim()
            )));
        }
        debug!(remote, "file present on share");
        Ok(true)
    }

    /// Upload `local` to `remote` on the share.
    pub async fn put(&self, local: &Path, remote: &str, cancel: &CancelToken) -> Result<()> {
        let size = std::fs::metadata(local)
            .map_err(|e| Error::Transfer(format!("cannot stat {}: {e}", local.display())))?
            .len();
        let bar = ProgressBar::new(size);
        bar.set_style(
            ProgressStyle::with_template("{msg} {bar:40} {bytes}/{total_bytes}")
                .expect("valid progress template"),
        );
        bar.set_message("uploading");

        let mut child = self
            .command(&format!("put \"{}\" \"{remote}\"", local.display()))
            .spawn()
            .map_err(|e| Error::Transfer(format!("failed to spawn smbclient: {e}")))?;

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| Error::Transfer(format!("smbclient wait failed: {e}")))?
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                bar.abandon();
                return Err(Error::Interrupted);
            }
        };

        if !status.success() {
            bar.abandon();
            return Err(Error::Transfer(format!(
                "smbclient put exited with {status}"
            )));
        }
        bar.finish();
        info!(remote, "file uploaded to share");
        Ok(())
    }
}
