use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::future::join_all,
    parley_channels::AttachmentRef,
    parley_config::AttachmentsConfig,
    tokio::io::AsyncWriteExt,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{attachments as attachment_metrics, counter};

use crate::error::{Error, Result};

/// Result of downloading one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved {
        filename: String,
        path: PathBuf,
        bytes: u64,
    },
    Failed {
        filename: String,
        reason: String,
    },
}

impl DownloadOutcome {
    pub fn filename(&self) -> &str {
        match self {
            Self::Saved { filename, .. } | Self::Failed { filename, .. } => filename,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Saves chat attachments into a workspace directory.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// One outcome per attachment, in input order. Individual failures are
    /// reported in the outcome, not as an error.
    async fn fetch(&self, attachments: &[AttachmentRef], workspace: &Path) -> Vec<DownloadOutcome>;
}

/// Reduce a platform-supplied filename to a safe final path component.
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match last {
        "" | "." | ".." => "attachment".to_string(),
        name => name.to_string(),
    }
}

/// Sanitized names for a batch, with `-1`, `-2`, ... inserted before the
/// extension of repeats so no two attachments share a destination.
pub fn unique_filenames<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    raw.into_iter()
        .map(|name| {
            let base = sanitize_filename(name);
            let mut candidate = base.clone();
            let mut n = 0;
            while !taken.insert(candidate.clone()) {
                n += 1;
                candidate = match base.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{n}.{ext}"),
                    _ => format!("{base}-{n}"),
                };
            }
            candidate
        })
        .collect()
}

/// Downloads attachments over HTTP(S), all at once.
#[derive(Debug, Clone)]
pub struct HttpAttachmentFetcher {
    client: reqwest::Client,
    max_file_size: u64,
    timeout: Duration,
}

impl HttpAttachmentFetcher {
    pub fn new(config: AttachmentsConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: AttachmentsConfig) -> Self {
        Self {
            client,
            max_file_size: config.max_file_size,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn download(&self, attachment: &AttachmentRef, dest: &Path) -> Result<u64> {
        let limit = self.max_file_size;
        if let Some(size) = attachment.size
            && size > limit
        {
            return Err(Error::too_large(size, limit));
        }

        let mut response = self
            .client
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| Error::external("request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
            });
        }
        if let Some(len) = response.content_length()
            && len > limit
        {
            return Err(Error::too_large(len, limit));
        }

        // Removed on drop unless persisted over `dest`.
        let workspace = dest.parent().unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".parley-download-")
            .tempfile_in(workspace)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let mut written = 0_u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::external("failed to read body", e))?
        {
            written += chunk.len() as u64;
            if written > limit {
                return Err(Error::too_large(written, limit));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        temp.persist(dest).map_err(|e| Error::Io(e.error))?;
        Ok(written)
    }

    async fn fetch_one(
        &self,
        attachment: &AttachmentRef,
        filename: String,
        workspace: &Path,
    ) -> DownloadOutcome {
        let dest = workspace.join(&filename);
        let secs = self.timeout.as_secs();

        let download = self.download(attachment, &dest);
        let result = match tokio::time::timeout(self.timeout, download).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { secs }),
        };

        match result {
            Ok(bytes) => {
                debug!(filename = %filename, bytes, "attachment saved");
                #[cfg(feature = "metrics")]
                {
                    counter!(attachment_metrics::DOWNLOADED_TOTAL).increment(1);
                    counter!(attachment_metrics::BYTES_TOTAL).increment(bytes);
                }
                DownloadOutcome::Saved {
                    filename,
                    path: dest,
                    bytes,
                }
            },
            Err(e) => {
                warn!(
                    filename = %filename,
                    url = %attachment.url,
                    error = %e,
                    "attachment download failed"
                );
                #[cfg(feature = "metrics")]
                counter!(attachment_metrics::FAILED_TOTAL).increment(1);
                DownloadOutcome::Failed {
                    filename,
                    reason: e.to_string(),
                }
            },
        }
    }
}

#[async_trait]
impl AttachmentFetcher for HttpAttachmentFetcher {
    async fn fetch(&self, attachments: &[AttachmentRef], workspace: &Path) -> Vec<DownloadOutcome> {
        if attachments.is_empty() {
            return Vec::new();
        }
        if let Err(e) = tokio::fs::create_dir_all(workspace).await {
            warn!(workspace = %workspace.display(), error = %e, "cannot create workspace");
            return attachments
                .iter()
                .map(|a| DownloadOutcome::Failed {
                    filename: sanitize_filename(&a.filename),
                    reason: format!("workspace unavailable: {e}"),
                })
                .collect();
        }
        let names = unique_filenames(attachments.iter().map(|a| a.filename.as_str()));
        join_all(
            attachments
                .iter()
                .zip(names)
                .map(|(a, name)| self.fetch_one(a, name, workspace)),
        )
        .await
    }
}
