//! Bundled executor: fetch the source with a single curl GET.
//!
//! The body is written to `<work_dir>/output.<ext>.part` and renamed into
//! place once the transfer and status check succeed. Cancellation is checked
//! from curl's progress callback, which aborts the transfer. A plain GET
//! learns nothing about the media beyond a title taken from the URL path.

use async_trait::async_trait;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ExecutionError, ExecutionOutput, ExecutionRequest, JobExecutor, MediaMetadata, ProgressReporter};
use crate::retry::{classify_curl_error, classify_http_status, ErrorKind};

/// Temporary file suffix used before atomic rename.
const TEMP_SUFFIX: &str = ".part";

/// curl-backed executor for http/https sources.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    pub connect_timeout: Duration,
    /// Abort when the transfer stays under 1 KiB/s for this long.
    pub low_speed_time: Duration,
    pub max_redirections: u32,
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_time: Duration::from_secs(60),
            max_redirections: 10,
        }
    }
}

fn io_failure(what: &str, path: &Path, e: std::io::Error) -> ExecutionError {
    ExecutionError::failed(ErrorKind::Engine, format!("{what} {}: {e}", path.display()))
}

fn setup_failure(e: curl::Error) -> ExecutionError {
    ExecutionError::failed(classify_curl_error(&e), format!("curl: {e}"))
}

/// Last non-empty path segment without its extension, e.g. "track" for
/// `https://host/media/track.mp3`.
fn title_from_url(source: &str) -> Option<String> {
    let url = url::Url::parse(source).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = Path::new(segment).file_stem()?.to_str()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

impl HttpExecutor {
    fn fetch_blocking(
        &self,
        url: &str,
        part_path: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let mut file = File::create(part_path).map_err(|e| io_failure("create", part_path, e))?;
        let mut write_error: Option<std::io::Error> = None;

        let mut easy = curl::easy::Easy::new();
        easy.url(url).map_err(setup_failure)?;
        easy.follow_location(true).map_err(setup_failure)?;
        easy.max_redirections(self.max_redirections)
            .map_err(setup_failure)?;
        easy.connect_timeout(self.connect_timeout)
            .map_err(setup_failure)?;
        easy.low_speed_limit(1024).map_err(setup_failure)?;
        easy.low_speed_time(self.low_speed_time)
            .map_err(setup_failure)?;
        easy.progress(true).map_err(setup_failure)?;

        let performed = {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| match file.write_all(data) {
                    Ok(()) => Ok(data.len()),
                    Err(e) => {
                        write_error = Some(e);
                        Ok(0) // abort transfer
                    }
                })
                .map_err(setup_failure)?;
            transfer
                .progress_function(|dltotal, dlnow, _, _| {
                    if dltotal > 0.0 {
                        progress.report(dlnow / dltotal);
                    }
                    !cancel.is_cancelled()
                })
                .map_err(setup_failure)?;
            transfer.perform()
        };

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        if let Some(e) = write_error {
            return Err(io_failure("write", part_path, e));
        }
        if let Err(e) = performed {
            if e.is_aborted_by_callback() {
                return Err(ExecutionError::Cancelled);
            }
            return Err(ExecutionError::failed(
                classify_curl_error(&e),
                format!("GET {url} failed: {e}"),
            ));
        }

        // 0 for non-HTTP protocols (file://).
        let code = easy.response_code().map_err(setup_failure)?;
        if code != 0 && !(200..300).contains(&code) {
            return Err(ExecutionError::failed(
                classify_http_status(code),
                format!("GET {url} returned HTTP {code}"),
            ));
        }

        file.sync_all()
            .map_err(|e| io_failure("sync", part_path, e))?;
        progress.report(1.0);
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for HttpExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        tokio::fs::create_dir_all(&request.work_dir)
            .await
            .map_err(|e| io_failure("create dir", &request.work_dir, e))?;

        let ext = request.output_format.extension();
        let final_path: PathBuf = request.work_dir.join(format!("output.{ext}"));
        let part_path: PathBuf = request.work_dir.join(format!("output.{ext}{TEMP_SUFFIX}"));

        tracing::debug!(job_id = request.job_id, url = %request.source, "fetch started");
        let executor = self.clone();
        let url = request.source.clone();
        let part = part_path.clone();
        let token = cancel.clone();
        tokio::task::spawn_blocking(move || executor.fetch_blocking(&url, &part, &progress, &token))
            .await
            .map_err(|e| ExecutionError::failed(ErrorKind::Engine, format!("fetch task: {e}")))??;

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| io_failure("finalize", &final_path, e))?;
        tracing::debug!(job_id = request.job_id, path = %final_path.display(), "fetch finished");
        Ok(ExecutionOutput {
            result_ref: final_path.to_string_lossy().into_owned(),
            metadata: MediaMetadata {
                title: title_from_url(&request.source),
                ..MediaMetadata::default()
            },
        })
    }
}
