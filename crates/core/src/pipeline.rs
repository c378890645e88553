//! Pipeline orchestration.
//!
//! Runs extraction, prompt building, the gateway call, reply parsing, and
//! patching for every conflict region of a file. Regions are independent:
//! each gets its own task, bounded by a shared semaphore, and one region
//! failing never blocks the others. The patcher reassembles output from
//! explicit byte offsets, so completion order does not matter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::conflict::{apply_resolutions, scan_conflicts};
use crate::llm::prompt::DEFAULT_CONTEXT_LINES;
use crate::llm::{parse_resolution, LlmGateway, PromptBuilder};
use crate::models::{
    ConflictUnit, FileStatus, PromptPayload, ResolutionResult, ResolvedRegion,
};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Caller-supplied knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum regions resolved in parallel across all files.
    pub max_concurrent_units: usize,

    /// Maximum files processed in parallel by [`Pipeline::resolve_files`].
    pub max_concurrent_files: usize,

    /// Retries per region after the initial attempt, for transient provider
    /// failures only.
    pub max_retries: u32,

    /// Base delay for exponential retry backoff.
    pub retry_backoff: Duration,

    /// Minimum delay after each provider request. Zero disables pacing.
    pub request_interval: Duration,

    /// Unchanged lines included around each region when building prompts.
    pub context_lines: usize,

    /// Merge commit message included in every prompt when present.
    pub commit_message: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_units: 8,
            max_concurrent_files: 4,
            max_retries: 2,
            retry_backoff: Duration::from_secs(2),
            request_interval: Duration::ZERO,
            context_lines: DEFAULT_CONTEXT_LINES,
            commit_message: None,
        }
    }
}

impl From<&PipelineSettings> for PipelineOptions {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            max_concurrent_units: settings.max_concurrent_units,
            max_concurrent_files: settings.max_concurrent_files,
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_secs(settings.retry_backoff_secs),
            request_interval: Duration::from_millis(settings.request_interval_ms),
            context_lines: settings.prompt_context_lines,
            commit_message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation shared by every task of a run.
///
/// Cancelling aborts waits and in-flight gateway calls; regions already
/// resolved keep their results, so partial output stays valid.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled. Interest is registered before
    /// the flag check, so a concurrent `cancel` cannot slip between them.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Resolves the conflicts of files through one provider gateway.
#[derive(Clone)]
pub struct Pipeline {
    gateway: Arc<dyn LlmGateway>,
    semaphore: Arc<Semaphore>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(gateway: Box<dyn LlmGateway>, options: PipelineOptions) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent_units.max(1)));
        Self {
            gateway: Arc::from(gateway),
            semaphore,
            options,
        }
    }

    /// Resolve every conflict region in one file's text.
    ///
    /// Always returns a result: fully resolved, partially resolved with the
    /// failed region indexes, or a file-level failure for malformed markers.
    /// The input text is never modified outside region spans.
    pub async fn resolve_text(
        &self,
        file_path: &str,
        text: &str,
        cancel: &CancelToken,
    ) -> ResolutionResult {
        let units = match scan_conflicts(file_path, text) {
            Ok(units) => units,
            Err(e) => {
                warn!(file = file_path, error = %e, "conflict extraction failed");
                return ResolutionResult::failed(file_path, text, e);
            }
        };

        if units.is_empty() {
            debug!(file = file_path, "no conflict regions");
            return ResolutionResult {
                file_path: file_path.to_string(),
                original_text: text.to_string(),
                patched_text: text.to_string(),
                units: Vec::new(),
                status: FileStatus::FullyResolved,
            };
        }

        info!(file = file_path, regions = units.len(), "resolving conflicts");
        let mut builder = PromptBuilder::new(self.options.context_lines);
        if let Some(message) = &self.options.commit_message {
            builder = builder.with_commit_message(message.clone());
        }

        let mut handles: Vec<JoinHandle<ResolvedRegion>> = Vec::with_capacity(units.len());
        for unit in &units {
            let prompt = builder.build(unit, text);
            let pipeline = self.clone();
            let cancel = cancel.clone();
            let file = unit.file_path.clone();
            let index = unit.index;
            handles.push(tokio::spawn(async move {
                pipeline.resolve_unit(&file, index, prompt, cancel).await
            }));
        }

        let mut pairs: Vec<(ConflictUnit, ResolvedRegion)> = Vec::with_capacity(units.len());
        for (unit, handle) in units.into_iter().zip(handles) {
            let region = match handle.await {
                Ok(region) => region,
                Err(e) => ResolvedRegion::Failed {
                    reason: format!("resolution task aborted: {e}"),
                },
            };
            pairs.push((unit, region));
        }

        let patched_text = match apply_resolutions(text, &pairs) {
            Ok(patched) => patched,
            Err(e) => {
                warn!(file = file_path, error = %e, "patching failed");
                return ResolutionResult {
                    file_path: file_path.to_string(),
                    original_text: text.to_string(),
                    patched_text: text.to_string(),
                    units: pairs,
                    status: FileStatus::Failed { error: e.to_string() },
                };
            }
        };

        let failed_units: Vec<usize> = pairs
            .iter()
            .filter(|(_, region)| !region.is_resolved())
            .map(|(unit, _)| unit.index)
            .collect();
        let status = if failed_units.is_empty() {
            FileStatus::FullyResolved
        } else {
            FileStatus::PartiallyResolved { failed_units }
        };

        info!(
            file = file_path,
            resolved = pairs.iter().filter(|(_, r)| r.is_resolved()).count(),
            failed = pairs.iter().filter(|(_, r)| !r.is_resolved()).count(),
            "file done"
        );

        ResolutionResult {
            file_path: file_path.to_string(),
            original_text: text.to_string(),
            patched_text,
            units: pairs,
            status,
        }
    }

    /// Resolve a batch of `(path, text)` files concurrently.
    ///
    /// Results come back in input order regardless of completion order.
    pub async fn resolve_files(
        &self,
        files: Vec<(String, String)>,
        cancel: &CancelToken,
    ) -> Vec<ResolutionResult> {
        let file_sem = Arc::new(Semaphore::new(self.options.max_concurrent_files.max(1)));

        let mut handles: Vec<(String, JoinHandle<ResolutionResult>)> =
            Vec::with_capacity(files.len());
        for (path, text) in files {
            let pipeline = self.clone();
            let cancel = cancel.clone();
            let sem = Arc::clone(&file_sem);
            let task_path = path.clone();
            handles.push((
                path,
                tokio::spawn(async move {
                    // After cancellation skip the queue: extraction is pure
                    // CPU and every unit fails fast anyway.
                    let _permit = tokio::select! {
                        _ = cancel.cancelled() => None,
                        permit = Arc::clone(&sem).acquire_owned() => permit.ok(),
                    };
                    pipeline.resolve_text(&task_path, &text, &cancel).await
                }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (path, handle) in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => ResolutionResult::failed(
                    path,
                    String::new(),
                    format!("resolution task aborted: {e}"),
                ),
            });
        }
        results
    }

    /// Resolve one region: gateway call, reply parsing, bounded retries.
    async fn resolve_unit(
        &self,
        file_path: &str,
        index: usize,
        prompt: PromptPayload,
        cancel: CancelToken,
    ) -> ResolvedRegion {
        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                return ResolvedRegion::Failed { reason: "cancelled".into() };
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return ResolvedRegion::Failed { reason: "resolution pool closed".into() };
                }
            },
        };

        let mut attempt = 0u32;
        let outcome = loop {
            attempt += 1;
            let reply = tokio::select! {
                _ = cancel.cancelled() => break Err("cancelled".to_string()),
                reply = self.gateway.resolve(&prompt) => reply,
            };

            match reply {
                Ok(raw) => match parse_resolution(&raw.text) {
                    Ok(text) => break Ok((text, raw.latency)),
                    Err(e) => {
                        warn!(file = file_path, index, error = %e, "reply not usable");
                        break Err(e.to_string());
                    }
                },
                Err(e) if e.is_retryable() && attempt <= self.options.max_retries => {
                    let delay = backoff_delay(self.options.retry_backoff, attempt);
                    warn!(
                        file = file_path,
                        index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "provider call failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break Err("cancelled".to_string()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(file = file_path, index, error = %e, "provider call failed");
                    break Err(e.to_string());
                }
            }
        };

        // Pacing runs while the permit is held, so the request rate stays
        // bounded even with a deep queue behind the semaphore.
        if !self.options.request_interval.is_zero() && !cancel.is_cancelled() {
            tokio::time::sleep(self.options.request_interval).await;
        }
        drop(permit);

        match outcome {
            Ok((text, latency)) => {
                debug!(file = file_path, index, "region resolved");
                ResolvedRegion::Resolved {
                    text,
                    latency_ms: latency.as_millis() as u64,
                }
            }
            Err(reason) => ResolvedRegion::Failed { reason },
        }
    }
}

/// Exponential backoff with a small random jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let scaled = base.saturating_mul(1u32 << shift);
    let jitter = rand::thread_rng().gen_range(0..=250u64);
    scaled + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let base = Duration::from_secs(2);
        for (attempt, factor) in [(1u32, 1u32), (2, 2), (3, 4), (4, 8)] {
            let delay = backoff_delay(base, attempt);
            let floor = base * factor;
            assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
            assert!(delay <= floor + Duration::from_millis(250));
        }
    }

    #[test]
    fn test_backoff_shift_is_capped() {
        let delay = backoff_delay(Duration::from_millis(1), 10_000);
        assert!(delay <= Duration::from_millis(1 << 16) + Duration::from_millis(250));
    }

    #[test]
    fn test_options_from_settings() {
        let settings = PipelineSettings {
            max_concurrent_units: 3,
            max_concurrent_files: 2,
            max_retries: 1,
            retry_backoff_secs: 5,
            request_interval_ms: 100,
            prompt_context_lines: 4,
        };
        let options = PipelineOptions::from(&settings);
        assert_eq!(options.max_concurrent_units, 3);
        assert_eq!(options.retry_backoff, Duration::from_secs(5));
        assert_eq!(options.request_interval, Duration::from_millis(100));
        assert_eq!(options.context_lines, 4);
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
        token.cancel();

        let woke = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(woke);
    }

    #[tokio::test]
    async fn test_cancelled_token_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());

        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
