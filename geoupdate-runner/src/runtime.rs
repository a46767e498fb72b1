use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use geoupdate_core::{Config, EditionId};
use geoupdate_sync::{DatabaseWriter, LocalFileWriter, ProcessLock, ReadResult};

use crate::error::{EditionError, RunError};
use crate::fetch::{FetchError, FetchOutcome, Fetcher};
use crate::outcome::{EditionReport, RunOutcome, RunReport};
use crate::retry::{RetryDecision, RetryPolicy};

/// Run one update from a synchronous caller and block until it finishes.
///
/// Ctrl-C aborts the run. The lock is released only after the runtime has
/// shut down, so no edition task or blocking write outlives it.
pub fn start_blocking(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<RunReport, RunError> {
    let lock = ProcessLock::acquire(&config.lock_file)?;
    tracing::debug!(lock = %lock.path().display(), "acquired update lock");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async {
        tokio::select! {
            result = update(config, fetcher) => result,
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c, aborting update run");
                Err(RunError::Interrupted)
            }
        }
    });
    // Waits for in-flight blocking writes.
    drop(runtime);

    release(lock);
    result
}

/// Update every configured edition under the process lock.
///
/// Returns the per-edition report even when some editions failed; call
/// [`RunReport::into_result`] to turn failures into an error.
pub async fn run(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<RunReport, RunError> {
    let lock = ProcessLock::acquire(&config.lock_file)?;
    tracing::debug!(lock = %lock.path().display(), "acquired update lock");

    let result = update(config, fetcher).await;
    release(lock);
    result
}

/// Release `lock`, logging a failure instead of propagating it.
fn release(mut lock: ProcessLock) {
    if let Err(err) = lock.release() {
        tracing::warn!(lock = %lock.path().display(), error = %err, "failed to release update lock");
    }
}

async fn update(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<RunReport, RunError> {
    let writer = LocalFileWriter::new(&config.database_directory, config.preserve_file_times)?;
    let started = Instant::now();
    let report = run_all(
        Arc::new(writer),
        fetcher,
        &config.edition_ids,
        config.parallelism,
        RetryPolicy::with_budget(config.retry_for),
    )
    .await;

    tracing::info!(
        updated = report.updated(),
        up_to_date = report.up_to_date(),
        failed = report.failed(),
        duration_ms = started.elapsed().as_millis() as u64,
        "update run finished",
    );
    Ok(report)
}

/// Update `editions` with at most `parallelism` in flight.
///
/// Each edition is owned by exactly one task; duplicates are dropped. A
/// `parallelism` of 0 or 1 runs editions one after another in input order.
/// Dropping the returned future aborts every edition task.
pub async fn run_all(
    writer: Arc<dyn DatabaseWriter>,
    fetcher: Arc<dyn Fetcher>,
    editions: &[EditionId],
    parallelism: usize,
    policy: RetryPolicy,
) -> RunReport {
    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut seen = HashSet::new();
    let mut tasks = JoinSet::new();

    for edition in editions {
        if !seen.insert(edition) {
            tracing::warn!(edition = %edition, "edition listed more than once; ignoring duplicate");
            continue;
        }

        let task = EditionTask {
            edition: edition.clone(),
            writer: writer.clone(),
            fetcher: fetcher.clone(),
            policy,
        };
        let permits = permits.clone();
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return EditionReport::failed(
                    task.edition,
                    EditionError::Task("worker pool closed".to_string()),
                    0,
                );
            };
            task.run().await
        });
    }

    let mut reports = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(err) => tracing::error!(error = %err, "update task did not complete"),
        }
    }

    // Editions whose task panicked have no report yet.
    let reported: HashSet<EditionId> = reports.iter().map(|r| r.edition_id.clone()).collect();
    for edition in seen {
        if !reported.contains(edition) {
            reports.push(EditionReport::failed(
                edition.clone(),
                EditionError::Task("update task did not complete".to_string()),
                0,
            ));
        }
    }
    RunReport::new(reports)
}

struct EditionTask {
    edition: EditionId,
    writer: Arc<dyn DatabaseWriter>,
    fetcher: Arc<dyn Fetcher>,
    policy: RetryPolicy,
}

/// A successful attempt.
enum Attempt {
    UpToDate {
        old_hash: String,
    },
    Updated {
        old_hash: String,
        new_hash: String,
        modified_at: chrono::DateTime<Utc>,
    },
}

impl EditionTask {
    async fn run(self) -> EditionReport {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            // Retries must finish inside the budget; the first attempt is unbounded.
            let deadline = (attempts > 1)
                .then(|| started.checked_add(self.policy.budget))
                .flatten();
            let err = match self.attempt(deadline).await {
                Ok(done) => return self.report(done, attempts),
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::error!(edition = %self.edition, error = %err, "update failed");
                return EditionReport::failed(self.edition, err, attempts);
            }

            match self.policy.decide(attempts, started.elapsed()) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        edition = %self.edition,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "update attempt failed; retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Abandon => {
                    tracing::error!(
                        edition = %self.edition,
                        attempts,
                        error = %err,
                        "retry budget exhausted",
                    );
                    return EditionReport::failed(self.edition, err, attempts);
                }
            }
        }
    }

    /// Baseline hash → fetch → maybe write, all before `deadline` if set.
    async fn attempt(&self, deadline: Option<Instant>) -> Result<Attempt, EditionError> {
        let old_hash = {
            let writer = self.writer.clone();
            let edition = self.edition.clone();
            tokio::task::spawn_blocking(move || writer.get_hash(&edition))
                .await
                .map_err(|err| EditionError::Task(format!("hash task join error: {err}")))??
        };

        let fetch = self.fetcher.fetch(&self.edition, &old_hash);
        let outcome = match deadline {
            None => fetch.await?,
            Some(deadline) => tokio::time::timeout_at(deadline, fetch)
                .await
                .map_err(|_| budget_exhausted())??,
        };
        let mut result = match outcome {
            FetchOutcome::NotModified => return Ok(Attempt::UpToDate { old_hash }),
            FetchOutcome::Modified(result) => result,
        };

        // A blocking write cannot be cancelled, so the stream stops itself.
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let stream = std::mem::replace(&mut result.reader, Box::new(io::empty()));
            result.reader = Box::new(DeadlineReader {
                inner: stream,
                deadline: std::time::Instant::now() + remaining,
            });
        }

        let new_hash = result.new_hash.to_ascii_lowercase();
        let modified_at = result.modified_at;
        self.write(result).await?;

        Ok(Attempt::Updated {
            old_hash,
            new_hash,
            modified_at,
        })
    }

    async fn write(&self, result: ReadResult) -> Result<(), EditionError> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.write(result))
            .await
            .map_err(|err| EditionError::Task(format!("write task join error: {err}")))??;
        Ok(())
    }

    fn report(&self, done: Attempt, attempts: u32) -> EditionReport {
        let checked_at = Utc::now();
        match done {
            Attempt::UpToDate { old_hash } => {
                tracing::info!(edition = %self.edition, hash = %old_hash, "database up to date");
                EditionReport {
                    edition_id: self.edition.clone(),
                    outcome: RunOutcome::UpToDate,
                    old_hash: Some(old_hash),
                    new_hash: None,
                    modified_at: None,
                    checked_at,
                    attempts,
                }
            }
            Attempt::Updated {
                old_hash,
                new_hash,
                modified_at,
            } => {
                tracing::info!(
                    edition = %self.edition,
                    old_hash = %old_hash,
                    new_hash = %new_hash,
                    "database updated",
                );
                EditionReport {
                    edition_id: self.edition.clone(),
                    outcome: RunOutcome::Updated,
                    old_hash: Some(old_hash),
                    new_hash: Some(new_hash),
                    modified_at: Some(modified_at),
                    checked_at,
                    attempts,
                }
            }
        }
    }
}

fn budget_exhausted() -> EditionError {
    EditionError::Fetch(FetchError::Transient(
        "retry budget exhausted during attempt".to_string(),
    ))
}

/// Fails reads with `TimedOut` once `deadline` has passed.
struct DeadlineReader {
    inner: Box<dyn Read + Send>,
    deadline: std::time::Instant,
}

impl Read for DeadlineReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if std::time::Instant::now() >= self.deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "retry budget exhausted during transfer",
            ));
        }
        self.inner.read(buf)
    }
}

/// Install a `tracing` subscriber. `RUST_LOG` overrides the verbosity default.
pub fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
