use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::{JoinError, JoinSet};

/// State of the [`MeasureGuard`].
#[derive(Clone, Copy, Debug)]
enum MeasureState {
    /// The future is not ready.
    Pending,
    /// The future has terminated with a status.
    Done(&'static str),
}

/// A guard to [`measure`] the execution of futures.
struct MeasureGuard<'a> {
    state: MeasureState,
    task_name: &'a str,
    creation_time: Instant,
}

impl<'a> MeasureGuard<'a> {
    fn new(task_name: &'a str) -> Self {
        Self {
            state: MeasureState::Pending,
            task_name,
            creation_time: Instant::now(),
        }
    }

    fn done(mut self, status: &'static str) {
        self.state = MeasureState::Done(status);
    }
}

impl Drop for MeasureGuard<'_> {
    fn drop(&mut self) {
        let status = match self.state {
            MeasureState::Pending => "canceled",
            MeasureState::Done(status) => status,
        };

        metric!(
            timer(self.task_name) = self.creation_time.elapsed(),
            "status" => status,
        );
    }
}

/// Measures the duration of a future and reports it as a timer named `task_name`.
///
/// The metric is tagged with a `status` derived with the `get_status` function, or `canceled`
/// if the future is dropped before completion. See the [`m`] module for status helpers.
pub fn measure<'a, S, F>(
    task_name: &'a str,
    get_status: S,
    f: F,
) -> impl Future<Output = F::Output> + 'a
where
    F: 'a + Future,
    S: 'a + FnOnce(&F::Output) -> &'static str,
{
    let guard = MeasureGuard::new(task_name);

    async move {
        let output = f.await;
        guard.done(get_status(&output));
        output
    }
}

/// Status helpers for [`measure`].
pub mod m {
    /// Creates a status derived from the future's result for [`measure`](super::measure).
    ///
    ///  - `"ok"` if the future resolves to `Ok(_)`
    ///  - `"err"` if the future resolves to `Err(_)`
    pub fn result<T, E>(result: &Result<T, E>) -> &'static str {
        match result {
            Ok(_) => "ok",
            Err(_) => "err",
        }
    }
}

/// How often and how patiently [`retry`] repeats a failing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    /// Backoff before the second attempt.
    pub min_backoff: Duration,
    /// Upper bound of the backoff.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// The backoff after `attempt` failed attempts, doubling each time and capped at
    /// `max_backoff`. The result is jittered down to at most half its value.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let base = self
            .min_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff);
        if base.is_zero() {
            return base;
        }
        base.mul_f64(rand::rng().random_range(0.5..=1.0))
    }
}

/// The error of a [`retry`]ed operation.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not worth retrying.
    Permanent(E),
    /// Every attempt failed with a retryable error. This is the last of them.
    Exhausted { attempts: usize, last: E },
}

/// Runs the future created by `task_gen` until it succeeds, fails with an error for which
/// `should_retry` is false, or `policy.max_attempts` is reached.
pub async fn retry<G, F, T, E, R>(
    policy: &RetryPolicy,
    should_retry: R,
    mut task_gen: G,
) -> Result<T, RetryError<E>>
where
    G: FnMut(usize) -> F,
    F: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match task_gen(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !should_retry(&error) {
            return Err(RetryError::Permanent(error));
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let backoff = policy.backoff(attempt);
        tracing::debug!(attempt, ?backoff, "retrying after backoff");
        tokio::time::sleep(backoff).await;
    }
}

/// Runs `tasks` on the tokio runtime with at most `limit` of them in flight at once.
///
/// Results are returned in the order of `tasks`. The first error aborts all remaining tasks
/// and is returned. Dropping the returned future aborts every task that is still running.
pub async fn try_join_bounded<I, F, T, E>(limit: usize, tasks: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    let tasks: Vec<F> = tasks.into_iter().collect();
    let mut results: Vec<Option<T>> = tasks.iter().map(|_| None).collect();
    let mut pending = tasks.into_iter().enumerate();

    let mut set = JoinSet::new();
    for (idx, task) in pending.by_ref().take(limit.max(1)) {
        set.spawn(async move { (idx, task.await) });
    }

    while let Some(joined) = set.join_next().await {
        let (idx, result) = joined?;
        match result {
            Ok(value) => results[idx] = Some(value),
            Err(err) => {
                set.abort_all();
                return Err(err);
            }
        }

        if let Some((idx, task)) = pending.next() {
            set.spawn(async move { (idx, task.await) });
        }
    }

    Ok(results.into_iter().flatten().collect())
}
