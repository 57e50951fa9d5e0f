//! Bounded-concurrency job pipeline.
//!
//! A [`Pipeline`] collects independent jobs and runs them on the tokio runtime with at
//! most `limit` of them in flight. Jobs are admitted in submission order; a new job
//! starts as soon as a running one releases its permit. Completion order is free, but
//! every result lands at the index its job was submitted under.
//!
//! A failing job never cancels its siblings. Panics are caught at the job boundary and
//! recorded as [`JobPanic`] in that job's slot, so the batch always drains completely.
//!
//! ## Example
//!
//! ```ignore
//! let mut pipeline = Pipeline::new(4)?;
//! for n in 0..16u64 {
//!     pipeline.submit(async move { n * n });
//! }
//! let report = pipeline.run().await?;
//! assert_eq!(report.len(), 16);
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::PipelineError;

/// A job that panicked instead of producing a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job panicked: {0}")]
pub struct JobPanic(pub String);

impl JobPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        JobPanic(message)
    }
}

/// Tracks how many jobs are running right now and the highest value seen.
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Results of a drained pipeline, indexed by submission order.
#[derive(Debug)]
pub struct BatchReport<T> {
    results: Vec<Result<T, JobPanic>>,
    peak_in_flight: usize,
}

impl<T> BatchReport<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Result of the job submitted at `index`.
    pub fn get(&self, index: usize) -> Option<&Result<T, JobPanic>> {
        self.results.get(index)
    }

    /// Highest number of jobs that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    pub fn iter(&self) -> impl Iterator<Item = &Result<T, JobPanic>> {
        self.results.iter()
    }

    pub fn into_results(self) -> Vec<Result<T, JobPanic>> {
        self.results
    }
}

/// A caller-owned batch scheduler with a fixed concurrency limit.
pub struct Pipeline<T> {
    limit: usize,
    jobs: Vec<BoxFuture<'static, T>>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Create an empty pipeline. A limit of 1 runs jobs strictly one after another.
    pub fn new(limit: usize) -> Result<Self, PipelineError> {
        if limit == 0 {
            return Err(PipelineError::ZeroConcurrency);
        }
        Ok(Self {
            limit,
            jobs: Vec::new(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Queue a job and return the index its result will be reported under.
    pub fn submit<F>(&mut self, job: F) -> usize
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.jobs.push(job.boxed());
        self.jobs.len() - 1
    }

    /// Run every queued job and resolve once all of them have finished.
    pub async fn run(self) -> Result<BatchReport<T>, PipelineError> {
        let total = self.jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let in_flight = Arc::new(InFlight::default());
        let mut set = JoinSet::new();

        tracing::debug!(jobs = total, limit = self.limit, "Starting pipeline batch");

        for (index, job) in self.jobs.into_iter().enumerate() {
            // Admission happens here so that at most `limit` tasks exist past this point.
            let permit = Arc::clone(&semaphore).acquire_owned().await?;
            let in_flight = Arc::clone(&in_flight);

            set.spawn(async move {
                let _permit = permit;
                in_flight.enter();
                let outcome = AssertUnwindSafe(job)
                    .catch_unwind()
                    .await
                    .map_err(JobPanic::from_payload);
                in_flight.exit();
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Result<T, JobPanic>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "Pipeline task failed outside job boundary"),
            }
        }

        let results = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(JobPanic("job result lost".to_string()))))
            .collect();

        Ok(BatchReport {
            results,
            peak_in_flight: in_flight.peak.load(Ordering::SeqCst),
        })
    }

    /// Like [`run`](Self::run), invoking `on_complete` exactly once after the batch drains.
    pub async fn run_with<C>(self, on_complete: C) -> Result<BatchReport<T>, PipelineError>
    where
        C: FnOnce(&BatchReport<T>),
    {
        let report = self.run().await?;
        on_complete(&report);
        Ok(report)
    }
}
