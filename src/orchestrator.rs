// src/orchestrator.rs

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::GenerationSettings;
use crate::engine::{EngineError, GenerationRequest, ImageGenerator, RenderedImage};
use crate::error::AppError;
use crate::jobs::{GENERIC_FAILURE_MESSAGE, JobStore, validate_dimensions};
use crate::ledger::Ledger;
use crate::models::{GeneratedImage, GenerationJob, JobStatus, NewJob};
use crate::storage::ImageStorage;

/// Stale jobs handled per sweep.
const RECOVERY_BATCH: i64 = 100;
/// Attempts at returning a reservation before giving up and logging.
const REFUND_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub images_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { images: usize },
    Failed,
    /// Someone else (usually the recovery sweep) already closed the job.
    AlreadyTerminal,
}

/// Spends credits and drives the image engine. Nothing else does either.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    ledger: Arc<dyn Ledger>,
    jobs: Arc<dyn JobStore>,
    engine: Arc<dyn ImageGenerator>,
    storage: Arc<dyn ImageStorage>,
    settings: GenerationSettings,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        jobs: Arc<dyn JobStore>,
        engine: Arc<dyn ImageGenerator>,
        storage: Arc<dyn ImageStorage>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                jobs,
                engine,
                storage,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.inner.settings
    }

    /// Admits the request and hands execution to a supervised background task.
    pub async fn submit(&self, user_id: Uuid, params: GenerateParams) -> Result<JobTicket, AppError> {
        let job = self.admit(user_id, params).await?;
        let ticket = JobTicket {
            job_id: job.id,
            status: job.status,
            images_count: self.inner.settings.images_per_job,
        };
        self.dispatch(job);
        Ok(ticket)
    }

    /// Validates, reserves the credits and creates the job row, in that order.
    /// On return the user has paid and the job is `processing`.
    pub async fn admit(&self, user_id: Uuid, params: GenerateParams) -> Result<GenerationJob, AppError> {
        let inner = &self.inner;
        let cost = inner.settings.cost;

        let prompt = params.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::Validation("prompt must not be empty".to_string()));
        }
        validate_dimensions(params.width, params.height)?;
        let negative_prompt = params
            .negative_prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        inner.ledger.roll_usage_period(user_id, Utc::now()).await?;

        // Early exit only; `debit` is the authoritative check.
        let balance = inner.ledger.balance(user_id).await?;
        if balance < cost {
            return Err(AppError::InsufficientCredits { required: cost });
        }

        let remaining = inner.ledger.debit(user_id, cost).await?;
        log::info!("reserved {cost} credits user_id={user_id} remaining={remaining}");

        let created = inner
            .jobs
            .create(NewJob {
                user_id,
                prompt,
                negative_prompt,
                width: params.width,
                height: params.height,
            })
            .await;

        match created {
            Ok(job) => {
                log::info!("job created job_id={} user_id={user_id}", job.id);
                Ok(job)
            }
            Err(e) => {
                log::error!("job create failed after debit user_id={user_id}: {e}");
                self.refund(user_id, None).await;
                Err(e)
            }
        }
    }

    /// Runs the job on its own task. A supervisor task waits for it and, if the
    /// worker panicked or was cancelled, fails the job and returns the credits.
    pub fn dispatch(&self, job: GenerationJob) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let job_id = job.id;
            let user_id = job.user_id;

            let worker = {
                let this = this.clone();
                tokio::spawn(async move { this.execute(&job).await })
            };

            match worker.await {
                Ok(outcome) => log::debug!("job {job_id} finished: {outcome:?}"),
                Err(e) => {
                    log::error!("generation worker for job {job_id} died: {e}");
                    if let Err(e) = this.fail_and_refund(job_id, user_id).await {
                        log::error!("could not close crashed job {job_id}: {e}");
                    }
                }
            }
        })
    }

    /// Calls the engine until the job has its target image count, the attempt
    /// budget runs out, or the vendor fails. Zero images means failed and refunded.
    pub async fn execute(&self, job: &GenerationJob) -> JobOutcome {
        let settings = &self.inner.settings;
        let target = settings.images_per_job as usize;
        let max_attempts = 1 + target;

        let mut images: Vec<GeneratedImage> = Vec::with_capacity(target);
        let mut attempts = 0;
        let mut transient_retry_used = false;
        let mut last_error: Option<EngineError> = None;

        while images.len() < target && attempts < max_attempts {
            attempts += 1;
            let request = GenerationRequest {
                prompt: job.prompt.clone(),
                negative_prompt: job.negative_prompt.clone(),
                width: job.width,
                height: job.height,
                count: (target - images.len()) as u32,
            };

            match self.inner.engine.generate(&request).await {
                Ok(batch) if batch.is_empty() => {
                    log::warn!("engine {} returned no images job_id={}", self.inner.engine.name(), job.id);
                    break;
                }
                Ok(batch) => {
                    let remaining = target - images.len();
                    for rendered in batch.into_iter().take(remaining) {
                        let index = images.len() as u32 + 1;
                        match self.store_image(job, index, rendered).await {
                            Ok(image) => images.push(image),
                            Err(e) => log::warn!("skipping image {index} of job {}: {e}", job.id),
                        }
                    }
                }
                Err(EngineError::Transient(msg)) if images.is_empty() && !transient_retry_used => {
                    log::warn!("transient engine error job_id={}, retrying once: {msg}", job.id);
                    transient_retry_used = true;
                    last_error = Some(EngineError::Transient(msg));
                    tokio::time::sleep(settings.retry_backoff).await;
                }
                Err(e) => {
                    log::warn!("engine error job_id={} after {} image(s): {e}", job.id, images.len());
                    last_error = Some(e);
                    break;
                }
            }
        }

        if images.is_empty() {
            match &last_error {
                Some(e) => log::error!("job {} produced no images: {e}", job.id),
                None => log::error!("job {} produced no images", job.id),
            }
            return match self.fail_and_refund(job.id, job.user_id).await {
                Ok(true) => JobOutcome::Failed,
                Ok(false) => JobOutcome::AlreadyTerminal,
                Err(e) => {
                    log::error!("could not fail job {}: {e}", job.id);
                    JobOutcome::Failed
                }
            };
        }

        if images.len() < target {
            log::info!(
                "job {} completing with partial result {}/{target}",
                job.id,
                images.len()
            );
        }

        match self.inner.jobs.complete(job.id, &images).await {
            Ok(()) => {
                log::info!("job {} completed with {} image(s)", job.id, images.len());
                JobOutcome::Completed {
                    images: images.len(),
                }
            }
            Err(AppError::InvalidTransition { job_id }) => {
                log::error!("job {job_id} was closed before its result arrived");
                JobOutcome::AlreadyTerminal
            }
            Err(e) => {
                log::error!("could not store result of job {}: {e}", job.id);
                match self.fail_and_refund(job.id, job.user_id).await {
                    Ok(false) => JobOutcome::AlreadyTerminal,
                    _ => JobOutcome::Failed,
                }
            }
        }
    }

    /// Fails the job with the generic message and returns the reservation.
    /// Returns false when the job was already terminal; then nothing is refunded.
    pub async fn fail_and_refund(&self, job_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        match self.inner.jobs.fail(job_id, GENERIC_FAILURE_MESSAGE).await {
            Ok(()) => {
                self.refund(user_id, Some(job_id)).await;
                Ok(true)
            }
            Err(AppError::InvalidTransition { .. }) => {
                log::error!("job {job_id} already terminal, not refunding again");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Fails every job stuck in `processing` for longer than the job timeout.
    pub async fn recover_stale(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let timeout = chrono::Duration::from_std(self.inner.settings.job_timeout)
            .map_err(|e| AppError::Internal(format!("job timeout out of range: {e}")))?;
        let stale = self.inner.jobs.list_stale(now - timeout, RECOVERY_BATCH).await?;

        let mut recovered = 0;
        for job in stale {
            match self.fail_and_refund(job.id, job.user_id).await {
                Ok(true) => {
                    log::warn!("recovered orphaned job {} of user {}", job.id, job.user_id);
                    recovered += 1;
                }
                Ok(false) => {}
                Err(e) => log::error!("recovery of job {} failed: {e}", job.id),
            }
        }
        Ok(recovered)
    }

    async fn refund(&self, user_id: Uuid, job_id: Option<Uuid>) {
        let cost = self.inner.settings.cost;
        for attempt in 1..=REFUND_ATTEMPTS {
            match self.inner.ledger.credit(user_id, cost).await {
                Ok(balance) => {
                    log::info!("refunded {cost} credits user_id={user_id} job_id={job_id:?} balance={balance}");
                    return;
                }
                Err(e) if e.is_transient() && attempt < REFUND_ATTEMPTS => {
                    log::warn!("refund attempt {attempt} failed user_id={user_id}: {e}");
                }
                Err(e) => {
                    log::error!("REFUND LOST user_id={user_id} job_id={job_id:?} amount={cost}: {e}");
                    return;
                }
            }
        }
    }

    async fn store_image(
        &self,
        job: &GenerationJob,
        index: u32,
        rendered: RenderedImage,
    ) -> Result<GeneratedImage, AppError> {
        let extension = match rendered.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        };
        let filename = format!("img_{}_{index}.{extension}", job.id);
        let key = format!("generated/{}/{filename}", job.user_id);

        let url = self
            .inner
            .storage
            .put(&key, rendered.bytes, &rendered.mime_type)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        Ok(GeneratedImage {
            url,
            filename,
            index,
        })
    }
}
