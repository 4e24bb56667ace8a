//! Extraction worker: drives one provider step per message,
//! writes raw payloads, and schedules the next step.

use std::sync::Arc;

use chrono::Utc;
use etl_domain::{RawExtractionRecord, RelationalStore};
use etl_providers::{retry_with_backoff, ProviderClient, ProviderRequest, RateLimiterRegistry, RetryPolicy};
use etl_queue::job::Stage;
use etl_queue::{Envelope, JobStore, QueueBackend, QueueKind};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::WorkerResult;

pub struct ExtractionWorker<P: ProviderClient> {
    pub queue: Arc<dyn QueueBackend>,
    pub store: Arc<dyn RelationalStore>,
    pub job_store: Arc<dyn JobStore>,
    pub provider_client: Arc<P>,
    pub rate_limiter: Arc<RateLimiterRegistry>,
    pub retry_policy: RetryPolicy,
    pub dead_letter_threshold: u32,
}

impl<P: ProviderClient> ExtractionWorker<P> {
    /// Consume and process exactly one extraction-queue message. Returns
    /// once the message has been acked or nacked.
    #[instrument(skip(self))]
    pub async fn run_once(&self, tenant: etl_core::TenantId) -> WorkerResult<()> {
        let (envelope, ack) = self.queue.consume(QueueKind::Extraction, tenant).await?;
        match self.process(&envelope).await {
            Ok(()) => {
                self.queue.ack(ack).await?;
                Ok(())
            }
            Err(err) => {
                warn!(step = %envelope.step_name, error = %err, "extraction step failed");
                let diverted = self.queue.nack(ack, envelope.clone(), self.dead_letter_threshold).await?;
                if diverted {
                    self.mark_step_failed(&envelope).await?;
                    self.publish_failure_terminal(&envelope).await?;
                }
                Ok(())
            }
        }
    }

    async fn process(&self, envelope: &Envelope) -> WorkerResult<()> {
        let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
        job.apply_first_item(&envelope.step_name, Stage::Extraction);
        self.job_store.upsert(job.clone()).await?;

        let step = etl_providers::steps_for(self.provider())
            .iter()
            .find(|s| s.name == envelope.step_name)
            .expect("extraction worker only receives step names it declared");
        let is_terminal_step = step.order + 1 == etl_providers::steps_for(self.provider()).len();

        let settings = self.settings_for(envelope).await?;

        self.rate_limiter
            .acquire(
                envelope.tenant_id,
                envelope.integration_id,
                self.provider(),
                settings.rate_limit_per_window,
                std::time::Duration::from_secs(settings.rate_limit_window_secs),
            )
            .await;

        let records = self.fetch_all_pages(step, envelope).await?;

        let mut raw_envelopes = Vec::with_capacity(records.len());
        for record in records {
            let provider_id = record.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let raw = RawExtractionRecord::new(
                envelope.tenant_id,
                envelope.integration_id,
                envelope.step_name.clone(),
                serde_json::to_vec(&record).unwrap_or_default(),
                provider_id,
            );
            let stored = self.store.write_raw(raw).await?;
            raw_envelopes.push(
                Envelope::new(
                    envelope.tenant_id,
                    envelope.integration_id,
                    envelope.job_id,
                    envelope.step_name.clone(),
                    envelope.payload_type.clone(),
                    envelope.token,
                    envelope.old_last_sync_date,
                    envelope.new_last_sync_date,
                )
                .with_raw_id(stored.raw_id),
            );
        }

        let marked = etl_queue::envelope::mark_step_sequence(raw_envelopes, is_terminal_step);
        if marked.is_empty() {
            let terminal = etl_queue::envelope::synthetic_terminal(
                Envelope::new(
                    envelope.tenant_id,
                    envelope.integration_id,
                    envelope.job_id,
                    envelope.step_name.clone(),
                    envelope.payload_type.clone(),
                    envelope.token,
                    envelope.old_last_sync_date,
                    envelope.new_last_sync_date,
                ),
                is_terminal_step,
            );
            self.queue.publish(QueueKind::Transform, envelope.tenant_id, terminal).await?;
        } else {
            for message in marked {
                self.queue.publish(QueueKind::Transform, envelope.tenant_id, message).await?;
            }
        }

        let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
        job.apply_last_item(&envelope.step_name, Stage::Extraction);
        self.job_store.upsert(job).await?;

        if !is_terminal_step {
            self.schedule_next_step(envelope, step.order + 1).await?;
        }

        info!(step = %envelope.step_name, terminal = is_terminal_step, "extraction step complete");
        Ok(())
    }

    async fn schedule_next_step(&self, envelope: &Envelope, next_order: usize) -> WorkerResult<()> {
        let next_step = etl_providers::steps_for(self.provider())
            .get(next_order)
            .expect("next_order is only called when a following step exists");

        let next = Envelope::new(
            envelope.tenant_id,
            envelope.integration_id,
            envelope.job_id,
            next_step.name,
            envelope.payload_type.clone(),
            envelope.token,
            envelope.old_last_sync_date,
            envelope.new_last_sync_date,
        )
        .with_markers(true, true, false);

        self.queue.publish(QueueKind::Extraction, envelope.tenant_id, next).await?;
        Ok(())
    }

    async fn fetch_all_pages(&self, step: &'static etl_providers::StepSpec, envelope: &Envelope) -> WorkerResult<Vec<Value>> {
        let settings = self.settings_for(envelope).await?;

        let dev_status_eligible = if step.name == "jira_dev_status" {
            let mapping = self.store.fetch_custom_field_mapping(envelope.tenant_id, envelope.integration_id).await?;
            if !mapping.has_development_field() {
                info!(tenant_id = %envelope.tenant_id, "skipping jira_dev_status: no development_field mapped for this tenant");
                return Ok(Vec::new());
            }
            true
        } else {
            true
        };

        let mut cursor = None;
        let mut records = Vec::new();
        loop {
            let request = ProviderRequest { step, settings: settings.clone(), watermark: envelope.old_last_sync_date, cursor, dev_status_eligible };
            let client = self.provider_client.clone();
            let step_name = step.name;
            let page = retry_with_backoff(self.retry_policy, step_name, || {
                let client = client.clone();
                let request = request.clone();
                async move { client.fetch_page(&request).await }
            })
            .await?;

            let done = page.is_last_page();
            records.extend(page.records);
            if done {
                break;
            }
            cursor = page.next_cursor.clone();
        }
        Ok(records)
    }

    async fn settings_for(&self, envelope: &Envelope) -> WorkerResult<etl_domain::IntegrationSettings> {
        let mut settings = self.store.fetch_integration_settings(envelope.tenant_id, envelope.integration_id, self.provider()).await?;
        // The store's last_sync_date is a point-in-time snapshot; the job's
        // own watermark is authoritative for this run since it travels with
        // the message rather than the integration row.
        settings.last_sync_date = envelope.old_last_sync_date;
        Ok(settings)
    }

    fn provider(&self) -> etl_domain::Provider {
        // Fixed for the lifetime of one worker instance: one worker is
        // spawned per (tenant, provider) pair by the pipeline manager.
        self.provider_client.provider_name().parse_provider()
    }

    async fn mark_step_failed(&self, envelope: &Envelope) -> WorkerResult<()> {
        let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
        job.apply_failure(&envelope.step_name, Stage::Extraction);
        self.job_store.upsert(job).await?;
        Ok(())
    }

    async fn publish_failure_terminal(&self, envelope: &Envelope) -> WorkerResult<()> {
        let steps = etl_providers::steps_for(self.provider());
        let is_terminal_step = steps.iter().find(|s| s.name == envelope.step_name).map(|s| s.order + 1 == steps.len()).unwrap_or(true);
        let terminal = etl_queue::envelope::synthetic_terminal(
            Envelope::new(
                envelope.tenant_id,
                envelope.integration_id,
                envelope.job_id,
                envelope.step_name.clone(),
                envelope.payload_type.clone(),
                envelope.token,
                envelope.old_last_sync_date,
                Utc::now(),
            ),
            is_terminal_step,
        );
        self.queue.publish(QueueKind::Transform, envelope.tenant_id, terminal).await?;
        Ok(())
    }
}

trait ParseProvider {
    fn parse_provider(&self) -> etl_domain::Provider;
}

impl ParseProvider for str {
    fn parse_provider(&self) -> etl_domain::Provider {
        match self {
            "github" => etl_domain::Provider::Github,
            _ => etl_domain::Provider::Jira,
        }
    }
}
