//! Background reprocessing of payments the webhook receiver could not complete.

use metrics::counter;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::message_queue::{MessageQueueError, PAYMENT_REPROCESS_TOPIC};
use crate::services::payment_webhooks::{is_deferrable, PaymentWebhookService, ReprocessPayload};

const BATCH_SIZE: usize = 50;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub requeued: usize,
    pub exhausted: usize,
}

/// Starts the worker loop. It stops when `shutdown` flips to `true`.
pub fn start_worker(
    service: PaymentWebhookService,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "payment recovery worker started");
        loop {
            let report = drain_once(&service, BATCH_SIZE).await;
            if report != DrainReport::default() {
                info!(
                    completed = report.completed,
                    requeued = report.requeued,
                    exhausted = report.exhausted,
                    "payment recovery pass finished"
                );
            }

            tokio::select! {
                _ = sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("payment recovery worker stopped");
    })
}

/// Processes up to `batch_size` queued payments once. Messages re-queued during the
/// pass wait for the next one.
pub async fn drain_once(service: &PaymentWebhookService, batch_size: usize) -> DrainReport {
    let queue = service.retry_queue().clone();
    let mut report = DrainReport::default();

    let mut batch = Vec::new();
    while batch.len() < batch_size {
        match queue.subscribe(PAYMENT_REPROCESS_TOPIC).await {
            Ok(Some(message)) => batch.push(message),
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read payment retry queue");
                break;
            }
        }
    }

    for message in batch {
        let payload: ReprocessPayload = match message.payload_as() {
            Ok(payload) => payload,
            Err(e) => {
                error!(message_id = %message.id, error = %e, "dropping unreadable retry message");
                let _ = queue.ack(&message.id).await;
                continue;
            }
        };

        match service.process_payment(&payload.payment_id).await {
            Ok(outcome) => {
                info!(
                    payment_id = %payload.payment_id,
                    attempt = message.retry_count + 1,
                    outcome = outcome.label(),
                    "queued payment reprocessed"
                );
                if let Err(e) = queue.ack(&message.id).await {
                    warn!(message_id = %message.id, error = %e, "failed to ack retry message");
                }
                report.completed += 1;
            }
            Err(err) if !is_deferrable(&err) => {
                error!(
                    payment_id = %payload.payment_id,
                    attempt = message.retry_count + 1,
                    error = %err,
                    "payment cannot be reprocessed; reconcile this payment manually"
                );
                if let Err(e) = queue.ack(&message.id).await {
                    warn!(message_id = %message.id, error = %e, "failed to ack retry message");
                }
                report.exhausted += 1;
            }
            Err(err) => match queue.nack(&message.id).await {
                Err(MessageQueueError::RetriesExhausted { attempts, .. }) => {
                    counter!("webhooks.retry.exhausted", 1);
                    error!(
                        payment_id = %payload.payment_id,
                        attempts,
                        error = %err,
                        "payment reprocessing gave up; reconcile this payment manually"
                    );
                    report.exhausted += 1;
                }
                Err(e) => {
                    error!(payment_id = %payload.payment_id, error = %e, "failed to requeue payment");
                    report.exhausted += 1;
                }
                Ok(()) => {
                    warn!(
                        payment_id = %payload.payment_id,
                        attempt = message.retry_count + 1,
                        error = %err,
                        "payment reprocessing failed; will retry"
                    );
                    report.requeued += 1;
                }
            },
        }
    }

    report
}
