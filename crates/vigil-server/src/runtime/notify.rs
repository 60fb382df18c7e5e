use vigil_common::types::NotificationKind;
use vigil_notify::{AlertMessage, Notifier};
use vigil_storage::Store;

use crate::runtime::NotifyJob;

/// Executes one notification job. Reminders re-check the incident first:
/// a subject that resolved while the job sat in the queue stays quiet.
pub async fn deliver(notifier: &Notifier, store: &Store, job: &NotifyJob) -> anyhow::Result<()> {
    if job.kind == NotificationKind::Reminder {
        match store.get_incident(&job.incident_id).await? {
            Some(incident) if incident.status == "OPEN" => {}
            _ => {
                tracing::debug!(
                    incident_id = %job.incident_id,
                    "incident no longer open, dropping reminder"
                );
                return Ok(());
            }
        }
    }

    let message = AlertMessage {
        client_id: job.client_id.clone(),
        incident_id: Some(job.incident_id.clone()),
        kind: job.kind,
        severity: job.severity,
        title: job.title.clone(),
        body: job.body.clone(),
        channel: None,
    };
    notifier.dispatch(&message).await
}
