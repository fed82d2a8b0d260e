//! Handler for `notification:dispatch` tasks.

use tracing::{info, warn};

use super::Worker;
use crate::config;
use crate::db::models::{Monitor, Notification};
use crate::db::repository::{notifications, RepoError};
use crate::notify;
use crate::notify::{detail_from_message, format_message, MessageInput};
use crate::queue::{NotificationPayload, TaskEnvelope, TaskError};

impl Worker {
    /// Loads the channel and monitor, renders the message and delivers it.
    /// A missing monitor or channel means the tenant deleted it after the
    /// task was enqueued; that is logged and treated as done. Delivery
    /// failures are retried by the queue.
    pub(super) async fn handle_notification_dispatch(
        &self,
        task: &TaskEnvelope,
    ) -> Result<(), TaskError> {
        let payload: NotificationPayload = serde_json::from_value(task.payload.clone())?;

        let (monitor, notification) = self.fetch_dispatch_context(&payload).await?;

        let Some(monitor) = monitor else {
            warn!(
                monitor_id = payload.monitor_id,
                notification_id = payload.notification_id,
                "monitor gone, skipping notification"
            );
            return Ok(());
        };

        let Some(notification) = notification else {
            warn!(
                monitor_id = payload.monitor_id,
                notification_id = payload.notification_id,
                "notification channel gone, skipping dispatch"
            );
            return Ok(());
        };

        let region_display_name = config::region_by_id(payload.region_id)
            .map(|region| region.display_name)
            .unwrap_or_default();

        let (title, description) = format_message(&MessageInput {
            monitor_name: monitor.name.clone(),
            status: payload.ping.status,
            region_display_name,
            latency_ms: payload.ping.latency,
            checked_at: payload.ping.time,
            detail: detail_from_message(payload.detail.as_deref()),
        });

        notify::send(
            &self.http,
            &notification,
            &title,
            &description,
            payload.ping.status,
        )
        .await?;

        info!(
            monitor_id = monitor.id,
            notification_id = notification.id,
            notification_type = notification.notification_type.as_str(),
            region_id = payload.region_id,
            status = payload.ping.status.as_str(),
            "notification dispatched"
        );

        Ok(())
    }

    async fn fetch_dispatch_context(
        &self,
        payload: &NotificationPayload,
    ) -> Result<(Option<Monitor>, Option<Notification>), RepoError> {
        let mut tx = self.pool.begin().await.map_err(RepoError::from)?;

        let monitor =
            notifications::get_monitor_by_id(&mut tx, payload.team_id, payload.monitor_id).await?;
        if monitor.is_none() {
            return Ok((None, None));
        }

        let notification = notifications::get_notification_by_id(
            &mut tx,
            payload.team_id,
            payload.notification_id,
        )
        .await?;

        tx.commit().await.map_err(RepoError::from)?;
        Ok((monitor, notification))
    }
}
