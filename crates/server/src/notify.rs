use async_trait::async_trait;

/// Fire-and-forget notification dispatch. Implementations must never
/// let a delivery failure bubble into the triggering operation; callers
/// ignore the result beyond logging.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject_id: &str, message: &str, link: Option<&str>);
}

/// Default sink that records the notification in the log stream.
#[derive(Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, subject_id: &str, message: &str, link: Option<&str>) {
        tracing::info!(
            event_name = "notify.dispatched",
            subject_id,
            link = link.unwrap_or(""),
            "{message}"
        );
    }
}
