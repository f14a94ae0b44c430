use crate::domain::models::Notification;
use crate::infrastructure::error::InfraError;

/// Delivery is owned by the platform; this core only decides what to say.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), InfraError> {
        tracing::info!(
            key = %notification.key,
            title = %notification.title,
            body = %notification.body,
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub(crate) fn sent(&self) -> Vec<Notification> {
            self.sent
                .lock()
                .map(|sent| sent.clone())
                .unwrap_or_default()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> Result<(), InfraError> {
            let mut sent = self
                .sent
                .lock()
                .map_err(|error| InfraError::InvalidConfig(format!("notifier lock poisoned: {error}")))?;
            sent.push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn recording_notifier_keeps_delivery_order() {
        let notifier = RecordingNotifier::default();
        for key in ["reminder:weekly-contest-470:pre", "reminder:weekly-contest-470:start"] {
            notifier
                .notify(&Notification {
                    key: key.to_string(),
                    title: "Weekly Contest 470".to_string(),
                    body: "starting".to_string(),
                })
                .expect("notify");
        }
        let keys = notifier.sent().into_iter().map(|sent| sent.key).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec!["reminder:weekly-contest-470:pre", "reminder:weekly-contest-470:start"]
        );
    }
}
