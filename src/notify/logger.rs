//! Alerts written to the log

use super::{Alert, Notifier, NotifyError};
use async_trait::async_trait;

/// Writes alerts to the `alert` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        match alert {
            Alert::StopAdjusted { .. } => {
                tracing::info!(target: "alert", symbol = alert.symbol(), "{}", alert)
            }
            Alert::SymbolExcluded { .. } => {
                tracing::warn!(target: "alert", symbol = alert.symbol(), "{}", alert)
            }
        }
        Ok(())
    }
}
