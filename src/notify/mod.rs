//! Operator alerts
//!
//! The monitoring loop raises an [`Alert`] when a stop moves or a symbol is
//! excluded. Delivery is best effort: failures are logged and never affect
//! monitoring.

mod logger;
mod types;

pub use logger::LogNotifier;
pub use types::{Alert, NotifyError};

use async_trait::async_trait;

/// Destination for operator alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}
