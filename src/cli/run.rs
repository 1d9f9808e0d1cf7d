//! Run command implementation

use crate::config::Config;
use crate::exchange::{PaperExchange, PaperFixture};
use crate::monitor::MonitoringLoop;
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON fixture seeding the paper exchange
    #[arg(short, long, default_value = "fixtures/paper.json")]
    pub fixture: PathBuf,
}

impl RunArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let fixture = PaperFixture::load(&self.fixture)
            .with_context(|| format!("Failed to load fixture {}", self.fixture.display()))?;
        tracing::info!(
            fixture = %self.fixture.display(),
            positions = fixture.positions.len(),
            "Paper exchange seeded"
        );

        let exchange = Arc::new(PaperExchange::from_fixture(fixture));
        let mut monitor = MonitoringLoop::new(exchange, config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received");
                let _ = shutdown_tx.send(true);
            }
        });

        monitor.run(shutdown_rx).await?;
        Ok(())
    }
}
