//! Check command implementation

use crate::config::Config;
use crate::exchange::{PaperExchange, PaperFixture};
use crate::monitor::{MonitoringLoop, SymbolOutcome};
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// JSON fixture seeding the paper exchange
    #[arg(short, long, default_value = "fixtures/paper.json")]
    pub fixture: PathBuf,

    /// Print the tick report as JSON
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let fixture = PaperFixture::load(&self.fixture)
            .with_context(|| format!("Failed to load fixture {}", self.fixture.display()))?;
        let exchange = Arc::new(PaperExchange::from_fixture(fixture));
        let mut monitor = MonitoringLoop::new(exchange, config);

        let report = monitor.run_tick().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Open positions: {}", report.open_positions);
        for line in &report.symbols {
            let detail = match &line.outcome {
                SymbolOutcome::Adjusted { stop, .. } => format!("stop set to {}", stop),
                SymbolOutcome::Unchanged { proposed } => format!("unchanged (proposed {})", proposed),
                SymbolOutcome::Held { reason } => format!("hold: {}", reason),
                SymbolOutcome::Rejected { reason } => format!("rejected: {}", reason),
                SymbolOutcome::Failed { error } => format!("failed: {}", error),
            };
            println!("  {:<12} {:<14} {}", line.symbol, line.mode.to_string(), detail);
        }
        Ok(())
    }
}
