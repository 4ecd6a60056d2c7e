//! Headless dashboard session: one manual recalculation, one auto-refresh
//! period, one stress simulation and one feed poll, then the session is
//! printed as JSON. Set `QUANTPULSE_REFRESH_SECS` to shorten the run, or
//! point `QUANTPULSE_CONFIG` at a JSON config file.

use std::time::Duration;

use anyhow::Context;
use qp_live::{FallbackFeed, OfflineFeed, RiskEngine, SampleFeed, SessionConfig};
use qp_types::scenario::{parse_months, CustomShock, ScenarioType, Severity};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("QUANTPULSE_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            SessionConfig::from_json(&json).with_context(|| format!("parsing config file {path}"))?
        }
        Err(_) => SessionConfig::from_env().context("loading session config")?,
    };
    let (tx, rx) = crossbeam_channel::unbounded();
    let engine = RiskEngine::with_entropy(config.clone(), tx)?;

    let snapshot = engine.calculate().await?;
    info!(var_95 = %snapshot.var_95, cvar_95 = %snapshot.cvar_95, "initial recalculation done");

    engine.set_auto_refresh(true)?;
    let one_period =
        config.refresh_interval() + config.calculation_latency() + Duration::from_millis(250);
    tokio::time::sleep(one_period).await;
    engine.set_auto_refresh(false)?;

    engine.update_scenario(|scenario| {
        scenario.scenario_type = ScenarioType::Custom;
        scenario.severity = Severity::new(75)?;
        scenario.shock_duration_months = parse_months("shock duration", "4")?;
        scenario.add_custom_shock(CustomShock::parse("10Y Treasury Yield", "1.5%")?);
        Ok(())
    })?;
    let simulation = engine.run_simulation().await?;

    let feed = FallbackFeed::new(OfflineFeed, SampleFeed::with_entropy(), config.feed_timeout());
    let poll = feed.poll().await;

    for event in rx.try_iter() {
        info!(?event, "engine event");
    }

    let report = serde_json::json!({
        "session": engine.view(),
        "simulation": simulation,
        "feed": poll,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    engine.shutdown();
    Ok(())
}
