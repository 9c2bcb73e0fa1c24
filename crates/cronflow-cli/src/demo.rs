//! Bundled stock price workflow: fetch, persist, notify, every minute.
//!
//! The quote feed is simulated: prices derive from a hash of
//! (symbol, tick), so runs are deterministic and need no network. Swap
//! `fetch_quotes` for a real HTTP call to point this at a live feed; the
//! engine semantics do not change.

use cronflow_core::registry::{JobRegistry, RegistryError};
use cronflow_core::step::{StepContext, WorkflowBuilder};
use cronflow_infra::sqlite::SqliteTxn;
use cronflow_types::error::StepFailure;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

pub const SYMBOLS: [&str; 5] = ["AAPL", "GOOGL", "AMZN", "MSFT", "TSLA"];

/// Simulated quote: stable for a (symbol, tick) pair, in a plausible
/// range (20.00 to 519.99, cent precision).
fn pseudo_price(symbol: &str, tick: i64) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(tick.to_be_bytes());
    let digest = hasher.finalize();

    let mut raw = 0u64;
    for byte in &digest[..8] {
        raw = (raw << 8) | u64::from(*byte);
    }
    let cents = 2_000 + (raw % 50_000);
    cents as f64 / 100.0
}

async fn fetch_quotes(ctx: StepContext) -> Result<Value, StepFailure> {
    let tick = ctx.scheduled_time.timestamp();
    let mut quotes = Map::new();
    for symbol in SYMBOLS {
        quotes.insert(symbol.to_string(), json!(pseudo_price(symbol, tick)));
    }
    tracing::info!(
        instance_id = ctx.instance_id.as_str(),
        symbols = SYMBOLS.len(),
        "fetched stock quotes"
    );
    Ok(Value::Object(quotes))
}

fn persist_quotes(
    tx: &mut SqliteTxn,
    ctx: StepContext,
) -> BoxFuture<'_, Result<Value, StepFailure>> {
    Box::pin(async move {
        let quotes = ctx
            .output(0)
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| StepFailure::permanent("fetch step produced no quotes"))?;
        let recorded_at = ctx.scheduled_time.to_rfc3339();

        let mut inserted = 0u64;
        for (symbol, price) in &quotes {
            let price = price.as_f64().ok_or_else(|| {
                StepFailure::permanent(format!("non-numeric price for {symbol}"))
            })?;
            sqlx::query(
                "INSERT INTO stock_prices (stock_symbol, stock_price, recorded_at) VALUES (?, ?, ?)",
            )
            .bind(symbol)
            .bind(price)
            .bind(&recorded_at)
            .execute(&mut **tx)
            .await
            .map_err(StepFailure::transient)?;
            inserted += 1;
        }
        Ok(json!({ "inserted": inserted }))
    })
}

async fn notify(ctx: StepContext) -> Result<Value, StepFailure> {
    let inserted = ctx
        .output(1)
        .and_then(|v| v.get("inserted"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    tracing::info!(
        instance_id = ctx.instance_id.as_str(),
        job_id = ctx.job_id.as_str(),
        inserted,
        "stock prices recorded"
    );
    Ok(json!({ "notified": true }))
}

/// Registry with the demo job: `prices`, every minute.
pub fn registry() -> Result<JobRegistry<SqliteTxn>, RegistryError> {
    let workflow = WorkflowBuilder::new("record-prices")
        .step("fetch", fetch_quotes)
        .transaction("persist", persist_quotes)
        .step("notify", notify)
        .build();

    Ok(JobRegistry::builder()
        .register("prices", "* * * * *", workflow)?
        .build())
}
