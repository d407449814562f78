//! Breaker and event channel wired together the way a service would at startup
//!
//! Run with `RUST_LOG=debug` to see the breaker and channel logs.

use serde_json::json;
use std::sync::Arc;
use storefront_resilience::{BreakerError, EventChannel, EventName, Settings};
use tracing_subscriber::EnvFilter;

const SETTINGS: &str = r#"
[channel]
max_subscribers_per_topic = 20

[breakers.payment_gateway]
failure_threshold = 3
recovery_timeout_secs = 0.5
success_threshold = 2
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_toml_str(SETTINGS)?;
    let events: Arc<EventChannel> = Arc::new(settings.channel());

    let gateway = settings
        .breaker_builder("payment_gateway")
        .on_open(|name| println!("Breaker '{}' opened", name))
        .on_half_open(|name| println!("Breaker '{}' half-open, probing", name))
        .on_close(|name| println!("Breaker '{}' closed", name))
        .build()?;

    events.subscribe_fn(EventName::PaymentSucceeded, |event| {
        println!("[notifications] receipt for {}", event.data);
        Ok(())
    })?;
    events.subscribe_fn(EventName::PaymentFailed, |event| {
        println!("[analytics] {} at {}", event.name, event.timestamp);
        Ok(())
    })?;

    println!("Initial state: {}\n", gateway.state());

    // Gateway returns errors for the first few charges, then recovers
    for attempt in 1..=8 {
        let healthy = attempt > 4;
        let result = gateway
            .execute(move || async move {
                if healthy {
                    Ok(format!("ch_{attempt}"))
                } else {
                    Err(format!("gateway timeout on charge {attempt}"))
                }
            })
            .await;

        match result {
            Ok(charge) => {
                events.publish(EventName::PaymentSucceeded, json!({ "charge": charge }))?;
            }
            Err(BreakerError::Dependency(reason)) => {
                events.publish(EventName::PaymentFailed, json!({ "reason": reason }))?;
            }
            Err(rejected) => println!("✗ {}", rejected),
        }
        println!("State: {}", gateway.state());

        if gateway.is_open() && attempt == 4 {
            tokio::time::sleep(gateway.config().recovery_timeout()).await;
        }
    }

    println!("\nSnapshot: {}", serde_json::to_string(&gateway.snapshot())?);
    Ok(())
}
