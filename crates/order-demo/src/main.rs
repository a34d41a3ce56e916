//! Order processing demo entry point.

use event_store::InMemoryEventLog;
use order_demo::{Config, DemoError, ORDER_PROCESSING, Order, RandomChecker};
use orchestration::OrchestrationStatus;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| DemoError::Metrics(e.to_string()))?;

    // 3. Start the runtime over an in-memory log
    let runtime = order_demo::start_runtime(
        InMemoryEventLog::new(),
        RandomChecker,
        config.runtime_options(),
    )
    .await?;
    let client = runtime.client();

    // 4. Submit orders
    let mut instances = Vec::with_capacity(config.order_count);
    for _ in 0..config.order_count {
        let order = Order::new();
        let instance_id = client
            .start_new_with_id(order.id, ORDER_PROCESSING, serde_json::to_value(&order)?)
            .await?;
        tracing::info!(%instance_id, "order submitted");
        instances.push(instance_id);
    }

    // 5. Wait for each order to finish
    for instance_id in &instances {
        let status = client.wait_for_completion(instance_id, config.wait_timeout).await?;
        match status.status {
            OrchestrationStatus::Completed => {
                let order: Order = serde_json::from_value(status.output.unwrap_or_default())?;
                metrics::counter!("orders_processed_total", "status" => order.status.as_str())
                    .increment(1);
                tracing::info!(
                    %instance_id,
                    status = %order.status,
                    can_fulfill = order.can_fulfill,
                    "order processed"
                );
            }
            other => {
                metrics::counter!("orders_processed_total", "status" => other.as_str())
                    .increment(1);
                tracing::warn!(
                    %instance_id,
                    status = %other,
                    error = ?status.error,
                    "order not processed"
                );
            }
        }
    }

    runtime.shutdown().await;

    if config.print_metrics {
        println!("{}", metrics_handle.render());
    }
    Ok(())
}
