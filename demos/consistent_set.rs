//! Consistent image set example
//!
//! Runs a base prompt over several variations against a simulated provider
//! with jittered latency and an occasional quota error, then prints the
//! result envelope an HTTP layer would return.

use std::sync::Arc;
use std::time::Duration;

use batchgen::batch::{
    BatchExecutor, FnExecutor, GenerationProfile, Resolution, TaskDescriptor, TaskError, TaskExecution,
    TimeoutExecutor, UsageMetrics,
};
use rand::Rng;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("batchgen=debug")
        .init();

    let provider = FnExecutor::new(|descriptor: TaskDescriptor| async move {
        let (latency, quota_hit) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(100..600), rng.gen_bool(0.15))
        };
        tokio::time::sleep(Duration::from_millis(latency)).await;

        if quota_hit {
            return Err(TaskError::from_provider_message("429 QUOTA_EXCEEDED: resource exhausted"));
        }

        Ok(TaskExecution::new(
            json!({
                "id": uuid::Uuid::new_v4(),
                "prompt": descriptor.input(),
                "width": 1024,
                "height": 1024,
                "format": "png",
            }),
            UsageMetrics::new(50, 150),
        ))
    });

    let executor = BatchExecutor::new(Arc::new(TimeoutExecutor::new(provider, Duration::from_secs(2))))
        .with_concurrency_limit(3)
        .with_inter_window_delay(Duration::from_millis(1000))
        .with_progress_callback(|completed, total| {
            println!("progress: {}/{}", completed, total);
        });

    let variations: Vec<String> = ["sitting on a windowsill", "chasing a butterfly", "asleep in a basket", "", "wearing a tiny hat"]
        .iter()
        .map(|variation| variation.to_string())
        .collect();

    let profile = GenerationProfile::default()
        .with_style("watercolor")
        .with_resolution(Resolution::Square1024);

    let result = executor
        .execute_consistent_set("an orange tabby cat", &variations, &profile)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.failures.is_empty() {
        println!("resubmit indices: {:?}", result.failed_indices());
    }

    Ok(())
}
