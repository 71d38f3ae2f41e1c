use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_core::app::{
    CacheSweeper, Dispatcher, Pipeline, Producer, StartMode, WorkerGroup,
};
use courier_core::config::CourierConfig;
use courier_core::domain::{Payload, Task};
use courier_core::impls::{ChannelReceiver, queue_backend_from_config, result_cache_from_config};
use courier_core::typed::{Handler, TypedRegistry, TypedTask};

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl TypedTask for Hello {
    const NAME: &'static str = "hello";
}

struct HelloHandler;

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, task: Hello) -> courier_core::Result<Option<Payload>> {
        let mut output = Payload::new();
        output.insert("greeting".into(), format!("Hello, {}!", task.name).into());
        Ok(Some(output))
    }
}

fn load_config() -> courier_core::Result<CourierConfig> {
    match std::env::var("COURIER_CONFIG") {
        Ok(path) => CourierConfig::from_file(path),
        Err(_) => Ok(CourierConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let backend = queue_backend_from_config(&config.queue).await?;
    let cache = result_cache_from_config(&config.cache).await?;
    let sweeper = CacheSweeper::new(Arc::clone(&cache), Duration::from_secs(1)).spawn();

    // 入口: mpsc → filter（名前が空なら捨てる）→ Producer
    let (tx, receiver) = ChannelReceiver::channel(16);
    let pipeline = Pipeline::<Task>::builder()
        .receiver(receiver)
        .filter(|task: Task| {
            let keep = task.payload().get("name").and_then(|v| v.as_str()) != Some("");
            keep.then_some(task)
        })
        .consumer(Producer::new(Arc::clone(&backend)))
        .build();
    pipeline.start(StartMode::NonBlocking).await?;

    let mut registry = TypedRegistry::new();
    registry.register::<Hello, _>(HelloHandler)?;
    let dispatcher =
        Dispatcher::new(registry).with_cache(Arc::clone(&cache), Some(Duration::from_secs(60)));
    let workers = WorkerGroup::spawn(Arc::clone(&backend), Arc::new(dispatcher), &config.worker)?;
    info!(workers = workers.len(), "workers started");

    let mut submitted = Vec::new();
    for name in ["Ada", "", "Grace"] {
        let task = Hello {
            name: name.to_string(),
        }
        .to_task()?;
        if !name.is_empty() {
            submitted.push(task.task_id().clone());
        }
        tx.send(task).await?;
    }

    // 全件が cache に載るまで待つ（最大 5 秒）
    for _ in 0..500 {
        let mut done = 0;
        for id in &submitted {
            if cache.get_task(id).await.is_ok() {
                done += 1;
            }
        }
        if done == submitted.len() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    pipeline.stop().await?;
    workers.shutdown_and_join().await;
    sweeper.stop().await;

    for id in &submitted {
        match cache.get_task(id).await {
            Ok(result) => println!("{id}: {}", serde_json::Value::Object(result.payload().clone())),
            Err(e) => warn!(task_id = %id, error = %e, "no result"),
        }
    }
    let stats = backend.stats().await?;
    println!("queue: pending={} claimed={}", stats.pending, stats.claimed);

    backend.close().await?;
    cache.close().await?;
    Ok(())
}
