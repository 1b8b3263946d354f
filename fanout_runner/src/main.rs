use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use dotenv::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;
use scheduler_core::{Context, Job, Method, Scheduler, SchedulerConfig, Task, TaskResult};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

struct RunnerConfig {
    scheduler: SchedulerConfig,
    task_count: usize,
    delay: Duration,
    fail_every: u64,
}

impl RunnerConfig {
    fn from_env() -> Result<Self, std::io::Error> {
        let scheduler = SchedulerConfig::from_env().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        Ok(Self {
            scheduler,
            task_count: env_or("TASK_COUNT", 16)?,
            delay: Duration::from_millis(env_or("TASK_DELAY_MS", 50)?),
            fail_every: env_or("FAIL_EVERY", 0)?,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, std::io::Error> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{} has an invalid value: {}", key, value))
        }),
        Err(_) => Ok(default),
    }
}

// stands in for a remote call: waits, then answers or fails
struct SimulatedCall {
    delay: Duration,
    fail_every: u64,
}

#[async_trait]
impl Job for SimulatedCall {
    async fn run(&self, _context: Option<Arc<dyn Context>>, args: Vec<Value>) -> TaskResult {
        let index = args.first().and_then(Value::as_u64).unwrap_or_default();
        tokio::time::sleep(self.delay).await;

        if self.fail_every > 0 && (index + 1) % self.fail_every == 0 {
            return Err(json!({ "index": index, "reason": "simulated failure" }));
        }
        Ok(vec![json!(index), json!(self.delay.as_millis() as u64)])
    }
}

#[derive(Serialize)]
struct RunSummary {
    concurrency: usize,
    submitted: usize,
    dispatched: usize,
    succeeded: usize,
    failed: usize,
}

// the scheduler dispatches on a single thread; task bodies are I/O bound
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), std::io::Error> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let config = RunnerConfig::from_env()?;
    let scheduler = Scheduler::from_config(&config.scheduler)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    tracing::info!(
        concurrency = scheduler.concurrency(),
        tasks = config.task_count,
        "fanout runner starting"
    );

    let dispatched = Arc::new(AtomicUsize::new(0));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let (drain_tx, drain_rx) = oneshot::channel();
    let drain_tx = Mutex::new(Some(drain_tx));

    let gauge_source = scheduler.downgrade();
    let counter = dispatched.clone();
    scheduler.on_task(move |task| {
        counter.fetch_add(1, Ordering::SeqCst);
        metrics::increment_counter!("fanout_tasks_dispatched_total");
        if let Some(scheduler) = gauge_source.upgrade() {
            metrics::gauge!("fanout_tasks_running", scheduler.running() as f64);
        }
        match serde_json::to_string(&task.descriptor()) {
            Ok(descriptor) => tracing::debug!(task = %descriptor, "task dispatched"),
            Err(e) => tracing::debug!(task_id = %task.id, error = %e, "task dispatched"),
        }
    });

    let counter = succeeded.clone();
    scheduler.on_done(move |values| {
        counter.fetch_add(1, Ordering::SeqCst);
        metrics::increment_counter!("fanout_tasks_succeeded_total");
        tracing::info!(result = ?values, "task done");
    });

    let counter = failed.clone();
    scheduler.on_error(move |error| {
        counter.fetch_add(1, Ordering::SeqCst);
        metrics::increment_counter!("fanout_tasks_failed_total");
        tracing::warn!(%error, "task failed");
    });

    scheduler
        .on_saturate(|| tracing::info!("all worker slots spoken for, tasks are queueing"))
        .on_empty(|| tracing::info!("pending queue empty, waiting on running tasks"))
        .on_drain(move || {
            if let Some(tx) = drain_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(());
            }
        });

    let mut methods = HashMap::new();
    methods.insert(
        "call".to_string(),
        Method::job(Arc::new(SimulatedCall {
            delay: config.delay,
            fail_every: config.fail_every,
        })),
    );
    methods.insert(
        "ping".to_string(),
        Method::callback(|call| call.done.ok(vec![json!("pong")])),
    );
    let context: Arc<dyn Context> = Arc::new(methods);

    scheduler.bind(Some(context), "call");
    scheduler.push((0..config.task_count).map(|i| Task::new().arg(i)).collect::<Vec<_>>());
    // jumps ahead of the whole batch
    scheduler.unshift(Task::named("ping").arg("priority"));

    tracing::info!(outstanding = scheduler.length(), "tasks submitted");

    drain_rx
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let summary = RunSummary {
        concurrency: scheduler.concurrency(),
        submitted: config.task_count + 1,
        dispatched: dispatched.load(Ordering::SeqCst),
        succeeded: succeeded.load(Ordering::SeqCst),
        failed: failed.load(Ordering::SeqCst),
    };
    let summary = serde_json::to_string(&summary).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    tracing::info!(%summary, "fanout runner drained");
    tracing::debug!("metrics snapshot:\n{}", prometheus.render());

    Ok(())
}
