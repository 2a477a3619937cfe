//! Fixed-interval named task runner with per-task overlap prevention and
//! failure isolation.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskFn = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

struct Task {
    name: &'static str,
    interval: Duration,
    run: TaskFn,
    running: Arc<Mutex<()>>,
}

/// Registers named, fixed-interval tasks and drives them until cancelled.
///
/// Each task is its own `tokio` loop: a tick that finds the previous tick of
/// the *same* task still running is skipped rather than queued, matching the
/// no-overlap-per-task rule. Different tasks always run independently.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<Task>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task named `name`, fired every `interval`, running `run`.
    pub fn register<F, Fut>(&mut self, name: &'static str, interval: Duration, run: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(Task {
            name,
            interval,
            run: Arc::new(move || Box::pin(run())),
            running: Arc::new(Mutex::new(())),
        });
    }

    /// Spawns every registered task as its own background loop, returning
    /// once all spawn calls have been issued. Tasks keep running until
    /// `cancellation_token` is cancelled.
    #[instrument(level = "info", skip_all)]
    pub fn start(self, cancellation_token: CancellationToken) {
        for task in self.tasks {
            let token = cancellation_token.clone();
            tokio::spawn(run_task_loop(task, token));
        }
    }
}

#[instrument(level = "info", skip_all, fields(task = task.name))]
async fn run_task_loop(task: Task, cancellation_token: CancellationToken) {
    let mut ticker = tokio::time::interval(task.interval);
    // the first tick fires immediately; intentional, matches a freshly
    // started process wanting its first pass right away.
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancellation_token.cancelled() => {
                tracing::info!("scheduler task cancelled");
                return;
            }
        }

        let Ok(guard) = task.running.clone().try_lock_owned() else {
            tracing::warn!("previous tick of this task is still running, skipping");
            continue;
        };

        let run = task.run.clone();
        let task_name = task.name;
        tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!(task = task_name, "tick start");
            (run)().await;
            tracing::debug!(task = task_name, "tick finished");
        });
    }
}
