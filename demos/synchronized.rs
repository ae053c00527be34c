use std::time::Duration;

use futures::future::join_all;
use syncron::{SerializedQueue, Synchronized, TaskError};

async fn work(task_id: u32) -> Result<(), String> {
    println!("Begin {task_id}");
    tokio::time::sleep(Duration::from_millis(20 * u64::from(task_id % 3))).await;
    println!("End {task_id}");
    Ok(())
}

struct Runner<F> {
    task_id: u32,
    sync: Synchronized<F, (), String>,
}

impl<F, Fut> Runner<F>
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn run(&self) -> Result<(), TaskError<String>> {
        self.sync.call(self.task_id).await
    }
}

// Every runner funnels `run` through one shared queue, so the output is
// always "Begin 0, End 0, Begin 1, End 1, ...". Build each runner with
// `Synchronized::new(work)` to serialize per runner instead.
#[tokio::main]
async fn main() {
    let queue = SerializedQueue::new();
    let runners: Vec<_> = (0..10)
        .map(|task_id| Runner {
            task_id,
            sync: Synchronized::with_queue(queue.clone(), work),
        })
        .collect();

    for result in join_all(runners.iter().map(Runner::run)).await {
        if let Err(e) = result {
            eprintln!("{e}");
        }
    }
}
