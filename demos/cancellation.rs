use std::time::Duration;

use syncron::{QueueBuilder, SerializedQueue};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("syncron=debug"))
        .init();

    let queue: SerializedQueue<u32> = QueueBuilder::new().name("jobs").build();

    let slow = queue.submit(|| async {
        for i in 0..350 {
            println!("Running `slow` {i}");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(1)
    });
    let skipped = queue.submit(|| async {
        println!("Never printed");
        Ok(2)
    });
    let last = queue.submit(|| async { Ok(3) });

    let slow_handle = slow.handle();
    let skipped_handle = skipped.handle();
    tokio::spawn(async move {
        // Let `slow` run for a while before canceling it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        slow_handle.cancel();
    });
    skipped_handle.cancel();

    let (slow, skipped, last) = tokio::join!(slow, skipped, last);
    println!("slow: {slow:?}, skipped: {skipped:?}, last: {last:?}");
}
