use macro_rules_attribute::apply;
use smol::Timer;
use smol_macros::{Executor, main};
use std::time::Duration;
use syncron::SerializedQueue;

#[apply(main!)]
async fn main(ex: &Executor<'_>) {
    let queue: SerializedQueue<&str> = SerializedQueue::new();

    let first = ex.spawn(queue.submit(|| async {
        println!("First start");
        Timer::after(Duration::from_secs(2)).await;
        println!("First end");
        Ok("first")
    }));

    let second = ex.spawn(queue.submit(|| async {
        println!("Second start");
        Timer::after(Duration::from_millis(100)).await;
        println!("Second end");
        Ok("second")
    }));

    println!("After spawn");
    println!("{:?}", second.await);
    println!("{:?}", first.await);
}
