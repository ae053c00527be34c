use std::time::Duration;

use syncron::KeyedQueues;
use tracing_subscriber::EnvFilter;

// Payments are never processed concurrently for the same user, but different
// users are processed in parallel.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let payments: KeyedQueues<u64, String> = KeyedQueues::new();

    let mut handles = Vec::new();
    for (user, amount) in [(1, 30), (2, 5), (1, 10), (2, 20), (1, 1)] {
        let payment = payments.get(user).submit(move || async move {
            println!("user {user}: charging {amount}");
            tokio::time::sleep(Duration::from_millis(amount * 10)).await;
            Ok(format!("user {user}: charged {amount}"))
        });
        handles.push(tokio::spawn(payment));
    }

    for handle in handles {
        match handle.await {
            Ok(Ok(receipt)) => println!("{receipt}"),
            Ok(Err(e)) => eprintln!("payment failed: {e}"),
            Err(e) => eprintln!("payment task panicked: {e}"),
        }
    }
    println!("{} users seen", payments.len());
}
