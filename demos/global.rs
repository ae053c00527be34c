use std::time::Duration;

use syncron::{QueueBuilder, SerializedQueue};

// A single queue guarding a critical section: signups never run concurrently.
#[tokio::main]
async fn main() {
    let signups: SerializedQueue<u32> = QueueBuilder::new().name("signup").build();

    let handles: Vec<_> = (0..5)
        .map(|user| {
            tokio::spawn(signups.submit(move || async move {
                println!("Begin signup {user}");
                tokio::time::sleep(Duration::from_millis(50 * (5 - user as u64))).await;
                println!("End signup {user}");
                Ok(user)
            }))
        })
        .collect();

    for handle in handles {
        if let Ok(Ok(user)) = handle.await {
            println!("Signed up {user}");
        }
    }
}
