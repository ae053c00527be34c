use std::{
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{
    FutureExt,
    future::{BoxFuture, join_all},
};
use syncron::{QueueBuilder, SerializedQueue, TaskError};

type Body<T, E = Infallible> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

// Records the order in which tasks are created, started and resolved, and the
// highest number of bodies seen running at once.
#[derive(Default)]
struct Stats {
    created: Mutex<Vec<u32>>,
    started: Mutex<Vec<u32>>,
    resolved: Mutex<Vec<u32>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Stats {
    fn enter(&self, id: u32) {
        self.started.lock().unwrap().push(id);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
    }

    fn leave(&self, id: u32) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.resolved.lock().unwrap().push(id);
    }

    fn assert_order(&self, order: &[u32]) {
        assert_eq!(*self.created.lock().unwrap(), order, "Creation order");
        assert_eq!(*self.started.lock().unwrap(), order, "Start order");
        assert_eq!(*self.resolved.lock().unwrap(), order, "Resolve order");
        assert_eq!(
            self.max_active.load(Ordering::SeqCst),
            1,
            "Bodies should never overlap"
        );
    }
}

// Leaves the running count when a body finishes or is dropped mid-flight.
struct Running(Arc<Stats>);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// Builds a body that records when it is created, started and resolved.
fn task_gen(stats: &Arc<Stats>, id: u32, millis: u64) -> Body<u32> {
    stats.created.lock().unwrap().push(id);
    let stats = Arc::clone(stats);
    Box::new(move || {
        async move {
            stats.enter(id);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            stats.leave(id);
            Ok(id)
        }
        .boxed()
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_runs_trivial_sequence_in_order() {
    let stats = Arc::new(Stats::default());
    let queue = SerializedQueue::new();

    let results = join_all((0..6).map(|id| queue.submit(task_gen(&stats, id, 50)))).await;

    let order = [0, 1, 2, 3, 4, 5];
    assert_eq!(results, order.map(Ok), "Results should keep submission order");
    stats.assert_order(&order);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_orders_tasks_of_different_length() {
    let stats = Arc::new(Stats::default());
    let queue = SerializedQueue::new();

    let results = join_all([
        queue.submit(task_gen(&stats, 0, 100)),
        queue.submit(task_gen(&stats, 1, 0)),
        queue.submit(task_gen(&stats, 2, 10)),
        queue.submit(task_gen(&stats, 3, 1)),
        queue.submit(task_gen(&stats, 4, 50)),
        queue.submit(task_gen(&stats, 5, 1)),
    ])
    .await;

    let order = [0, 1, 2, 3, 4, 5];
    assert_eq!(results, order.map(Ok));
    stats.assert_order(&order);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_restarts_after_draining() {
    let stats = Arc::new(Stats::default());
    let queue = SerializedQueue::new();

    let results = join_all([
        queue.submit(task_gen(&stats, 0, 100)),
        queue.submit(task_gen(&stats, 1, 0)),
        queue.submit(task_gen(&stats, 2, 10)),
    ])
    .await;
    assert_eq!(results, [Ok(0), Ok(1), Ok(2)]);
    assert!(queue.is_idle(), "Queue should be empty after draining");

    let results = join_all([
        queue.submit(task_gen(&stats, 3, 1)),
        queue.submit(task_gen(&stats, 4, 50)),
        queue.submit(task_gen(&stats, 5, 1)),
    ])
    .await;
    assert_eq!(results, [Ok(3), Ok(4), Ok(5)]);

    stats.assert_order(&[0, 1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_absorbs_submissions_while_draining() {
    let stats = Arc::new(Stats::default());
    let queue = SerializedQueue::new();

    let first_batch = join_all([
        queue.submit(task_gen(&stats, 0, 100)),
        queue.submit(task_gen(&stats, 1, 20)),
    ]);
    let first_batch = tokio::spawn(first_batch);

    // Let the first body start before the second batch arrives.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*stats.started.lock().unwrap(), [0]);

    let second_batch = join_all([
        queue.submit(task_gen(&stats, 2, 1)),
        queue.submit(task_gen(&stats, 3, 0)),
    ])
    .await;

    assert_eq!(first_batch.await.unwrap(), [Ok(0), Ok(1)]);
    assert_eq!(second_batch, [Ok(2), Ok(3)]);
    stats.assert_order(&[0, 1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_serializes_chained_bodies() {
    let stats = Arc::new(Stats::default());
    let queue: SerializedQueue<Vec<u32>> = SerializedQueue::new();

    let (s1, s2) = (Arc::clone(&stats), Arc::clone(&stats));
    let p1 = queue.submit(move || async move {
        let mut ids = Vec::new();
        for (id, millis) in [(0, 100), (1, 10), (2, 10)] {
            let Ok(id) = task_gen(&s1, id, millis)().await;
            ids.push(id);
        }
        Ok(ids)
    });
    let p2 = queue.submit(move || async move {
        let mut ids = Vec::new();
        for (id, millis) in [(3, 30), (4, 1), (5, 1)] {
            let Ok(id) = task_gen(&s2, id, millis)().await;
            ids.push(id);
        }
        Ok(ids)
    });

    let (r1, r2) = tokio::join!(p1, p2);
    assert_eq!(r1, Ok(vec![0, 1, 2]));
    assert_eq!(r2, Ok(vec![3, 4, 5]));
    stats.assert_order(&[0, 1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_forwards_errors() {
    let queue: SerializedQueue<(), &str> = SerializedQueue::new();

    let p1 = queue.submit(|| async { Err("p1") });
    let p2 = queue.submit(|| async { Err("p2") });

    assert_eq!(p1.await, Err(TaskError::Failed("p1")));
    assert_eq!(p2.await, Err(TaskError::Failed("p2")));
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_isolates_failures_between_siblings() {
    let resolved = Arc::new(Mutex::new(Vec::new()));
    let queue: SerializedQueue<u32, String> = SerializedQueue::new();

    let submissions = (0..5).map(|id| {
        let resolved = Arc::clone(&resolved);
        queue.submit(move || async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            resolved.lock().unwrap().push(id);
            if id % 2 == 1 {
                return Err(format!("task {id} failed"));
            }
            Ok(id)
        })
    });
    let results = join_all(submissions).await;

    assert_eq!(
        results,
        [
            Ok(0),
            Err(TaskError::Failed("task 1 failed".to_string())),
            Ok(2),
            Err(TaskError::Failed("task 3 failed".to_string())),
            Ok(4),
        ]
    );
    assert_eq!(*resolved.lock().unwrap(), [0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_does_not_invoke_body_on_submit() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let queue: SerializedQueue<usize> = SerializedQueue::new();

    let invoked_cl = Arc::clone(&invoked);
    let submission = queue.submit(move || {
        let n = invoked_cl.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok(n) }
    });

    assert_eq!(invoked.load(Ordering::SeqCst), 0, "Submitting must not invoke the body");
    tokio::task::yield_now().await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0, "Body waits for its submission to be polled");
    assert_eq!(queue.len(), 1);

    assert_eq!(submission.await, Ok(1));
    assert_eq!(invoked.load(Ordering::SeqCst), 1, "Body should have run exactly once");
    assert!(queue.is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_submit_future_is_lazy() {
    let started = Arc::new(AtomicUsize::new(0));
    let queue: SerializedQueue<&str> = SerializedQueue::new();

    let started_cl = Arc::clone(&started);
    let submission = queue.submit_future(async move {
        started_cl.fetch_add(1, Ordering::SeqCst);
        Ok("done")
    });

    assert_eq!(started.load(Ordering::SeqCst), 0);
    assert_eq!(submission.await, Ok("done"));
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_catches_panics() {
    let queue: SerializedQueue<u32> = SerializedQueue::new();
    let explode = true;

    let polled = queue.submit(move || async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if explode {
            panic!("boom");
        }
        Ok(0)
    });
    let invoked = queue.submit(move || {
        if explode {
            panic!("no future");
        }
        async { Ok(0) }
    });
    let healthy = queue.submit(|| async { Ok(7) });

    let (polled, invoked, healthy) = tokio::join!(polled, invoked, healthy);
    assert_eq!(polled, Err(TaskError::Panicked("boom".to_string())));
    assert_eq!(invoked, Err(TaskError::Panicked("no future".to_string())));
    assert_eq!(healthy, Ok(7), "Queue should keep running after a panic");
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_skips_canceled_task() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let queue: SerializedQueue<u32> = SerializedQueue::new();

    let submissions: Vec<_> = (0..3)
        .map(|id| {
            let invoked = Arc::clone(&invoked);
            queue.submit(move || {
                invoked.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(id)
                }
            })
        })
        .collect();

    let handle = submissions[1].handle();
    handle.cancel();
    assert!(handle.is_canceled());

    let results = join_all(submissions).await;
    assert_eq!(results, [Ok(0), Err(TaskError::Canceled), Ok(2)]);
    assert_eq!(
        invoked.load(Ordering::SeqCst),
        2,
        "Canceled body should never be invoked"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_cancels_running_task() {
    let finished = Arc::new(AtomicUsize::new(0));
    let queue: SerializedQueue<u32> = SerializedQueue::new();

    let finished_cl = Arc::clone(&finished);
    let long = queue.submit(move || async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        finished_cl.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    });
    let short = queue.submit(|| async { Ok(1) });

    let handle = long.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let (long, short) = tokio::join!(long, short);
    assert_eq!(long, Err(TaskError::Canceled));
    assert_eq!(short, Ok(1), "Queue should move on after a cancellation");
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_advances_when_running_submission_dropped() {
    let stats = Arc::new(Stats::default());
    let queue = SerializedQueue::new();

    let long = queue.submit(task_gen(&stats, 0, 10_000));
    let short = queue.submit(task_gen(&stats, 1, 1));

    let timed_out = tokio::time::timeout(Duration::from_millis(50), long).await;
    assert!(timed_out.is_err(), "Long task should still be running");
    assert_eq!(queue.len(), 1, "Dropping the submission removes its task");

    assert_eq!(short.await, Ok(1));
    assert_eq!(*stats.started.lock().unwrap(), [0, 1]);
    assert_eq!(*stats.resolved.lock().unwrap(), [1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_serializes_across_threads() {
    let stats = Arc::new(Stats::default());
    let queue = SerializedQueue::new();

    let handles: Vec<_> = (0..20)
        .map(|id| tokio::spawn(queue.submit(task_gen(&stats, id, 2))))
        .collect();

    for (id, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Ok(id as u32));
    }
    let order: Vec<u32> = (0..20).collect();
    stats.assert_order(&order);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_drives_unpolled_head() {
    let stats = Arc::new(Stats::default());
    let queue = SerializedQueue::new();

    let held = queue.submit(task_gen(&stats, 0, 20));
    let later = queue.submit(task_gen(&stats, 1, 1));

    // Only `later` is awaited, so it has to run the head body before its own.
    let later = tokio::time::timeout(Duration::from_secs(5), later)
        .await
        .expect("Later submission should not wait for the held one to be polled");
    assert_eq!(later, Ok(1));
    assert!(queue.is_idle());

    assert_eq!(held.await, Ok(0), "Held submission keeps its result");
    stats.assert_order(&[0, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_hands_off_when_submitters_time_out() {
    let stats = Arc::new(Stats::default());
    let queue: SerializedQueue<u32> = SerializedQueue::new();

    let handles: Vec<_> = (0..12)
        .map(|id| {
            let stats_cl = Arc::clone(&stats);
            let submission = queue.submit(move || async move {
                stats_cl.started.lock().unwrap().push(id);
                let active = stats_cl.active.fetch_add(1, Ordering::SeqCst) + 1;
                stats_cl.max_active.fetch_max(active, Ordering::SeqCst);
                let _running = Running(Arc::clone(&stats_cl));
                tokio::time::sleep(Duration::from_millis(5)).await;
                stats_cl.resolved.lock().unwrap().push(id);
                Ok(id)
            });
            let patience = if id % 3 == 1 {
                Duration::from_millis(1)
            } else {
                Duration::from_secs(10)
            };
            tokio::spawn(tokio::time::timeout(patience, submission))
        })
        .collect();

    for (id, handle) in handles.into_iter().enumerate() {
        let id = id as u32;
        match handle.await.unwrap() {
            Ok(result) => assert_eq!(result, Ok(id)),
            Err(_) => assert_eq!(id % 3, 1, "Only impatient submitters should time out"),
        }
    }

    let started = stats.started.lock().unwrap().clone();
    let resolved = stats.resolved.lock().unwrap().clone();
    assert!(started.windows(2).all(|w| w[0] < w[1]), "Start order {started:?}");
    assert!(resolved.windows(2).all(|w| w[0] < w[1]), "Resolve order {resolved:?}");
    for id in (0..12).filter(|id| id % 3 != 1) {
        assert!(resolved.contains(&id), "Task {id} should have completed");
    }
    assert_eq!(
        stats.max_active.load(Ordering::SeqCst),
        1,
        "Bodies should never overlap"
    );
    assert!(queue.is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_clones_share_state() {
    let queue: SerializedQueue<u32> = QueueBuilder::new().name("shared").build();
    let clone = queue.clone();

    assert!(queue.ptr_eq(&clone));
    assert!(!queue.ptr_eq(&SerializedQueue::new()));
    assert_eq!(clone.name(), Some("shared"));

    let first = queue.submit(|| async { Ok(1) });
    let second = clone.submit(|| async { Ok(2) });
    assert_eq!(queue.len(), 2);
    assert_eq!(tokio::join!(first, second), (Ok(1), Ok(2)));
    assert!(clone.is_idle());
}

#[test]
fn queue_runs_without_a_runtime() {
    let queue: SerializedQueue<u32> = SerializedQueue::new();
    let trace = Arc::new(Mutex::new(Vec::new()));

    let submissions = (0..3).map(|id| {
        let trace = Arc::clone(&trace);
        queue.submit(move || async move {
            trace.lock().unwrap().push(format!("begin {id}"));
            futures_lite::future::yield_now().await;
            trace.lock().unwrap().push(format!("end {id}"));
            Ok(id)
        })
    });

    let results = futures_lite::future::block_on(join_all(submissions));
    assert_eq!(results, [Ok(0), Ok(1), Ok(2)]);
    assert_eq!(
        *trace.lock().unwrap(),
        ["begin 0", "end 0", "begin 1", "end 1", "begin 2", "end 2"]
    );
}
