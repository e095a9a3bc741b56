#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use ccp::{
    config::Config,
    executor::FanOut,
    queue::{BarrierQueue, Phase, QueueError},
};
use std::{
    convert::Infallible,
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

fn queue(workers: usize) -> BarrierQueue {
    let config = Config::default().with_worker_pool_size(workers);
    BarrierQueue::from_config("concurrentQueue", &config).expect("pool must start")
}

#[derive(Debug, Clone, Copy)]
struct Span {
    id: usize,
    start: Instant,
    end: Instant,
}

#[derive(Debug, Default)]
struct Timeline(Mutex<Vec<Span>>);

impl Timeline {
    fn task(self: &Arc<Self>, id: usize, work: Duration) -> impl FnOnce() + Send + 'static {
        let timeline = Arc::clone(self);
        move || {
            let start = Instant::now();
            thread::sleep(work);
            let end = Instant::now();
            timeline.0.lock().unwrap().push(Span { id, start, end });
        }
    }

    fn spans(&self, ids: impl Fn(usize) -> bool) -> Vec<Span> {
        self.0.lock().unwrap().iter().copied().filter(|span| ids(span.id)).collect()
    }
}

#[test]
fn barrier_runs_alone_between_two_batches() {
    const BARRIER: usize = 0;
    let queue = queue(4);
    let timeline = Arc::new(Timeline::default());
    let work = Duration::from_millis(30);

    let mut tickets = Vec::new();
    for id in 1..=5 {
        tickets.push(queue.submit(timeline.task(id, work)));
    }
    tickets.push(queue.submit_barrier(timeline.task(BARRIER, work)));
    for id in 6..=10 {
        tickets.push(queue.submit(timeline.task(id, work)));
    }
    for ticket in tickets {
        ticket.wait().unwrap();
    }
    assert!(queue.wait_idle_timeout(IDLE_TIMEOUT));

    let barrier = timeline.spans(|id| id == BARRIER)[0];
    let before = timeline.spans(|id| (1..=5).contains(&id));
    let after = timeline.spans(|id| (6..=10).contains(&id));
    assert_eq!(before.len(), 5);
    assert_eq!(after.len(), 5);
    for span in &before {
        assert!(span.end <= barrier.start, "task {} overlaps the barrier", span.id);
    }
    for span in &after {
        assert!(span.start >= barrier.end, "task {} overlaps the barrier", span.id);
    }
}

#[test]
fn log_lines_follow_barrier_order() {
    let queue = queue(3);
    let lines = Arc::new(Mutex::new(Vec::new()));
    let say = |line: String| {
        let lines = Arc::clone(&lines);
        move || lines.lock().unwrap().push(line)
    };

    let mut tickets = Vec::new();
    for patient in 1..=5 {
        tickets.push(queue.submit(say(format!("Processing patient {patient}"))));
    }
    tickets.push(queue.submit_barrier(say("Updating all patient records".to_owned())));
    for patient in 6..=10 {
        tickets.push(queue.submit(say(format!("Processing patient {patient}"))));
    }
    for ticket in tickets {
        ticket.wait().unwrap();
    }

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 11);
    let barrier_at = lines
        .iter()
        .position(|line| line == "Updating all patient records")
        .unwrap();
    assert_eq!(barrier_at, 5);
    for line in &lines[..barrier_at] {
        let patient: usize = line.trim_start_matches("Processing patient ").parse().unwrap();
        assert!((1..=5).contains(&patient), "{line} ran before the barrier");
    }
    for line in &lines[barrier_at + 1..] {
        let patient: usize = line.trim_start_matches("Processing patient ").parse().unwrap();
        assert!((6..=10).contains(&patient), "{line} ran after the barrier");
    }
}

#[test]
fn ordinary_work_runs_concurrently() {
    const PARTIES: usize = 4;
    let queue = queue(PARTIES);
    // Every task waits for all the others: this only completes if they overlap.
    let rendezvous = Arc::new(Barrier::new(PARTIES));
    let tickets: Vec<_> = (0..PARTIES)
        .map(|_| {
            let rendezvous = Arc::clone(&rendezvous);
            queue.submit(move || rendezvous.wait().is_leader())
        })
        .collect();
    assert!(queue.wait_idle_timeout(IDLE_TIMEOUT));
    let leaders = tickets
        .into_iter()
        .map(|ticket| ticket.wait().unwrap())
        .filter(|&leader| leader)
        .count();
    assert_eq!(leaders, 1);
}

#[test]
fn failed_task_does_not_block_the_barrier() {
    let queue = queue(2);
    let failing = queue.submit(|| -> usize { panic!("patient chart unreadable") });
    let barrier = queue.submit_barrier(|| "records updated");
    assert_eq!(
        failing.wait(),
        Err(QueueError::Panicked("patient chart unreadable".to_owned()))
    );
    assert_eq!(barrier.wait(), Ok("records updated"));
    assert!(queue.wait_idle_timeout(IDLE_TIMEOUT));
    assert_eq!(queue.phase(), Phase::Open);
}

#[test]
fn phases_follow_drain_then_exclusive_run() {
    let queue = queue(2);
    let (release_first_tx, release_first_rx) = mpsc::channel::<()>();
    let (barrier_entered_tx, barrier_entered_rx) = mpsc::channel();
    let (release_barrier_tx, release_barrier_rx) = mpsc::channel::<()>();

    let first = queue.submit(move || {
        let _ = release_first_rx.recv();
    });
    let barrier = queue.submit_barrier(move || {
        barrier_entered_tx.send(()).unwrap();
        let _ = release_barrier_rx.recv();
    });
    let after = queue.submit(|| ());

    assert_eq!(queue.phase(), Phase::Draining);
    assert_eq!(queue.in_flight(), 1);
    assert_eq!(queue.pending(), 2);

    release_first_tx.send(()).unwrap();
    barrier_entered_rx.recv().unwrap();
    assert_eq!(queue.phase(), Phase::BarrierRunning);
    assert_eq!(queue.in_flight(), 1);
    assert!(!after.is_finished());

    release_barrier_tx.send(()).unwrap();
    first.wait().unwrap();
    barrier.wait().unwrap();
    after.wait().unwrap();
    assert!(queue.wait_idle_timeout(IDLE_TIMEOUT));
    assert_eq!(queue.phase(), Phase::Open);
    assert_eq!(queue.pending(), 0);
}

#[test]
fn barrier_on_an_idle_queue_runs_immediately() {
    let queue = queue(2);
    let ticket = queue.submit_barrier(|| 42);
    assert!(ticket.is_barrier());
    assert_eq!(ticket.wait(), Ok(42));
}

#[test]
fn consecutive_barriers_run_one_after_another() {
    let queue = queue(4);
    let timeline = Arc::new(Timeline::default());
    let work = Duration::from_millis(20);
    let first = queue.submit_barrier(timeline.task(1, work));
    let second = queue.submit_barrier(timeline.task(2, work));
    first.wait().unwrap();
    second.wait().unwrap();

    let first = timeline.spans(|id| id == 1)[0];
    let second = timeline.spans(|id| id == 2)[0];
    assert!(first.end <= second.start);
}

#[test]
fn barrier_deadline_withdraws_it_and_releases_later_work() {
    let queue = queue(2);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let barrier_ran = Arc::new(AtomicBool::new(false));

    let slow = queue.submit(move || {
        let _ = release_rx.recv();
    });
    let barrier = {
        let barrier_ran = Arc::clone(&barrier_ran);
        queue.submit_barrier_within(Duration::from_millis(50), move || {
            barrier_ran.store(true, Ordering::SeqCst);
        })
    };
    let later = queue.submit(|| "Processing patient 6");

    assert_eq!(
        barrier.wait(),
        Err(QueueError::BarrierTimeout(Duration::from_millis(50)))
    );
    // Released even though the slow task is still running.
    assert_eq!(later.wait(), Ok("Processing patient 6"));
    assert!(!slow.is_finished());

    release_tx.send(()).unwrap();
    slow.wait().unwrap();
    assert!(queue.wait_idle_timeout(IDLE_TIMEOUT));
    assert!(!barrier_ran.load(Ordering::SeqCst));
}

#[test]
fn barrier_within_deadline_runs_normally() {
    let queue = queue(2);
    let first = queue.submit(|| 1);
    let barrier = queue.submit_barrier_within(Duration::from_secs(5), || 2);
    assert_eq!(first.wait(), Ok(1));
    assert_eq!(barrier.wait(), Ok(2));
}

#[test]
fn cancel_withdraws_only_pending_submissions() {
    let queue = queue(1);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel();
    let withdrawn_ran = Arc::new(AtomicBool::new(false));

    let running = queue.submit(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    });
    let barrier = queue.submit_barrier(|| ());
    let withdrawn = {
        let withdrawn_ran = Arc::clone(&withdrawn_ran);
        queue.submit(move || withdrawn_ran.store(true, Ordering::SeqCst))
    };
    started_rx.recv().unwrap();

    assert!(withdrawn.cancel());
    assert!(barrier.cancel());
    assert_eq!(queue.phase(), Phase::Open);
    assert!(!running.cancel());

    release_tx.send(()).unwrap();
    assert!(queue.wait_idle_timeout(IDLE_TIMEOUT));
    assert!(!withdrawn_ran.load(Ordering::SeqCst));
}

#[test]
fn clones_share_one_queue() {
    let queue = queue(2);
    let other = queue.clone();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = queue.submit(move || {
        let _ = release_rx.recv();
    });
    let barrier = other.submit_barrier(|| ());
    assert_eq!(queue.phase(), Phase::Draining);
    assert_eq!(other.label(), "concurrentQueue");
    release_tx.send(()).unwrap();
    blocker.wait().unwrap();
    barrier.wait().unwrap();
}

#[test]
fn unbounded_barrier_deadline_behaves_like_a_plain_barrier() {
    let queue = queue(2);
    let first = queue.submit(|| 1);
    let barrier = queue.submit_barrier_within(Duration::MAX, || 2);
    let after = queue.submit(|| 3);
    assert_eq!(first.wait(), Ok(1));
    assert_eq!(barrier.wait(), Ok(2));
    assert_eq!(after.wait(), Ok(3));
    assert!(queue.wait_idle_timeout(Duration::MAX));
}

#[test]
fn barrier_can_fan_out_on_the_shared_pool() {
    let config = Config::default()
        .with_worker_pool_size(1)
        .with_default_delay(Duration::ZERO);
    let pool = config.build_pool().unwrap();
    let fan_out = FanOut::new(Arc::clone(&pool), config.default_delay);
    let queue = BarrierQueue::new("concurrentQueue", pool);

    let before = queue.submit(|| "Processing patient 1");
    let barrier =
        queue.submit_barrier(move || fan_out.run(2, |index| Ok::<_, Infallible>(index)).len());
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || done_tx.send(barrier.wait()).unwrap());

    assert_eq!(done_rx.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(2));
    assert_eq!(before.wait(), Ok("Processing patient 1"));
}

#[test]
fn expired_barrier_is_withdrawn_by_a_later_submission() {
    let queue = queue(2);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let slow = queue.submit(move || {
        let _ = release_rx.recv();
    });
    let timeout = Duration::from_millis(30);
    let barrier = queue.submit_barrier_within(timeout, || ());
    assert_eq!(queue.phase(), Phase::Draining);

    // Nobody waits on the barrier's ticket: the next submission notices the
    // deadline has passed.
    thread::sleep(timeout * 2);
    let later = queue.submit(|| "Processing patient 6");
    assert_eq!(later.wait(), Ok("Processing patient 6"));
    assert!(barrier.is_finished());
    assert!(!slow.is_finished());
    assert_eq!(queue.phase(), Phase::Open);

    release_tx.send(()).unwrap();
    slow.wait().unwrap();
    assert_eq!(barrier.wait(), Err(QueueError::BarrierTimeout(timeout)));
}

#[test]
fn cancelling_a_draining_barrier_lets_wait_idle_return() {
    let queue = queue(1);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let slow = queue.submit(move || {
        let _ = release_rx.recv();
    });
    let barrier = queue.submit_barrier(|| ());
    let after = queue.submit(|| ());
    assert_eq!(queue.phase(), Phase::Draining);

    let (idle_tx, idle_rx) = mpsc::channel();
    {
        let queue = queue.clone();
        thread::spawn(move || {
            queue.wait_idle();
            idle_tx.send(()).unwrap();
        });
    }

    assert!(barrier.cancel());
    assert_eq!(queue.phase(), Phase::Open);
    assert_eq!(queue.pending(), 0);
    release_tx.send(()).unwrap();

    idle_rx.recv_timeout(IDLE_TIMEOUT).unwrap();
    slow.wait().unwrap();
    after.wait().unwrap();
}
