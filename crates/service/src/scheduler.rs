//! Background job scheduler.
//!
//! Jobs are plain closures registered with a fixed or jittered interval:
//!
//! ```ignore
//! let scheduler = Scheduler::new();
//! scheduler.every(2).to(3).hours().schedule(|| { refresh(); Ok(()) });
//! scheduler.run()?;
//! ```
//!
//! `run` starts one OS thread that polls for due jobs; the caller is never
//! blocked. Jobs due at the same tick run in registration order, and a job
//! that fails or panics is logged and rescheduled like any other.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

type Task = Box<dyn FnMut() -> anyhow::Result<()> + Send + 'static>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Seconds,
    Minutes,
    Hours,
}

impl Unit {
    fn of(&self, n: u64) -> Duration {
        match self {
            Unit::Seconds => Duration::from_secs(n),
            Unit::Minutes => Duration::from_secs(n * 60),
            Unit::Hours => Duration::from_secs(n * 3600),
        }
    }
}

/// Interval between runs; `min < max` draws each interval uniformly from the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub min: Duration,
    pub max: Duration,
}

impl Interval {
    fn sample(&self) -> Duration {
        if self.max <= self.min {
            self.min
        } else {
            rand::thread_rng().gen_range(self.min..=self.max)
        }
    }
}

/// Identifies a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    id: u64,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Job {
    name: String,
    interval: Interval,
    next_run: Instant,
    runs: u64,
    /// Taken out while the job runs so its lock is free during the call.
    task: Option<Task>,
}

impl Job {
    fn is_due(&self, now: Instant) -> bool {
        now >= self.next_run
    }

    /// Claim the task if the job is due and not already running elsewhere.
    fn claim(&mut self, now: Instant) -> Option<Task> {
        if self.is_due(now) {
            self.task.take()
        } else {
            None
        }
    }

    fn finish(&mut self, task: Task, now: Instant) {
        self.task = Some(task);
        self.runs += 1;
        self.reschedule(now);
    }

    /// Steady-state ticking from the previous scheduled time; a job that fell
    /// behind is pushed one interval past `now` instead of firing repeatedly.
    fn reschedule(&mut self, now: Instant) {
        let next = self.next_run + self.interval.sample();
        self.next_run = if next <= now { now + self.interval.sample() } else { next };
    }
}

fn run_task(id: u64, name: &str, task: &mut Task) {
    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| task())) {
        Ok(Ok(())) => debug!(
            job = id,
            %name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        ),
        Ok(Err(e)) => error!(job = id, %name, error = %e, "job failed"),
        Err(payload) => error!(
            job = id,
            %name,
            panic = %panic_message(payload.as_ref()),
            "job panicked"
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Worker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Signal the thread and wait for its current tick, unless called from it.
    fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.thread().id() == thread::current().id() {
            return;
        }
        if self.thread.join().is_err() {
            warn!("scheduler thread panicked during shutdown");
        }
    }
}

struct Inner {
    jobs: Mutex<Vec<(u64, Arc<Mutex<Job>>)>>,
    next_id: AtomicU64,
    poll: Duration,
    worker: Mutex<Option<Worker>>,
}

impl Drop for Inner {
    /// The last handle going away stops the thread like `shutdown`.
    fn drop(&mut self) {
        let worker = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }
}

/// Cheaply cloneable handle; all clones share the same jobs and thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// How often the background thread looks for due jobs.
    pub fn with_poll_interval(poll: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                poll,
                worker: Mutex::new(None),
            }),
        }
    }

    /// Start describing a job that runs every `n` units.
    pub fn every(&self, n: u64) -> Every<'_> {
        Every { scheduler: self, from: n, to: None }
    }

    fn register(&self, name: String, interval: Interval, task: Task) -> JobHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            name,
            interval,
            next_run: Instant::now() + interval.sample(),
            runs: 0,
            task: Some(task),
        };
        debug!(job = id, name = %job.name, ?interval, "job registered");
        lock(&self.inner.jobs).push((id, Arc::new(Mutex::new(job))));
        JobHandle { id }
    }

    fn find(&self, handle: &JobHandle) -> Option<Arc<Mutex<Job>>> {
        lock(&self.inner.jobs)
            .iter()
            .find(|(id, _)| *id == handle.id)
            .map(|(_, job)| Arc::clone(job))
    }

    pub fn job_count(&self) -> usize {
        lock(&self.inner.jobs).len()
    }

    pub fn next_run(&self, handle: &JobHandle) -> Option<Instant> {
        self.find(handle).map(|j| lock(&j).next_run)
    }

    /// Number of completed runs, successful or not.
    pub fn run_count(&self, handle: &JobHandle) -> Option<u64> {
        self.find(handle).map(|j| lock(&j).runs)
    }

    /// Run every job due at `now`, in registration order. Returns how many ran.
    pub fn run_pending_at(&self, now: Instant) -> usize {
        // Snapshot so jobs may register further jobs without deadlocking.
        let jobs: Vec<_> = lock(&self.inner.jobs).clone();
        let mut ran = 0;
        for (id, job) in jobs {
            let claimed = {
                let mut j = lock(&job);
                j.claim(now).map(|task| (task, j.name.clone()))
            };
            let Some((mut task, name)) = claimed else { continue };
            run_task(id, &name, &mut task);
            lock(&job).finish(task, now);
            ran += 1;
        }
        ran
    }

    pub fn run_pending(&self) -> usize {
        self.run_pending_at(Instant::now())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.worker).is_some()
    }

    /// Start the background thread and return immediately. Calling it again
    /// while running is a no-op.
    pub fn run(&self) -> std::io::Result<()> {
        let mut worker = lock(&self.inner.worker);
        if worker.is_some() {
            return Ok(());
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let poll = self.inner.poll;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let thread = thread::Builder::new()
            .name("rollar-scheduler".into())
            .spawn(move || {
                info!(poll_ms = poll.as_millis() as u64, "scheduler thread started");
                loop {
                    match stopped.recv_timeout(poll) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(inner) = weak.upgrade() else { break };
                    Scheduler { inner }.run_pending();
                }
                info!("scheduler thread stopped");
            })?;

        *worker = Some(Worker { stop, thread });
        Ok(())
    }

    /// Stop the background thread and wait for the current tick to finish.
    pub fn shutdown(&self) {
        let worker = lock(&self.inner.worker).take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }
}

/// First step of the builder: `every(n)` with an optional `.to(m)` band.
pub struct Every<'a> {
    scheduler: &'a Scheduler,
    from: u64,
    to: Option<u64>,
}

impl<'a> Every<'a> {
    /// Randomise each interval between `every(n)` and `to(m)` units.
    pub fn to(mut self, m: u64) -> Self {
        self.to = Some(m);
        self
    }

    pub fn unit(self, unit: Unit) -> JobBuilder<'a> {
        let min = unit.of(self.from);
        let max = unit.of(self.to.unwrap_or(self.from).max(self.from));
        JobBuilder { scheduler: self.scheduler, interval: Interval { min, max }, name: None }
    }

    pub fn seconds(self) -> JobBuilder<'a> {
        self.unit(Unit::Seconds)
    }

    pub fn minutes(self) -> JobBuilder<'a> {
        self.unit(Unit::Minutes)
    }

    pub fn hours(self) -> JobBuilder<'a> {
        self.unit(Unit::Hours)
    }
}

pub struct JobBuilder<'a> {
    scheduler: &'a Scheduler,
    interval: Interval,
    name: Option<String>,
}

impl JobBuilder<'_> {
    /// Label used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Register `job`. It first runs one interval from now.
    pub fn schedule<F>(self, job: F) -> JobHandle
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| "job".to_string());
        self.scheduler.register(name, self.interval, Box::new(job))
    }
}
