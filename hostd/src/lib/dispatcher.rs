use crate::utils::*;
use crate::config::{Config, ConfigError};
use crate::arena::{ArenaError, BlockId, Fit, MemoryArena};
use crate::rsrc::{ResourceTable, ResourceVec};
use crate::pcb::{MemoryLease, Pcb, Priority, Status};
use crate::supervisor::{SuperviseError, Supervisor};

/// One real-time queue plus three feedback levels.
pub const N_QUEUES: usize = 4;

/// Why a job was thrown out at arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Wrong memory size, or asked for I/O resources.
    IllegalRealTime,
    /// Asked for more than the system will ever have.
    IllegalUser,
    UnknownPriority,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Rejection::IllegalRealTime  => { "illegal real-time process" },
            Rejection::IllegalUser      => { "illegal user process" },
            Rejection::UnknownPriority  => { "unknown priority" },
        };
        f.write_str(msg)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Classified into the real-time queue or the user job queue.
    Admitted,
    Rejected(Rejection),
    /// Memory and resources granted, sitting in a dispatch queue.
    Ready,
    Started,
    Suspended,
    Resumed,
    Terminated,
    /// The supervisor let us down; the job was dropped.
    Failed,
}

/// One entry of the dispatcher's history. `priority` is the job's
/// class at the time of the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub tick:       Ticks,
    pub job:        JobId,
    pub priority:   Priority,
    pub kind:       EventKind,
}

/// Timing of a job that ran to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub job:            JobId,
    pub priority:       Priority,
    pub arrival:        Ticks,
    pub first_run:      Ticks,
    pub finished:       Ticks,
    pub cpu_time:       Ticks,
    pub suspensions:    u32,
}

impl Completion {
    pub fn turnaround(&self) -> Ticks {
        self.finished - self.arrival
    }

    pub fn waiting(&self) -> Ticks {
        self.turnaround() - self.cpu_time
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks:          Ticks,
    pub completed:      usize,
    pub rejected:       usize,
    pub failed:         usize,
    pub suspensions:    usize,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuditError {
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("resources held by jobs ({held}) differ from resources lent out ({lent})")]
    ResourceLeak { held: ResourceVec, lent: ResourceVec },
    #[error("job {job} with priority {priority} sits in queue {queue}")]
    Misqueued { job: JobId, priority: Priority, queue: usize },
    #[error("job {job} holds a block that isn't allocated or has the wrong size")]
    LostBlock { job: JobId },
    #[error("the shared real-time block isn't allocated")]
    LostRealTimeBlock,
}

/// The host dispatcher: a real-time FCFS queue on top of a three-level
/// feedback scheduler, with memory and I/O resource admission in front.
///
/// Time advances in ticks. Each call to [`step`](Self::step) runs one
/// tick in this order:
///
/// 1. move arrived jobs out of the input queue, rejecting the illegal ones
/// 2. grant memory and resources to waiting user jobs, in arrival order
/// 3. charge the running job one tick; terminate or preempt it
/// 4. if nothing is running, dispatch the most urgent ready job
/// 5. sleep one quantum
///
/// The dispatcher owns all of its state. The supervisor is the only
/// thing it talks to.
pub struct Dispatcher<S: Supervisor = Box<dyn Supervisor>> {
    config:     Config,
    arena:      MemoryArena,
    resources:  ResourceTable,
    supervisor: S,
    input:      VecDeque<Pcb>,
    user_jobs:  VecDeque<Pcb>,
    queues:     [VecDeque<Pcb>; N_QUEUES],
    running:    Option<Pcb>,
    rt_block:   Option<BlockId>,
    // Ticks left in the running user job's time slice.
    slice:      Ticks,
    timer:      Ticks,
    history:    Vec<Event>,
    completed:  Vec<Completion>,
    rejected:   usize,
    failed:     usize,
}

impl<S: Supervisor> Dispatcher<S> {
    pub fn new(config: Config, supervisor: S, jobs: Vec<Pcb>) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut arena = MemoryArena::new(config.memory_size);
        // Pre-allocation happens before anything else exists, hence
        // always lands at address zero.
        let rt_block = if config.preallocate_rt {
            arena.allocate(config.rt_memory_size, Fit::First)
        } else {
            None
        };
        let mut input: VecDeque<Pcb> = jobs.into_iter()
            .sorted_by_key(|j| j.arrival)
            .collect();
        for j in input.iter_mut() {
            j.status = Status::Initialized;
        }

        Ok(Self {
            resources:  ResourceTable::new(config.capacity),
            slice:      config.time_slice,
            config,
            arena,
            supervisor,
            input,
            user_jobs:  VecDeque::new(),
            queues:     Default::default(),
            running:    None,
            rt_block,
            timer:      0,
            history:    vec![],
            completed:  vec![],
            rejected:   0,
            failed:     0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn timer(&self) -> Ticks {
        self.timer
    }

    pub fn arena(&self) -> &MemoryArena {
        &self.arena
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn running(&self) -> Option<&Pcb> {
        self.running.as_ref()
    }

    pub fn input(&self) -> &VecDeque<Pcb> {
        &self.input
    }

    pub fn user_jobs(&self) -> &VecDeque<Pcb> {
        &self.user_jobs
    }

    pub fn queue(&self, idx: usize) -> &VecDeque<Pcb> {
        &self.queues[idx]
    }

    pub fn rt_block(&self) -> Option<BlockId> {
        self.rt_block
    }

    pub fn history(&self) -> &[Event] {
        &self.history
    }

    pub fn completed(&self) -> &[Completion] {
        &self.completed
    }

    /// Anything left to do?
    pub fn is_busy(&self) -> bool {
        !self.input.is_empty()
            || !self.user_jobs.is_empty()
            || self.highest_ready().is_some()
            || self.running.is_some()
    }

    /// Index of the most urgent non-empty dispatch queue.
    fn highest_ready(&self) -> Option<usize> {
        self.queues
            .iter()
            .position(|q| !q.is_empty())
    }

    fn record(&mut self, job: &Pcb, kind: EventKind) {
        self.history.push(Event {
            tick:       self.timer,
            job:        job.id,
            priority:   job.priority,
            kind,
        });
    }

    /// Runs one tick. Returns whether there's still work left.
    pub fn step(&mut self) -> bool {
        if !self.is_busy() {
            return false;
        }
        self.admit_arrivals();
        self.admit_user_jobs();
        self.charge_running();
        self.dispatch();
        trace!(
            "tick {}: input {} user {} queues [{}] running {}",
            self.timer,
            self.input.len(),
            self.user_jobs.len(),
            self.queues.iter().map(|q| q.len()).join(" "),
            self.running.as_ref().map_or(String::from("-"), |j| j.id.to_string())
        );
        if !self.config.quantum.is_zero() {
            std::thread::sleep(self.config.quantum);
        }
        self.timer += 1;

        self.is_busy()
    }

    /// Ticks until every job is gone.
    pub fn run(&mut self) -> RunSummary {
        while self.step() {}
        let summary = self.summary();
        info!(
            "all done after {} ticks: {} completed, {} rejected, {} failed, {} suspensions",
            summary.ticks,
            summary.completed,
            summary.rejected,
            summary.failed,
            summary.suspensions
        );

        summary
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            ticks:          self.timer,
            completed:      self.completed.len(),
            rejected:       self.rejected,
            failed:         self.failed,
            suspensions:    self.completed
                .iter()
                .map(|c| c.suspensions as usize)
                .sum(),
        }
    }

    fn reject(&mut self, reason: Rejection) {
        if let Some(job) = self.input.pop_front() {
            warn!("{}: {}", reason, job);
            self.record(&job, EventKind::Rejected(reason));
            self.rejected += 1;
        }
    }

    /// Step 1: sort arrived jobs into the real-time queue and the user
    /// job queue.
    fn admit_arrivals(&mut self) {
        while let Some(head) = self.input.front() {
            if head.arrival > self.timer {
                break;
            }
            let priority = head.priority;
            match priority {
                Priority::RealTime  => {
                    if head.mbytes != self.config.rt_memory_size || !head.req.is_zero() {
                        self.reject(Rejection::IllegalRealTime);
                        continue;
                    }
                    let block = match self.rt_block {
                        Some(b) => { b },
                        None    => {
                            // At the top of the arena, so that user jobs keep
                            // one contiguous span of `user_memory_limit()` units.
                            match self.arena.allocate_at_end(self.config.rt_memory_size) {
                                Some(b) => {
                                    debug!("real-time block allocated lazily");
                                    self.rt_block = Some(b);
                                    b
                                },
                                // Wait for user jobs to give memory back. Later
                                // arrivals must not overtake this one.
                                None    => { break; }
                            }
                        }
                    };
                    if let Some(mut job) = self.input.pop_front() {
                        job.lease = Some(MemoryLease::Shared(block));
                        job.status = Status::Admitted;
                        self.record(&job, EventKind::Admitted);
                        self.make_ready(job);
                    }
                },
                Priority::High | Priority::Medium | Priority::Low   => {
                    if head.mbytes == 0
                        || head.mbytes > self.config.user_memory_limit()
                        || self.resources.exceeds_capacity(&head.req) {
                        self.reject(Rejection::IllegalUser);
                        continue;
                    }
                    if let Some(mut job) = self.input.pop_front() {
                        job.status = Status::Admitted;
                        self.record(&job, EventKind::Admitted);
                        self.user_jobs.push_back(job);
                    }
                },
                Priority::Unknown(_)    => {
                    self.reject(Rejection::UnknownPriority);
                }
            }
        }
    }

    /// Step 2: user jobs get memory and resources strictly in arrival
    /// order. The first one that can't be served blocks the rest.
    fn admit_user_jobs(&mut self) {
        while let Some(head) = self.user_jobs.front() {
            if !self.resources.can_allocate(&head.req) {
                break;
            }
            let Some(block) = self.arena.allocate(head.mbytes, self.config.fit) else {
                break;
            };
            let granted = self.resources.allocate(&head.req);
            debug_assert!(granted);
            if let Some(mut job) = self.user_jobs.pop_front() {
                job.lease = Some(MemoryLease::Exclusive(block));
                self.make_ready(job);
            }
        }
    }

    /// Appends `job` to the tail of the dispatch queue of its class.
    fn make_ready(&mut self, mut job: Pcb) {
        match job.priority.queue() {
            Some(q) => {
                if job.status != Status::Suspended {
                    job.status = Status::Ready;
                    self.record(&job, EventKind::Ready);
                }
                self.queues[q].push_back(job);
            },
            None    => {
                // Admission never lets these through.
                error!("dropping unschedulable {}", job);
                self.release(job);
            }
        }
    }

    /// Step 3.
    fn charge_running(&mut self) {
        let Some(mut job) = self.running.take() else {
            return;
        };
        job.remaining -= 1;
        if job.remaining <= 0 {
            self.finish(job);
            return;
        }
        if !job.priority.is_user() {
            // Real-time jobs run to completion.
            self.running = Some(job);
            return;
        }
        self.slice -= 1;
        if self.slice <= 0 {
            if self.highest_ready().is_none() {
                // Nobody's waiting: keep going at the same level.
                self.slice = self.config.time_slice;
                self.running = Some(job);
            } else {
                job.priority = job.priority.degraded();
                self.preempt(job);
            }
        } else if self.highest_ready().is_some_and(|q| Some(q) < job.priority.queue()) {
            // Slice not used up, but something more urgent showed up:
            // step aside without losing the level.
            self.preempt(job);
        } else {
            self.running = Some(job);
        }
    }

    fn preempt(&mut self, mut job: Pcb) {
        let Some(handle) = job.handle else {
            self.make_ready(job);
            return;
        };
        match self.supervisor.suspend(handle) {
            Ok(())  => {
                job.status = Status::Suspended;
                job.suspensions += 1;
                info!("suspend   {}", job);
                self.record(&job, EventKind::Suspended);
                self.make_ready(job);
            },
            Err(e)  => { self.fail(job, e); }
        }
    }

    fn finish(&mut self, mut job: Pcb) {
        if let Some(handle) = job.handle {
            if let Err(e) = self.supervisor.terminate(handle) {
                error!("job {}: {}", job.id, e);
            }
        }
        job.status = Status::Terminated;
        info!("terminate {}", job);
        self.record(&job, EventKind::Terminated);
        self.completed.push(Completion {
            job:            job.id,
            priority:       job.priority,
            arrival:        job.arrival,
            first_run:      job.first_run.unwrap_or(self.timer),
            finished:       self.timer,
            cpu_time:       job.cpu_time,
            suspensions:    job.suspensions,
        });
        self.release(job);
    }

    /// The job's execution unit is beyond our control. Treat the job as
    /// terminated so that nothing it holds leaks.
    fn fail(&mut self, mut job: Pcb, e: SuperviseError) {
        error!("job {}: {}", job.id, e);
        if let Some(handle) = job.handle.take() {
            // Best effort; we're giving up on it either way.
            let _ = self.supervisor.terminate(handle);
        }
        job.status = Status::Terminated;
        self.record(&job, EventKind::Failed);
        self.failed += 1;
        self.release(job);
    }

    /// Gives back whatever `job` holds. The shared real-time block
    /// stays put.
    fn release(&mut self, job: Pcb) {
        if let Some(MemoryLease::Exclusive(block)) = job.lease {
            let freed = self.arena.free(block);
            debug_assert!(freed, "Freed a block twice");
            self.resources.free(&job.req);
        }
    }

    /// Step 4.
    fn dispatch(&mut self) {
        if self.running.is_some() {
            return;
        }
        while let Some(q) = self.highest_ready() {
            let Some(mut job) = self.queues[q].pop_front() else {
                break;
            };
            let outcome = match job.handle {
                Some(h) if job.status == Status::Suspended  => {
                    self.supervisor.resume(h).map(|_| (h, EventKind::Resumed))
                },
                _                                           => {
                    self.supervisor.start(&job).map(|h| (h, EventKind::Started))
                }
            };
            match outcome {
                Ok((handle, kind))  => {
                    job.handle = Some(handle);
                    job.status = Status::Running;
                    job.first_run.get_or_insert(self.timer);
                    if job.priority.is_user() {
                        self.slice = self.config.time_slice;
                    }
                    if kind == EventKind::Started {
                        info!("start     {}", job);
                    } else {
                        info!("resume    {}", job);
                    }
                    self.record(&job, kind);
                    self.running = Some(job);
                    return;
                },
                // Leaves the slot free for the next candidate.
                Err(e)              => { self.fail(job, e); }
            }
        }
    }

    /// Checks that the books balance.
    ///
    /// - the arena is a gap-free, coalesced partition
    /// - resources lent out equal the sum of what admitted user jobs hold
    /// - every queued job sits in the queue of its class
    /// - every held block is allocated and sized as requested
    pub fn audit(&self) -> Result<(), AuditError> {
        self.arena.check()?;
        if let Some(b) = self.rt_block {
            if !self.arena.is_allocated(b) || self.arena.size_of(b) != Some(self.config.rt_memory_size) {
                return Err(AuditError::LostRealTimeBlock);
            }
        }

        for (idx, q) in self.queues.iter().enumerate() {
            if let Some(j) = q.iter().find(|j| j.priority.queue() != Some(idx)) {
                return Err(AuditError::Misqueued {
                    job:        j.id,
                    priority:   j.priority,
                    queue:      idx,
                });
            }
        }

        let mut held = ResourceVec::default();
        let holders = self.queues
            .iter()
            .flatten()
            .chain(self.running.iter());
        for j in holders {
            match j.lease {
                Some(MemoryLease::Exclusive(b)) => {
                    if !self.arena.is_allocated(b) || self.arena.size_of(b) != Some(j.mbytes) {
                        return Err(AuditError::LostBlock { job: j.id });
                    }
                    held = held.saturating_add(&j.req);
                },
                Some(MemoryLease::Shared(b))    => {
                    if Some(b) != self.rt_block {
                        return Err(AuditError::LostBlock { job: j.id });
                    }
                },
                None                            => {
                    return Err(AuditError::LostBlock { job: j.id });
                }
            }
        }
        let lent = self.resources.allocated();
        if held != lent {
            return Err(AuditError::ResourceLeak { held, lent });
        }

        Ok(())
    }
}
