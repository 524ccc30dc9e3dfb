use crate::utils::*;
use crate::rsrc::ResourceVec;
use crate::arena::BlockId;
use crate::supervisor::ExecHandle;

/// Scheduling class of a job, as read from the dispatch list.
///
/// Levels are ordered by urgency: 0 is real-time, 1 to 3 are the
/// feedback levels of user jobs. Anything else is kept around as
/// [`Priority::Unknown`] so that admission can reject it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    RealTime,
    High,
    Medium,
    Low,
    Unknown(i64),
}

impl Priority {
    pub fn from_level(level: i64) -> Self {
        match level {
            0   => { Priority::RealTime },
            1   => { Priority::High },
            2   => { Priority::Medium },
            3   => { Priority::Low },
            x   => { Priority::Unknown(x) },
        }
    }

    pub fn level(&self) -> i64 {
        match self {
            Priority::RealTime      => { 0 },
            Priority::High          => { 1 },
            Priority::Medium        => { 2 },
            Priority::Low           => { 3 },
            Priority::Unknown(x)    => { *x },
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Priority::High | Priority::Medium | Priority::Low)
    }

    /// Index of the dispatch queue serving this class.
    pub fn queue(&self) -> Option<usize> {
        match self {
            Priority::Unknown(_)    => { None },
            known                   => { Some(known.level() as usize) },
        }
    }

    /// One feedback level down. Real-time jobs and jobs already at the
    /// lowest level stay where they are.
    pub fn degraded(self) -> Self {
        match self {
            Priority::High      => { Priority::Medium },
            Priority::Medium    => { Priority::Low },
            other               => { other },
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Forward, so that width and alignment flags are honoured.
        fmt::Display::fmt(&self.level(), f)
    }
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Initialized,
    Admitted,
    Ready,
    Running,
    Suspended,
    Terminated,
}

/// How a job holds its memory.
///
/// All real-time jobs share one block which outlives each of them.
/// User jobs own theirs, and give it back when they terminate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLease {
    Shared(BlockId),
    Exclusive(BlockId),
}

/// The process control block: one job, from the moment it is read out
/// of the dispatch list until it terminates.
///
/// A PCB is a plain value. It is *moved* from queue to queue and into
/// the running slot, so that it always has exactly one owner.
#[derive(Clone, Debug)]
pub struct Pcb {
    pub id:             JobId,
    pub arrival:        Ticks,
    pub priority:       Priority,
    /// CPU time asked for in the dispatch list.
    pub cpu_time:       Ticks,
    pub remaining:      Ticks,
    pub mbytes:         MemUnits,
    pub req:            ResourceVec,
    pub status:         Status,
    pub handle:         Option<ExecHandle>,
    pub lease:          Option<MemoryLease>,
    pub ans_file:       Option<Arc<Path>>,
    // Statistics.
    pub first_run:      Option<Ticks>,
    pub suspensions:    u32,
}

impl Pcb {
    pub fn new(
        id:         JobId,
        arrival:    Ticks,
        priority:   Priority,
        cpu_time:   Ticks,
        mbytes:     MemUnits,
        req:        ResourceVec,
    ) -> Self {
        Self {
            id,
            arrival,
            priority,
            cpu_time,
            remaining:      cpu_time,
            mbytes,
            req,
            status:         Status::Initialized,
            handle:         None,
            lease:          None,
            ans_file:       None,
            first_run:      None,
            suspensions:    0,
        }
    }
}

impl fmt::Display for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle = match self.handle {
            Some(h) => { h.to_string() },
            None    => { String::from("-") },
        };
        write!(
            f,
            "job {:>3} pid {:>7} arrive {:>4} prior {:>2} cpu {:>4} mem {:>5} rsrc [{}] {:?}",
            self.id,
            handle,
            self.arrival,
            self.priority,
            self.remaining,
            self.mbytes,
            self.req,
            self.status
        )
    }
}
