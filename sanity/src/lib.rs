pub use hostd::*;
use std::hash::BuildHasherDefault;
use ahash::AHasher;
use indexmap::IndexMap;
use rand::Rng;
use serde::{Serialize, Deserialize};

type LevelBook = IndexMap<JobId, i64, BuildHasherDefault<AHasher>>;

#[derive(Error, Debug)]
pub enum AuditFailure {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tick {tick}: {source}")]
    Broken {
        tick:   Ticks,
        #[source]
        source: AuditError,
    },
    #[error("tick {tick}: job {job} went from level {from} to level {to}")]
    PriorityRaised { tick: Ticks, job: JobId, from: i64, to: i64 },
    #[error("tick {tick}: job {job} got level {level}")]
    PriorityOutOfBounds { tick: Ticks, job: JobId, level: i64 },
    #[error("still busy after {0} ticks")]
    Stuck(Ticks),
}

/// What happened during one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub ticks:              Ticks,
    pub jobs:               usize,
    pub completed:          usize,
    pub rejected:           usize,
    pub failed:             usize,
    pub suspensions:        usize,
    pub mean_turnaround:    f64,
    pub mean_waiting:       f64,
    /// Most memory ever allocated at once, real-time block included.
    pub peak_memory:        MemUnits,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub file:   String,
    #[serde(flatten)]
    pub run:    RunReport,
}

fn mean(vals: impl Iterator<Item = Ticks>) -> f64 {
    let (sum, n) = vals.fold((0, 0), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum as f64 / n as f64
    }
}

/// No run can take longer than this: every tick either does work,
/// waits for an arrival, or hands freed memory over.
fn tick_bound(jobs: &[Pcb]) -> Ticks {
    let last_arrival = jobs.iter().map(|j| j.arrival).max().unwrap_or(0);
    let work: Ticks = jobs.iter().map(|j| j.cpu_time.max(1)).sum();

    last_arrival + 2 * (work + jobs.len() as Ticks) + 2
}

/// Checks that no event ever raised a job's priority or took it out of
/// the four known levels. `book` keeps the last level seen per job
/// across calls.
fn check_levels(events: &[Event], book: &mut LevelBook) -> Result<(), AuditFailure> {
    for e in events {
        if let EventKind::Rejected(_) = e.kind {
            continue;
        }
        let level = e.priority.level();
        if !(0..dispatcher::N_QUEUES as i64).contains(&level) {
            return Err(AuditFailure::PriorityOutOfBounds { tick: e.tick, job: e.job, level });
        }
        if let Some(prev) = book.insert(e.job, level) {
            if level < prev {
                return Err(AuditFailure::PriorityRaised {
                    tick:   e.tick,
                    job:    e.job,
                    from:   prev,
                    to:     level,
                });
            }
        }
    }

    Ok(())
}

/// Plays `jobs` out on a simulated supervisor, auditing the dispatcher
/// after every tick.
pub fn audit_run(config: Config, jobs: Vec<Pcb>) -> Result<RunReport, AuditFailure> {
    let bound = tick_bound(&jobs);
    let n_jobs = jobs.len();
    let mut d = Dispatcher::new(config, SimulatedSupervisor::new(), jobs)?;
    let mut book = LevelBook::default();
    let mut checked = 0;
    let mut peak_memory = d.arena().capacity() - d.arena().free_total();

    loop {
        let busy = d.step();
        d.audit()
            .map_err(|source| AuditFailure::Broken { tick: d.timer(), source })?;
        check_levels(&d.history()[checked..], &mut book)?;
        checked = d.history().len();
        peak_memory = peak_memory.max(d.arena().capacity() - d.arena().free_total());
        if !busy {
            break;
        }
        if d.timer() > bound {
            return Err(AuditFailure::Stuck(d.timer()));
        }
    }

    let summary = d.summary();
    debug!("{} jobs in {} ticks", n_jobs, summary.ticks);

    Ok(RunReport {
        ticks:              summary.ticks,
        jobs:               n_jobs,
        completed:          summary.completed,
        rejected:           summary.rejected,
        failed:             summary.failed,
        suspensions:        summary.suspensions,
        mean_turnaround:    mean(d.completed().iter().map(|c| c.turnaround())),
        mean_waiting:       mean(d.completed().iter().map(|c| c.waiting())),
        peak_memory,
    })
}

pub fn audit_file(path: &Path, config: &Config) -> Result<FileReport, AuditFailure> {
    let jobs = DispatchListParser::new(path.to_path_buf()).read_jobs()?;
    let run = audit_run(config.clone(), jobs)?;

    Ok(FileReport {
        file: path.display().to_string(),
        run,
    })
}

/// Writes `n` random but admissible records. Arrivals are
/// non-decreasing; roughly one job in five is real-time.
pub fn generate<R: Rng, W: Write>(
    rng:    &mut R,
    n:      usize,
    config: &Config,
    out:    &mut W,
) -> std::io::Result<()> {
    let cap = config.capacity;
    let user_mem = config.user_memory_limit();
    let mut arrival = 0;
    for _ in 0..n {
        arrival += rng.gen_range(0..3);
        if rng.gen_bool(0.2) {
            writeln!(
                out,
                "{}, 0, {}, {}, 0, 0, 0, 0",
                arrival,
                rng.gen_range(1..=5),
                config.rt_memory_size
            )?;
        } else {
            // Most jobs need no devices at all.
            let mut dev = |max: u32| if rng.gen_bool(0.3) { rng.gen_range(0..=max) } else { 0 };
            let req = [
                dev(cap.printers),
                dev(cap.scanners),
                dev(cap.modems),
                dev(cap.drives),
            ];
            writeln!(
                out,
                "{}, {}, {}, {}, {}",
                arrival,
                rng.gen_range(1..=3),
                rng.gen_range(1..=8),
                rng.gen_range(1..=user_mem / 2),
                req.iter().join(", ")
            )?;
        }
    }

    Ok(())
}
