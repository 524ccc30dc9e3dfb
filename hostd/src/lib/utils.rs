pub use std::{
    collections::VecDeque,
    fmt,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
pub use thiserror::Error;
pub use itertools::Itertools;
pub use clap::{Parser, ValueEnum};
pub use log::{debug, error, info, trace, warn};

/// The unit of simulated time. One tick equals one quantum.
///
/// Signed: a job's remaining CPU time is decremented
/// *before* being compared against zero, and a job that was given
/// zero ticks of work ends up below it.
pub type Ticks = i64;

/// The unit of the dispatcher's flat address space. The arena
/// doesn't care whether these are bytes or megabytes.
pub type MemUnits = usize;

/// Jobs are numbered in the order they appear in the dispatch list.
pub type JobId = usize;
