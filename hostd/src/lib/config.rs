use crate::utils::*;
use crate::rsrc::ResourceVec;
use crate::arena::Fit;

/// Size of the whole arena.
pub const MEMORY_SIZE:      MemUnits = 1024;
/// Size of the block shared by all real-time jobs. Real-time jobs
/// must request exactly this much memory.
pub const RT_MEMORY_SIZE:   MemUnits = 64;
pub const MAX_PRINTERS:     u32 = 2;
pub const MAX_SCANNERS:     u32 = 1;
pub const MAX_MODEMS:       u32 = 1;
pub const MAX_DRIVES:       u32 = 2;
/// How many ticks a user job may run before the feedback
/// scheduler considers demoting it.
pub const TIME_SLICE:       Ticks = 1;
/// Wall-clock duration of one tick.
pub const QUANTUM:          Duration = Duration::from_secs(1);

/// Everything the dispatcher needs to know before its first tick.
///
/// The defaults reproduce the classic host dispatcher setup: 1024 units
/// of memory with 64 of them set aside for real-time jobs, two printers,
/// one scanner, one modem, two optical drives and one-second ticks.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub memory_size:    MemUnits,
    pub rt_memory_size: MemUnits,
    pub capacity:       ResourceVec,
    pub time_slice:     Ticks,
    /// Zero disables wall-clock pacing altogether, which is what
    /// simulations and tests want.
    pub quantum:        Duration,
    pub fit:            Fit,
    /// Whether the real-time block is carved out before the first tick,
    /// or lazily upon the first real-time arrival.
    pub preallocate_rt: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_size:    MEMORY_SIZE,
            rt_memory_size: RT_MEMORY_SIZE,
            capacity:       ResourceVec::new(MAX_PRINTERS, MAX_SCANNERS, MAX_MODEMS, MAX_DRIVES),
            time_slice:     TIME_SLICE,
            quantum:        QUANTUM,
            fit:            Fit::First,
            preallocate_rt: true,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("memory size must be positive")]
    NoMemory,
    #[error("real-time block ({rt}) must be positive and smaller than memory ({total})")]
    BadRealTimeBlock { rt: MemUnits, total: MemUnits },
    #[error("time slice must be at least one tick, got {0}")]
    BadTimeSlice(Ticks),
}

impl Config {
    /// A configuration without wall-clock pacing.
    pub fn simulated() -> Self {
        Self {
            quantum: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_size == 0 {
            Err(ConfigError::NoMemory)
        } else if self.rt_memory_size == 0 || self.rt_memory_size >= self.memory_size {
            Err(ConfigError::BadRealTimeBlock {
                rt:     self.rt_memory_size,
                total:  self.memory_size,
            })
        } else if self.time_slice < 1 {
            Err(ConfigError::BadTimeSlice(self.time_slice))
        } else {
            Ok(())
        }
    }

    /// The largest request a user job may ever make. The real-time
    /// block is never given back, so user jobs can't count on it.
    pub fn user_memory_limit(&self) -> MemUnits {
        self.memory_size - self.rt_memory_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.user_memory_limit(), 960);
        assert_eq!(Config::simulated().quantum, Duration::ZERO);
    }

    #[test]
    fn rejects_oversized_rt_block() {
        let cfg = Config {
            memory_size:    64,
            rt_memory_size: 64,
            ..Config::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::BadRealTimeBlock { rt: 64, total: 64 })
        );
    }

    #[test]
    fn rejects_empty_time_slice() {
        let cfg = Config { time_slice: 0, ..Config::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::BadTimeSlice(0)));
    }
}
