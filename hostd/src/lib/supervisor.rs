use crate::utils::*;
use crate::pcb::Pcb;
use indexmap::IndexMap;

/// Opaque identifier of a job's live execution unit. For real child
/// processes it is their pid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecHandle(pub u32);

impl fmt::Display for ExecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The four lifecycle controls the dispatcher exerts on a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Start,
    Suspend,
    Resume,
    Terminate,
}

#[derive(Error, Debug)]
pub enum SuperviseError {
    #[error("could not spawn {}: {source}", .program.display())]
    Spawn {
        program:    PathBuf,
        #[source]
        source:     std::io::Error,
    },
    #[error("could not open answer file {}: {source}", .path.display())]
    Sink {
        path:       PathBuf,
        #[source]
        source:     std::io::Error,
    },
    #[error("could not deliver {signal:?} to {handle}: {source}")]
    Deliver {
        signal:     Signal,
        handle:     ExecHandle,
        #[source]
        source:     std::io::Error,
    },
    #[error("{signal:?} sent to {handle}, which is {state}")]
    BadState {
        signal:     Signal,
        handle:     ExecHandle,
        state:      &'static str,
    },
    #[error("no execution unit behind handle {0}")]
    Unknown(ExecHandle),
}

/// Whatever actually runs the jobs. The dispatcher only ever talks to
/// this interface; platform specifics live in the implementors.
///
/// None of the calls is expected to block, except [`terminate`](Supervisor::terminate)
/// which may wait for the unit to be reaped.
pub trait Supervisor {
    /// Launches `job` and binds a fresh handle to it.
    fn start(&mut self, job: &Pcb) -> Result<ExecHandle, SuperviseError>;
    fn suspend(&mut self, handle: ExecHandle) -> Result<(), SuperviseError>;
    fn resume(&mut self, handle: ExecHandle) -> Result<(), SuperviseError>;
    fn terminate(&mut self, handle: ExecHandle) -> Result<(), SuperviseError>;
}

impl<S: Supervisor + ?Sized> Supervisor for Box<S> {
    fn start(&mut self, job: &Pcb) -> Result<ExecHandle, SuperviseError> {
        (**self).start(job)
    }

    fn suspend(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
        (**self).suspend(handle)
    }

    fn resume(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
        (**self).resume(handle)
    }

    fn terminate(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
        (**self).terminate(handle)
    }
}

/// Runs nothing. Hands out sequential handles, tracks whether each unit
/// would be running or stopped, and keeps a log of every signal.
///
/// Out-of-order signals (e.g. resuming a running unit) are refused, which
/// makes this supervisor double as a checker of the dispatcher's logic.
#[derive(Debug, Default)]
pub struct SimulatedSupervisor {
    next_handle:    u32,
    // `true` while stopped.
    live:           IndexMap<ExecHandle, bool>,
    signals:        Vec<(Signal, ExecHandle)>,
}

impl SimulatedSupervisor {
    pub fn new() -> Self {
        Self {
            // Mimic pids: nobody gets 0.
            next_handle: 1,
            ..Self::default()
        }
    }

    pub fn signals(&self) -> &[(Signal, ExecHandle)] {
        &self.signals
    }

    /// Handles of units that were started but never terminated.
    pub fn live(&self) -> impl Iterator<Item = ExecHandle> + '_ {
        self.live.keys().copied()
    }

    fn transition(
        &mut self,
        signal:     Signal,
        handle:     ExecHandle,
        stopped:    bool,
    ) -> Result<(), SuperviseError> {
        match self.live.get_mut(&handle) {
            Some(state) if *state == stopped    => {
                Err(SuperviseError::BadState {
                    signal,
                    handle,
                    state: if stopped { "already stopped" } else { "already running" },
                })
            },
            Some(state)                         => {
                *state = stopped;
                self.signals.push((signal, handle));
                Ok(())
            },
            None                                => { Err(SuperviseError::Unknown(handle)) }
        }
    }
}

impl Supervisor for SimulatedSupervisor {
    fn start(&mut self, job: &Pcb) -> Result<ExecHandle, SuperviseError> {
        let handle = ExecHandle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle, false);
        self.signals.push((Signal::Start, handle));
        trace!("simulated start of job {} as {}", job.id, handle);

        Ok(handle)
    }

    fn suspend(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
        self.transition(Signal::Suspend, handle, true)
    }

    fn resume(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
        self.transition(Signal::Resume, handle, false)
    }

    fn terminate(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
        match self.live.shift_remove(&handle) {
            Some(_) => {
                self.signals.push((Signal::Terminate, handle));
                Ok(())
            },
            None    => { Err(SuperviseError::Unknown(handle)) }
        }
    }
}

#[cfg(unix)]
pub use self::unix::ProcessSupervisor;

#[cfg(unix)]
mod unix {
    use super::*;
    use std::hash::BuildHasherDefault;
    use std::process::{Child, Command, Stdio};
    use ahash::AHasher;

    type ChildBook = IndexMap<u32, Child, BuildHasherDefault<AHasher>>;

    /// Runs every job as a child process of the dispatcher.
    ///
    /// The job program gets the job's CPU time as its only argument and
    /// writes to the job's answer file. Suspension, resumption and
    /// termination are `SIGTSTP`, `SIGCONT` and `SIGINT` respectively.
    pub struct ProcessSupervisor {
        program:    PathBuf,
        children:   ChildBook,
    }

    impl ProcessSupervisor {
        pub fn new(program: PathBuf) -> Self {
            Self {
                program,
                children: ChildBook::default(),
            }
        }

        fn send(&self, signal: Signal, handle: ExecHandle) -> Result<(), std::io::Error> {
            let signo = match signal {
                Signal::Suspend     => { libc::SIGTSTP },
                Signal::Resume      => { libc::SIGCONT },
                Signal::Terminate   => { libc::SIGINT },
                Signal::Start       => { return Ok(()); },
            };
            // SAFETY: plain syscall, the pid belongs to a child we spawned
            // and have not reaped yet.
            let rc = unsafe { libc::kill(handle.0 as libc::pid_t, signo) };
            if rc == -1 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(())
            }
        }

        fn signal(&self, signal: Signal, handle: ExecHandle) -> Result<(), SuperviseError> {
            if !self.children.contains_key(&handle.0) {
                return Err(SuperviseError::Unknown(handle));
            }
            self.send(signal, handle)
                .map_err(|source| SuperviseError::Deliver { signal, handle, source })
        }
    }

    impl Supervisor for ProcessSupervisor {
        fn start(&mut self, job: &Pcb) -> Result<ExecHandle, SuperviseError> {
            let stdout = match &job.ans_file {
                Some(path)  => {
                    let sink = OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open(path)
                        .map_err(|source| SuperviseError::Sink {
                            path: path.to_path_buf(),
                            source,
                        })?;
                    Stdio::from(sink)
                },
                None        => { Stdio::inherit() },
            };
            let child = Command::new(&self.program)
                .arg(job.remaining.to_string())
                .stdout(stdout)
                .spawn()
                .map_err(|source| SuperviseError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;
            let pid = child.id();
            self.children.insert(pid, child);

            Ok(ExecHandle(pid))
        }

        fn suspend(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
            self.signal(Signal::Suspend, handle)
        }

        fn resume(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
            self.signal(Signal::Resume, handle)
        }

        fn terminate(&mut self, handle: ExecHandle) -> Result<(), SuperviseError> {
            let mut child = self.children
                .shift_remove(&handle.0)
                .ok_or(SuperviseError::Unknown(handle))?;
            if let Err(source) = self.send(Signal::Terminate, handle) {
                // A unit that already exited can't be signalled, but
                // must still be reaped.
                if source.raw_os_error() != Some(libc::ESRCH) {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SuperviseError::Deliver {
                        signal: Signal::Terminate,
                        handle,
                        source,
                    });
                }
            }
            child.wait()
                .map_err(|source| SuperviseError::Deliver {
                    signal: Signal::Terminate,
                    handle,
                    source,
                })?;

            Ok(())
        }
    }

    impl Drop for ProcessSupervisor {
        fn drop(&mut self) {
            for (pid, mut child) in self.children.drain(..) {
                warn!("killing leftover job process {}", pid);
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcb::Priority;
    use crate::rsrc::ResourceVec;

    fn job() -> Pcb {
        Pcb::new(0, 0, Priority::High, 3, 16, ResourceVec::default())
    }

    #[test]
    fn simulated_lifecycle() {
        let mut sup = SimulatedSupervisor::new();
        let h = sup.start(&job()).unwrap();
        sup.suspend(h).unwrap();
        sup.resume(h).unwrap();
        sup.terminate(h).unwrap();
        assert_eq!(
            sup.signals(),
            &[
                (Signal::Start, h),
                (Signal::Suspend, h),
                (Signal::Resume, h),
                (Signal::Terminate, h),
            ]
        );
        assert_eq!(sup.live().count(), 0);
    }

    #[test]
    fn simulated_refuses_out_of_order_signals() {
        let mut sup = SimulatedSupervisor::new();
        let h = sup.start(&job()).unwrap();
        assert!(matches!(sup.resume(h), Err(SuperviseError::BadState { .. })));
        sup.suspend(h).unwrap();
        assert!(matches!(sup.suspend(h), Err(SuperviseError::BadState { .. })));
        sup.terminate(h).unwrap();
        assert!(matches!(sup.terminate(h), Err(SuperviseError::Unknown(_))));
    }

    #[test]
    fn handles_are_unique() {
        let mut sup = SimulatedSupervisor::new();
        let a = sup.start(&job()).unwrap();
        let b = sup.start(&job()).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, ExecHandle(0));
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_fails_to_spawn() {
        let mut sup = ProcessSupervisor::new(PathBuf::from("/nonexistent/job-program"));
        assert!(matches!(sup.start(&job()), Err(SuperviseError::Spawn { .. })));
    }
}
