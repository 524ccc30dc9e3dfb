use hostd::*;
use hostd::io::init_answer_file;
use std::process::ExitCode;

/// Memory options, spelled the way `-mf`, `-mnr` etc. expect them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MemFlag {
    /// First fit (default)
    F,
    /// Next fit
    N,
    /// Best fit
    B,
    /// Worst fit
    W,
    /// Don't pre-allocate real-time memory
    Nr,
}

/// A four-level host process dispatcher.
#[derive(Parser, Debug)]
#[command(version)]
struct Arg {
    /// List of jobs: arrival, priority, cpu time, memory, printers,
    /// scanners, modems, drives
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    dispatch_file:  PathBuf,

    /// Memory allocation options; may be repeated
    #[arg(short, value_enum)]
    memory:         Vec<MemFlag>,

    /// Don't spawn anything, just play the schedule out
    #[arg(long)]
    simulate:       bool,

    /// Program run for every job
    #[arg(long, default_value = "./process", value_parser = clap::value_parser!(PathBuf))]
    process:        PathBuf,

    /// Length of one tick in milliseconds. Defaults to 1000, or 0 when
    /// simulating
    #[arg(long)]
    quantum_ms:     Option<u64>,

    /// More logging on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose:        u8,
}

impl Arg {
    fn config(&self) -> Config {
        let mut config = Config::default();
        for flag in &self.memory {
            match flag {
                MemFlag::F  => { config.fit = Fit::First; },
                MemFlag::N  => { config.fit = Fit::Next; },
                MemFlag::B  => { config.fit = Fit::Best; },
                MemFlag::W  => { config.fit = Fit::Worst; },
                MemFlag::Nr => { config.preallocate_rt = false; },
            }
        }
        let default_ms = if self.simulate { 0 } else { 1000 };
        config.quantum = Duration::from_millis(self.quantum_ms.unwrap_or(default_ms));

        config
    }

    fn supervisor(&self) -> Box<dyn Supervisor> {
        if self.simulate {
            return Box::new(SimulatedSupervisor::new());
        }
        #[cfg(unix)]
        {
            Box::new(ProcessSupervisor::new(self.process.clone()))
        }
        #[cfg(not(unix))]
        {
            warn!("job processes need a unix host, simulating instead");
            Box::new(SimulatedSupervisor::new())
        }
    }
}

fn run(cli: &Arg) -> anyhow::Result<Vec<Completion>> {
    let config = cli.config();
    let mut jobs = DispatchListParser::new(cli.dispatch_file.clone()).read_jobs()?;
    info!("{} jobs read from {}", jobs.len(), cli.dispatch_file.display());
    let ans = init_answer_file(&cli.dispatch_file)?;
    for j in jobs.iter_mut() {
        j.ans_file = Some(ans.clone());
    }

    let mut dispatcher = Dispatcher::new(config, cli.supervisor(), jobs)?;
    dispatcher.run();

    Ok(dispatcher.completed().to_vec())
}

fn print_table(done: &[Completion]) -> std::io::Result<()> {
    let mut out = BufWriter::new(std::io::stdout().lock());
    writeln!(out, "{:>4} {:>5} {:>7} {:>6} {:>7} {:>10} {:>7}", "job", "prior", "arrive", "start", "finish", "turnaround", "waiting")?;
    for c in done.iter().sorted_by_key(|c| c.job) {
        writeln!(
            out,
            "{:>4} {:>5} {:>7} {:>6} {:>7} {:>10} {:>7}",
            c.job,
            c.priority,
            c.arrival,
            c.first_run,
            c.finished,
            c.turnaround(),
            c.waiting()
        )?;
    }

    out.flush()
}

fn main() -> ExitCode {
    let cli = match Arg::try_parse() {
        Ok(c)   => { c },
        Err(e)  => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(127) } else { ExitCode::SUCCESS };
        }
    };
    if let Err(e) = logger::init(cli.verbose) {
        eprintln!("{}", e);
    }

    match run(&cli) {
        Ok(done)    => {
            if let Err(e) = print_table(&done) {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        },
        Err(e)      => {
            error!("{:#}", e);
            match e.downcast_ref::<LoadError>() {
                Some(LoadError::Open { .. })    => { ExitCode::from(2) },
                _                               => { ExitCode::FAILURE },
            }
        }
    }
}
