use sanity::*;
use rayon::prelude::*;

/// Plays dispatch lists out on a simulated supervisor, auditing the
/// dispatcher's books after every tick, and summarizes each run.
#[derive(Parser, Debug)]
struct Arg {
    /// Dispatch lists to audit
    #[arg(short, long, num_args = 1.., required = true, value_parser = clap::value_parser!(PathBuf))]
    input:      Vec<PathBuf>,

    /// Memory allocation strategy
    #[arg(short, long, value_enum, default_value_t = Fit::First)]
    fit:        Fit,

    /// Allocate the real-time block upon the first real-time arrival
    #[arg(long)]
    lazy_rt:    bool,

    /// Print one JSON array instead of a table
    #[arg(long)]
    json:       bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose:    u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Arg::parse();
    logger::init(cli.verbose)?;
    let config = Config {
        fit:            cli.fit,
        preallocate_rt: !cli.lazy_rt,
        ..Config::simulated()
    };

    // One dispatcher per file; they share nothing.
    let results: Vec<(&PathBuf, Result<FileReport, AuditFailure>)> = cli.input
        .par_iter()
        .map(|p| (p, audit_file(p, &config)))
        .collect();

    let mut reports = vec![];
    let mut failures = 0;
    for (p, res) in results {
        match res {
            Ok(rep) => { reports.push(rep); },
            Err(e)  => {
                eprintln!("{}: {}", p.display(), e);
                failures += 1;
            }
        }
    }

    let mut out = BufWriter::new(std::io::stdout().lock());
    if cli.json {
        serde_json::to_writer_pretty(&mut out, &reports)?;
        writeln!(out)?;
    } else {
        writeln!(
            out,
            "{:<32} {:>6} {:>5} {:>5} {:>5} {:>5} {:>7} {:>10} {:>8} {:>6}",
            "file", "ticks", "jobs", "done", "rej", "fail", "susp", "turnaround", "waiting", "peak"
        )?;
        for r in &reports {
            writeln!(
                out,
                "{:<32} {:>6} {:>5} {:>5} {:>5} {:>5} {:>7} {:>10.2} {:>8.2} {:>6}",
                r.file,
                r.run.ticks,
                r.run.jobs,
                r.run.completed,
                r.run.rejected,
                r.run.failed,
                r.run.suspensions,
                r.run.mean_turnaround,
                r.run.mean_waiting,
                r.run.peak_memory
            )?;
        }
    }
    out.flush()?;

    if failures > 0 {
        anyhow::bail!("{} of {} files failed the audit", failures, cli.input.len());
    }

    Ok(())
}
