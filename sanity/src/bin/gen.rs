use sanity::*;
use rand::{SeedableRng, rngs::StdRng};

/// Writes a random dispatch list that the default dispatcher
/// configuration admits in full.
#[derive(Parser, Debug)]
struct Arg {
    /// Where to write the list
    #[arg(short, long, value_parser = clap::value_parser!(PathBuf))]
    output:     PathBuf,

    /// How many jobs
    #[arg(short = 'n', long, default_value_t = 100)]
    jobs:       usize,

    /// Fixes the list's contents
    #[arg(long)]
    seed:       Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Arg::parse();
    let mut rng = match cli.seed {
        Some(s) => { StdRng::seed_from_u64(s) },
        None    => { StdRng::from_entropy() },
    };
    let fd = File::create(&cli.output)?;
    let mut out = BufWriter::new(fd);
    generate(&mut rng, cli.jobs, &Config::default(), &mut out)?;
    out.flush()?;

    Ok(())
}
