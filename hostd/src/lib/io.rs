use crate::utils::*;
use crate::pcb::{Pcb, Priority};
use crate::rsrc::ResourceVec;

/// Every line of a dispatch list carries this many comma-separated integers:
/// arrival, priority, cpu time, memory, printers, scanners, modems, drives.
pub const RECORD_FIELDS: usize = 8;

/// Suffix appended to the dispatch list's name to get the answer file.
pub const ANSWER_SUFFIX: &str = ".ans";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not open dispatch list file {}: {source}", .path.display())]
    Open {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read dispatch list: {0}")]
    Read(#[from] std::io::Error),
    #[error("could not create answer file {}: {source}", .path.display())]
    Answer {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads a dispatch list into PCBs, ordered by arrival time.
///
/// Lines that don't hold exactly [`RECORD_FIELDS`] integers are skipped,
/// as are lines with negative arrival, cpu, memory or resource values.
/// Neither is an error: the job is simply never created.
pub struct DispatchListParser {
    pub path:   PathBuf,
}

impl DispatchListParser {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn read_jobs(&self) -> Result<Vec<Pcb>, LoadError> {
        let fd = File::open(&self.path)
            .map_err(|source| LoadError::Open {
                path: self.path.clone(),
                source,
            })?;

        Ok(parse_jobs(BufReader::new(fd))?)
    }
}

/// Parses a whole dispatch list. Jobs are numbered in file order and
/// then stably sorted by arrival time.
pub fn parse_jobs<R: BufRead>(reader: R) -> Result<Vec<Pcb>, std::io::Error> {
    let mut res = vec![];
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_record(&line) {
            Some(fields)    => {
                match gen_single(&fields, res.len()) {
                    Some(pcb)   => { res.push(pcb); },
                    None        => {
                        warn!("line {}: negative values in \"{}\", skipped", line_no + 1, line.trim());
                    }
                }
            },
            None            => {
                warn!("line {}: malformed record \"{}\", skipped", line_no + 1, line.trim());
            }
        }
    }

    Ok(res.into_iter()
        .sorted_by_key(|j| j.arrival)
        .collect())
}

/// Splits one line into exactly [`RECORD_FIELDS`] integers.
pub fn parse_record(line: &str) -> Option<[i64; RECORD_FIELDS]> {
    let fields: Vec<i64> = line.split(',')
        .map(|f| f.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;

    fields.try_into().ok()
}

/// Builds a PCB out of a parsed record.
fn gen_single(fields: &[i64; RECORD_FIELDS], id: JobId) -> Option<Pcb> {
    let [arrival, priority, cpu, mbytes, printers, scanners, modems, drives] = *fields;
    if arrival < 0 || cpu < 0 || mbytes < 0 {
        return None;
    }
    let count = |c: i64| u32::try_from(c).ok();

    Some(Pcb::new(
        id,
        arrival,
        Priority::from_level(priority),
        cpu,
        MemUnits::try_from(mbytes).ok()?,
        ResourceVec::new(count(printers)?, count(scanners)?, count(modems)?, count(drives)?),
    ))
}

/// `<dispatch list>.ans`, next to the dispatch list.
pub fn answer_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(ANSWER_SUFFIX);
    PathBuf::from(name)
}

/// Creates (or truncates) the answer file of `input`.
pub fn init_answer_file(input: &Path) -> Result<Arc<Path>, LoadError> {
    let path = answer_path(input);
    File::create(&path)
        .map_err(|source| LoadError::Answer {
            path: path.clone(),
            source,
        })?;

    Ok(Arc::from(path.as_path()))
}
