//! Dump-log command implementation.

use super::{open_log, CliError, RecordInfo};
use std::path::Path;
use tessera_core::Lsn;

/// Prints log records starting at `from` (the master record by default).
pub fn run(path: &Path, from: Option<u64>, limit: Option<usize>, format: &str) -> Result<(), CliError> {
    let log = open_log(path)?;
    let start = from.map_or(Lsn::MASTER, Lsn::new);
    let limit = limit.unwrap_or(usize::MAX);

    let mut records = Vec::new();
    for item in log.scan_from(start).take(limit) {
        let (lsn, record) = item?;
        records.push(RecordInfo::new(lsn.as_u64(), &record));
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!("Log: {}", path.display());
        println!("Records: {}", records.len());
        println!();
        for record in &records {
            record.print_line();
        }
    }

    Ok(())
}
