//! Crash-safe file output for session traces.

use std::{fs, io::Write, path::Path};

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
/// Readers see either the old trace or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("partial");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
