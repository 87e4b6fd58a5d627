//! Trace persistence: one headerless binary file per run.
//!
//! The file name carries the labels of the trace:
//! `trace_P_<plaintext hex>_C_<ciphertext hex>.bin`, one sample per byte.

use crate::error::{Result, SimulatorError};
use crate::simulation::{Block, RunRecord, BLOCK_SIZE};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Longest file name most file systems accept
pub const MAX_FILENAME_LEN: usize = 255;
/// Longest path accepted for an output file
pub const MAX_PATH_LEN: usize = 4096;

static TRACE_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^trace_P_(?P<plaintext>[0-9a-f]{32})_C_(?P<ciphertext>[0-9a-f]{32})\.bin$")
        .unwrap_or_else(|e| panic!("invalid trace filename pattern: {e}"))
});

/// File name encoding plaintext and ciphertext of a run
pub fn trace_filename(plaintext: &Block, ciphertext: &Block) -> String {
    format!(
        "trace_P_{}_C_{}.bin",
        hex::encode(plaintext),
        hex::encode(ciphertext)
    )
}

fn decode_block(digits: &str) -> Option<Block> {
    let mut block = [0u8; BLOCK_SIZE];
    hex::decode_to_slice(digits, &mut block).ok()?;
    Some(block)
}

/// Recover plaintext and ciphertext from a trace file name.
///
/// Returns `None` for names not produced by [`trace_filename`].
pub fn parse_trace_filename(name: &str) -> Option<(Block, Block)> {
    let captures = TRACE_FILENAME.captures(name)?;
    Some((
        decode_block(&captures["plaintext"])?,
        decode_block(&captures["ciphertext"])?,
    ))
}

/// Writes finished runs into the output directory
#[derive(Debug)]
pub struct TraceWriter {
    directory: PathBuf,
}

impl TraceWriter {
    /// Create the output directory if needed
    pub fn create(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory).map_err(|source| SimulatorError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        Ok(Self {
            directory: directory.to_path_buf(),
        })
    }

    /// Full output path for a run, checked against the length limits
    pub fn path_for(&self, record: &RunRecord) -> Result<PathBuf> {
        let filename = trace_filename(record.plaintext, record.ciphertext);
        if filename.len() > MAX_FILENAME_LEN {
            return Err(SimulatorError::PathTooLong {
                path: filename,
                max: MAX_FILENAME_LEN,
            });
        }
        let path = self.directory.join(filename);
        if path.as_os_str().len() > MAX_PATH_LEN {
            return Err(SimulatorError::PathTooLong {
                path: path.display().to_string(),
                max: MAX_PATH_LEN,
            });
        }
        Ok(path)
    }

    /// Write the samples of `record`, returns the file path
    pub fn write(&self, record: &RunRecord) -> Result<PathBuf> {
        let path = self.path_for(record)?;
        std::fs::write(&path, record.trace).map_err(|source| SimulatorError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
