//! # Combined Tracefile
//!
//! Merges the per-run trace files of an output directory into one JSON
//! document, the input format of the attack tooling:
//!
//! ```json
//! { "meta":   { "created": "...", "algorithm": "AES-128", "mode": "encrypt", "key": "<b64>" },
//!   "traces": [ { "plaintext": "<b64>", "ciphertext": "<b64>", "data": "<b64>" } ] }
//! ```
//!
//! All byte strings are base64 encoded, `key` is optional. Samples stay one
//! unsigned byte each.

use crate::error::{Result, SimulatorError};
use crate::persistence::parse_trace_filename;
use crate::simulation::Block;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Cipher and direction of the traced firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CipherMode {
    #[default]
    #[value(name = "aes128enc")]
    Aes128Encrypt,
}

impl CipherMode {
    pub fn algorithm(self) -> &'static str {
        match self {
            CipherMode::Aes128Encrypt => "AES-128",
        }
    }

    pub fn direction(self) -> &'static str {
        match self {
            CipherMode::Aes128Encrypt => "encrypt",
        }
    }
}

/// Serde helpers for base64 encoded byte strings
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: AsRef<[u8]>, S: Serializer>(
        bytes: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, T: TryFrom<Vec<u8>>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(text).map_err(de::Error::custom)?;
        let length = bytes.len();
        T::try_from(bytes)
            .map_err(|_| de::Error::custom(format!("unexpected length of {length} bytes")))
    }
}

mod base64_key {
    use crate::simulation::Block;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<Block>, serializer: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => super::base64_bytes::serialize(key, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Block>, D::Error> {
        #[derive(Deserialize)]
        struct Key(#[serde(with = "super::base64_bytes")] Block);

        Ok(Option::<Key>::deserialize(deserializer)?.map(|Key(key)| key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMeta {
    /// UTC creation time, `%Y-%m-%dT%H:%M:%SZ`
    pub created: String,
    pub algorithm: String,
    pub mode: String,
    /// Known correct key, lets the attack tooling validate its result
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_key"
    )]
    pub key: Option<Block>,
}

/// One labeled trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    #[serde(with = "base64_bytes")]
    pub plaintext: Block,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Block,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracefile {
    pub meta: TraceMeta,
    pub traces: Vec<TraceEntry>,
}

impl Tracefile {
    /// Empty tracefile created now
    pub fn new(mode: CipherMode, key: Option<Block>) -> Self {
        Self {
            meta: TraceMeta {
                created: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                algorithm: mode.algorithm().to_string(),
                mode: mode.direction().to_string(),
                key,
            },
            traces: Vec::new(),
        }
    }

    /// Collect every trace file of `directory`.
    ///
    /// # Arguments
    ///
    /// * `directory` - Output directory of a simulator run.
    /// * `mode` - Cipher mode recorded in the metadata.
    /// * `key` - Known correct key, embedded if given.
    ///
    /// # Returns
    ///
    /// * `Ok(Tracefile)` - Traces ordered by file name. Files not named like a
    ///   trace are skipped.
    /// * `Err(SimulatorError::Io)` - Directory or a trace file is unreadable.
    pub fn combine(directory: &Path, mode: CipherMode, key: Option<Block>) -> Result<Self> {
        let io_error = |source: std::io::Error| SimulatorError::Io {
            path: directory.to_path_buf(),
            source,
        };
        let mut found: Vec<(PathBuf, (Block, Block))> = Vec::new();
        for entry in fs::read_dir(directory).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let name = entry.file_name();
            match name.to_str().and_then(parse_trace_filename) {
                Some(labels) => found.push((entry.path(), labels)),
                None => debug!("Skipping {}", name.to_string_lossy()),
            }
        }
        found.sort();

        let mut tracefile = Self::new(mode, key);
        for (path, (plaintext, ciphertext)) in found {
            let data = fs::read(&path).map_err(|source| SimulatorError::Io {
                path: path.clone(),
                source,
            })?;
            tracefile.traces.push(TraceEntry {
                plaintext,
                ciphertext,
                data,
            });
        }
        info!(
            "Combined {} traces from {}",
            tracefile.traces.len(),
            directory.display()
        );
        Ok(tracefile)
    }

    /// Write as JSON to `path`
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| SimulatorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| SimulatorError::Tracefile {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|source| SimulatorError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read a tracefile written by [`Tracefile::write`]
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| SimulatorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| SimulatorError::Tracefile {
            path: path.to_path_buf(),
            source,
        })
    }
}
