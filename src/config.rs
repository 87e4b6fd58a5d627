use crate::error::{KeyError, Result, SimulatorError};
use crate::simulation::io_bridge::{Block, BLOCK_SIZE};
use crate::simulation::trace_buffer::DEFAULT_TRACE_CAPACITY;
use clap::Parser;
use hex::FromHexError;
use serde::{Deserialize, Deserializer};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Firmware loaded when none is given
pub const DEFAULT_FIRMWARE: &str = "aes128_rom.bin";
/// Number of traces generated when no count is given
pub const DEFAULT_TRACE_COUNT: usize = 1000;

/// Emulator page granularity, all region sizes must be a multiple of it
const PAGE_SIZE: usize = 0x1000;

/// Parse a hex string into a block.
///
/// An optional `0x` prefix is accepted. Keys shorter than one block are
/// padded with zero bytes at the end.
pub fn parse_hex_key(input: &str) -> Result<Block> {
    let error = |reason| SimulatorError::InvalidKey {
        input: input.to_string(),
        reason,
    };
    let digits = input.strip_prefix("0x").unwrap_or(input).as_bytes();
    if digits.len() % 2 != 0 {
        return Err(error(KeyError::OddLength));
    }
    if digits.len() / 2 > BLOCK_SIZE {
        return Err(error(KeyError::TooLong { max: BLOCK_SIZE }));
    }

    let mut key = [0u8; BLOCK_SIZE];
    hex::decode_to_slice(digits, &mut key[..digits.len() / 2]).map_err(|e| {
        error(match e {
            // Offset of the byte holding the bad digit
            FromHexError::InvalidHexCharacter { index, .. } => KeyError::InvalidDigit {
                offset: index & !1,
            },
            FromHexError::OddLength => KeyError::OddLength,
            FromHexError::InvalidStringLength => KeyError::TooLong { max: BLOCK_SIZE },
        })
    })?;
    Ok(key)
}

/// Parse hex or decimal numbers from the configuration file
fn parse_number(s: &str) -> std::result::Result<u64, String> {
    match s.strip_prefix("0x") {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("'{}' is not a valid number: {}", s, e))
}

/// Custom deserializer for addresses and sizes given as strings or numbers
fn deserialize_number<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Text(String),
        Value(u64),
    }

    match Option::<Number>::deserialize(deserializer)? {
        Some(Number::Text(text)) => parse_number(&text).map(Some).map_err(de::Error::custom),
        Some(Number::Value(value)) => Ok(Some(value)),
        None => Ok(None),
    }
}

/// Address map of the emulated machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// ROM start, also holds the vector table
    pub rom_base: u64,
    pub rom_size: usize,
    /// Working memory, snapshotted for the power model
    pub ram_base: u64,
    pub ram_size: usize,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            rom_base: 0x0800_0000,
            rom_size: 1024 * 1024,
            ram_base: 0x2000_0000,
            ram_size: 128 * 1024,
        }
    }
}

impl MemoryLayout {
    /// ROM address range, `None` if it wraps the address space
    pub fn rom(&self) -> Option<Range<u64>> {
        let end = self.rom_base.checked_add(self.rom_size as u64)?;
        Some(self.rom_base..end)
    }

    /// RAM address range, `None` if it wraps the address space
    pub fn ram(&self) -> Option<Range<u64>> {
        let end = self.ram_base.checked_add(self.ram_size as u64)?;
        Some(self.ram_base..end)
    }

    fn validate(&self) -> Result<()> {
        for (name, size) in [("rom_size", self.rom_size), ("ram_size", self.ram_size)] {
            if size == 0 || size % PAGE_SIZE != 0 {
                return Err(SimulatorError::Config(format!(
                    "{name} must be a non-zero multiple of 0x{PAGE_SIZE:X}"
                )));
            }
        }
        for (name, base) in [("rom_base", self.rom_base), ("ram_base", self.ram_base)] {
            if base % PAGE_SIZE as u64 != 0 {
                return Err(SimulatorError::Config(format!(
                    "{name} must be aligned to 0x{PAGE_SIZE:X}"
                )));
            }
        }
        let (Some(rom), Some(ram)) = (self.rom(), self.ram()) else {
            return Err(SimulatorError::Config(
                "Memory region exceeds the address space".into(),
            ));
        };
        if rom.start < ram.end && ram.start < rom.end {
            return Err(SimulatorError::Config("ROM and RAM overlap".into()));
        }
        Ok(())
    }
}

/// Command-line arguments of the trace simulator.
///
/// Options left out fall back to the configuration file and then to the
/// built-in defaults.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Emulates embedded code and simulates power traces.", long_about = None)]
pub struct Args {
    /// Output directory to write tracefiles into
    #[arg(value_name = "path")]
    pub output_directory: PathBuf,

    /// Load configuration from JSON5 file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// The firmware file to emulate. Defaults to aes128_rom.bin
    #[arg(short, long, value_name = "filename")]
    pub firmware: Option<PathBuf>,

    /// Amount of traces to generate. Defaults to 1000
    #[arg(short = 'n', long = "tracecnt", value_name = "count")]
    pub trace_count: Option<usize>,

    /// Key to feed the implementation, in hex. By default the key is entirely zeros
    #[arg(short, long)]
    pub key: Option<String>,

    /// Seed for reproducible plaintexts instead of OS randomness
    #[arg(long)]
    pub seed: Option<u64>,

    /// Abort if a run executes more instructions without exiting
    #[arg(short, long)]
    pub max_instructions: Option<usize>,
}

/// Options read from a JSON5 configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub firmware: Option<PathBuf>,
    #[serde(default)]
    pub trace_count: Option<usize>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_instructions: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub rom_base: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub rom_size: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub ram_base: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub ram_size: Option<u64>,
    #[serde(default)]
    pub trace_capacity: Option<usize>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Load configuration from JSON5 file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SimulatorError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json5(&content)
    }

    pub fn from_json5(content: &str) -> Result<Self> {
        json5::from_str(content)
            .map_err(|e| SimulatorError::Config(format!("Failed to parse JSON5 config: {}", e)))
    }

    /// Override file values with command line arguments
    pub fn override_with_args(&mut self, args: &Args) {
        if args.firmware.is_some() {
            self.firmware = args.firmware.clone();
        }
        if args.trace_count.is_some() {
            self.trace_count = args.trace_count;
        }
        if args.key.is_some() {
            self.key = args.key.clone();
        }
        if args.seed.is_some() {
            self.seed = args.seed;
        }
        if args.max_instructions.is_some() {
            self.max_instructions = args.max_instructions;
        }
    }
}

/// Resolved, immutable simulator configuration.
///
/// Built once before the first run and passed by reference afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub firmware: PathBuf,
    pub trace_count: usize,
    pub output_directory: PathBuf,
    pub key: Block,
    pub seed: Option<u64>,
    pub max_instructions: Option<usize>,
    pub memory: MemoryLayout,
    pub trace_capacity: usize,
    pub log_level: String,
}

impl Config {
    /// Resolve command line arguments and the optional configuration file
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        file.override_with_args(args);
        Self::resolve(file, args.output_directory.clone())
    }

    /// Apply defaults and validate
    pub fn resolve(file: FileConfig, output_directory: PathBuf) -> Result<Self> {
        let defaults = MemoryLayout::default();
        let to_size = |name: &str, value: Option<u64>, default: usize| -> Result<usize> {
            value.map_or(Ok(default), |value| {
                usize::try_from(value)
                    .map_err(|_| SimulatorError::Config(format!("{name} out of range")))
            })
        };
        let memory = MemoryLayout {
            rom_base: file.rom_base.unwrap_or(defaults.rom_base),
            rom_size: to_size("rom_size", file.rom_size, defaults.rom_size)?,
            ram_base: file.ram_base.unwrap_or(defaults.ram_base),
            ram_size: to_size("ram_size", file.ram_size, defaults.ram_size)?,
        };
        memory.validate()?;

        let trace_capacity = file.trace_capacity.unwrap_or(DEFAULT_TRACE_CAPACITY);
        if trace_capacity == 0 {
            return Err(SimulatorError::Config(
                "trace_capacity must not be zero".into(),
            ));
        }
        if file.max_instructions == Some(0) {
            return Err(SimulatorError::Config(
                "max_instructions must not be zero".into(),
            ));
        }

        let key = match &file.key {
            Some(key) => parse_hex_key(key)?,
            None => [0; BLOCK_SIZE],
        };

        Ok(Self {
            firmware: file
                .firmware
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FIRMWARE)),
            trace_count: file.trace_count.unwrap_or(DEFAULT_TRACE_COUNT),
            output_directory,
            key,
            seed: file.seed,
            max_instructions: file.max_instructions,
            memory,
            trace_capacity,
            log_level: file.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}
