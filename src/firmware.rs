//! # Firmware Image Loading
//!
//! The target firmware is either a raw ROM image, placed at the ROM base
//! address, or an ELF file whose loadable segments are placed at their
//! physical addresses. Both end up as a list of segments the CPU writes into
//! emulator memory on every reset.

use crate::config::MemoryLayout;
use crate::error::{Result, SimulatorError};
use elf::{abi::PT_LOAD, endian::AnyEndian, ElfBytes};
use log::debug;
use std::path::Path;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Contiguous block of firmware bytes and its load address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub address: u64,
    pub data: Vec<u8>,
}

impl Segment {
    /// First address past the segment, `None` if it wraps the address space
    fn end(&self) -> Option<u64> {
        self.address.checked_add(self.data.len() as u64)
    }
}

/// Loaded firmware, ready to be written into the emulator.
#[derive(Clone, Debug)]
pub struct FirmwareImage {
    pub segments: Vec<Segment>,
}

impl FirmwareImage {
    /// Read and validate the firmware at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - ELF file or raw ROM image.
    /// * `layout` - Memory map the segments must fit into.
    ///
    /// # Returns
    ///
    /// * `Ok(FirmwareImage)` - All segments lie in ROM or RAM and the vector table is present.
    /// * `Err(SimulatorError::Firmware)` - The file is unreadable, empty or does not fit.
    pub fn load(path: &Path, layout: &MemoryLayout) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            SimulatorError::Firmware(format!("Could not read {}: {e}", path.display()))
        })?;
        Self::from_bytes(data, layout)
    }

    /// Build an image from file contents, see [`FirmwareImage::load`]
    pub fn from_bytes(data: Vec<u8>, layout: &MemoryLayout) -> Result<Self> {
        let segments = if data.starts_with(&ELF_MAGIC) {
            Self::elf_segments(&data)?
        } else {
            vec![Segment {
                address: layout.rom_base,
                data,
            }]
        };

        let image = Self { segments };
        image.validate(layout)?;
        Ok(image)
    }

    /// Collect all `PT_LOAD` segments with file contents
    fn elf_segments(data: &[u8]) -> Result<Vec<Segment>> {
        let elf_data = ElfBytes::<AnyEndian>::minimal_parse(data)
            .map_err(|e| SimulatorError::Firmware(format!("Open file data failed: {e}")))?;
        let segments = elf_data
            .segments()
            .ok_or_else(|| SimulatorError::Firmware("ELF file has no program headers".into()))?;

        segments
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD && ph.p_filesz > 0)
            .map(|ph| {
                let data = elf_data
                    .segment_data(&ph)
                    .map_err(|e| SimulatorError::Firmware(format!("Bad segment data: {e}")))?;
                debug!(
                    "Load segment 0x{:08X} ({} bytes)",
                    ph.p_paddr,
                    data.len()
                );
                Ok(Segment {
                    address: ph.p_paddr,
                    data: data.to_vec(),
                })
            })
            .collect()
    }

    fn validate(&self, layout: &MemoryLayout) -> Result<()> {
        if self.segments.iter().all(|segment| segment.data.is_empty()) {
            return Err(SimulatorError::Firmware("Firmware image is empty".into()));
        }
        let regions = [layout.rom(), layout.ram()];
        for segment in &self.segments {
            let fits = segment.end().is_some_and(|end| {
                regions
                    .iter()
                    .flatten()
                    .any(|region| segment.address >= region.start && end <= region.end)
            });
            if !fits {
                return Err(SimulatorError::Firmware(format!(
                    "Segment 0x{:08X} ({} bytes) outside of ROM and RAM",
                    segment.address,
                    segment.data.len()
                )));
            }
        }
        self.initial_state(layout.rom_base).map(|_| ())
    }

    /// Read a little endian word from the image
    pub fn read_word(&self, address: u64) -> Option<u32> {
        self.segments
            .iter()
            .find(|segment| {
                let word_end = address.checked_add(4);
                address >= segment.address
                    && word_end
                        .zip(segment.end())
                        .is_some_and(|(word_end, end)| word_end <= end)
            })
            .map(|segment| {
                let offset = (address - segment.address) as usize;
                let mut word = [0u8; 4];
                word.copy_from_slice(&segment.data[offset..offset + 4]);
                u32::from_le_bytes(word)
            })
    }

    /// Initial stack pointer and reset vector from the vector table at `base`
    pub fn initial_state(&self, base: u64) -> Result<(u32, u32)> {
        let reset_vector = base.checked_add(4).and_then(|address| self.read_word(address));
        match (self.read_word(base), reset_vector) {
            (Some(stack_pointer), Some(reset_vector)) => Ok((stack_pointer, reset_vector)),
            _ => Err(SimulatorError::Firmware(format!(
                "No vector table at 0x{base:08X}"
            ))),
        }
    }
}
