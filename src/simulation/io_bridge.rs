//! I/O bridge between the target firmware and the harness.
//!
//! The firmware performs exactly five transfers per run, in this order:
//! read key, read plaintext, write key, write plaintext, write ciphertext.
//! Each transfer advances the sequence position by one, followed by an exit.

use super::record::ProtocolViolation;

/// Size of key, plaintext and ciphertext blocks
pub const BLOCK_SIZE: usize = 16;

pub type Block = [u8; BLOCK_SIZE];

/// Position reached after the last expected transfer
pub const SEQUENCE_LENGTH: u32 = 5;

/// Expected transfer at a given sequence position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    ReadKey = 1,
    ReadPlaintext,
    WriteKey,
    WritePlaintext,
    WriteCiphertext,
}

impl Transfer {
    pub fn at(position: u32) -> Option<Self> {
        match position {
            1 => Some(Transfer::ReadKey),
            2 => Some(Transfer::ReadPlaintext),
            3 => Some(Transfer::WriteKey),
            4 => Some(Transfer::WritePlaintext),
            5 => Some(Transfer::WriteCiphertext),
            _ => None,
        }
    }
}

/// Supplies key and plaintext, captures the ciphertext
#[derive(Debug, Default)]
pub struct IoBridge {
    key: Block,
    plaintext: Block,
    ciphertext: Block,
    position: u32,
    exit_status: Option<u32>,
}

impl IoBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare a new run
    pub fn start_run(&mut self, key: Block, plaintext: Block) {
        self.key = key;
        self.plaintext = plaintext;
        self.ciphertext = [0; BLOCK_SIZE];
        self.position = 0;
        self.exit_status = None;
    }

    /// Fill `buffer` with the block expected at the next position.
    ///
    /// Bytes past the block and the whole buffer on a violation are zeroed.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ProtocolViolation> {
        self.position += 1;
        buffer.fill(0);
        let source = match Transfer::at(self.position) {
            Some(Transfer::ReadKey) => &self.key,
            Some(Transfer::ReadPlaintext) => &self.plaintext,
            _ => {
                return Err(ProtocolViolation::UnexpectedRead {
                    position: self.position,
                })
            }
        };
        let length = buffer.len().min(BLOCK_SIZE);
        buffer[..length].copy_from_slice(&source[..length]);
        Ok(length)
    }

    /// Accept the echoed key and plaintext, capture the ciphertext
    pub fn write(&mut self, data: &[u8]) -> Result<(), ProtocolViolation> {
        self.position += 1;
        match Transfer::at(self.position) {
            Some(Transfer::WriteKey) | Some(Transfer::WritePlaintext) => Ok(()),
            Some(Transfer::WriteCiphertext) => {
                let length = data.len().min(BLOCK_SIZE);
                self.ciphertext[..length].copy_from_slice(&data[..length]);
                if length < BLOCK_SIZE {
                    Err(ProtocolViolation::ShortCiphertext { length })
                } else {
                    Ok(())
                }
            }
            _ => Err(ProtocolViolation::UnexpectedWrite {
                position: self.position,
            }),
        }
    }

    /// Mark the run as finished, regardless of `status`
    pub fn exit(&mut self, status: u32) -> Result<(), ProtocolViolation> {
        self.exit_status = Some(status);
        if self.position < SEQUENCE_LENGTH {
            Err(ProtocolViolation::IncompleteSequence {
                position: self.position,
            })
        } else {
            Ok(())
        }
    }

    pub fn is_finished(&self) -> bool {
        self.exit_status.is_some()
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn key(&self) -> &Block {
        &self.key
    }

    pub fn plaintext(&self) -> &Block {
        &self.plaintext
    }

    pub fn ciphertext(&self) -> &Block {
        &self.ciphertext
    }
}
