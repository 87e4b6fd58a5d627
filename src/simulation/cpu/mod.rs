use crate::config::MemoryLayout;
use crate::error::{Result, SimulatorError};
use crate::firmware::FirmwareImage;
use crate::simulation::{HarnessHooks, MachineSnapshot, Target};

mod callback;

use callback::{hook_code_callback, mmio_host_write_callback};
use unicorn_engine::unicorn_const::uc_error;
use unicorn_engine::unicorn_const::{Arch, Mode, Permission};
use unicorn_engine::{RegisterARM, Unicorn};

use log::debug;

// Host I/O page. Word registers written by the firmware.
pub const HOST_IO_BASE: u64 = 0x4000_0000;
pub const HOST_IO_SIZE: usize = 0x1000;
/// Synchronization marker id
pub const HOST_IO_MARKER: u64 = 0x00;
/// Buffer address of the next transfer
pub const HOST_IO_ARG0: u64 = 0x04;
/// Buffer length of the next transfer, or exit status
pub const HOST_IO_ARG1: u64 = 0x08;
/// Starts a transfer or exits, see [`HostCommand`]
pub const HOST_IO_COMMAND: u64 = 0x0C;

/// Commands accepted by the `HOST_IO_COMMAND` register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Read = 1,
    Write = 2,
    Exit = 3,
}

impl HostCommand {
    fn from_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(HostCommand::Read),
            2 => Some(HostCommand::Write),
            3 => Some(HostCommand::Exit),
            _ => None,
        }
    }
}

/// Registers captured per snapshot, in snapshot order
pub const TRACE_REGISTERS: [RegisterARM; 16] = [
    RegisterARM::R0,
    RegisterARM::R1,
    RegisterARM::R2,
    RegisterARM::R3,
    RegisterARM::R4,
    RegisterARM::R5,
    RegisterARM::R6,
    RegisterARM::R7,
    RegisterARM::R8,
    RegisterARM::R9,
    RegisterARM::R10,
    RegisterARM::R11,
    RegisterARM::R12,
    RegisterARM::SP,
    RegisterARM::LR,
    RegisterARM::PC,
];

const RESET_REGISTERS: [RegisterARM; 17] = [
    RegisterARM::R0,
    RegisterARM::R1,
    RegisterARM::R2,
    RegisterARM::R3,
    RegisterARM::R4,
    RegisterARM::R5,
    RegisterARM::R6,
    RegisterARM::R7,
    RegisterARM::R8,
    RegisterARM::R9,
    RegisterARM::R10,
    RegisterARM::R11,
    RegisterARM::R12,
    RegisterARM::SP,
    RegisterARM::LR,
    RegisterARM::PC,
    RegisterARM::CPSR,
];

/// Cortex-M emulation driving a set of harness hooks.
pub struct Cpu<'a, H: HarnessHooks + 'a> {
    emu: Unicorn<'a, CpuState<H>>,
    firmware: FirmwareImage,
    layout: MemoryLayout,
    max_instructions: Option<usize>,
    ram_zero: Vec<u8>,
    entry: u64,
}

struct CpuState<H> {
    hooks: H,
    // Scratch snapshot, reused for every step
    snapshot: MachineSnapshot,
    ram_base: u64,
    io_address: u64,
    io_length: u64,
    exited: bool,
    fault: Option<(uc_error, &'static str)>,
}

impl<'a, H: HarnessHooks + 'a> Cpu<'a, H> {
    /// Creates the emulator, maps memory and registers the hooks.
    ///
    /// `hooks` must expect snapshots of `layout.ram_size` bytes.
    pub fn new(
        firmware: FirmwareImage,
        layout: MemoryLayout,
        hooks: H,
        max_instructions: Option<usize>,
    ) -> Result<Self> {
        // Setup platform -> ARMv7-m
        let emu = Unicorn::new_with_data(
            Arch::ARM,
            Mode::LITTLE_ENDIAN | Mode::MCLASS,
            CpuState {
                hooks,
                snapshot: MachineSnapshot::new(layout.ram_size),
                ram_base: layout.ram_base,
                io_address: 0,
                io_length: 0,
                exited: false,
                fault: None,
            },
        )?;

        debug!("Setup new unicorn instance");

        let mut cpu = Self {
            emu,
            firmware,
            layout,
            max_instructions,
            ram_zero: vec![0; layout.ram_size],
            entry: 0,
        };
        cpu.setup_mmio()?;
        cpu.setup_hooks()?;
        Ok(cpu)
    }

    /// Setup memory mapping for ROM, RAM and the host I/O page
    fn setup_mmio(&mut self) -> Result<()> {
        self.emu
            .mem_map(self.layout.rom_base, self.layout.rom_size, Permission::ALL)?;
        self.emu
            .mem_map(self.layout.ram_base, self.layout.ram_size, Permission::ALL)?;
        self.emu
            .mmio_map_wo(HOST_IO_BASE, HOST_IO_SIZE, mmio_host_write_callback::<H>)?;
        Ok(())
    }

    /// Code hook on every address, also covers code running from RAM
    fn setup_hooks(&mut self) -> Result<()> {
        self.emu.add_code_hook(1, 0, hook_code_callback::<H>)?;
        Ok(())
    }

    /// Build the error for a failed run, including the current PC
    fn report_unicorn_error(&self, error: uc_error, context: &'static str) -> SimulatorError {
        let pc = self.emu.pc_read().unwrap_or_default();
        SimulatorError::Emulation { context, error, pc }
    }
}

impl<'a, H: HarnessHooks + 'a> Target<H> for Cpu<'a, H> {
    /// Zero RAM, reload the firmware and restart from the vector table
    fn reset(&mut self) -> Result<()> {
        self.emu.mem_write(self.layout.ram_base, &self.ram_zero)?;
        for segment in &self.firmware.segments {
            self.emu.mem_write(segment.address, &segment.data)?;
        }

        RESET_REGISTERS
            .iter()
            .try_for_each(|reg| self.emu.reg_write(*reg, 0x00))?;

        let (stack_pointer, reset_vector) = self.firmware.initial_state(self.layout.rom_base)?;
        self.emu.reg_write(RegisterARM::SP, stack_pointer as u64)?;
        self.entry = reset_vector as u64;

        let state = self.emu.get_data_mut();
        state.io_address = 0;
        state.io_length = 0;
        state.exited = false;
        state.fault = None;
        debug!(
            "Reset: SP 0x{:08X} PC 0x{:08X}",
            stack_pointer, reset_vector
        );
        Ok(())
    }

    /// Execute from the reset vector until the firmware exits.
    ///
    /// Without an instruction limit a firmware that never exits blocks forever.
    fn run_to_completion(&mut self) -> Result<()> {
        let count = self.max_instructions.unwrap_or(0);
        let ret_val = self.emu.emu_start(self.entry | 1, 0, 0, count);

        if let Some((error, context)) = self.emu.get_data_mut().fault.take() {
            return Err(self.report_unicorn_error(error, context));
        }
        if let Err(error) = ret_val {
            return Err(self.report_unicorn_error(error, "execution"));
        }
        if !self.emu.get_data().exited {
            return Err(match self.max_instructions {
                Some(limit) => SimulatorError::NoExit { limit },
                None => SimulatorError::StoppedWithoutExit,
            });
        }
        Ok(())
    }

    fn hooks(&self) -> &H {
        &self.emu.get_data().hooks
    }

    fn hooks_mut(&mut self) -> &mut H {
        &mut self.emu.get_data_mut().hooks
    }
}
