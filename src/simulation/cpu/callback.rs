use super::{
    CpuState, HarnessHooks, HostCommand, MachineSnapshot, Unicorn, HOST_IO_ARG0, HOST_IO_ARG1,
    HOST_IO_COMMAND, HOST_IO_MARKER, HOST_IO_SIZE, TRACE_REGISTERS,
};
use log::{debug, warn};
use unicorn_engine::unicorn_const::uc_error;

/// Read registers and working memory into `snapshot`
fn capture_snapshot<H>(
    emu: &Unicorn<CpuState<H>>,
    snapshot: &mut MachineSnapshot,
) -> Result<(), uc_error> {
    for (value, register) in snapshot.registers.iter_mut().zip(TRACE_REGISTERS) {
        *value = emu.reg_read(register)? as u32;
    }
    emu.mem_read(emu.get_data().ram_base, &mut snapshot.memory)
}

/// Remember the fault for the caller of `emu_start` and stop
fn stop_with_fault<H>(emu: &mut Unicorn<CpuState<H>>, error: uc_error, context: &'static str) {
    emu.get_data_mut().fault = Some((error, context));
    if let Err(e) = emu.emu_stop() {
        warn!("Failed to stop emulation: {e:?}");
    }
}

/// Capture the machine state and hand it to `deliver`
fn with_snapshot<H: HarnessHooks>(
    emu: &mut Unicorn<CpuState<H>>,
    context: &'static str,
    deliver: impl FnOnce(&mut H, &MachineSnapshot),
) {
    let mut snapshot = std::mem::take(&mut emu.get_data_mut().snapshot);
    match capture_snapshot(emu, &mut snapshot) {
        Ok(()) => deliver(&mut emu.get_data_mut().hooks, &snapshot),
        Err(error) => stop_with_fault(emu, error, context),
    }
    emu.get_data_mut().snapshot = snapshot;
}

/// Code hook, runs before every instruction.
///
/// The state seen here is the result of the previous instruction, so every
/// call while measuring yields the sample of the step that just finished.
pub fn hook_code_callback<H: HarnessHooks>(
    emu: &mut Unicorn<CpuState<H>>,
    _address: u64,
    _size: u32,
) {
    if !emu.get_data().hooks.is_measuring() {
        return;
    }
    with_snapshot(emu, "step snapshot", |hooks, snapshot| hooks.on_step(snapshot));
}

/// Callback for host I/O page write access
///
/// Markers, transfers and exit requested by the firmware
pub fn mmio_host_write_callback<H: HarnessHooks>(
    emu: &mut Unicorn<CpuState<H>>,
    offset: u64,
    _size: usize,
    value: u64,
) {
    match offset & (HOST_IO_SIZE as u64 - 1) {
        HOST_IO_MARKER => {
            debug!("Indicator: marker {value}");
            with_snapshot(emu, "marker snapshot", |hooks, snapshot| {
                hooks.on_marker(value as u32, snapshot)
            });
        }
        HOST_IO_ARG0 => emu.get_data_mut().io_address = value,
        HOST_IO_ARG1 => emu.get_data_mut().io_length = value,
        HOST_IO_COMMAND => match HostCommand::from_value(value) {
            Some(command) => host_command(emu, command),
            None => warn!("Unknown host command {value}"),
        },
        other => debug!("Write to unused host register 0x{other:02X}"),
    }
}

fn host_command<H: HarnessHooks>(emu: &mut Unicorn<CpuState<H>>, command: HostCommand) {
    let state = emu.get_data();
    let address = state.io_address;
    // A transfer never exceeds the working memory size
    let length = (state.io_length as usize).min(state.snapshot.memory.len());
    let status = state.io_length as u32;

    match command {
        HostCommand::Read => {
            let mut buffer = vec![0u8; length];
            emu.get_data_mut().hooks.on_read(&mut buffer);
            if let Err(error) = emu.mem_write(address, &buffer) {
                stop_with_fault(emu, error, "host read");
            }
        }
        HostCommand::Write => {
            let mut buffer = vec![0u8; length];
            match emu.mem_read(address, &mut buffer) {
                Ok(()) => emu.get_data_mut().hooks.on_write(&buffer),
                Err(error) => stop_with_fault(emu, error, "host write"),
            }
        }
        HostCommand::Exit => {
            let state = emu.get_data_mut();
            state.hooks.on_exit(status);
            state.exited = true;
            if let Err(e) = emu.emu_stop() {
                warn!("Failed to stop emulation: {e:?}");
            }
        }
    }
}
