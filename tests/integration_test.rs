use power_trace_simulator::config::FileConfig;
use power_trace_simulator::prelude::*;
use std::path::{Path, PathBuf};

/// Thumb firmware using the host I/O page at 0x4000_0000.
///
/// Reads key and plaintext into RAM, writes `plaintext ^ key` as ciphertext
/// inside the measurement window and reports all three blocks before exit.
const PROGRAM: [u16; 44] = [
    0x4F15, // ldr   r7, =0x40000000   host I/O page
    0x4C16, // ldr   r4, =0x20000000   key
    0x4D16, // ldr   r5, =0x20000010   plaintext
    0x4E17, // ldr   r6, =0x20000020   ciphertext
    0x2110, // movs  r1, #16
    0x2001, // movs  r0, #1            read
    0x607C, // str   r4, [r7, #4]
    0x60B9, // str   r1, [r7, #8]
    0x60F8, // str   r0, [r7, #12]
    0x607D, // str   r5, [r7, #4]
    0x60B9, // str   r1, [r7, #8]
    0x60F8, // str   r0, [r7, #12]
    0x2001, // movs  r0, #1            start marker
    0x6038, // str   r0, [r7]
    0x6820, // ldr   r0, [r4]
    0x682A, // ldr   r2, [r5]
    0x4050, // eors  r0, r2
    0x6030, // str   r0, [r6]
    0x6860, // ldr   r0, [r4, #4]
    0x686A, // ldr   r2, [r5, #4]
    0x4050, // eors  r0, r2
    0x6070, // str   r0, [r6, #4]
    0x68A0, // ldr   r0, [r4, #8]
    0x68AA, // ldr   r2, [r5, #8]
    0x4050, // eors  r0, r2
    0x60B0, // str   r0, [r6, #8]
    0x68E0, // ldr   r0, [r4, #12]
    0x68EA, // ldr   r2, [r5, #12]
    0x4050, // eors  r0, r2
    0x60F0, // str   r0, [r6, #12]
    0x2002, // movs  r0, #2            end marker
    0x6038, // str   r0, [r7]
    0x2002, // movs  r0, #2            write
    0x607C, // str   r4, [r7, #4]
    0x60F8, // str   r0, [r7, #12]
    0x607D, // str   r5, [r7, #4]
    0x60F8, // str   r0, [r7, #12]
    0x607E, // str   r6, [r7, #4]
    0x60F8, // str   r0, [r7, #12]
    0x2000, // movs  r0, #0            exit status
    0x60B8, // str   r0, [r7, #8]
    0x2003, // movs  r0, #3            exit
    0x60F8, // str   r0, [r7, #12]
    0xE7FE, // b     .
];

const LITERALS: [u32; 4] = [0x4000_0000, 0x2000_0000, 0x2000_0010, 0x2000_0020];

/// Instructions from the start marker store up to the end marker store
const WINDOW_SAMPLES: usize = 18;

fn firmware_image(reset_vector: u32) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(&0x2000_8000u32.to_le_bytes());
    image.extend_from_slice(&reset_vector.to_le_bytes());
    PROGRAM
        .iter()
        .for_each(|halfword| image.extend_from_slice(&halfword.to_le_bytes()));
    assert_eq!(image.len(), 0x60);
    LITERALS
        .iter()
        .for_each(|word| image.extend_from_slice(&word.to_le_bytes()));
    image
}

fn scratch_directory(name: &str) -> PathBuf {
    let directory = std::env::temp_dir().join(format!(
        "power_trace_simulator_it_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&directory);
    std::fs::create_dir_all(&directory).unwrap();
    directory
}

fn setup(name: &str, reset_vector: u32, file: FileConfig) -> (PathBuf, Config) {
    let directory = scratch_directory(name);
    let firmware = directory.join("xor_rom.bin");
    std::fs::write(&firmware, firmware_image(reset_vector)).unwrap();
    let config = Config::resolve(
        FileConfig {
            firmware: Some(firmware),
            ..file
        },
        directory.join("traces"),
    )
    .unwrap();
    (directory, config)
}

fn traces(directory: &Path) -> Vec<(String, Vec<u8>)> {
    let mut traces: Vec<_> = std::fs::read_dir(directory)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            (name, std::fs::read(&path).unwrap())
        })
        .collect();
    traces.sort();
    traces
}

#[test]
/// Single run with all-zero key and plaintext
///
/// The ciphertext is all zero as well and the window spans the XOR code.
fn zero_key_single_trace() {
    let (directory, config) = setup(
        "zero",
        0x0800_0009,
        FileConfig {
            trace_count: Some(1),
            ..Default::default()
        },
    );
    let target = emulated_target(&config).unwrap();
    let mut generator = DatasetGenerator::new(&config, target).unwrap();
    let path = generator.run_once(0, [0; BLOCK_SIZE]).unwrap();

    let zero = "0".repeat(32);
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        format!("trace_P_{zero}_C_{zero}.bin")
    );
    assert_eq!(std::fs::read(&path).unwrap().len(), WINDOW_SAMPLES);
    assert!(generator.summary().is_clean());
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Several runs on one emulator instance
///
/// Every file carries `plaintext ^ key` as ciphertext and traces of the same
/// inputs are identical, independent of earlier runs.
fn keyed_dataset() {
    let (directory, config) = setup(
        "keyed",
        0x0800_0009,
        FileConfig {
            trace_count: Some(8),
            key: Some("2b7e151628aed2a6abf7158809cf4f3c".to_string()),
            seed: Some(11),
            ..Default::default()
        },
    );
    let target = emulated_target(&config).unwrap();
    let mut generator = DatasetGenerator::new(&config, target).unwrap();
    let summary = generator.run().unwrap();
    assert_eq!(summary.traces_written, 8);
    assert_eq!(summary.total_samples, 8 * WINDOW_SAMPLES);
    assert_eq!(summary.protocol_violations, 0);

    let written = traces(&config.output_directory);
    assert_eq!(written.len(), 8);
    for (name, samples) in &written {
        let (plaintext, ciphertext) = parse_trace_filename(name).unwrap();
        let expected: Vec<u8> = plaintext.iter().zip(config.key).map(|(p, k)| p ^ k).collect();
        assert_eq!(ciphertext.to_vec(), expected);
        assert_eq!(samples.len(), WINDOW_SAMPLES);
    }

    // Repeat the first run on the already used instance
    let (first_name, first_samples) = &written[0];
    let (plaintext, _) = parse_trace_filename(first_name).unwrap();
    let path = generator.run_once(8, plaintext).unwrap();
    assert_eq!(&std::fs::read(path).unwrap(), first_samples);
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Instruction cap hit before the firmware exits
fn instruction_limit_without_exit() {
    let (directory, config) = setup(
        "limit",
        0x0800_0009,
        FileConfig {
            trace_count: Some(3),
            max_instructions: Some(10),
            ..Default::default()
        },
    );
    let target = emulated_target(&config).unwrap();
    let mut generator = DatasetGenerator::new(&config, target).unwrap();
    assert!(matches!(
        generator.run(),
        Err(SimulatorError::NoExit { limit: 10 })
    ));
    assert!(traces(&config.output_directory).is_empty());
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Reset vector into unmapped memory is a fatal emulation error
fn unmapped_reset_vector() {
    let (directory, config) = setup(
        "unmapped",
        0x0000_0101,
        FileConfig {
            trace_count: Some(1),
            ..Default::default()
        },
    );
    let target = emulated_target(&config).unwrap();
    let mut generator = DatasetGenerator::new(&config, target).unwrap();
    assert!(matches!(
        generator.run(),
        Err(SimulatorError::Emulation { .. })
    ));
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Missing firmware file is reported before any run
fn missing_firmware() {
    let directory = scratch_directory("missing");
    let config = Config::resolve(
        FileConfig {
            firmware: Some(directory.join("does_not_exist.bin")),
            ..Default::default()
        },
        directory.join("traces"),
    )
    .unwrap();
    assert!(matches!(
        emulated_target(&config),
        Err(SimulatorError::Firmware(_))
    ));
    std::fs::remove_dir_all(&directory).unwrap();
}
