use power_trace_simulator::config::FileConfig;
use power_trace_simulator::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MEMORY: usize = 64;
const KEY: &str = "000102030405060708090a0b0c0d0e0f";

/// Target double playing a fixed firmware script against the harness.
///
/// The script reads key and plaintext, XORs them inside the measurement
/// window one byte per step and reports the result as ciphertext.
struct ScriptedTarget {
    harness: TraceHarness,
    close_window: bool,
    extra_marker: Option<u32>,
    fail_on_run: Option<usize>,
    runs: usize,
    resets: usize,
}

impl ScriptedTarget {
    fn new() -> Self {
        Self {
            harness: TraceHarness::new(MEMORY, 1024),
            close_window: true,
            extra_marker: None,
            fail_on_run: None,
            runs: 0,
            resets: 0,
        }
    }

    fn step(&mut self, state: &MachineSnapshot) {
        if self.harness.is_measuring() {
            self.harness.on_step(state);
        }
    }
}

impl Target<TraceHarness> for ScriptedTarget {
    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }

    fn run_to_completion(&mut self) -> Result<()> {
        self.runs += 1;
        if self.fail_on_run == Some(self.runs) {
            return Err(SimulatorError::StoppedWithoutExit);
        }

        let mut key = [0u8; BLOCK_SIZE];
        let mut plaintext = [0u8; BLOCK_SIZE];
        self.harness.on_read(&mut key);
        self.harness.on_read(&mut plaintext);

        let mut state = MachineSnapshot::new(MEMORY);
        state.memory[..BLOCK_SIZE].copy_from_slice(&plaintext);
        self.harness.on_marker(1, &state);
        if let Some(marker) = self.extra_marker {
            self.harness.on_marker(marker, &state);
        }
        for index in 0..BLOCK_SIZE {
            state.memory[index] ^= key[index];
            self.step(&state);
        }
        if self.close_window {
            self.harness.on_marker(2, &state);
        }

        self.harness.on_write(&key);
        self.harness.on_write(&plaintext);
        self.harness.on_write(&state.memory[..BLOCK_SIZE]);
        self.harness.on_exit(0);
        Ok(())
    }

    fn hooks(&self) -> &TraceHarness {
        &self.harness
    }

    fn hooks_mut(&mut self) -> &mut TraceHarness {
        &mut self.harness
    }
}

fn output_directory(name: &str) -> PathBuf {
    let directory = std::env::temp_dir().join(format!(
        "power_trace_simulator_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&directory);
    directory
}

fn config(directory: &Path, trace_count: usize, seed: u64) -> Config {
    Config::resolve(
        FileConfig {
            trace_count: Some(trace_count),
            key: Some(KEY.to_string()),
            seed: Some(seed),
            ..Default::default()
        },
        directory.to_path_buf(),
    )
    .unwrap()
}

/// All trace files of `directory` with their decoded labels and samples
fn read_traces(directory: &Path) -> Vec<(Block, Block, Vec<u8>)> {
    let mut traces: Vec<_> = std::fs::read_dir(directory)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            let (plaintext, ciphertext) = parse_trace_filename(&name).unwrap();
            (plaintext, ciphertext, std::fs::read(&path).unwrap())
        })
        .collect();
    traces.sort();
    traces
}

fn expected_trace() -> Vec<u8> {
    parse_hex_key(KEY)
        .unwrap()
        .iter()
        .map(|byte| byte.count_ones() as u8)
        .collect()
}

#[test]
/// Generate the default number of traces
///
/// Every run gets its own plaintext, so every run leaves its own file. The
/// ciphertext label is the one the firmware wrote back.
fn thousand_distinct_traces() {
    let directory = output_directory("thousand");
    let config = config(&directory, 1000, 1);
    let key = config.key;
    let mut generator = DatasetGenerator::new(&config, ScriptedTarget::new()).unwrap();
    let summary = generator.run().unwrap();

    assert_eq!(summary.traces_written, 1000);
    assert_eq!(summary.total_samples, 1000 * BLOCK_SIZE);
    assert!(summary.is_clean());
    assert_eq!(generator.target().runs, 1000);
    assert_eq!(generator.target().resets, 1000);

    let traces = read_traces(&directory);
    assert_eq!(traces.len(), 1000);
    let plaintexts: HashSet<Block> = traces.iter().map(|(plaintext, _, _)| *plaintext).collect();
    assert_eq!(plaintexts.len(), 1000);
    for (plaintext, ciphertext, _) in &traces {
        let expected: Vec<u8> = plaintext.iter().zip(key).map(|(p, k)| p ^ k).collect();
        assert_eq!(ciphertext.to_vec(), expected);
    }
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Samples only depend on the state of the current run
///
/// The arm snapshot holds the plaintext of the run. If the history of an
/// earlier run leaked into the first sample, traces would differ.
fn first_sample_uses_current_arm_snapshot() {
    let directory = output_directory("first_sample");
    let config = config(&directory, 20, 2);
    let mut generator = DatasetGenerator::new(&config, ScriptedTarget::new()).unwrap();
    generator.run().unwrap();

    let expected = expected_trace();
    for (_, _, samples) in read_traces(&directory) {
        assert_eq!(samples, expected);
    }
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Identical seeds give identical datasets
fn seeded_runs_are_reproducible() {
    let first = output_directory("seed_a");
    let second = output_directory("seed_b");
    for directory in [&first, &second] {
        let config = config(directory, 25, 99);
        DatasetGenerator::new(&config, ScriptedTarget::new())
            .unwrap()
            .run()
            .unwrap();
    }
    assert_eq!(read_traces(&first), read_traces(&second));
    std::fs::remove_dir_all(&first).unwrap();
    std::fs::remove_dir_all(&second).unwrap();
}

#[test]
/// Firmware not closing its window still yields a trace per run
fn open_window_is_reported_not_fatal() {
    let directory = output_directory("open_window");
    let config = config(&directory, 5, 3);
    let mut target = ScriptedTarget::new();
    target.close_window = false;
    target.extra_marker = Some(7);
    let summary = DatasetGenerator::new(&config, target)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.traces_written, 5);
    assert_eq!(summary.protocol_violations, 5);
    assert_eq!(summary.unknown_markers, 5);
    assert!(!summary.is_clean());
    for (_, _, samples) in read_traces(&directory) {
        assert_eq!(samples, expected_trace());
    }
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// A fatal target error stops the dataset, earlier traces stay on disk
fn target_error_aborts_dataset() {
    let directory = output_directory("abort");
    let config = config(&directory, 10, 4);
    let mut target = ScriptedTarget::new();
    target.fail_on_run = Some(3);
    let mut generator = DatasetGenerator::new(&config, target).unwrap();

    assert!(matches!(
        generator.run(),
        Err(SimulatorError::StoppedWithoutExit)
    ));
    assert_eq!(generator.summary().traces_written, 2);
    assert_eq!(read_traces(&directory).len(), 2);
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Zero traces requested creates only the output directory
fn zero_traces() {
    let directory = output_directory("zero");
    let config = config(&directory, 0, 5);
    let summary = DatasetGenerator::new(&config, ScriptedTarget::new())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary, DatasetSummary::default());
    assert!(directory.is_dir());
    assert!(read_traces(&directory).is_empty());
    std::fs::remove_dir_all(&directory).unwrap();
}

#[test]
/// Generated traces merge into one tracefile
///
/// Labels and samples read back from the JSON match the trace files.
fn combined_tracefile() {
    let directory = output_directory("combined");
    let config = config(&directory, 6, 8);
    DatasetGenerator::new(&config, ScriptedTarget::new())
        .unwrap()
        .run()
        .unwrap();
    let expected = read_traces(&directory);

    let tracefile =
        Tracefile::combine(&directory, CipherMode::Aes128Encrypt, Some(config.key)).unwrap();
    let json = std::env::temp_dir().join(format!(
        "power_trace_simulator_combined_{}.json",
        std::process::id()
    ));
    tracefile.write(&json).unwrap();
    let loaded = Tracefile::load(&json).unwrap();

    assert_eq!(loaded.meta.key, Some(config.key));
    assert_eq!(loaded.meta.algorithm, "AES-128");
    let combined: Vec<_> = loaded
        .traces
        .into_iter()
        .map(|entry| (entry.plaintext, entry.ciphertext, entry.data))
        .collect();
    assert_eq!(combined, expected);
    std::fs::remove_file(&json).unwrap();
    std::fs::remove_dir_all(&directory).unwrap();
}
