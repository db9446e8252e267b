//! End-to-end session scenarios over real loopback TCP (spec §8 S1, S4, S6).
//!
//! Component-level edge cases (truncation math, step ordering, protocol
//! violations) are covered by the inline tests next to the code that
//! implements them; these exercise the whole sender/receiver wiring.

use std::net::TcpListener;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use corestream::config::{PredictorMode, SessionConfig};
use corestream::session::{ReceiverSession, SenderSession};

/// Grab two adjacent free ports so concurrent test runs don't collide on a
/// fixed `base_port`.
fn free_port_pair() -> u16 {
    loop {
        let a = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = a.local_addr().unwrap().port();
        drop(a);
        if let Ok(b) = TcpListener::bind(("127.0.0.1", base + 1)) {
            drop(b);
            return base;
        }
    }
}

fn base_config(base_port: u16, output_root: PathBuf) -> SessionConfig {
    SessionConfig {
        base_port,
        reduced_addr: "127.0.0.1".to_string(),
        augmentation_addr: "127.0.0.1".to_string(),
        num_steps: 1,
        chunk_size: 1024 * 1024,
        link_bandwidth_mbps: 200.0,
        prediction_cadence: 3,
        lookahead_steps: 5,
        telemetry_capacity: 1000,
        reduced_files: vec![],
        augmentation_files: vec![],
        output_root,
        predictor_mode: PredictorMode::Disabled,
        oracle_path: PathBuf::from("./predictions.txt"),
        round_robin_chunks: 1,
        processor_path: PathBuf::from("/bin/true"),
    }
}

/// Spawn the receiver first so its listeners are bound before the sender
/// tries to connect, matching the dependency order `session.rs` expects.
fn run_session(sender_cfg: SessionConfig, receiver_cfg: SessionConfig) {
    let receiver = thread::spawn(move || ReceiverSession::new(receiver_cfg).run());
    thread::sleep(Duration::from_millis(100));
    let sender = thread::spawn(move || SenderSession::new(sender_cfg).run());

    sender.join().unwrap().expect("sender session failed");
    receiver.join().unwrap().expect("receiver session failed");
}

#[test]
fn s1_happy_path_two_steps_both_streams() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    let r_path = input_dir.path().join("r.bin");
    std::fs::write(&r_path, vec![0xABu8; 1024 * 1024]).unwrap();
    let a1 = input_dir.path().join("a1.bin");
    std::fs::write(&a1, vec![0xCDu8; 2 * 1024 * 1024]).unwrap();

    let base_port = free_port_pair();
    let mut sender_cfg = base_config(base_port, output_dir.path().to_path_buf());
    sender_cfg.num_steps = 2;
    sender_cfg.reduced_files = vec![r_path.clone()];
    sender_cfg.augmentation_files = vec![a1.clone()];

    let mut receiver_cfg = sender_cfg.clone();
    receiver_cfg.output_root = output_dir.path().to_path_buf();

    run_session(sender_cfg, receiver_cfg);

    for step in 0..2 {
        let got_r = std::fs::read(output_dir.path().join(step.to_string()).join("r.bin")).unwrap();
        assert_eq!(got_r, std::fs::read(&r_path).unwrap());
        let got_a = std::fs::read(output_dir.path().join(step.to_string()).join("a1.bin")).unwrap();
        assert_eq!(got_a, std::fs::read(&a1).unwrap());
    }
    let log = std::fs::read_to_string(output_dir.path().join("log.txt")).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[test]
fn s4_empty_augmentation_file_round_trips_as_zero_bytes() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    let r_path = input_dir.path().join("r.bin");
    std::fs::write(&r_path, vec![1u8; 16]).unwrap();
    let empty_path = input_dir.path().join("empty.bin");
    std::fs::write(&empty_path, []).unwrap();

    let base_port = free_port_pair();
    let mut sender_cfg = base_config(base_port, output_dir.path().to_path_buf());
    sender_cfg.reduced_files = vec![r_path];
    sender_cfg.augmentation_files = vec![empty_path];

    let mut receiver_cfg = sender_cfg.clone();
    receiver_cfg.output_root = output_dir.path().to_path_buf();

    run_session(sender_cfg, receiver_cfg);

    let meta = std::fs::metadata(output_dir.path().join("0").join("empty.bin")).unwrap();
    assert_eq!(meta.len(), 0);
}

#[test]
fn s6_processor_failure_is_non_fatal_session_still_exits_cleanly() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let r_path = input_dir.path().join("r.bin");
    std::fs::write(&r_path, vec![9u8; 32]).unwrap();

    let base_port = free_port_pair();
    let mut sender_cfg = base_config(base_port, output_dir.path().to_path_buf());
    sender_cfg.reduced_files = vec![r_path];

    let mut receiver_cfg = sender_cfg.clone();
    receiver_cfg.output_root = output_dir.path().to_path_buf();
    receiver_cfg.processor_path = PathBuf::from("/bin/false"); // always fails

    // `run_session` already asserts both sides return Ok(()), which is the
    // whole point: a failing processor must not fail the session.
    run_session(sender_cfg, receiver_cfg);

    let log = std::fs::read_to_string(output_dir.path().join("log.txt")).unwrap();
    assert_eq!(log.lines().count(), 1);
}

#[test]
fn multi_file_augmentation_round_robin_round_trips_all_files() {
    // spec.md's own S1 scenario: a1/a2/a3 sent round-robin in one step.
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    let r_path = input_dir.path().join("r.bin");
    std::fs::write(&r_path, vec![0x11u8; 64]).unwrap();
    let a1 = input_dir.path().join("a1.bin");
    std::fs::write(&a1, vec![0xAAu8; 37]).unwrap();
    let a2 = input_dir.path().join("a2.bin");
    std::fs::write(&a2, vec![0xBBu8; 53]).unwrap();
    let a3 = input_dir.path().join("a3.bin");
    std::fs::write(&a3, vec![0xCCu8; 19]).unwrap();

    let base_port = free_port_pair();
    let mut sender_cfg = base_config(base_port, output_dir.path().to_path_buf());
    sender_cfg.chunk_size = 8; // force several round-robin switches per file
    sender_cfg.round_robin_chunks = 1;
    sender_cfg.reduced_files = vec![r_path];
    sender_cfg.augmentation_files = vec![a1.clone(), a2.clone(), a3.clone()];

    let mut receiver_cfg = sender_cfg.clone();
    receiver_cfg.output_root = output_dir.path().to_path_buf();

    run_session(sender_cfg, receiver_cfg);

    for (name, path) in [("a1.bin", &a1), ("a2.bin", &a2), ("a3.bin", &a3)] {
        let got = std::fs::read(output_dir.path().join("0").join(name)).unwrap();
        assert_eq!(got, std::fs::read(path).unwrap(), "mismatch for {name}");
    }
}

#[test]
fn reduced_only_session_with_no_augmentation_files_completes() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let r_path = input_dir.path().join("r.bin");
    std::fs::write(&r_path, vec![5u8; 8]).unwrap();

    let base_port = free_port_pair();
    let mut sender_cfg = base_config(base_port, output_dir.path().to_path_buf());
    sender_cfg.reduced_files = vec![r_path.clone()];

    let mut receiver_cfg = sender_cfg.clone();
    receiver_cfg.output_root = output_dir.path().to_path_buf();

    run_session(sender_cfg, receiver_cfg);

    let got = std::fs::read(output_dir.path().join("0").join("r.bin")).unwrap();
    assert_eq!(got, std::fs::read(&r_path).unwrap());
}
