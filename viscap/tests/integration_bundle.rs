//! Integration tests for sample routing through a file bundle.

#![allow(clippy::cast_precision_loss)] // synthetic cell values

use std::collections::BTreeMap;

use tempfile::tempdir;
use viscap::axes::{decode_vec, Complex32, FreqChannel, InputDesc, Product, TimeSample};
use viscap::container::{Container, DS_TIME, DS_VIS};
use viscap::error::{BundleError, ViscapError};
use viscap::{BundleConfig, FileBundle, SamplePayload, WriterKind};

fn metadata() -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("weight_type".to_string(), "inverse_var".to_string());
    m.insert("instrument_name".to_string(), "pathfinder".to_string());
    m
}

fn axes() -> (Vec<FreqChannel>, Vec<InputDesc>, Vec<Product>) {
    let freqs = vec![
        FreqChannel {
            centre: 800.0,
            width: 0.4,
        },
        FreqChannel {
            centre: 800.4,
            width: 0.4,
        },
    ];
    let inputs = vec![InputDesc::new(0, "a"), InputDesc::new(1, "b")];
    let prods = vec![
        Product {
            input_a: 0,
            input_b: 0,
        },
        Product {
            input_a: 0,
            input_b: 1,
        },
        Product {
            input_a: 1,
            input_b: 1,
        },
    ];
    (freqs, inputs, prods)
}

fn send(bundle: &mut FileBundle, seq: u64, freq_ind: u32) -> viscap::Result<()> {
    let vis = vec![
        Complex32::new(seq as f32, freq_ind as f32),
        Complex32::new(seq as f32, 1.0),
        Complex32::new(seq as f32, 2.0),
    ];
    let weight = vec![1.0f32; 3];
    let gain_coeff = vec![Complex32::new(1.0, 0.0); 2];
    let gain_exp = vec![0i32; 2];
    bundle.add_sample(
        TimeSample {
            seq,
            ctime: seq as f64 * 10.0,
        },
        freq_ind,
        &SamplePayload {
            vis: &vis,
            weight: &weight,
            gain_coeff: &gain_coeff,
            gain_exp: &gain_exp,
            eigen: None,
        },
    )
}

fn bundle_with(dir: &std::path::Path, kind: WriterKind) -> FileBundle {
    let (freqs, inputs, prods) = axes();
    let config = BundleConfig {
        acq_name: "acq_test".to_string(),
        freq_chunk: 7,
        writer: kind,
        rollover: 4,
        window_size: 2,
        seq_stride: 1,
    };
    FileBundle::new(dir, config, metadata(), freqs, inputs, prods, 0).unwrap()
}

/// Ten consecutive samples with rollover 4 and window 2: three files over
/// the run, never more than two open, and every file carries exactly its
/// window's samples.
#[test]
fn test_ten_sample_rollover_run() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_with(dir.path(), WriterKind::Raw);

    for seq in 0..10u64 {
        for f in 0..2u32 {
            send(&mut bundle, seq, f).unwrap();
        }
        assert!(bundle.open_files() <= 2, "open file bound violated at seq {seq}");
    }
    assert_eq!(bundle.files_created(), 3);
    drop(bundle);

    // Windows 0, 4, 8 for chunk 7.
    let expected = [
        ("00000000_0007.vis", 4u32, 0u64),
        ("00000004_0007.vis", 4, 4),
        ("00000008_0007.vis", 2, 8),
    ];
    for (name, num_time, first_seq) in expected {
        let reader = Container::open(dir.path().join(name)).unwrap();
        assert_eq!(reader.num_time(), num_time, "{name} extent");
        assert_eq!(reader.attributes().get("acquisition_name").unwrap(), "acq_test");
        assert_eq!(reader.attributes().get("freq_chunk").unwrap(), "7");

        let time_idx = reader.dataset_index(DS_TIME).unwrap();
        let times =
            decode_vec::<TimeSample>(&reader.read_cells(time_idx, 0, u64::from(num_time)).unwrap());
        assert_eq!(times[0].seq, first_seq);

        // First vis cell of the file tags its first sequence and frequency 0.
        let vis_idx = reader.dataset_index(DS_VIS).unwrap();
        let vis = decode_vec::<Complex32>(&reader.read_cells(vis_idx, 0, 3).unwrap());
        assert_eq!(vis[0], Complex32::new(first_seq as f32, 0.0));
    }
}

#[test]
fn test_structured_bundle_matches_layout() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_with(dir.path(), WriterKind::Structured);

    for seq in 0..5u64 {
        send(&mut bundle, seq, 0).unwrap();
        send(&mut bundle, seq, 1).unwrap();
    }
    drop(bundle);

    let reader = Container::open(dir.path().join("00000004_0007.vis")).unwrap();
    assert_eq!(reader.num_time(), 1);

    // (t=0, f=1) of the second file is seq 4.
    let vis_idx = reader.dataset_index(DS_VIS).unwrap();
    let vis = decode_vec::<Complex32>(&reader.read_cells(vis_idx, 3, 3).unwrap());
    assert_eq!(vis[0], Complex32::new(4.0, 1.0));
}

#[test]
fn test_evicted_window_rejects_and_stream_continues() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_with(dir.path(), WriterKind::Raw);

    for seq in 0..10u64 {
        send(&mut bundle, seq, 0).unwrap();
    }

    // Window 0 was evicted when window 8 opened.
    let err = send(&mut bundle, 2, 1).unwrap_err();
    assert!(matches!(
        err,
        ViscapError::Bundle(BundleError::EvictionDataLoss { seq: 2, .. })
    ));
    assert_eq!(bundle.samples_dropped(), 1);

    // Later samples still flow.
    send(&mut bundle, 10, 0).unwrap();
    send(&mut bundle, 11, 1).unwrap();
    assert_eq!(bundle.samples_dropped(), 1);
    drop(bundle);

    // The rejected sample never landed: window 0's file has only the
    // frequency-0 cells written, and seq 2 at frequency 1 stayed zero.
    let reader = Container::open(dir.path().join("00000000_0007.vis")).unwrap();
    let vis_idx = reader.dataset_index(DS_VIS).unwrap();
    // (t=2, f=1) cell starts at (2 * 2 + 1) * 3.
    let cell = decode_vec::<Complex32>(&reader.read_cells(vis_idx, 15, 3).unwrap());
    assert_eq!(cell, vec![Complex32::default(); 3]);
}

/// Frequencies of one chunk arrive loosely synchronized: a frequency may
/// lag a few samples behind the other without losing data.
#[test]
fn test_interleaved_frequencies_share_time_indices() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_with(dir.path(), WriterKind::Raw);

    send(&mut bundle, 0, 0).unwrap();
    send(&mut bundle, 1, 0).unwrap();
    send(&mut bundle, 2, 0).unwrap();
    // Frequency 1 catches up late, still inside the open window.
    send(&mut bundle, 0, 1).unwrap();
    send(&mut bundle, 1, 1).unwrap();
    send(&mut bundle, 2, 1).unwrap();
    drop(bundle);

    let reader = Container::open(dir.path().join("00000000_0007.vis")).unwrap();
    // Three distinct timestamps, not six.
    assert_eq!(reader.num_time(), 3);

    // Both frequencies of seq 1 sit in the same time row.
    let vis_idx = reader.dataset_index(DS_VIS).unwrap();
    let f0 = decode_vec::<Complex32>(&reader.read_cells(vis_idx, 6, 3).unwrap());
    let f1 = decode_vec::<Complex32>(&reader.read_cells(vis_idx, 9, 3).unwrap());
    assert_eq!(f0[0], Complex32::new(1.0, 0.0));
    assert_eq!(f1[0], Complex32::new(1.0, 1.0));
}

#[test]
fn test_no_locks_left_after_shutdown() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_with(dir.path(), WriterKind::Raw);

    for seq in 0..10u64 {
        send(&mut bundle, seq, 0).unwrap();
    }
    // Two files still open with their locks held.
    let locks: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".lock")
        })
        .collect();
    assert_eq!(locks.len(), 2);

    drop(bundle);
    let locks = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".lock")
        })
        .count();
    assert_eq!(locks, 0);
}
