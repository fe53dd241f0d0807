//! Key-validation pipeline demo
//!
//! Producer threads generate random 256-bit keys, a first stage hex-encodes
//! them, a second stage checks each encoding against a table of flagged
//! byte pairs, and the sink tallies how many keys pass.
//!
//! Usage: cargo run --example keys --release

use parallel_pipeline::{BoxError, CancelToken, PipelineBuilder, StageConfig};
use rand::RngCore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const NUM_KEYS: usize = 50_000;
const NUM_PRODUCERS: usize = 2;
const QUEUE_CAPACITY: usize = 1000;

/// Byte pairs that count toward a key passing validation
const FLAGGED_PAIRS: &[&str] = &["AF", "BD", "BF", "CF", "DA", "FA", "FE", "FF"];
const FLAGGED_PAIRS_NEEDED: usize = 3;

fn to_hex(key: Vec<u8>) -> Result<String, BoxError> {
    let mut hex = String::with_capacity(key.len() * 2);
    for byte in key {
        hex.push_str(&format!("{byte:02X}"));
    }
    Ok(hex)
}

fn validate(hex: String) -> Result<(String, bool), BoxError> {
    let matches = FLAGGED_PAIRS
        .iter()
        .filter(|pair| hex.contains(*pair))
        .count();
    let passes = matches >= FLAGGED_PAIRS_NEEDED;
    Ok((hex, passes))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cancel = CancelToken::new();
    let valid = Arc::new(AtomicUsize::new(0));
    let tally = Arc::clone(&valid);

    let pipeline = PipelineBuilder::<Vec<u8>, Vec<u8>>::with_entry(&cancel, 2, QUEUE_CAPACITY)
        .transform(
            "hex",
            StageConfig {
                workers: 2,
                queues: 2,
                capacity: QUEUE_CAPACITY,
            },
            |_| to_hex,
        )?
        .transform(
            "validate",
            StageConfig {
                workers: 2,
                queues: 2,
                capacity: QUEUE_CAPACITY,
            },
            |_| validate,
        )?
        .sink("tally", 1, move |_| {
            let tally = Arc::clone(&tally);
            move |(_hex, passes): (String, bool)| -> Result<(), BoxError> {
                if passes {
                    tally.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        })?;

    let mut producers = Vec::new();
    for p in 0..NUM_PRODUCERS {
        let entry = pipeline.entry_handles();
        producers.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let queue = &entry[p % entry.len()];
            for _ in 0..NUM_KEYS / NUM_PRODUCERS {
                let mut key = vec![0u8; 32];
                rng.fill_bytes(&mut key);
                if queue.push(key).is_err() {
                    break;
                }
            }
        }));
    }
    for producer in producers {
        producer.join().expect("producer thread");
    }

    let metrics = pipeline.stage_metrics().to_vec();
    pipeline.wait()?;

    println!(
        "{} of {NUM_KEYS} keys passed validation",
        valid.load(Ordering::Relaxed)
    );
    println!("pipeline metrics:");
    for (name, stage_metrics) in &metrics {
        println!("  {name}: {}", stage_metrics.snapshot().format());
    }
    Ok(())
}
