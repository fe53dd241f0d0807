//! Sentence-processing pipeline demo
//!
//! A producer thread assembles random sentences from a fragment pool, a
//! first stage capitalizes every word, a second stage strips the vowels
//! back out, and the sink keeps a few samples and counts the rest.
//!
//! Usage: cargo run --example sentences --release

use parallel_pipeline::{BoxError, CancelToken, PipelineBuilder, StageConfig};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::thread;

const NUM_SENTENCES: usize = 20_000;
const QUEUE_CAPACITY: usize = 1000;
const FAN_WIDTH: usize = 5;

const FRAGMENTS: &[&str] = &[
    "the quick brown fox",
    "jumps over",
    "a lazy dog",
    "while the band plays",
    "under a pale moon",
    "in the old harbor",
];

fn produce_sentence(rng: &mut impl Rng) -> String {
    let mut sentence = String::new();
    for _ in 0..FRAGMENTS.len() {
        if rng.gen_bool(0.5) {
            sentence.push_str(FRAGMENTS[rng.gen_range(0..FRAGMENTS.len())]);
            sentence.push(' ');
        }
    }
    if rng.gen_bool(0.2) {
        sentence.make_ascii_uppercase();
    }
    sentence
}

fn capitalize_words(sentence: String) -> Result<String, BoxError> {
    let mut out = String::with_capacity(sentence.len());
    for word in sentence.split_whitespace() {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
            out.push(' ');
        }
    }
    Ok(out)
}

fn strip_vowels(sentence: String) -> Result<String, BoxError> {
    Ok(sentence
        .chars()
        .filter(|c| !"aeiouAEIOU".contains(*c))
        .collect())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cancel = CancelToken::new();
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink_samples = Arc::clone(&samples);

    let pipeline = PipelineBuilder::<String, String>::with_entry(&cancel, FAN_WIDTH, QUEUE_CAPACITY)
        .transform(
            "capitalize",
            StageConfig {
                workers: 2,
                queues: FAN_WIDTH,
                capacity: QUEUE_CAPACITY,
            },
            |_| capitalize_words,
        )?
        .transform(
            "strip",
            StageConfig {
                workers: 2,
                queues: FAN_WIDTH,
                capacity: QUEUE_CAPACITY,
            },
            |_| strip_vowels,
        )?
        .sink("render", 1, move |_| {
            let samples = Arc::clone(&sink_samples);
            move |sentence: String| -> Result<(), BoxError> {
                let mut samples = samples.lock().expect("samples lock");
                if samples.len() < 5 {
                    samples.push(sentence);
                }
                Ok(())
            }
        })?;

    let entry = pipeline.entry_handles();
    let producer = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        for i in 0..NUM_SENTENCES {
            let sentence = produce_sentence(&mut rng);
            if entry[i % entry.len()].push(sentence).is_err() {
                break;
            }
        }
    });

    producer.join().expect("producer thread");
    let metrics = pipeline.stage_metrics().to_vec();
    pipeline.wait()?;

    println!("processed {NUM_SENTENCES} sentences");
    println!("pipeline metrics:");
    for (name, stage_metrics) in &metrics {
        println!("  {name}: {}", stage_metrics.snapshot().format());
    }
    println!("samples:");
    for sentence in samples.lock().expect("samples lock").iter() {
        println!("  {sentence}");
    }
    Ok(())
}
