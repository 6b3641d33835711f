//! Channel inspector demo monitor.
//!
//! Synthesizes a BPSK carrier into the engine's source, opens one
//! inspector over the configured channel and prints periodic estimate
//! records as flat JSON lines, one per sampling interval.

use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use num_complex::Complex32;
use serde_json::json;

use chanscope::{analytics, CarrierCtrl, Channel, Engine, MsgKind, Params, SOURCE_BUFSIZ};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source sample rate in Hz
    #[arg(long, default_value_t = 250_000.0)]
    samp_rate: f32,

    /// Channel center frequency in Hz
    #[arg(long, default_value_t = 12_000.0)]
    frequency: f32,

    /// Channel bandwidth in Hz
    #[arg(long, default_value_t = 6_000.0)]
    bandwidth: f32,

    /// Baud rate of the synthetic BPSK carrier
    #[arg(long, default_value_t = 1_200.0)]
    baud: f32,

    /// Seconds of signal to synthesize
    #[arg(long, default_value_t = 2.0)]
    duration: f32,

    /// Estimate reporting interval in milliseconds
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Worker threads
    #[arg(long, default_value_t = 2)]
    workers: usize,
}

/// Deterministic bit source: a 16-bit Fibonacci LFSR.
struct BitSource {
    state: u16,
}

impl BitSource {
    fn new() -> Self {
        Self { state: 0xACE1 }
    }

    fn next_bit(&mut self) -> bool {
        let bit = (self.state ^ (self.state >> 2) ^ (self.state >> 3) ^ (self.state >> 5)) & 1;
        self.state = (self.state >> 1) | (bit << 15);
        bit != 0
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let _guard = analytics::setup_sentry();

    let args = Args::parse();

    let engine = Engine::start(args.samp_rate, args.workers)?;
    let client = engine.client();

    let handle = client.open(Channel {
        fc: args.frequency,
        bw: args.bandwidth,
    })?;
    client.set_params(
        handle,
        Params {
            inspector_id: 1,
            fc_ctrl: CarrierCtrl::Costas2,
            baud: args.baud,
            sym_phase: 0.5,
            ..Params::default()
        },
    )?;
    info!("inspector open on handle {handle}");

    // Producer: BPSK symbols from the LFSR, mixed up to the channel center.
    let producer_done = Arc::new(AtomicBool::new(false));
    let producer = {
        let consumer = Arc::clone(engine.consumer());
        let done = Arc::clone(&producer_done);
        let samp_rate = args.samp_rate;
        let frequency = args.frequency;
        let sps = (args.samp_rate / args.baud).round().max(1.0) as usize;
        let total = (args.duration * args.samp_rate) as usize;
        thread::spawn(move || {
            let mut bits = BitSource::new();
            let mut symbol = 1.0f32;
            let mut phase = 0.0f32;
            let dphi = TAU * frequency / samp_rate;
            let mut buffer = Vec::with_capacity(SOURCE_BUFSIZ);
            for n in 0..total {
                if n % sps == 0 {
                    symbol = if bits.next_bit() { 1.0 } else { -1.0 };
                }
                buffer.push(Complex32::from_polar(1.0, phase) * symbol);
                phase = (phase + dphi) % TAU;
                if buffer.len() == SOURCE_BUFSIZ {
                    consumer.write(&buffer);
                    buffer.clear();
                }
            }
            if !buffer.is_empty() {
                consumer.write(&buffer);
            }
            consumer.finish();
            done.store(true, Ordering::Release);
        })
    };

    let mut symbols = 0usize;
    let mut batches = 0usize;
    let mut baud = chanscope::BaudInfo::default();
    loop {
        let finished = producer_done.load(Ordering::Acquire);
        if finished {
            // Give in-flight batches a chance to land before the last
            // record.
            thread::sleep(Duration::from_millis(args.interval_ms));
        }

        while let Some(msg) = engine.output().poll_kind(MsgKind::Samples) {
            if let chanscope::Message::Samples(batch) = msg {
                symbols += batch.samples.len();
                batches += 1;
            }
        }

        // Keep the last estimate once the inspector has retired.
        baud = client.get_info(handle).unwrap_or(baud);
        let mut record = BTreeMap::new();
        record.insert(
            "_timestamp".to_string(),
            json!(chrono::Utc::now().timestamp_micros() as f64 / 1e6),
        );
        record.insert("baud.fac".to_string(), json!(baud.fac));
        record.insert("baud.nln".to_string(), json!(baud.nln));
        record.insert("symbols".to_string(), json!(symbols));
        record.insert("batches".to_string(), json!(batches));
        println!("{}", serde_json::to_string(&record)?);

        if finished {
            break;
        }
        thread::sleep(Duration::from_millis(args.interval_ms));
    }

    if let Err(e) = client.close(handle) {
        // The inspector retires on its own once the stream ends, so the
        // handle may already be gone.
        warn!("close failed: {e}");
    }

    let _ = producer.join();
    engine.halt();
    Ok(())
}
