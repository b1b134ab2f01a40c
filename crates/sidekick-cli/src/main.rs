//! Sidekick host harness
//!
//! Runs the cartridge core on a desktop machine:
//! - a bus-trace replay thread plays the interrupt context
//! - the session runs on the main thread as the background loop
//! - output goes to the audio device, a simulated PWM timer, or a WAV file

mod args;
mod pwm;
mod trace;
mod wav;

use args::CliArgs;
use log::warn;
use pwm::{PwmTimer, PWM_RANGE};
use sidekick::sink::periodic::DEFAULT_PERIODIC_CAPACITY;
use sidekick::sink::streaming::DEFAULT_STREAMING_CAPACITY;
use sidekick::{
    AudioSink, NullSink, OutputPath, PeriodicSink, Session, SessionConfig, StreamingSink,
};
use std::sync::atomic::Ordering;
use std::time::Instant;
use trace::{spawn_replay, BusTrace, ReplayOptions};
use wav::WavSink;

/// Fall back to discarding output when the device cannot be opened; the
/// session still runs and the rate stays at nominal.
fn sink_or_silence<S: AudioSink + 'static>(sink: sidekick::Result<S>) -> Box<dyn AudioSink> {
    match sink {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("{e}; continuing without audio output");
            Box::new(NullSink)
        }
    }
}

fn main() -> sidekick::Result<()> {
    env_logger::init();

    println!("Sidekick - SID/FM Cartridge Core (host harness)");
    println!("================================================\n");

    let args = CliArgs::parse();
    if args.show_help {
        CliArgs::print_help();
        return Ok(());
    }

    let config = match args.config_path {
        Some(ref path) => SessionConfig::from_path(path)?,
        None => SessionConfig::default(),
    };
    let trace = match args.trace_path {
        Some(ref path) => BusTrace::load(path)?,
        None => BusTrace::demo(args.clock_hz),
    };

    println!("Session Configuration:");
    println!("  SID 1:        {}", config.sid1);
    println!(
        "  SID 2:        {}",
        config.sid2.map_or_else(|| "off".to_string(), |m| m.to_string())
    );
    println!("  Mapping:      {:?}", config.mapping);
    println!("  FM:           {}", if config.fm_enabled { "on" } else { "off" });
    println!("  Sample rate:  {} Hz", config.nominal_sample_rate);
    println!("  Trace:        {} transactions\n", trace.entries().len());

    let mut pwm_timer = None;
    let sink: Box<dyn AudioSink> = match (&args.wav_path, config.output) {
        (Some(path), _) => {
            println!("Capturing to {path}\n");
            Box::new(WavSink::create(path, config.nominal_sample_rate)?)
        }
        (None, OutputPath::Streaming) => sink_or_silence(StreamingSink::new(
            config.nominal_sample_rate,
            DEFAULT_STREAMING_CAPACITY,
        )),
        (None, OutputPath::Pwm) => {
            let (sink, output) = PeriodicSink::new(DEFAULT_PERIODIC_CAPACITY, PWM_RANGE)?;
            pwm_timer = Some(PwmTimer::spawn(output, config.nominal_sample_rate)?);
            Box::new(sink)
        }
    };

    // Live output measures the bus clock like the cartridge does; the replay
    // idles long enough to cover the measurement before the trace starts.
    let live = args.wav_path.is_none();
    let clock_hz = args.clock_hz;
    let (mut session, realtime) = if live {
        Session::start(config.clone(), sink)?
    } else {
        Session::with_clock(config.clone(), clock_hz, sink)?
    };
    let lead_in = if live {
        u64::from(clock_hz) * config.clock_measure_ms * 3 / 2 / 1000
    } else {
        0
    };

    let options = ReplayOptions {
        clock_hz,
        paced: live,
        lead_in,
        tail: u64::from(clock_hz) * args.tail_secs,
    };
    let started = Instant::now();
    let replay = spawn_replay(trace, realtime, options, session.stop_handle())?;

    let reason = session.run();
    session.stop_handle().store(true, Ordering::Release);
    let stats = replay
        .join()
        .map_err(|_| "bus replay thread panicked".to_string())?;

    println!("\n=== Session Statistics ===");
    println!("Exit reason:       {:?}", reason);
    println!("Duration:          {:.2} seconds", started.elapsed().as_secs_f32());
    println!("Bus clock:         {} Hz", session.engine().clock_hz());
    println!("Bus cycles:        {}", stats.cycles);
    println!("Reads answered:    {}", stats.reads_driven);
    println!("Resets:            {}", session.resets());
    println!("Events applied:    {}", session.engine().events_applied());
    println!("Samples generated: {}", session.engine().samples());
    println!("Final rate:        {} Hz", session.engine().rate().rate());
    if let Some(watermark) = session.engine().rate().watermark() {
        println!("Watermark:         {} frames", watermark);
    }
    println!("Frames dropped:    {}", session.engine().dropped_frames());
    if stats.interrupted {
        println!("Replay interrupted before the end of the trace");
    }

    drop(session);
    if let Some(output) = pwm_timer.and_then(PwmTimer::stop) {
        println!("PWM underruns:     {}", output.underruns());
    }

    println!("\nDone.");
    Ok(())
}
