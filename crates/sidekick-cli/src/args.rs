//! Command-line argument parsing for the sidekick host harness.

use sidekick::config::PAL_CLOCK_HZ;
use std::env;

/// Seconds of idle bus appended after the trace by default.
pub const DEFAULT_TAIL_SECS: u64 = 1;

/// Parsed command-line arguments.
#[derive(Debug)]
pub struct CliArgs {
    /// Session configuration file (JSON)
    pub config_path: Option<String>,
    /// Bus trace to replay; the built-in demo when absent
    pub trace_path: Option<String>,
    /// Capture to this WAV file instead of playing live
    pub wav_path: Option<String>,
    /// Bus clock the trace is replayed at
    pub clock_hz: u32,
    /// Idle seconds after the last trace entry
    pub tail_secs: u64,
    /// Whether help was requested
    pub show_help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config_path: None,
            trace_path: None,
            wav_path: None,
            clock_hz: PAL_CLOCK_HZ,
            tail_secs: DEFAULT_TAIL_SECS,
            show_help: false,
        }
    }
}

impl CliArgs {
    /// Parse arguments from command line.
    pub fn parse() -> Self {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args_iter: impl IntoIterator<Item = String>) -> Self {
        let mut args = Self::default();
        let mut iter = args_iter.into_iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => args.show_help = true,
                "--config" => match iter.next() {
                    Some(value) => args.config_path = Some(value),
                    None => args.missing_value("--config"),
                },
                "--wav" => match iter.next() {
                    Some(value) => args.wav_path = Some(value),
                    None => args.missing_value("--wav"),
                },
                "--clock" => match iter.next().and_then(|v| v.parse().ok()) {
                    Some(hz) if hz > 0 => args.clock_hz = hz,
                    _ => args.missing_value("--clock"),
                },
                "--tail" => match iter.next().and_then(|v| v.parse().ok()) {
                    Some(secs) => args.tail_secs = secs,
                    None => args.missing_value("--tail"),
                },
                _ if arg.starts_with('-') => {
                    eprintln!("Unknown flag: {}", arg);
                    args.show_help = true;
                }
                _ => args.trace_path = Some(arg),
            }
        }

        args
    }

    fn missing_value(&mut self, flag: &str) {
        eprintln!("{flag} requires a valid argument");
        self.show_help = true;
    }

    /// Print help text to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage:\n  sidekick [--config <file.json>] [--wav <out.wav>] [--clock <hz>] [--tail <secs>] [trace.txt]\n\n\
             Flags:\n\
             \x20 --config <file>    Session configuration (JSON, missing fields use defaults)\n\
             \x20 --wav <file>       Capture the mixed output to a WAV file instead of playing it\n\
             \x20 --clock <hz>       Bus clock the trace is replayed at (default 985248, PAL)\n\
             \x20 --tail <secs>      Idle bus time after the last trace entry (default 1)\n\
             \x20 -h, --help         Show this help\n\n\
             Trace format (one bus transaction per line, '#' starts a comment):\n\
             \x20 <cycle> W <address> <value>    write, address and value in hex\n\
             \x20 <cycle> R <address>            read\n\
             \x20 <cycle> RESET <cycles>         hold the reset line\n\n\
             Without a trace a short demo tune is played.\n\n\
             Examples:\n\
             \x20 sidekick                              # Play the demo live\n\
             \x20 sidekick --wav demo.wav               # Render the demo to WAV\n\
             \x20 sidekick --config dual.json tune.txt  # Replay a captured trace\n"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.clock_hz, PAL_CLOCK_HZ);
        assert_eq!(args.tail_secs, DEFAULT_TAIL_SECS);
        assert!(args.trace_path.is_none());
        assert!(!args.show_help);
    }

    #[test]
    fn test_all_flags() {
        let args = parse(&[
            "--config", "c.json", "--wav", "out.wav", "--clock", "1022727", "--tail", "3", "t.txt",
        ]);
        assert_eq!(args.config_path.as_deref(), Some("c.json"));
        assert_eq!(args.wav_path.as_deref(), Some("out.wav"));
        assert_eq!(args.clock_hz, 1_022_727);
        assert_eq!(args.tail_secs, 3);
        assert_eq!(args.trace_path.as_deref(), Some("t.txt"));
    }

    #[test]
    fn test_bad_values_request_help() {
        assert!(parse(&["--clock", "fast"]).show_help);
        assert!(parse(&["--clock", "0"]).show_help);
        assert!(parse(&["--wav"]).show_help);
        assert!(parse(&["--bogus"]).show_help);
    }
}
