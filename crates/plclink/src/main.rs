mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "plclink", version, about = "PLC device link CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// JSON session config (timeouts, buffer sizes, monitor and queue settings).
    #[arg(long, value_name = "FILE", env = "PLCLINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.config.as_deref());

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_read_with_hex_address() {
        let cli = Cli::try_parse_from([
            "plclink",
            "read",
            "tcp://10.0.0.2:502",
            "0x100",
            "4",
            "--timeout",
            "500ms",
        ])
        .expect("read args should parse");

        match cli.command {
            Command::Read(args) => {
                assert_eq!(args.address, 0x100);
                assert_eq!(args.size, 4);
                assert_eq!(args.link.timeout, "500ms");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_write_payloads() {
        let err = Cli::try_parse_from([
            "plclink",
            "write",
            "/dev/ttyUSB0",
            "0",
            "--hex",
            "0102",
            "--text",
            "hi",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn write_requires_a_payload() {
        let err = Cli::try_parse_from(["plclink", "write", "/dev/ttyUSB0", "0"])
            .expect_err("missing payload should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_repeated_monitor_regions() {
        let cli = Cli::try_parse_from([
            "plclink",
            "monitor",
            "serial:///dev/ttyUSB0?baud=9600",
            "-r",
            "0x100:4",
            "--region",
            "512:2",
            "--count",
            "3",
        ])
        .expect("monitor args should parse");

        match cli.command {
            Command::Monitor(args) => {
                assert_eq!(args.regions.len(), 2);
                assert_eq!(args.regions[0].address, 256);
                assert_eq!(args.regions[1].size, 2);
                assert_eq!(args.count, Some(3));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn monitor_requires_a_region() {
        assert!(Cli::try_parse_from(["plclink", "monitor", "tcp://10.0.0.2:502"]).is_err());
    }

    #[test]
    fn rejects_bad_region_and_address() {
        assert!(
            Cli::try_parse_from(["plclink", "monitor", "COM3", "--region", "100"]).is_err()
        );
        assert!(Cli::try_parse_from(["plclink", "read", "COM3", "0xZZ", "4"]).is_err());
    }

    #[test]
    fn parses_scan_and_global_flags() {
        let cli = Cli::try_parse_from([
            "plclink",
            "scan",
            "192.168.1.0",
            "--port",
            "502",
            "--format",
            "json",
            "--config",
            "/etc/plclink.json",
        ])
        .expect("scan args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/plclink.json")));
        assert!(matches!(cli.command, Command::Scan(ref args) if args.port == 502 && args.last == 254));
    }
}
