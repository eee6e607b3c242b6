use plclink_frame::bytes_to_hex;
use plclink_session::SessionConfig;
use plclink_transport::{discover_broadcast, scan_hosts};
use tracing::info;

use crate::cmd::{parse_duration, DiscoverArgs, ScanArgs};
use crate::exit::{transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{emit, DiscoverOutput, OutputFormat, ReplyOutput, ScanOutput};

pub async fn scan(args: ScanArgs, format: OutputFormat, config: &SessionConfig) -> CliResult<i32> {
    if args.first > args.last {
        return Err(CliError::new(
            USAGE,
            format!("--first ({}) must not exceed --last ({})", args.first, args.last),
        ));
    }
    let mut scan = config.scan();
    if let Some(timeout) = &args.probe_timeout {
        scan.probe_timeout = parse_duration(timeout)?;
    }

    let [a, b, c, _] = args.network.octets();
    let results = scan_hosts(args.network, args.first..=args.last, args.port, &scan).await;
    let found = results.iter().filter(|result| result.reachable).count();
    info!(found, scanned = results.len(), "scan complete");

    emit(
        &ScanOutput::new(format!("{a}.{b}.{c}.0/24"), args.port, results, args.all),
        format,
    );
    Ok(SUCCESS)
}

pub async fn broadcast(args: DiscoverArgs, format: OutputFormat) -> CliResult<i32> {
    let duration = parse_duration(&args.duration)?;
    let replies = discover_broadcast(args.port, args.message.as_bytes(), duration)
        .await
        .map_err(|err| transport_error("discovery failed", err))?;
    info!(replies = replies.len(), "discovery complete");

    let replies = replies
        .into_iter()
        .map(|reply| ReplyOutput {
            addr: reply.addr.to_string(),
            hex: bytes_to_hex(&reply.payload),
            text: String::from_utf8_lossy(&reply.payload).trim().to_string(),
        })
        .collect();
    emit(&DiscoverOutput::new(args.port, replies), format);
    Ok(SUCCESS)
}
