use plclink_frame::{hex_to_bytes, is_error_response, parse_command};
use plclink_session::{SessionConfig, SessionError};
use tracing::warn;

use crate::cmd::link::Link;
use crate::cmd::{HealthArgs, InfoArgs, ReadArgs, SendArgs, WriteArgs};
use crate::exit::{frame_error, session_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{emit, CommandOutput, DataOutput, HealthOutput, OutputFormat, WriteOutput};

pub async fn info(args: InfoArgs, format: OutputFormat, config: SessionConfig) -> CliResult<i32> {
    let link = Link::open(&args.link, config).await?;
    let result = link.client.program_info(&link.key, link.timeout()).await;
    let key = link.key.clone();
    link.close().await;

    let data = result.map_err(|err| session_error("program info failed", err))?;
    emit(&DataOutput::program_info(key, &data), format);
    Ok(SUCCESS)
}

pub async fn read(args: ReadArgs, format: OutputFormat, config: SessionConfig) -> CliResult<i32> {
    if args.size == 0 {
        return Err(CliError::new(USAGE, "size must be greater than zero"));
    }
    let link = Link::open(&args.link, config).await?;
    let result = link
        .client
        .read_memory(&link.key, args.address, args.size, link.timeout())
        .await;
    let key = link.key.clone();
    link.close().await;

    let data = result.map_err(|err| session_error("memory read failed", err))?;
    emit(&DataOutput::memory(key, args.address, &data), format);
    Ok(SUCCESS)
}

pub async fn write(args: WriteArgs, format: OutputFormat, config: SessionConfig) -> CliResult<i32> {
    let data = match (&args.hex, &args.text) {
        (Some(hex), _) => hex_to_bytes(hex).map_err(|err| frame_error("invalid --hex", err))?,
        (None, Some(text)) => text.as_bytes().to_vec(),
        (None, None) => return Err(CliError::new(USAGE, "one of --hex or --text is required")),
    };
    if data.is_empty() {
        return Err(CliError::new(USAGE, "payload must not be empty"));
    }

    let link = Link::open(&args.link, config).await?;
    let written = data.len();
    let result = link
        .client
        .write_memory(&link.key, args.address, data, link.timeout())
        .await;
    let key = link.key.clone();
    link.close().await;

    result.map_err(|err| session_error("memory write failed", err))?;
    emit(&WriteOutput::new(key, args.address, written), format);
    Ok(SUCCESS)
}

pub async fn health(args: HealthArgs, format: OutputFormat, config: SessionConfig) -> CliResult<i32> {
    let link = Link::open(&args.link, config).await?;
    let result = async {
        let stats = link.client.get_health(&link.key, link.timeout()).await?;
        if args.reset {
            link.client.reset_health(&link.key, link.timeout()).await?;
        }
        Ok::<_, SessionError>(stats)
    }
    .await;
    let key = link.key.clone();
    link.close().await;

    let stats = result.map_err(|err| session_error("health query failed", err))?;
    emit(&HealthOutput::new(key, stats, args.reset), format);
    Ok(SUCCESS)
}

pub async fn send(args: SendArgs, format: OutputFormat, config: SessionConfig) -> CliResult<i32> {
    let command = args.command.trim().to_string();
    if command.is_empty() {
        return Err(CliError::new(USAGE, "command must not be empty"));
    }
    if !args.raw {
        parse_command(&command).map_err(|err| frame_error("invalid command", err))?;
    }

    let link = Link::open(&args.link, config).await?;
    let result = link
        .client
        .send_command(&link.key, command.clone(), link.timeout())
        .await;
    let key = link.key.clone();
    link.close().await;

    let response = result.map_err(|err| session_error("command failed", err))?;
    let failed = is_error_response(&response);
    if failed {
        warn!(%key, %response, "device rejected command");
    }
    emit(&CommandOutput::new(key, command, response), format);
    Ok(if failed { FAILURE } else { SUCCESS })
}
