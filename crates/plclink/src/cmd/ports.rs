use plclink_transport::list_ports;

use crate::cmd::PortsArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{emit, OutputFormat, PortsOutput};

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = list_ports().map_err(|err| transport_error("failed to list serial ports", err))?;
    emit(&PortsOutput::new(ports), format);
    Ok(SUCCESS)
}
