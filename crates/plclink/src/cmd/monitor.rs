use std::sync::Arc;

use plclink_session::{LinkEvent, SessionConfig};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::cmd::link::Link;
use crate::cmd::{parse_duration, MonitorArgs};
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{emit, OutputFormat, TelemetryOutput};

pub async fn run(args: MonitorArgs, format: OutputFormat, config: SessionConfig) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let stop = Arc::new(Notify::new());
    install_ctrlc_handler(Arc::clone(&stop))?;

    let link = Link::open(&args.link, config).await?;
    let mut events = link.manager.events();
    let subscribed = match link
        .client
        .subscribe_monitor(&link.key, &args.regions, Some(interval))
    {
        Ok(count) => count,
        Err(err) => {
            link.close().await;
            return Err(session_error("monitor failed", err));
        }
    };
    info!(key = %link.key, regions = subscribed, ?interval, "monitoring");

    let mut cycles = 0u64;
    let outcome = loop {
        tokio::select! {
            _ = stop.notified() => break Ok(SUCCESS),
            event = events.recv() => match event {
                Some(LinkEvent::Telemetry(batch)) if batch.key == link.key => {
                    cycles += 1;
                    emit(&TelemetryOutput::new(&batch.key, cycles, &batch.samples), format);
                    if args.count.is_some_and(|count| cycles >= count) {
                        break Ok(SUCCESS);
                    }
                }
                Some(LinkEvent::Error { key, message }) if key == link.key => {
                    warn!(%key, %message, "channel error");
                }
                Some(LinkEvent::Closed { key }) if key == link.key => {
                    break Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("channel {key} closed by device"),
                    ));
                }
                Some(_) => {}
                None => break Ok(SUCCESS),
            },
        }
    };

    info!(cycles, "monitor stopped");
    link.close().await;
    outcome
}

fn install_ctrlc_handler(stop: Arc<Notify>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.notify_one();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
