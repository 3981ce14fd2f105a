//! `ipcfleet events`: stream live camera events until interrupted.

use futures_util::StreamExt;

use ipcfleet_core::{FleetEvent, Subscription, topics};

use crate::cli::{EventsArgs, GlobalOpts, OutputFormat};
use crate::commands::Context;
use crate::error::CliError;
use crate::output;

const CHANNEL_CAPACITY: usize = 256;

pub async fn handle(ctx: &Context, args: EventsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = if args.devices.is_empty() {
        ctx.config.devices.iter().map(|d| d.id.clone()).collect()
    } else {
        args.devices
    };
    if devices.is_empty() {
        return Err(CliError::Validation {
            field: "devices".into(),
            reason: format!("no devices configured in {}", ctx.config_path.display()),
        });
    }

    for id in &devices {
        ctx.register(id).await?;
    }

    // Subscribe before the listeners start so the first status is not lost.
    let (mut stream, subscription) = ctx
        .fleet
        .bus()
        .subscribe_channel(&ctx.cancel, topics::ALL, CHANNEL_CAPACITY)
        .await?
        .into_stream();
    for id in &devices {
        ctx.fleet.listen(id)?;
    }
    tracing::info!(devices = devices.len(), "listening for events");

    loop {
        let event = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            event = stream.next() => event,
        };
        let Some(event) = event else { break };
        if !global.quiet {
            output::print_line(&render_event(&global.format, &event)?)?;
        }
    }

    close_subscription(&subscription).await;
    Ok(())
}

/// Unsubscribe, returning whether the bus accepted the request.
async fn close_subscription(subscription: &Subscription<FleetEvent>) -> bool {
    match subscription.close().await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(id = subscription.id(), error = %e, "closing event subscription failed");
            false
        }
    }
}

fn render_event(format: &OutputFormat, event: &FleetEvent) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Plain => plain_line(event),
        _ => serde_json::to_string(event)?,
    })
}

fn plain_line(event: &FleetEvent) -> String {
    match event {
        FleetEvent::Camera {
            device,
            received_at,
            event,
        } => format!(
            "{} {device} {} {} {}",
            received_at.to_rfc3339(),
            event.code,
            event.action,
            event.index
        ),
        FleetEvent::Connection { device, status, error } => match error {
            Some(error) => format!("{device} {status}: {error}"),
            None => format!("{device} {status}"),
        },
        FleetEvent::ScanProgress { device, percent, files } => {
            format!("{device} scan {percent:.1}% ({files} files)")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ipcfleet_api::Event;
    use ipcfleet_core::{BusConfig, ConnectionStatus, EventBus};
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[test]
    fn plain_camera_line() {
        let event = FleetEvent::Camera {
            device: "cam-1".into(),
            received_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            event: Event {
                code: "VideoMotion".into(),
                action: "Start".into(),
                ..Event::default()
            },
        };
        assert_eq!(plain_line(&event), "2024-05-01T12:00:00+00:00 cam-1 VideoMotion Start 0");
    }

    #[test]
    fn plain_connection_line_includes_error() {
        let event = FleetEvent::Connection {
            device: "cam-1".into(),
            status: ConnectionStatus::Disconnected,
            error: Some("HTTP 500".into()),
        };
        assert_eq!(plain_line(&event), "cam-1 disconnected: HTTP 500");
    }

    #[test]
    fn json_lines_are_tagged() {
        let event = FleetEvent::ScanProgress {
            device: "cam-1".into(),
            percent: 50.0,
            files: 7,
        };
        let line = render_event(&OutputFormat::Json, &event).unwrap();
        assert!(line.starts_with(r#"{"type":"scan_progress""#));
        assert!(!line.contains('\n'));
    }

    #[tokio::test]
    async fn closing_after_shutdown_reports_failure() {
        let cancel = CancellationToken::new();
        let bus = EventBus::<FleetEvent>::new(BusConfig::default(), cancel.child_token());

        let open = bus.subscribe_channel(&cancel, topics::ALL, 4).await.unwrap();
        assert!(close_subscription(open.subscription()).await);

        let late = bus.subscribe_channel(&cancel, topics::ALL, 4).await.unwrap();
        bus.shutdown();
        assert!(!close_subscription(late.subscription()).await);
    }
}
