mod output;

use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use regionsnap::capture::{Desktop, XcapDesktop};
use regionsnap::config::Config;
use regionsnap::hotkeys::{format_hotkey, HotkeyAction, HotkeyBindings};
use regionsnap::input::platform_listener;
use regionsnap::overlay::DesktopOverlayFactory;
use regionsnap::recording::FrameRecorderBackend;
use regionsnap::{CaptureCoordinator, CaptureService};

use output::ResultSink;

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("using default configuration: {}", e);
        Config::default()
    });
    match config.save_if_missing() {
        Ok(true) => tracing::info!("wrote default configuration"),
        Ok(false) => {}
        Err(e) => tracing::warn!("could not write configuration: {}", e),
    }
    config
        .ensure_output_dir()
        .context("failed to prepare output directory")?;
    let bindings = HotkeyBindings::from_config(&config.hotkeys)?;

    for action in HotkeyAction::all() {
        tracing::info!(
            "{}: {}",
            action.display_name(),
            format_hotkey(bindings.binding(*action))
        );
    }

    let desktop: Arc<dyn Desktop> = Arc::new(XcapDesktop::new());
    let listener = platform_listener().context("failed to start input listener")?;
    let hide_cursor = config.capture.hide_cursor;
    let recording = config.recording.settings();

    let service = CaptureService::start(listener, |mouse| {
        CaptureCoordinator::new(
            Arc::clone(&desktop),
            Box::new(DesktopOverlayFactory::new(Arc::clone(&desktop))),
            Box::new(FrameRecorderBackend::new(Arc::clone(&desktop), recording)),
            mouse,
        )
        .with_bindings(bindings)
        .with_hide_cursor(hide_cursor)
    })?;
    service.set_capture_video(config.capture.capture_video);

    // Results are written from this thread, never from inside the hook.
    let (tx, rx) = channel();
    service.subscribe(Box::new(move |result| {
        if tx.send(result).is_err() {
            tracing::warn!("capture dropped, output loop has exited");
        }
    }));

    let mut sink = ResultSink::new(config);
    loop {
        match rx.recv_timeout(PUMP_INTERVAL) {
            Ok(result) => {
                if let Err(e) = sink.handle(result) {
                    tracing::error!("failed to save capture: {:#}", e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        service.pump();
    }

    Ok(())
}
