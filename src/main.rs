//! Headless demo binary: opens a media file, plays it without a window, and
//! reports sync/scheduler stats until end of stream or Ctrl-C.

use std::time::Duration;

use zenplay_core::config::Config;
use zenplay_core::playback::PlaybackController;

fn main() {
    tracing_subscriber::fmt::init();

    let Some(location) = std::env::args().nth(1) else {
        eprintln!("usage: zenplay-core <file-or-url>");
        std::process::exit(2);
    };

    let mut controller = PlaybackController::new(Config::default());

    if let Err(e) = controller.open(&location) {
        eprintln!("failed to open '{location}': {e}");
        std::process::exit(1);
    }

    tracing::info!(duration_ms = controller.duration_ms(), "opened media; playing headless (no render window)");

    if let Err(e) = controller.play() {
        eprintln!("failed to start playback: {e}");
        std::process::exit(1);
    }

    loop {
        std::thread::sleep(Duration::from_secs(1));
        tracing::info!(current_time_ms = controller.current_time_ms(), "playback position");
        if controller.current_time_ms() >= controller.duration_ms() && controller.duration_ms() > 0.0 {
            break;
        }
    }

    let _ = controller.close();
}
