use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize standard structured logging for the daemon.
pub fn init(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Ignore err on re-init
}
