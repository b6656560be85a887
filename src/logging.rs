/// Install a `fmt` subscriber at INFO, or DEBUG when `debug` is set.
///
/// Returns false when the host already installed a global subscriber,
/// in which case that one stays in place.
pub fn init(debug: bool) -> bool {
    let log_level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .try_init()
        .is_ok()
}
