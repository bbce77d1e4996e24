use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber, filtered by `RUST_LOG`.
/// Calling it twice is harmless.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("essayist_api=info,tower_http=info"));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
