use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = console_server::app::run().await {
        tracing::error!(error = %err, "agent console server stopped");
        std::process::exit(1);
    }
}
