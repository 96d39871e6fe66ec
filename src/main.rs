use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("temple_events=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let dashboard = temple_events::run().await?;
    println!("{}", serde_json::to_string_pretty(&dashboard)?);
    Ok(())
}
