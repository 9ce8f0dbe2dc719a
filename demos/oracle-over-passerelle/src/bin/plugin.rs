//! Plugin side of the demo: serves [`SimulatedFactory`] over TCP.
//!
//! Prints `LISTENING <addr>` on stdout once the socket is bound; the host
//! binary and the cross-process tests read that line to find us.

use std::io::Write;
use std::sync::Arc;

use oracle_over_passerelle::{descriptor, SimulatedFactory};
use passerelle_core::StreamTransport;
use passerelle_oracle::serve_provider;
use tokio::net::TcpListener;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(async_main())
}

async fn async_main() -> std::io::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:0".to_string());
    let listener = TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;

    println!("LISTENING {local}");
    std::io::stdout().flush()?;
    tracing::info!(%local, "plugin: listening");

    let factory = Arc::new(SimulatedFactory);
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "plugin: connection accepted");
        let descriptor = descriptor();
        let factory = factory.clone();
        tokio::spawn(async move {
            let transport = StreamTransport::new(stream);
            match serve_provider(transport, &descriptor, factory).await {
                Ok(()) => tracing::info!("plugin: connection closed"),
                Err(e) => tracing::warn!(error = %e, "plugin: connection ended with error"),
            }
        });
    }
}
