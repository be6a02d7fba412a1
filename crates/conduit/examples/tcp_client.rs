//! TCP client example demonstrating a request/response round trip.
//!
//! First start a server listening at 127.0.0.1:9000 with a `ping` request
//! handler registered, then run: `cargo run --example tcp_client -p conduit`

use conduit::prelude::*;
use conduit::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    conduit::logging::init();

    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 9000,
        ..Config::default()
    };

    println!("connecting to {}...", config.addr());
    let mut client: Client<()> = Client::connect(&config).await?;
    if !client.ready().await {
        return Err("connection closed before handshake completed".into());
    }
    println!("connected");

    let (_id, rx) = client.fetch("ping", Some(b"hello".to_vec()));
    let response = rx.await?;
    if response.error.is_empty() {
        println!("ping -> {}", String::from_utf8_lossy(&response.data));
    } else {
        println!("ping failed: {}", response.error);
    }

    Ok(())
}
