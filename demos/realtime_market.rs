use market_realtime::{ClientConfig, ClientEvent, RealtimeClient};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct PriceUpdate {
    topic: String,
    price: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // e.g. REALTIME_URL=wss://markets.example.com/ws
    let url = std::env::var("REALTIME_URL")
        .unwrap_or_else(|_| ClientConfig::DEFAULT_WS_URL.to_string());
    let mut config = ClientConfig::new(url);
    if let Ok(identity) = std::env::var("REALTIME_USER_ID") {
        config = config.with_identity(identity);
    }

    let client = RealtimeClient::new(config)?;

    // Market IDs to subscribe to
    let markets: Vec<String> = std::env::args().skip(1).collect();
    let markets = if markets.is_empty() {
        vec!["market-1".to_string()]
    } else {
        markets
    };

    let event_count = Arc::new(AtomicUsize::new(0));
    let _prices = {
        let event_count = Arc::clone(&event_count);
        client.on("price_update", move |update: PriceUpdate| {
            let n = event_count.fetch_add(1, Ordering::Relaxed) + 1;
            println!("[Price Update #{}]", n);
            println!("  Market: {}", update.topic);
            println!("  Price: {}", update.price);
            println!();
            Ok(())
        })
    };
    let _trades = client.on_message("trade", |msg| {
        println!("[Trade] {}", serde_json::Value::Object(msg.payload().clone()));
        Ok(())
    });

    println!("Subscribing to {} market(s)", markets.len());
    for market in &markets {
        client.subscribe(market.as_str()).await?;
    }

    let mut events = client.events();
    client.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Connected { generation }) => {
                    println!("✅ Connected (connection #{})", generation);
                    if let Err(e) = client.ping().await {
                        eprintln!("ping failed: {}", e);
                    }
                }
                Ok(ClientEvent::ConnectionLost { attempt, reason, .. }) => {
                    println!("⚠️  Connection lost ({}), reconnect attempt {}", reason, attempt);
                }
                Ok(ClientEvent::MaxAttemptsExhausted { attempts, last_error }) => {
                    eprintln!("❌ Gave up after {} attempts: {}", attempts, last_error);
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("missed {} lifecycle events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await?;
    println!(
        "Realtime client stopped after {} price updates.",
        event_count.load(Ordering::Relaxed)
    );
    Ok(())
}
