//! Follow the relay from a terminal.
//!
//! Usage: relay-tail [ws-url]   (default: $RELAY_URL or ws://127.0.0.1:3001)

use futures::stream::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chessrelay::framer::FrameDecoder;
use chessrelay::protocol::Event;
use chessrelay::view::PipelineView;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_tail=info,chessrelay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RELAY_URL").ok())
        .unwrap_or_else(|| "ws://127.0.0.1:3001".to_string());

    let (mut socket, _) = match connect_async(url.as_str()).await {
        Ok(connection) => connection,
        Err(e) => {
            tracing::error!("Failed to connect to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Connected to {}", url);

    let mut decoder = FrameDecoder::new();
    let mut view = PipelineView::new();

    while let Some(msg) = socket.next().await {
        let events = match msg {
            Ok(Message::Text(text)) => decoder.push_str(text.as_str()),
            Ok(Message::Binary(bytes)) => decoder.push_bytes(&bytes),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Connection error: {}", e);
                break;
            }
        };

        for event in &events {
            view.apply(event);
            print_event(event, &view);
        }
    }

    tracing::info!(
        completed_runs = view.completed_runs(),
        dropped_frames = decoder.dropped_frames(),
        "Disconnected"
    );
}

fn print_event(event: &Event, view: &PipelineView) {
    let now = chrono::Local::now().format("%H:%M:%S");
    match event {
        Event::Text { content } => println!("[{}] {}", now, content),
        Event::Image { title, .. } => {
            let size = event.image_bytes().map(|b| b.len()).unwrap_or(0);
            let shown: Vec<_> = view.images().map(|img| img.title.as_str()).collect();
            println!(
                "[{}] image '{}' ({} bytes), showing: {}",
                now,
                title,
                size,
                shown.join(" | ")
            );
        }
        Event::Clear => println!("[{}] -- cleared --", now),
        Event::Finished => println!(
            "[{}] -- run finished ({} total), refresh board --",
            now,
            view.completed_runs()
        ),
    }
}
