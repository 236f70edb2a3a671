//! Dump hub demo - one producer, an early viewer and a late viewer
//!
//! Run with: cargo run --example dump_hub [OUTPUT_DIR] [SESSION_ID]
//!
//! Examples:
//!   cargo run --example dump_hub                      # logs under $TMPDIR/dumphub-demo
//!   cargo run --example dump_hub ./dumps              # logs under ./dumps
//!   cargo run --example dump_hub ./dumps a1b2c3       # custom session id
//!
//! Run it twice against the same directory: the second run replays the first
//! run's frames from disk and keeps numbering where it stopped.
//!
//! ## What it shows
//!
//! - The early viewer receives every frame live
//! - The late viewer replays history, then continues live with no gap
//! - Lifecycle notifications from `SessionTable::events`
//! - The garbage collector announcing a viewer that went away

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dumphub::{GarbageCollector, HubConfig, HubEvent, SessionTable, SubscriberStream};
use futures_util::stream::{self, StreamExt};

/// Print every frame a viewer receives until its stream ends
fn spawn_viewer(name: &'static str, mut stream: SubscriberStream) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut frames = 0;
        while let Some(chunk) = stream.next().await {
            for frame in String::from_utf8_lossy(&chunk).split_terminator("\n\n") {
                println!("[{}] {}", name, frame.replace('\n', " | "));
                frames += 1;
            }
        }
        println!("[{}] stream ended after {} frames", name, frames);
        frames
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Usage: dump_hub [OUTPUT_DIR] [SESSION_ID]");
        return Ok(());
    }

    let output_dir = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("dumphub-demo"));
    let session_id = args.get(2).map(String::as_str).unwrap_or("demo01");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dumphub=info".parse()?)
                .add_directive("dump_hub=debug".parse()?),
        )
        .init();

    let config = HubConfig::with_output_dir(&output_dir)
        .cleanup_interval(Duration::from_millis(200))
        .session_idle_timeout(Duration::from_secs(30));
    let table = Arc::new(SessionTable::with_config(config));
    let gc = Arc::new(GarbageCollector::new(Arc::clone(&table))).spawn();

    let mut events = table.events();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                HubEvent::ClientCount { session_id, count } => {
                    println!("[hub] {} has {} viewer(s)", session_id, count)
                }
                other => println!("[hub] {:?}", other),
            }
        }
    });

    println!("Session {} logging to {}", session_id, output_dir.display());
    let session = table.get_or_create(session_id).await?;

    let early = spawn_viewer("early", session.subscribe().await?);

    // A producer streaming lines with small pauses, like a process dumping state
    let producer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let lines = stream::iter(1..=10).then(|i| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, std::io::Error>(Bytes::from(format!("tick {}", i)))
            });
            session.publish(lines).await
        })
    };

    tokio::time::sleep(Duration::from_millis(250)).await;
    let late = spawn_viewer("late", session.subscribe().await?);

    let receipt = producer.await??;
    println!(
        "Published {} frames ({} bytes), ids {:?}..={:?}",
        receipt.frames, receipt.bytes, receipt.first_id, receipt.last_id
    );

    let id = session
        .broadcast_event(&serde_json::json!({ "level": "info", "msg": "dump complete" }))
        .await?;
    println!("Structured event published as id {}", id);

    // A third viewer that leaves at once; the collector announces it
    drop(session.subscribe().await?);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = table.stats().await;
    println!(
        "Hub: sessions={} viewers={} frames={} bytes={}",
        stats.sessions, stats.subscribers, stats.frames_published, stats.bytes_published
    );

    session.close().await;
    let early_frames = early.await?;
    let late_frames = late.await?;
    println!("early saw {} frames, late saw {}", early_frames, late_frames);

    gc.abort();
    watcher.abort();
    Ok(())
}
