//! Broadcast Dispatcher - Entry Point
//!
//! Runs the schedulers, movers, and send workers of the broadcast pipeline.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    broadcast_dispatcher::run().await
}
