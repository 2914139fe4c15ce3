mod clock;
mod host;
mod ports;
mod scheduler;
mod sensor_feed;
mod store;
mod valve;
mod zone;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
