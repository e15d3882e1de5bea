mod config;
mod connectivity;
mod device;
mod history;
mod host;
mod monitor;
mod store;
mod sync;
mod tag_reader;
mod timers;
mod wifi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
