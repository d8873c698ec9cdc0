#[tokio::main]
async fn main() -> anyhow::Result<()> {
    floorwatch_lib::run().await
}
