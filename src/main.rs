#[tokio::main]
async fn main() -> anyhow::Result<()> {
    diary_bff_lib::run().await
}
