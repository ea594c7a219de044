use anyhow::Result;

#[tokio::main]
pub async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    balance_reporter::start_reporter().await
}
