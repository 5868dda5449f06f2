use anyhow::Result;
use fieldgate::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::start()?;
    args.execute().await
}
