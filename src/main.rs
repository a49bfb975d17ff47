use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    octo_chat_bot::cli::run_cli().await
}
