#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gemini_agent_lib::run().await
}
