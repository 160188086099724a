#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = obe_exam::run().await {
        eprintln!("obe-exam fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
