#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = pathway_rust::run().await {
        eprintln!("pathway-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
