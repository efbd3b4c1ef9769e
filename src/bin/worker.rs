#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = pathway_rust::run_worker().await {
        eprintln!("pathway-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
