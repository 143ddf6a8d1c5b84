pub fn run() -> anyhow::Result<()> {
    println!("warden-audit {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
