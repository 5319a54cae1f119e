fn main() -> anyhow::Result<()> {
    sqlscout::run()?;
    Ok(())
}
