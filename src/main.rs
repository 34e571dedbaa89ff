use anyhow::Context;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let report = geo_harvest_lib::run().await.context("harvest run failed")?;
    println!(
        "Fetched {} in total. Usage consumed: {}, currently {} / {}",
        report.fetched,
        report.consumed(),
        report.usage_end.consumed,
        report.usage_end.total
    );
    Ok(())
}
