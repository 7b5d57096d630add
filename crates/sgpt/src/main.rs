use std::sync::Arc;

use sgpt_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), sgpt_core::Error> {
    sgpt_core::logging::init("sgpt")?;

    let cfg = Arc::new(Config::load()?);

    sgpt_slack::router::run(cfg)
        .await
        .map_err(|e| sgpt_core::Error::External(format!("slack bot failed: {e:#}")))?;

    Ok(())
}
