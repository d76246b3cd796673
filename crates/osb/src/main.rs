use std::sync::Arc;

use osb_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), osb_core::Error> {
    osb_core::logging::init("osb")?;

    let cfg = Arc::new(Config::load()?);

    osb_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| osb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
