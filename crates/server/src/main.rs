use anyhow::Context;

use auction_product_infra::AppConfig;
use auction_product_observability::LogSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let log = LogSettings::new(config.log_level.clone(), &config.log_format)
        .context("invalid LOG_FORMAT")?;
    auction_product_observability::init(&log);

    auction_product_server::app::run(config).await
}
