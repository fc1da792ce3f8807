use anyhow::Result;
use factflux_core::init_metrics_from_env;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tower_http=debug"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer();
    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)?;
    init_metrics_from_env("factflux-api");

    Ok(())
}
