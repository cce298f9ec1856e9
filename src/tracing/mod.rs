use crate::config::AppConfig;
use crate::config::tracing::{Format, Tracing};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global tracing subscriber: stdout in the configured [`Format`], filtered by
/// `RUST_LOG` if it's set, otherwise by `tracing.level` plus `tracing.trace-filters`.
pub fn init_tracing(app_config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = env_filter(&app_config.tracing)?;

    let registry = tracing_subscriber::Registry::default().with(env_filter);
    match app_config.tracing.format {
        Format::None => registry.try_init()?,
        Format::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?,
        Format::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?,
        Format::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }

    Ok(())
}

fn env_filter(config: &Tracing) -> anyhow::Result<EnvFilter> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::from_str(&config.level)?.into())
        .from_env()?;

    let env_filter = config
        .trace_filters
        .iter()
        .try_fold(env_filter, |env_filter, filter| {
            Ok::<_, anyhow::Error>(env_filter.add_directive(filter.parse()?))
        })?;

    Ok(env_filter)
}
