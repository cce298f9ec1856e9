use crate::cli::RunCommand;
use crate::config::AppConfig;
use crate::error::CourierResult;
use async_trait::async_trait;
use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use strum_macros::{EnumString, IntoStaticStr};
use tracing::info;

#[derive(Debug, Parser, Serialize)]
#[non_exhaustive]
pub struct PrintConfigArgs {
    /// Print the config with the specified format.
    #[clap(short, long, default_value = "toml")]
    pub format: Format,
}

#[derive(
    Debug, Clone, Eq, PartialEq, Serialize, Deserialize, EnumString, IntoStaticStr, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[non_exhaustive]
pub enum Format {
    Debug,
    Json,
    JsonPretty,
    Toml,
    TomlPretty,
}

impl PrintConfigArgs {
    fn render(&self, config: &AppConfig) -> CourierResult<String> {
        let rendered = match self.format {
            Format::Debug => format!("{config:?}"),
            Format::Json => serde_json::to_string(config)?,
            Format::JsonPretty => serde_json::to_string_pretty(config)?,
            Format::Toml => toml::to_string(config)?,
            Format::TomlPretty => toml::to_string_pretty(config)?,
        };
        Ok(rendered)
    }
}

#[async_trait]
impl RunCommand for PrintConfigArgs {
    async fn run(&self, config: AppConfig) -> CourierResult<()> {
        info!("\n{}", self.render(&config)?);
        Ok(())
    }
}
