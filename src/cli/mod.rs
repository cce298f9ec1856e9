//! The `courier` command line. With no subcommand it runs the worker process.

use crate::app;
use crate::cli::enqueue_email::EnqueueEmailArgs;
use crate::cli::print_config::PrintConfigArgs;
use crate::config::AppConfig;
use crate::config::environment::Environment;
use crate::error::CourierResult;
use crate::tracing::init_tracing;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod enqueue_email;
pub mod print_config;

/// Implemented by subcommands that need the loaded config.
#[async_trait]
pub trait RunCommand {
    async fn run(&self, config: AppConfig) -> CourierResult<()>;
}

/// Courier: runs the background task worker, and provides utilities for submitting tasks and
/// inspecting its config. If no subcommand is given, the worker is started.
#[derive(Debug, Parser)]
#[command(version, about)]
#[non_exhaustive]
pub struct CourierCli {
    /// Specify the environment to load config for. This overrides the corresponding environment
    /// variable if it's set.
    #[clap(short, long, global = true)]
    pub environment: Option<Environment>,

    /// Directory containing `default.toml` and `{environment}.toml` config files. Defaults to
    /// `config/`.
    #[clap(long, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CourierCommand>,
}

#[derive(Debug, Subcommand)]
#[non_exhaustive]
pub enum CourierCommand {
    /// Run the worker pool until ctrl-c or SIGTERM is received.
    Worker,

    /// Submit an email task to the broker.
    EnqueueEmail(EnqueueEmailArgs),

    /// Print the app's config in the specified format.
    PrintConfig(PrintConfigArgs),
}

impl CourierCli {
    /// Load the config, initialize tracing, and run the selected command.
    pub async fn run(&self) -> CourierResult<()> {
        let config = AppConfig::new_with_config_dir(self.environment, self.config_dir.clone())?;
        init_tracing(&config)?;

        match self.command.as_ref() {
            None | Some(CourierCommand::Worker) => app::start(config).await,
            Some(CourierCommand::EnqueueEmail(args)) => args.run(config).await,
            Some(CourierCommand::PrintConfig(args)) => args.run(config).await,
        }
    }
}
