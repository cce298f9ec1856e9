use crate::config::{ENV_VAR_PREFIX, ENV_VAR_SEPARATOR};
use crate::error::CourierResult;
use crate::error::config::ConfigError;
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use strum_macros::{Display, EnumString, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
    Display,
)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[non_exhaustive]
pub enum Environment {
    #[strum(to_string = "development", serialize = "dev")]
    #[cfg_attr(feature = "cli", value(alias = "dev"))]
    Development,
    Test,
    #[strum(to_string = "production", serialize = "prod")]
    #[cfg_attr(feature = "cli", value(alias = "prod"))]
    Production,
}

/// Config key the resolved environment is written to.
pub(crate) const ENVIRONMENT_CONFIG_KEY: &str = "environment";

impl Environment {
    /// Read the environment from the `COURIER__ENVIRONMENT` env var.
    // This runs before tracing is initialized, so we need to use `println` in order to
    // log from this method.
    #[allow(clippy::disallowed_macros)]
    pub fn new() -> CourierResult<Self> {
        let var_name = format!("{ENV_VAR_PREFIX}{ENV_VAR_SEPARATOR}ENVIRONMENT");
        let environment = env::var(&var_name)
            .map_err(|_| ConfigError::Environment(format!("Env var `{var_name}` not defined.")))?;
        let environment = <Environment as FromStr>::from_str(&environment).map_err(|err| {
            ConfigError::Environment(format!(
                "Unable to parse `{var_name}` env var with value `{environment}`: {err}"
            ))
        })?;
        println!("Using environment from `{var_name}` env var: {environment}");
        Ok(environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("development", Environment::Development)]
    #[case("dev", Environment::Development)]
    #[case("test", Environment::Test)]
    #[case("production", Environment::Production)]
    #[case("prod", Environment::Production)]
    fn environment_from_str(#[case] input: &str, #[case] expected: Environment) {
        assert_eq!(Environment::from_str(input).unwrap(), expected);
    }

    #[test]
    fn environment_from_str_unknown() {
        assert!(Environment::from_str("staging").is_err());
    }

    #[rstest]
    #[case(Environment::Development, "development")]
    #[case(Environment::Test, "test")]
    #[case(Environment::Production, "production")]
    fn environment_to_str(#[case] env: Environment, #[case] expected: &str) {
        let as_str: &'static str = env.into();
        assert_eq!(as_str, expected);
        assert_eq!(env.to_string(), expected);
    }
}
