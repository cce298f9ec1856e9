use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};
use std::borrow::Cow;
use strum_macros::{EnumString, IntoStaticStr};
use tracing_subscriber::EnvFilter;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct Tracing {
    /// Default level for logs. `RUST_LOG` takes precedence when set.
    pub level: String,

    /// The format to use when printing logs to stdout.
    pub format: Format,

    /// Extra [EnvFilter](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html)
    /// directives, e.g. to quiet a noisy dependency.
    #[serde(default)]
    #[validate(custom(function = "validate_env_filters"))]
    pub trace_filters: Vec<String>,
}

fn validate_env_filters(trace_filters: &[String]) -> Result<(), ValidationError> {
    let (filters, errors): (Vec<_>, Vec<_>) = trace_filters
        .iter()
        .filter_map(|filter| {
            filter
                .parse::<EnvFilter>()
                .err()
                .map(|err| (filter.clone(), err.to_string()))
        })
        .unzip();

    if filters.is_empty() {
        return Ok(());
    }

    let mut err = ValidationError::new("Invalid env filter(s)");
    err.add_param(Cow::from("filters"), &filters.iter().join(", "));
    err.add_param(Cow::from("errors"), &errors);
    Err(err)
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, EnumString, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[non_exhaustive]
pub enum Format {
    None,
    Pretty,
    Compact,
    Json,
}
