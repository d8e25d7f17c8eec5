use std::collections::HashMap;

use crate::error::{Error, Result};

const ENV_NUM_WORKERS: &str = "BATCHFLOW_NUM_WORKERS";

/// Settings of a pipeline run that are not part of a builder, loaded from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Number of OS threads in the worker pool that runs the transforms.
    pub num_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            num_workers: default_num_workers(),
        }
    }
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Settings {
    /// Loads the settings from the given environment variables, unset variables take the default.
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| key == ENV_NUM_WORKERS)
            .collect();

        let num_workers = match env_vars.get(ENV_NUM_WORKERS) {
            Some(val) => val.trim().parse::<usize>().map_err(|e| {
                Error::Config(format!("Invalid {ENV_NUM_WORKERS} value {val:?}: {e}"))
            })?,
            None => default_num_workers(),
        };

        let settings = Settings { num_workers };
        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::Config(format!(
                "{ENV_NUM_WORKERS} must be greater than 0"
            )));
        }
        Ok(())
    }
}
