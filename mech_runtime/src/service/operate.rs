//! Platform adapter backed by the `operate` command line tool

use super::normalize::service_config_paths;
use super::{ServicePlatform, ServiceRecord};
use crate::credentials::Password;
use crate::error::ConfigurationError;
use crate::workspace::read_to_string;
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Reads service records from the platform home and shells out for builds.
///
/// The command runs from the workspace root so that its home resolves to
/// `<root>/.operate`.
pub struct OperatePlatform {
    workdir: PathBuf,
    operate_dir: PathBuf,
    command: String,
    build_args: Vec<String>,
}

impl OperatePlatform {
    pub fn new(workdir: impl Into<PathBuf>, operate_dir: impl Into<PathBuf>, command: impl Into<String>, build_args: Vec<String>) -> Self {
        Self {
            workdir: workdir.into(),
            operate_dir: operate_dir.into(),
            command: command.into(),
            build_args,
        }
    }

    fn describe(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.build_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ServicePlatform for OperatePlatform {
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ConfigurationError> {
        let mut services = Vec::new();
        for path in service_config_paths(&self.operate_dir)? {
            debug!("Reading from: {}", path.display());
            let record: ServiceRecord =
                serde_json::from_str(&read_to_string(&path)?).map_err(|e| ConfigurationError::json(&path, e))?;
            services.push(record);
        }
        Ok(services)
    }

    async fn build_service_only(
        &self,
        config_path: &Path,
        staking_program_id: Option<&str>,
        password: &Password,
    ) -> Result<(), ConfigurationError> {
        info!("Building service from {} ({})", config_path.display(), self.describe());

        let mut command = Command::new(&self.command);
        command
            .args(&self.build_args)
            .arg(config_path)
            .current_dir(&self.workdir)
            .env("OPERATE_PASSWORD", password.expose())
            .env("ATTENDED", "true");
        if let Some(program) = staking_program_id {
            command.env("STAKING_PROGRAM", program);
        }

        let status = command
            .status()
            .await
            .map_err(|e| ConfigurationError::Platform(format!("failed to start `{}`: {}", self.command, e)))?;

        if !status.success() {
            return Err(ConfigurationError::Platform(format!("`{}` exited with {}", self.describe(), status)));
        }
        Ok(())
    }
}
