//! Workspace bootstrap from the embedded runtime templates

use super::{ensure_dir, write_file, WorkspaceContext};
use crate::chains::SupportedChain;
use crate::error::ConfigurationError;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

/// Environment template shipped with the tool
pub const ENV_TEMPLATE: &str = include_str!("../../templates/.example.env");

const CHAIN_TEMPLATES: [(SupportedChain, &str); 4] = [
    (
        SupportedChain::Gnosis,
        include_str!("../../templates/config_mech_gnosis.json"),
    ),
    (
        SupportedChain::Base,
        include_str!("../../templates/config_mech_base.json"),
    ),
    (
        SupportedChain::Polygon,
        include_str!("../../templates/config_mech_polygon.json"),
    ),
    (
        SupportedChain::Optimism,
        include_str!("../../templates/config_mech_optimism.json"),
    ),
];

/// Packaged handler registry, relative to `packages/`
const PACKAGED_HANDLERS: [(&str, &str); 3] = [
    (
        "valory/customs/echo/component.yaml",
        include_str!("../../templates/packages/valory/customs/echo/component.yaml"),
    ),
    (
        "valory/customs/echo/echo.py",
        include_str!("../../templates/packages/valory/customs/echo/echo.py"),
    ),
    (
        "valory/customs/echo/__init__.py",
        include_str!("../../templates/packages/valory/customs/echo/__init__.py"),
    ),
];

/// Files touched by one bootstrap run
#[derive(Debug, Default, Clone)]
pub struct BootstrapReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Embedded service template for `chain`
pub fn chain_template(chain: SupportedChain) -> &'static str {
    CHAIN_TEMPLATES
        .iter()
        .find(|(c, _)| *c == chain)
        .map(|(_, t)| *t)
        .unwrap_or_default()
}

/// Initialize or refresh the workspace layout.
///
/// Without `force`, existing files are left untouched. With `force`, every
/// template is rewritten, `.env` is reset to the template and the package
/// registry is replaced by the packaged one.
pub fn initialize_workspace(ctx: &WorkspaceContext, force: bool) -> Result<BootstrapReport, ConfigurationError> {
    ctx.ensure_root_exists()?;
    ensure_dir(&ctx.config_dir())?;
    ensure_dir(&ctx.keys_dir())?;
    ensure_dir(&ctx.operate_dir())?;

    let mut report = BootstrapReport::default();

    let mut templates: Vec<(PathBuf, &str)> = CHAIN_TEMPLATES
        .iter()
        .map(|(chain, contents)| (ctx.chain_template_path(*chain), *contents))
        .collect();
    templates.push((ctx.env_template_path(), ENV_TEMPLATE));

    for (target, contents) in templates {
        place(&target, contents, force, &mut report)?;
    }
    place(&ctx.env_path(), ENV_TEMPLATE, force, &mut report)?;

    let packages_dir = ctx.packages_dir();
    if force && packages_dir.exists() {
        info!("Replacing package registry at {}", packages_dir.display());
        fs::remove_dir_all(&packages_dir).map_err(|e| ConfigurationError::io(&packages_dir, e))?;
    }
    if !packages_dir.exists() {
        for (relative, contents) in PACKAGED_HANDLERS {
            let target = packages_dir.join(relative);
            write_file(&target, contents.as_bytes())?;
            report.written.push(target);
        }
    } else {
        report.skipped.push(packages_dir);
    }

    write_file(&ctx.initialized_marker_path(), b"initialized\n")?;
    info!(
        "Workspace initialized at {} ({} written, {} kept)",
        ctx.root().display(),
        report.written.len(),
        report.skipped.len()
    );
    Ok(report)
}

fn place(target: &PathBuf, contents: &str, force: bool, report: &mut BootstrapReport) -> Result<(), ConfigurationError> {
    if target.exists() && !force {
        debug!("Keeping existing {}", target.display());
        report.skipped.push(target.clone());
        return Ok(());
    }
    write_file(target, contents.as_bytes())?;
    report.written.push(target.clone());
    Ok(())
}
