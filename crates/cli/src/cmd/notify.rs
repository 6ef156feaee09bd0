//! Implementation of the `hotpatch notify` command.

use anyhow::{Context, Result, bail};

use hotpatch_lib::consts::BUILD_HOOK_PATH;
use hotpatch_lib::signal::BuildReport;
use hotpatch_lib::types::BuildId;

use crate::output::{print_success, print_warning, truncate_hash};

/// Post a build report to the server's build hook.
///
/// A successful build needs its identifier; a failed one may omit it.
pub fn cmd_notify(base_url: &str, hash: Option<String>, failed: bool, errors: Vec<String>) -> Result<()> {
  let report = build_report(hash, failed, errors)?;
  let url = format!("{}{}", base_url.trim_end_matches('/'), BUILD_HOOK_PATH);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let status = rt
    .block_on(reqwest::Client::new().post(&url).json(&report).send())
    .with_context(|| format!("Failed to reach {}", url))?
    .status();
  if !status.is_success() {
    bail!("Build server rejected the report: HTTP {}", status);
  }

  match &report {
    BuildReport::Succeeded { hash } => print_success(&format!("Announced build {}", truncate_hash(hash.as_str()))),
    BuildReport::Failed { errors, .. } => {
      print_warning(&format!("Reported failed build ({} error(s))", errors.len()))
    }
  }
  Ok(())
}

fn build_report(hash: Option<String>, failed: bool, errors: Vec<String>) -> Result<BuildReport> {
  if failed {
    return Ok(BuildReport::Failed {
      hash: hash.map(BuildId::new),
      errors,
    });
  }
  let hash = hash.context("--hash is required unless --failed is given")?;
  Ok(BuildReport::Succeeded { hash: BuildId::new(hash) })
}
