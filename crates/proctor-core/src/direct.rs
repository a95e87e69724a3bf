//! Standalone execution: run a local workload file without an agency.

use anyhow::{Context, Result, bail};

use crate::options::AgentOptions;
use crate::workload::{Workload, run_workload, workload_base_dir};

/// Highest status returned for failed tests; larger counts are clamped so
/// the value survives an 8-bit exit status.
pub const MAX_FAILURE_STATUS: usize = 127;

/// Load and run the single workload file in `options`.
///
/// Returns the number of failed tests (clamped to [`MAX_FAILURE_STATUS`])
/// for use as the process exit status.
pub async fn execute_directly(options: &AgentOptions) -> Result<i32> {
    let [path] = options.files() else {
        bail!(
            "direct execution needs exactly one workload file, got {}",
            options.files().len()
        );
    };

    let workload = Workload::load(path)
        .with_context(|| format!("failed to load workload {}", path.display()))?;
    tracing::info!(
        workload = %workload.name,
        path = %path.display(),
        tests = workload.tests.len(),
        "running workload directly"
    );

    let report = run_workload(&workload, &workload_base_dir(path)).await;
    tracing::info!(summary = %report.summary(), "workload finished");

    let failed = report.failed().min(MAX_FAILURE_STATUS);
    // Clamped above, always fits.
    Ok(i32::try_from(failed).unwrap_or(i32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_file_is_an_error() {
        let options = AgentOptions::parse(["--trace=Info"]).unwrap();
        let err = execute_directly(&options).await.unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[tokio::test]
    async fn unparsable_workload_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let options = AgentOptions::parse([path.to_str().unwrap()]).unwrap();
        let err = execute_directly(&options).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to load workload"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_is_failure_count() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("w.toml");
        std::fs::write(
            &path,
            r#"
name = "w"

[[test]]
name = "pass"
command = "true"

[[test]]
name = "fail-1"
command = "false"

[[test]]
name = "fail-2"
command = "sh"
args = ["-c", "exit 9"]
"#,
        )
        .unwrap();
        let options = AgentOptions::parse([path.to_str().unwrap()]).unwrap();
        assert_eq!(execute_directly(&options).await.unwrap(), 2);
    }
}
