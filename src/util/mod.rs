//! Report output: result files and console summaries.

use crate::fitting::{FitReport, FitResidual, SphereFitError};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Ensure the output directory exists
pub fn ensure_output_dir(output_dir: &Path) -> Result<(), SphereFitError> {
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|e| {
            SphereFitError::IOError(format!("Failed to create output directory: {e}"))
        })?;
    }
    Ok(())
}

/// Export a fit report as JSON and YAML
///
/// # Arguments
///
/// * `report` - The fit report to export
/// * `output_dir` - Directory receiving the files, created if missing
/// * `name` - File stem for `<name>.json` and `<name>.yaml`
///
/// # Returns
///
/// * `Result<(PathBuf, PathBuf), SphereFitError>` - Paths of the JSON and YAML files
pub fn export_fit_report(
    report: &FitReport,
    output_dir: &Path,
    name: &str,
) -> Result<(PathBuf, PathBuf), SphereFitError> {
    ensure_output_dir(output_dir)?;

    let json_path = output_dir.join(format!("{name}.json"));
    let json = serde_json::to_string_pretty(report)?;
    let mut json_file = File::create(&json_path)?;
    json_file.write_all(json.as_bytes())?;

    let yaml_path = output_dir.join(format!("{name}.yaml"));
    let yaml =
        serde_yaml::to_string(report).map_err(|e| SphereFitError::YamlError(e.to_string()))?;
    let mut yaml_file = File::create(&yaml_path)?;
    yaml_file.write_all(yaml.as_bytes())?;

    Ok((json_path, yaml_path))
}

fn format_residual(residual: &FitResidual) -> String {
    format!(
        "rmse {:.6}  mean {:.6}  median {:.6}  max {:.6}",
        residual.rmse, residual.mean, residual.median, residual.max
    )
}

/// Print a summary of a fit report to stdout
pub fn display_fit_report(report: &FitReport) {
    println!("\n📊 Sphere Fit Results ({} points):", report.num_points);
    println!("{:-<72}", "");
    println!("Algebraic  | {}", report.algebraic);
    println!("           | {}", format_residual(&report.algebraic_residual));

    if let (Some(refined), Some(residual)) = (&report.refined, &report.refined_residual) {
        println!("Geometric  | {refined}");
        println!("           | {}", format_residual(residual));
        println!(
            "Radius change after refinement: {:+.6}",
            refined.radius - report.algebraic.radius
        );
    }
    println!("{:-<72}", "");
    println!(
        "Estimated radius: {:.6} (diameter {:.6})",
        report.best().radius,
        2.0 * report.best().radius
    );
}
