//! Fiducial Marker Radius Estimation Example
//!
//! This example fits a sphere to the surface points of one fiducial marker,
//! read from a CSV file with one `x,y,z` row per point (physical units).
//! The points are usually exported by a segmentation or edge-detection step.
//!
//! Usage:
//! ```bash
//! cargo run --example fit_fiducial -- \
//!   --input samples/marker_edges.csv \
//!   --roi 5,-9,15,1 --z-range 25,35 \
//!   --refine
//! ```

use clap::Parser;
use fiducial_sphere::fitting::{FitConfig, SphereFitter};
use fiducial_sphere::geometry::{PointCloud, RegionOfInterest};
use fiducial_sphere::util;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info, warn};
use nalgebra::Point2;
use std::path::PathBuf;

/// Fiducial sphere fitting tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the CSV file with the marker points
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Optional YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Axial rectangle as x0,y0,x1,y1 used to crop the points
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    roi: Option<Vec<f64>>,

    /// z range as z0,z1 used together with --roi
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    z_range: Option<Vec<f64>>,

    /// Refine the algebraic fit with Levenberg-Marquardt
    #[arg(short = 'r', long)]
    refine: bool,

    /// Directory for the JSON/YAML reports
    #[arg(short = 'o', long, default_value = "output")]
    output_dir: PathBuf,
}

fn crop_points(
    points: PointCloud,
    roi: Option<&[f64]>,
    z_range: Option<&[f64]>,
) -> Result<PointCloud, Box<dyn std::error::Error>> {
    match (roi, z_range) {
        (Some(rect), Some(z)) => {
            if rect.len() != 4 || z.len() != 2 {
                error!(
                    "--roi needs 4 values and --z-range 2, got {} and {}",
                    rect.len(),
                    z.len()
                );
                return Err("--roi needs x0,y0,x1,y1 and --z-range needs z0,z1".into());
            }
            let region = RegionOfInterest::from_rectangle(
                &Point2::new(rect[0], rect[1]),
                &Point2::new(rect[2], rect[3]),
                (z[0], z[1]),
            )?;
            info!("Region of interest: {:?}", region);
            let cropped = region.crop(&points);
            info!("Kept {} of {} points", cropped.len(), points.len());
            Ok(cropped)
        }
        (None, None) => Ok(points),
        _ => {
            error!("--roi and --z-range must be given together");
            Err("--roi and --z-range must be given together".into())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        // error;warn;info;debug;trace
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    info!("Input Path: {:?}", cli.input);

    let mut config = match &cli.config {
        Some(path) => {
            let path_str = path.to_str().ok_or("Invalid config path string")?;
            FitConfig::load_from_yaml(path_str)?
        }
        None => FitConfig::default(),
    };
    if cli.refine {
        config.refine = true;
    }
    info!("Fit configuration: {:?}", config);

    let input_path_str = cli.input.to_str().ok_or("Invalid input path string")?;
    let points = PointCloud::load_from_csv(input_path_str)?;
    info!("Loaded {} points", points.len());

    let points = crop_points(points, cli.roi.as_deref(), cli.z_range.as_deref())?;

    let fitter = SphereFitter::new(config)?;
    let report = match fitter.fit_report(&points) {
        Ok(report) => report,
        Err(e) => {
            error!("Sphere fit failed: {e}");
            warn!("The selected points do not describe a sphere");
            return Err(e.into());
        }
    };

    util::display_fit_report(&report);

    let name = cli
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("sphere_fit");
    let (json_path, yaml_path) = util::export_fit_report(&report, &cli.output_dir, name)?;
    info!("Report written to {:?} and {:?}", json_path, yaml_path);

    Ok(())
}
