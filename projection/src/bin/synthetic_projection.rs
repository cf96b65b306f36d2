//! Synthetic projection demo
//!
//! Builds a synthetic Gauss-Hermite calibration, projects one bundle of
//! spectra onto the detector, and renders the model image for a flux vector
//! holding one impulse per spectrum.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use ndarray::Array2;
use projection::{BundleProjector, ProjectionConfig, SyntheticPsf, WavelengthGrid};

/// Command line arguments for the synthetic projection demo
#[derive(Parser, Debug)]
#[command(version, about = "Synthetic spectrograph projection matrix")]
struct Args {
    /// Number of spectra
    #[arg(long, default_value_t = 5)]
    nspec: usize,

    /// First wavelength
    #[arg(long, default_value_t = 6000.0)]
    wave_start: f64,

    /// Last wavelength (inclusive when it lands on the grid)
    #[arg(long, default_value_t = 6049.0)]
    wave_stop: f64,

    /// Wavelength step
    #[arg(long, default_value_t = 1.0)]
    wave_step: f64,

    /// Gaussian core width in pixels
    #[arg(long, default_value_t = 1.0)]
    sigma: f64,

    /// Spot footprint size in pixels (square)
    #[arg(long, default_value_t = 11)]
    footprint: usize,

    /// Gauss-Hermite degree on both axes
    #[arg(long, default_value_t = 0)]
    gh_degree: usize,

    /// Worker lanes, one per core if omitted
    #[arg(long)]
    lanes: Option<usize>,

    /// JSON projection config; command line lanes and --verify override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Re-run assembly under a second lane grouping and compare
    #[arg(long, default_value_t = false)]
    verify: bool,

    /// Output directory for the model image and spot cache
    #[arg(long, default_value = "test_output/synthetic_projection")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProjectionConfig::load_from_file(path)?,
        None => ProjectionConfig::default(),
    };
    if args.lanes.is_some() {
        config.lanes = args.lanes;
    }
    config.verify_reproducibility |= args.verify;

    let mut psf = SyntheticPsf::new(args.nspec)
        .with_sigma(args.sigma)
        .with_footprint(args.footprint, args.footprint)
        .with_gh_degree(args.gh_degree, args.gh_degree);
    if args.gh_degree > 0 {
        psf = psf.with_gh_term(args.gh_degree, 0, 0.05);
    }
    let table = psf.build()?;
    let grid = WavelengthGrid::arange(args.wave_start, args.wave_stop, args.wave_step)?;
    let (nspec, nwave) = (args.nspec, grid.len());

    println!("Synthetic projection");
    println!("====================");
    println!("Spectra: {nspec}");
    println!(
        "Wavelengths: {nwave} ({:.2} to {:.2})",
        grid.bounds().0,
        grid.bounds().1
    );
    println!("Footprint: {0}x{0}, sigma {1:.2}", args.footprint, args.sigma);

    let projector = BundleProjector::new(config, table)?;
    println!("Lanes: {}", projector.device().lanes());

    let start = Instant::now();
    let mut images = Vec::new();
    for bundle in projector.bundles(0, nspec)? {
        let projection = projector.project(&grid, bundle.start, bundle.len())?;

        let mut flux = Array2::zeros((bundle.len(), nwave));
        for (i, ispec) in bundle.clone().enumerate() {
            flux[[i, (5 * (ispec + 1)) % nwave]] = 100.0 * (ispec + 1) as f64;
        }
        let image = projection.matrix.apply(flux.view())?;
        let (ny, nx, _, _) = projection.matrix.dim();
        println!(
            "Bundle {}..{}: A is {ny}x{nx}x{}x{nwave}, model flux {:.3}",
            bundle.start,
            bundle.end,
            bundle.len(),
            image.sum()
        );

        std::fs::create_dir_all(&args.output)?;
        let spots_path = args
            .output
            .join(format!("spots_{}_{}.json", bundle.start, bundle.end));
        projection.spots.save_to_file(&spots_path)?;
        images.push((bundle, image));
    }
    println!("Projection time: {:.1}ms", start.elapsed().as_secs_f64() * 1e3);

    for (bundle, image) in &images {
        let path = args
            .output
            .join(format!("model_{}_{}.json", bundle.start, bundle.end));
        std::fs::write(&path, serde_json::to_string(image)?)?;
        println!("Model image written to {}", path.display());
    }

    Ok(())
}
