use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regkit_core::{compose, decompose, flatten, ClipToRangeFilter, TransformKind};
use regkit_io::{
    read_composite_transform, read_nifti, read_nifti_geometry, read_nifti_header, read_rigid_transform,
    read_similarity_transform, write_nifti_like, write_transform,
};
use regkit_registration::{
    AntsToolkit, ConsoleProgressCallback, ExecutionConfig, PipelineConfig, RegistrationPipeline, RegistrationRequest,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type CpuBackend = burn_ndarray::NdArray<f32>;

#[derive(Parser)]
#[command(name = "regkit", version, about = "Rigid registration of 3D volumes")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a moving image onto a fixed image
    Register(RegisterArgs),

    /// Compose rigid transforms; the first one is applied last
    Compose {
        /// Output transform file
        #[arg(short, long)]
        output: PathBuf,

        /// Transform files
        #[arg(required = true)]
        transforms: Vec<PathBuf>,
    },

    /// Split a similarity transform into inverse scale and rigid parts
    Decompose {
        /// Similarity transform file
        #[arg(long)]
        transform: PathBuf,

        /// Image the transform was estimated against
        #[arg(long)]
        fixed_image: PathBuf,

        /// Output file for the inverse scale
        #[arg(long, default_value = "ai_invscale.mat")]
        inverse_scale: PathBuf,

        /// Output file for the rigid part
        #[arg(long, default_value = "ai_rigid.mat")]
        rigid: PathBuf,
    },

    /// Extract the single rigid transform wrapped by a composite file
    Flatten {
        /// Composite transform file
        #[arg(long)]
        composite: PathBuf,

        /// Output transform file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Clamp an image to the intensity range of a reference image
    Clip {
        #[arg(long)]
        image: PathBuf,

        #[arg(long)]
        reference: PathBuf,

        /// Defaults to overwriting the input image
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Parser)]
struct RegisterArgs {
    #[arg(long)]
    moving_image: PathBuf,

    #[arg(long)]
    fixed_image: PathBuf,

    #[arg(long)]
    fixed_brainmask: PathBuf,

    /// Mask for the first refinement stage
    #[arg(long)]
    fixed_regmask: Option<PathBuf>,

    /// Transform from the fixed image onto a further target
    #[arg(long)]
    fixed_transform: Option<PathBuf>,

    /// Image the fixed transform maps onto
    #[arg(long)]
    fixed_target: Option<PathBuf>,

    /// Correct a scale difference between moving and fixed first
    #[arg(long)]
    scale_fixed: bool,

    #[arg(long, default_value_t = 1)]
    num_threads: usize,

    #[arg(long)]
    output_dir: PathBuf,

    /// JSON pipeline configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep intermediate files after a successful run
    #[arg(long)]
    keep_workdir: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Register(args) => register(args)?,
        Commands::Compose { output, transforms } => {
            let rigids = transforms
                .iter()
                .map(read_rigid_transform)
                .collect::<Result<Vec<_>, _>>()?;
            let combined = compose(&rigids)?;
            write_transform(&output, &TransformKind::Rigid(combined))?;
            info!("Wrote {}", output.display());
        }
        Commands::Decompose {
            transform,
            fixed_image,
            inverse_scale,
            rigid,
        } => {
            let similarity = read_similarity_transform(&transform)?;
            let geometry = read_nifti_geometry(&fixed_image)?;
            let parts = decompose(&similarity, &geometry)?;
            write_transform(&inverse_scale, &TransformKind::Similarity(parts.inverse_scale))?;
            write_transform(&rigid, &TransformKind::Rigid(parts.rigid))?;
            info!("Wrote {} and {}", inverse_scale.display(), rigid.display());
        }
        Commands::Flatten { composite, output } => {
            let rigid = flatten(&read_composite_transform(&composite)?)?;
            write_transform(&output, &TransformKind::Rigid(rigid))?;
            info!("Wrote {}", output.display());
        }
        Commands::Clip {
            image,
            reference,
            output,
        } => {
            let device = Default::default();
            let reference = read_nifti::<CpuBackend, _>(&reference, &device)?;
            let filter = ClipToRangeFilter::from_reference(&reference)?;
            let header = read_nifti_header(&image)?;
            let clipped = filter.apply(&read_nifti::<CpuBackend, _>(&image, &device)?);
            let output = output.unwrap_or(image);
            write_nifti_like(&output, &clipped, &header)?;
            info!("Clipped to [{}, {}], wrote {}", filter.min(), filter.max(), output.display());
        }
    }

    Ok(())
}

fn register(args: RegisterArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let mut request = RegistrationRequest::new(
        args.moving_image,
        args.fixed_image,
        args.fixed_brainmask,
        args.output_dir,
    )
    .with_prior_parts(args.fixed_transform, args.fixed_target)?
    .with_scale_fixed(args.scale_fixed)
    .with_keep_workdir(args.keep_workdir);
    if let Some(regmask) = args.fixed_regmask {
        request = request.with_regmask(regmask);
    }

    let toolkit = AntsToolkit::from_env();
    let output = RegistrationPipeline::new(&toolkit, &toolkit)
        .with_config(config)
        .with_execution(ExecutionConfig::with_threads(args.num_threads))
        .with_callback(Arc::new(ConsoleProgressCallback))
        .run(&request)?;

    println!("{}", output.image.display());
    println!("{}", output.transform.display());
    Ok(())
}
