//! gammasim CLI
//!
//! Runs Monte-Carlo simulation-and-refit campaigns and builds candidate
//! source grids.

use clap::{Args, Parser, Subcommand};
use gammasim_core::{grid_sources, GridParams, LikelihoodFitEngine, SourceCatalog};
use gammasim_env::{
    CoefficientMode, EmissionModes, FitParams, FixFlag, FsDiffuseStore, FsMapStore, MapStore, ResponsePaths,
};
use gammasim_sim::{
    campaign_rng, resolve_seed, Campaign, CampaignConfig, CampaignExport, EngineLifetime, OperationMode, EXIT_CONFIG,
};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit status when an output file cannot be written (`EX_IOERR`).
const EXIT_IO: i32 = 74;

#[derive(Parser, Debug)]
#[command(name = "gammasim")]
#[command(about = "Monte-Carlo simulation and refit campaigns for gamma-ray count maps", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulation-and-refit campaign
    Run(RunArgs),

    /// Append a grid of candidate sources to a source list
    Grid(GridArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Legacy operation mode bitmask (1 concise, 2 skip analysis, 4 double analysis, 8 save maps)
    #[arg(long, default_value = "0")]
    opmode: u32,

    /// Append one line per run to <outfile>.log instead of per-block results
    #[arg(long)]
    concise: bool,

    /// Simulate only
    #[arg(long)]
    skip_analysis: bool,

    /// Refit every analysis with the first fit's sources
    #[arg(long)]
    double_analysis: bool,

    /// Save every simulated and summed map
    #[arg(long)]
    save_maps: bool,

    /// Sliding-window size (0 = fit each run's maps together)
    #[arg(long, default_value = "0")]
    block: usize,

    /// Number of runs
    #[arg(long, default_value = "1")]
    nruns: usize,

    /// Master seed for determinism (0 = random from system entropy)
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Effective-area response file
    #[arg(long)]
    sarfile: PathBuf,

    /// Energy-dispersion response file
    #[arg(long)]
    edpfile: PathBuf,

    /// Point-spread response file
    #[arg(long)]
    psdfile: PathBuf,

    /// Map list used for simulation
    #[arg(long)]
    maplistsim: PathBuf,

    /// Source list used for simulation
    #[arg(long)]
    srclistsim: PathBuf,

    /// Base name of every output product
    #[arg(long)]
    outfile: String,

    /// Map list used for analysis (defaults to the simulation map list)
    #[arg(long)]
    maplistanalysis: Option<PathBuf>,

    /// Source list used for analysis (defaults to the simulation source list)
    #[arg(long)]
    srclistanalysis: Option<PathBuf>,

    /// Analysis radius in degrees
    #[arg(long, default_value = "10")]
    ranal: f64,

    /// Diffuse coefficient mode (0 fixed, otherwise fitted)
    #[arg(long, default_value = "0")]
    galmode: i32,

    /// Isotropic coefficient mode (0 fixed, otherwise fitted)
    #[arg(long, default_value = "0")]
    isomode: i32,

    /// Upper-limit confidence level
    #[arg(long, default_value = "0.95")]
    ulcl: f64,

    /// Location contour confidence level
    #[arg(long, default_value = "0.95")]
    loccl: f64,

    /// Response-matrix identifier of the diffuse maps
    #[arg(long, default_value = "I0025")]
    resmatrices: String,

    /// Directory of the diffuse maps
    #[arg(long, default_value = ".")]
    respath: PathBuf,

    /// Directory for saved maps and fit products
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Fit engine allocation across runs
    #[arg(long, value_enum, default_value = "per-run")]
    engine_lifetime: EngineLifetime,

    /// Simulate point sources only, without diffuse or isotropic background
    #[arg(long)]
    no_background: bool,

    /// Export the campaign to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GridArgs {
    /// Counts map providing the grid geometry
    #[arg(long)]
    map: PathBuf,

    /// Source list to append to
    #[arg(long)]
    outfile: PathBuf,

    /// Galactic longitude of the region centre
    #[arg(long)]
    l: f64,

    /// Galactic latitude of the region centre
    #[arg(long)]
    b: f64,

    /// Extraction radius in degrees
    #[arg(long)]
    radius: f64,

    /// Pixel stride between candidates
    #[arg(long, default_value = "1")]
    binstep: usize,

    /// Spectral index of every candidate
    #[arg(long, default_value = "2.1")]
    index: f64,

    /// Fix flag code of every candidate
    #[arg(long, default_value = "1")]
    fixflag: i32,

    /// Minimum sqrt(TS) for a candidate to stay free
    #[arg(long, default_value = "0")]
    minsqrtts: f64,

    /// Maximum position shift during a fit
    #[arg(long, default_value = "0")]
    loclimit: f64,
}

fn run_campaign(args: RunArgs) -> i32 {
    let mut mode = OperationMode::from_bits(args.opmode);
    mode.concise |= args.concise;
    mode.skip_analysis |= args.skip_analysis;
    mode.double_analysis |= args.double_analysis;
    mode.save_maps |= args.save_maps;

    let seed = resolve_seed(args.seed);
    let config = CampaignConfig {
        mode,
        block: args.block,
        nruns: args.nruns,
        seed,
        response: ResponsePaths {
            psd: args.psdfile,
            sar: args.sarfile,
            edp: args.edpfile,
        },
        map_list_analysis: args.maplistanalysis.unwrap_or_else(|| args.maplistsim.clone()),
        source_list_analysis: args.srclistanalysis.unwrap_or_else(|| args.srclistsim.clone()),
        map_list_sim: args.maplistsim,
        source_list_sim: args.srclistsim,
        outfile: args.outfile,
        output_dir: args.output_dir,
        fit: FitParams {
            radius_deg: args.ranal,
            upper_limit_cl: args.ulcl,
            location_cl: args.loccl,
        },
        emission: EmissionModes {
            diffuse: CoefficientMode::from_code(args.galmode),
            isotropic: CoefficientMode::from_code(args.isomode),
        },
        res_matrices: args.resmatrices,
        engine_lifetime: args.engine_lifetime,
        simulate_background: !args.no_background,
        collect_analyses: args.export.is_some(),
    };

    info!(
        "Seed {} | {} runs | block {} | mode {:?} | engine {:?}",
        seed, config.nruns, config.block, config.mode, config.engine_lifetime
    );

    if let Err(e) = std::fs::create_dir_all(&config.output_dir) {
        error!("Cannot create output directory {}: {}", config.output_dir.display(), e);
        return EXIT_CONFIG;
    }

    let maps = FsMapStore::default();
    let diffuse = FsDiffuseStore::new(&args.respath, FsMapStore::default());
    let campaign = match Campaign::new(config.clone(), &maps, &diffuse) {
        Ok(campaign) => campaign,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    let mut rng = campaign_rng(seed);
    let output_dir = config.output_dir.clone();
    let summary = match campaign.run(|| LikelihoodFitEngine::new(output_dir.clone()), &mut rng) {
        Ok(summary) => summary,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "{} runs completed, {} analyses, {} write failures",
        summary.runs_completed, summary.state.analysis_count, summary.write_failures
    );

    if let Some(path) = &args.export {
        let mut export = CampaignExport::new(&config, seed, campaign.inputs().block);
        export.finalize(&summary);
        match export.write_to_file(path) {
            Ok(()) => info!("Exported campaign to {}", path.display()),
            Err(e) => warn!("Could not export campaign to {}: {}", path.display(), e),
        }
    }
    0
}

fn run_grid(args: GridArgs) -> i32 {
    let map = match FsMapStore::default().read_map(&args.map) {
        Ok(map) => map,
        Err(e) => {
            error!("{}", e);
            return e.status();
        }
    };

    let params = GridParams {
        center_l: args.l,
        center_b: args.b,
        radius_deg: args.radius,
        bin_step: args.binstep,
        index: args.index,
        fix_flag: FixFlag::from_code(args.fixflag),
        min_sqrt_ts: args.minsqrtts,
        location_limit: args.loclimit,
    };
    let sources = grid_sources(&map.geometry, &params);

    let count = sources.len();
    if let Err(e) = SourceCatalog::from_sources(sources).append_to(&args.outfile) {
        error!("{}", e);
        return EXIT_IO;
    }
    info!("Appended {} candidate sources to {}", count, args.outfile.display());
    0
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("gammasim v{}", env!("CARGO_PKG_VERSION"));

    let code = match cli.command {
        Command::Run(args) => run_campaign(args),
        Command::Grid(args) => run_grid(args),
    };
    std::process::exit(code);
}
