use clap::Parser;
use grab_viewer::{
    driver::{VisualizeConfig, Visualizer},
    ply_viewer::PlyLiveViewer,
};
use log::info;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = "Plays random GRAB sequences with contact highlighting into a PLY scene that is rewritten in place")]
struct Args {
    /// Root of the GRAB dataset, holding <category>/<sequence>.npz
    #[arg(long)]
    grab_path: PathBuf,
    /// Folder with smplx/SMPLX_<GENDER>.npz and mano/MANO_<SIDE>.npz
    #[arg(long)]
    model_path: PathBuf,
    /// Show the right hand and its joints instead of the body
    #[arg(long)]
    rhand_only: bool,
    /// Folder of the viewer session
    #[arg(long, default_value = "grab_viewer_session")]
    session: PathBuf,
    /// Only sequences whose file name contains this
    #[arg(long, default_value = "eat")]
    filter: String,
    #[arg(long, default_value_t = 10)]
    sample_size: usize,
    #[arg(long, default_value_t = 4)]
    frame_stride: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    TermLogger::init(LevelFilter::Info, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    let mut config = VisualizeConfig::new(args.grab_path, args.model_path);
    config.rhand_only = args.rhand_only;
    config.filter = args.filter;
    config.sample_size = args.sample_size;
    config.frame_stride = args.frame_stride;
    config.seed = args.seed;
    config.num_threads = args.threads;

    let mut visualizer = Visualizer::new(config)?;
    let mut viewer = PlyLiveViewer::new(&args.session)?;
    let nr_scenes = visualizer.run(&mut viewer)?;
    info!("{nr_scenes} scenes shown");
    Ok(())
}
