use anyhow::Context;
use clap::Parser;
use grab_core::{
    common::{
        config::{GrabConfig, OutputOptions},
        types::OutputKind,
    },
    pipeline::batch::BatchDriver,
};
use log::{error, info};
use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::{fs::OpenOptions, path::PathBuf};

const LOG_FILE: &str = "grab_processing.log";

#[derive(Parser, Debug)]
#[command(version, about, long_about = "Writes the vertices of the body, hand and object models of every GRAB sequence")]
struct Args {
    /// Root of the GRAB dataset, holding <category>/<sequence>.npz
    #[arg(long)]
    grab_path: PathBuf,
    /// Where the products go, defaults to the dataset root
    #[arg(long)]
    out_path: Option<PathBuf>,
    /// Folder with smplx/SMPLX_<GENDER>.npz and mano/MANO_<SIDE>.npz
    #[arg(long)]
    model_path: PathBuf,
    /// TOML file with output options, flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output kinds to write in addition to the configured ones (e.g. contact, hand_joints)
    #[arg(long, value_delimiter = ',')]
    enable: Vec<OutputKind>,
    /// Output kinds to leave out
    #[arg(long, value_delimiter = ',')]
    disable: Vec<OutputKind>,
    /// Recompute products that already exist
    #[arg(long)]
    force: bool,
    #[arg(long)]
    n_verts_sample: Option<usize>,
    /// Makes the object vertex sampling reproducible
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> anyhow::Result<OutputOptions> {
        let mut options = match &self.config {
            Some(path) => OutputOptions::load(path)?,
            None => OutputOptions::default(),
        };
        for kind in &self.enable {
            options.set_enabled(*kind, true);
        }
        for kind in &self.disable {
            options.set_enabled(*kind, false);
        }
        options.force_reprocess |= self.force;
        if let Some(n) = self.n_verts_sample {
            options.n_verts_sample = n;
        }
        if self.seed.is_some() {
            options.sample_seed = self.seed;
        }
        if self.threads.is_some() {
            options.num_threads = self.threads;
        }
        Ok(options)
    }
}

fn setup_logger(out_path: &std::path::Path, verbose: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_path).with_context(|| format!("cannot create {}", out_path.display()))?;
    let log_path = out_path.join(LOG_FILE);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open {}", log_path.display()))?;
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let options = args.options()?;
    let config = GrabConfig::new(args.grab_path.clone(), args.out_path.clone(), args.model_path.clone(), options);
    setup_logger(&config.out_path, args.verbose)?;

    let mut driver = BatchDriver::new(config).inspect_err(|e| error!("{e}"))?;
    let summary = driver.run()?;
    if !summary.failed_sequences.is_empty() || summary.failed > 0 {
        info!("see {} for the failures", driver.config().out_path.join(LOG_FILE).display());
    }
    Ok(())
}
