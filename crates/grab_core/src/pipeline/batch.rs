use super::selector::{OutputWriter, SequenceReport};
use crate::common::{
    config::GrabConfig,
    error::GrabResult,
    types::OutputKind,
};
use grab_utils::io::{list_files, FileType};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;

/// Totals of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub sequences: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Sequences abandoned as a whole, e.g. unreadable records
    pub failed_sequences: Vec<String>,
    pub evaluations: usize,
}

impl BatchSummary {
    fn add(&mut self, report: &SequenceReport) {
        self.sequences += 1;
        self.written += report.written();
        self.skipped += report.skipped();
        self.failed += report.failed();
        if report.sequence_error.is_some() {
            self.failed_sequences.push(report.sequence.clone());
        }
    }
}

/// Products written by a previous run into the dataset tree are not records
fn is_product(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    OutputKind::iter().any(|kind| name.ends_with(kind.suffix()))
}

/// Records of the dataset, ``<grab_path>/<category>/<sequence>.npz``, sorted
pub fn find_sequences(grab_path: &Path) -> Vec<PathBuf> {
    list_files(grab_path, 2, FileType::Npz).into_iter().filter(|p| !is_product(p)).collect()
}

/// Walks every record of the dataset one at a time. Per sequence and per kind
/// failures are logged and counted, only run fatal errors end the run.
pub struct BatchDriver {
    config: GrabConfig,
    writer: OutputWriter,
    show_progress: bool,
}

impl BatchDriver {
    /// Validates the configuration and sets up the models it points to
    pub fn new(config: GrabConfig) -> GrabResult<Self> {
        config.validate()?;
        let writer = OutputWriter::from_config(&config)?;
        Ok(Self::with_writer(config, writer))
    }

    pub fn with_writer(config: GrabConfig, writer: OutputWriter) -> Self {
        Self {
            config,
            writer,
            show_progress: true,
        }
    }

    #[must_use]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &GrabConfig {
        &self.config
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{msg:.bold.cyan} [{bar:30.cyan/blue}] {pos}/{len} {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_message("sequences");
        bar
    }

    pub fn run(&mut self) -> GrabResult<BatchSummary> {
        self.config.echo()?;
        let sequences = find_sequences(&self.config.grab_path);
        info!("Total sequences: {}", sequences.len());

        let bar = self.progress_bar(sequences.len());
        let mut summary = BatchSummary::default();
        for sequence in &sequences {
            match self.writer.process(sequence) {
                Ok(report) => summary.add(&report),
                Err(e) => {
                    bar.abandon();
                    error!("stopping the run at {}: {e}", sequence.display());
                    return Err(e);
                }
            }
            bar.inc(1);
        }
        bar.finish();
        summary.evaluations = self.writer.evaluations();

        info!("Processing finished");
        info!(
            "{} sequences: {} products written, {} skipped, {} failed",
            summary.sequences, summary.written, summary.skipped, summary.failed
        );
        for sequence in &summary.failed_sequences {
            warn!("sequence {sequence} could not be processed");
        }
        Ok(summary)
    }
}
