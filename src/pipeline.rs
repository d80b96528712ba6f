//! End-to-end flux analysis pipeline.
//!
//! Stages run in order on one thread: load, smooth, extract, aggregate, then
//! the selected models. Every fatal condition is detected before the first
//! output file is written; model failures are logged and only skip that
//! model's outputs.

use crate::config::{ConfigError, ExperimentConfig, ModuleSelection, RunParameters};
use crate::core::extractor::{FluxError, FluxExtractor, FluxMatrix};
use crate::core::table::{FluxTable, TableError, FLUX_TABLE_FILE};
use crate::diagnostics::{RunLog, RunStats, StageStatus};
use crate::models::decline::{
    DeclineFitOptions, ExponentialFitResult, FitError, FluxDeclineModel, DECLINE_DIR,
};
use crate::models::permeance::{fit_permeance, PermeanceError, PermeanceFitResult, PERMEANCE_DIR};
use crate::models::OutputError;
use crate::series::{
    load_channels, load_test_events, ChannelSeries, SeriesError, TestEvent, TEST_CONDITIONS_FILE,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// File name of the persisted run log inside the output directory.
pub const RUN_LOG_FILE: &str = "run_log.json";

const FLUX_STAGE: &str = "flux";
const DECLINE_STAGE: &str = "flux_decline";
const PERMEANCE_STAGE: &str = "permeance";

/// Flux matrix and table of one run.
#[derive(Debug, Clone)]
pub struct FluxRun {
    pub matrix: FluxMatrix,
    pub table: FluxTable,
}

/// Results of the downstream models. `None` means the model was not selected.
#[derive(Debug, Default)]
pub struct ModelOutcomes {
    pub decline: Option<Result<ExponentialFitResult, FitError>>,
    pub permeance: Option<Result<PermeanceFitResult, PermeanceError>>,
}

impl ModelOutcomes {
    /// Write the outputs of every model that succeeded.
    pub fn save(&self, output_dir: &Path) -> Result<(), OutputError> {
        if let Some(Ok(result)) = &self.decline {
            result.save(&output_dir.join(DECLINE_DIR))?;
        }
        if let Some(Ok(result)) = &self.permeance {
            result.save(&output_dir.join(PERMEANCE_DIR))?;
        }
        Ok(())
    }

    /// Whether any selected model failed.
    pub fn any_failed(&self) -> bool {
        matches!(self.decline, Some(Err(_))) || matches!(self.permeance, Some(Err(_)))
    }
}

/// Flux analysis for one validated configuration.
#[derive(Debug, Clone)]
pub struct FluxPipeline {
    config: ExperimentConfig,
    params: RunParameters,
}

impl FluxPipeline {
    /// Validate `config` and derive the run parameters.
    pub fn new(config: ExperimentConfig) -> Result<Self, ConfigError> {
        let params = config.validate()?;
        Ok(Self { config, params })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn params(&self) -> &RunParameters {
        &self.params
    }

    /// Smooth the channels, extract the flux matrix and build the table.
    pub fn extract(
        &self,
        mut channels: Vec<ChannelSeries>,
        events: &[TestEvent],
        log: &mut RunLog,
    ) -> Result<FluxRun, PipelineError> {
        for channel in &mut channels {
            channel.smooth(self.params.window, self.params.density_factor)?;
            log.record_channel_loaded(channel.len());
        }
        info!(
            channels = channels.len(),
            window = self.params.window,
            density_factor = self.params.density_factor,
            "Smoothed channel series"
        );

        let matrix = FluxExtractor::new(&self.params).extract(&channels, events, log)?;
        let table = FluxTable::build(events, self.params.pressure_unit, &matrix)?;
        log.record_stage(FLUX_STAGE, StageStatus::Completed);

        Ok(FluxRun { matrix, table })
    }

    /// Run the selected models on a finished flux table.
    pub fn fit_models(
        &self,
        table: &FluxTable,
        selection: ModuleSelection,
        log: &mut RunLog,
    ) -> ModelOutcomes {
        fit_models(table, selection, self.config.decline_fit, log)
    }
}

/// Run the selected models, recording each outcome in `log`.
pub fn fit_models(
    table: &FluxTable,
    selection: ModuleSelection,
    decline_options: DeclineFitOptions,
    log: &mut RunLog,
) -> ModelOutcomes {
    let decline = selection.flux_decline.then(|| {
        let result = FluxDeclineModel::new(decline_options).fit(table);
        record_model_stage(log, DECLINE_STAGE, result.as_ref().err());
        result
    });
    if !selection.flux_decline {
        log.record_stage(DECLINE_STAGE, StageStatus::Skipped);
    }

    let permeance = selection.permeance.then(|| {
        let result = fit_permeance(table);
        record_model_stage(log, PERMEANCE_STAGE, result.as_ref().err());
        result
    });
    if !selection.permeance {
        log.record_stage(PERMEANCE_STAGE, StageStatus::Skipped);
    }

    ModelOutcomes { decline, permeance }
}

fn record_model_stage<E: std::fmt::Display>(log: &mut RunLog, stage: &str, error: Option<&E>) {
    match error {
        None => log.record_stage(stage, StageStatus::Completed),
        Some(e) => {
            warn!(stage, error = %e, "Model failed, skipping its outputs");
            log.record_stage(
                stage,
                StageStatus::Failed {
                    reason: e.to_string(),
                },
            );
        }
    }
}

/// Summary of a completed run.
#[derive(Debug)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub table: FluxTable,
    pub outcomes: ModelOutcomes,
    pub stats: RunStats,
    /// Human-readable run log summary
    pub summary: String,
}

/// Run the full analysis on an input directory and write every output.
///
/// `modules` overrides the configuration's model selection when given.
pub fn run_directory(
    input_dir: &Path,
    output_dir: &Path,
    modules: Option<ModuleSelection>,
) -> Result<RunReport, PipelineError> {
    let config = ExperimentConfig::load_from_dir(input_dir)?;
    let selection = modules.unwrap_or(config.modules);
    let pipeline = FluxPipeline::new(config)?;
    info!(
        input = %input_dir.display(),
        channels = pipeline.params().channel_count,
        area = %pipeline.params().surface_area,
        "Starting flux analysis"
    );

    let mut log = RunLog::with_persistence(output_dir.join(RUN_LOG_FILE));

    let channels = load_channels(input_dir, pipeline.params().channel_count)?;
    let events = load_test_events(&input_dir.join(TEST_CONDITIONS_FILE))?;
    let run = pipeline.extract(channels, &events, &mut log)?;

    // nothing is written before this point
    run.table.save_csv(&output_dir.join(FLUX_TABLE_FILE))?;

    let outcomes = pipeline.fit_models(&run.table, selection, &mut log);
    outcomes.save(output_dir)?;

    log.save().map_err(|source| PipelineError::Log {
        path: output_dir.join(RUN_LOG_FILE),
        source,
    })?;
    info!(output = %output_dir.display(), "Flux analysis complete");

    Ok(RunReport {
        output_dir: output_dir.to_path_buf(),
        table: run.table,
        outcomes,
        stats: log.stats(),
        summary: log.summary(),
    })
}

/// Fit the decline model to a saved flux table and write its outputs.
pub fn run_decline(
    table_path: &Path,
    output_dir: &Path,
    options: DeclineFitOptions,
) -> Result<ExponentialFitResult, PipelineError> {
    options.validate()?;
    let table = FluxTable::load_csv(table_path)?;
    let result = FluxDeclineModel::new(options).fit(&table)?;
    result.save(&output_dir.join(DECLINE_DIR))?;
    Ok(result)
}

/// Fit the permeance model to a saved flux table and write its outputs.
pub fn run_permeance(
    table_path: &Path,
    output_dir: &Path,
) -> Result<PermeanceFitResult, PipelineError> {
    let table = FluxTable::load_csv(table_path)?;
    let result = fit_permeance(&table)?;
    result.save(&output_dir.join(PERMEANCE_DIR))?;
    Ok(result)
}

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("input error: {0}")]
    Series(#[from] SeriesError),

    #[error("flux extraction failed: {0}")]
    Flux(#[from] FluxError),

    #[error("flux table error: {0}")]
    Table(#[from] TableError),

    #[error("could not write outputs: {0}")]
    Output(#[from] OutputError),

    #[error("flux decline model failed: {0}")]
    Fit(#[from] FitError),

    #[error("permeance model failed: {0}")]
    Permeance(#[from] PermeanceError),

    #[error("could not write run log {path:?}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeometryRecord, InputQuantity};
    use crate::core::timestamps::MatchPolicy;
    use crate::core::units::{MembraneType, PressureUnit};

    fn config() -> ExperimentConfig {
        ExperimentConfig {
            load_cell_count: 2,
            pressure_unit: PressureUnit::Bar,
            smoothing_window: 3,
            test_duration_s: 10.0,
            sampling_interval_s: 1.0,
            temperature_c: 20.0,
            input_quantity: InputQuantity::Volume,
            membrane: GeometryRecord {
                membrane_type: MembraneType::FlatSheet,
                flat_sheet_area_m2: Some(0.01),
                fiber_length_cm: None,
                fiber_diameter_mm: None,
                units: 1,
            },
            timestamp_match: MatchPolicy::Exact,
            modules: ModuleSelection::default(),
            decline_fit: DeclineFitOptions::default(),
        }
    }

    fn channel(index: usize, rate: f64) -> ChannelSeries {
        ChannelSeries::from_samples(
            index,
            (0..60).map(|i| (format!("10:00:{i:02}"), rate * i as f64)),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.smoothing_window = 2;
        assert!(matches!(
            FluxPipeline::new(config),
            Err(ConfigError::InvalidSmoothingWindow(2))
        ));
    }

    #[test]
    fn test_extract_builds_table() {
        let pipeline = FluxPipeline::new(config()).unwrap();
        let events = vec![TestEvent::new("10:00:05", 1.0), TestEvent::new("10:00:20", 2.0)];
        let mut log = RunLog::new();

        let run = pipeline
            .extract(vec![channel(0, 1.0), channel(1, 1.0)], &events, &mut log)
            .unwrap();

        assert_eq!(run.table.len(), 2);
        assert_eq!(run.matrix.missing_count(), 0);
        assert_eq!(run.table.rows()[0].stats.std_dev, 0.0);
        assert_eq!(log.stats().channels_loaded, 2);
        assert_eq!(log.stats().samples_loaded, 120);
    }

    #[test]
    fn test_model_failure_is_stage_local() {
        let pipeline = FluxPipeline::new(config()).unwrap();
        // one pressure and two events: both models lack data
        let events = vec![TestEvent::new("10:00:05", 1.0), TestEvent::new("10:00:20", 1.0)];
        let mut log = RunLog::new();
        let run = pipeline
            .extract(vec![channel(0, 1.0), channel(1, 2.0)], &events, &mut log)
            .unwrap();

        let outcomes = pipeline.fit_models(&run.table, ModuleSelection::default(), &mut log);
        assert!(matches!(
            outcomes.decline,
            Some(Err(FitError::InsufficientData { .. }))
        ));
        assert!(matches!(
            outcomes.permeance,
            Some(Err(PermeanceError::InsufficientData { .. }))
        ));
        assert!(outcomes.any_failed());
        assert!(log
            .stages()
            .iter()
            .any(|s| s.stage == "permeance" && matches!(s.status, StageStatus::Failed { .. })));
    }

    #[test]
    fn test_unselected_models_skipped() {
        let pipeline = FluxPipeline::new(config()).unwrap();
        let events = vec![TestEvent::new("10:00:05", 1.0)];
        let mut log = RunLog::new();
        let run = pipeline
            .extract(vec![channel(0, 1.0), channel(1, 1.0)], &events, &mut log)
            .unwrap();

        let outcomes = pipeline.fit_models(&run.table, ModuleSelection::none(), &mut log);
        assert!(outcomes.decline.is_none());
        assert!(outcomes.permeance.is_none());
        assert!(!outcomes.any_failed());
        assert_eq!(
            log.stages()
                .iter()
                .filter(|s| s.status == StageStatus::Skipped)
                .count(),
            2
        );
    }
}
