//! Integration tests for the end-to-end flux analysis pipeline

use approx::assert_relative_eq;
use chrono::{Duration, NaiveTime};
use membrane_flux_analysis::core::units::PSI_TO_BAR;
use membrane_flux_analysis::core::{water_density, FluxTable, FLUX_TABLE_FILE};
use membrane_flux_analysis::models::{DECLINE_DIR, PERMEANCE_DIR, PERMEANCE_FILE};
use membrane_flux_analysis::pipeline::{run_decline, run_directory, run_permeance, RUN_LOG_FILE};
use membrane_flux_analysis::{ModuleSelection, PipelineError};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const CHANNEL_SCALE: [f64; 3] = [1.0, 1.01, 1.02];
const EVENT_SPACING_MIN: i64 = 5;
const EVENTS: usize = 9;
/// Sampling rate changes this many seconds before each event
const SEGMENT_LEAD_S: i64 = 100;

fn time(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
}

fn event_time(k: usize) -> NaiveTime {
    time(10, 0, 0) + Duration::minutes(EVENT_SPACING_MIN * k as i64)
}

/// Target flux shape of event `k`.
fn decline(k: usize) -> f64 {
    let t = (EVENT_SPACING_MIN * k as i64) as f64;
    1800.0 + 900.0 * (-t / 45.0).exp()
}

/// Mass gain per second during event `k`, before channel scaling.
fn rate(k: usize) -> f64 {
    decline(k) / 354.0
}

/// Pressure in PSI chosen so that flux is proportional to pressure.
fn pressure_psi(k: usize) -> f64 {
    decline(k) / 100.0 / PSI_TO_BAR
}

fn expected_flux(channel: usize, k: usize) -> f64 {
    let density = water_density(25.0);
    // 59 sample intervals over a 60 s bracket on 0.01 m²
    CHANNEL_SCALE[channel] * rate(k) * 59.0 / density / 1000.0 / 0.01 / (60.0 / 3600.0)
}

struct Fixture {
    root: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("mfa-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join("input").join("data")).unwrap();
        Self { root }
    }

    fn input(&self) -> PathBuf {
        self.root.join("input")
    }

    fn output(&self) -> PathBuf {
        self.root.join("output")
    }

    fn write_config(&self, smoothing_window: usize) {
        let config = serde_json::json!({
            "load_cell_count": CHANNEL_SCALE.len(),
            "pressure_unit": "PSI",
            "smoothing_window": smoothing_window,
            "test_duration_s": 60,
            "sampling_interval_s": 1,
            "temperature_c": 25.0,
            "input_quantity": "mass",
            "membrane": { "membrane_type": "FS", "flat_sheet_area_m2": 0.01, "units": 1 },
            "timestamp_match": { "policy": "exact" }
        });
        std::fs::write(
            self.input().join("experiment.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();
    }

    fn write_conditions(&self) {
        let mut csv = String::from("Measurement Start time (24hr time),Pressure\n");
        for k in 0..EVENTS {
            writeln!(csv, "{},{}", event_time(k).format("%H:%M:%S"), pressure_psi(k)).unwrap();
        }
        std::fs::write(self.input().join("test_conditions.csv"), csv).unwrap();
    }

    /// Write one channel sampled every second from 09:58:00 until `end`.
    fn write_channel(&self, channel: usize, end: NaiveTime, skip: Option<NaiveTime>) {
        let mut csv = String::from("Time,Mass (g)\n");
        let mut now = time(9, 58, 0);
        let mut mass = 0.0;

        while now <= end {
            if skip != Some(now) {
                writeln!(csv, "2024-03-01 {},{}", now.format("%H:%M:%S"), mass).unwrap();
            }

            // active segment: the latest event starting within SEGMENT_LEAD_S
            let segment = (0..EVENTS)
                .rev()
                .find(|&k| now >= event_time(k) - Duration::seconds(SEGMENT_LEAD_S))
                .unwrap_or(0);
            mass += CHANNEL_SCALE[channel] * rate(segment);
            now += Duration::seconds(1);
        }

        std::fs::write(
            self.input().join("data").join(format!("Channel_{channel}.csv")),
            csv,
        )
        .unwrap();
    }

    fn write_inputs(&self) {
        self.write_config(5);
        self.write_conditions();
        for channel in 0..CHANNEL_SCALE.len() {
            self.write_channel(channel, time(10, 42, 0), None);
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn assert_nothing_written(output: &Path) {
    assert!(!output.exists(), "outputs were written for a failed run");
}

#[test]
fn test_full_run_writes_outputs() {
    let fixture = Fixture::new("full");
    fixture.write_inputs();

    let report = run_directory(&fixture.input(), &fixture.output(), None).unwrap();

    let output = fixture.output();
    assert!(output.join(FLUX_TABLE_FILE).exists());
    assert!(output.join(RUN_LOG_FILE).exists());
    assert!(output.join(DECLINE_DIR).join("model_parameters.csv").exists());
    assert!(output.join(DECLINE_DIR).join("residuals.csv").exists());
    assert!(output.join(DECLINE_DIR).join("model_curve.csv").exists());
    assert!(output.join(PERMEANCE_DIR).join(PERMEANCE_FILE).exists());

    assert_eq!(report.table.len(), EVENTS);
    assert_eq!(report.stats.channels_loaded, 3);
    assert_eq!(report.stats.cells_missing, 0);
    for (k, row) in report.table.rows().iter().enumerate() {
        for (j, &flux) in row.flux.iter().enumerate() {
            assert_relative_eq!(flux, expected_flux(j, k), max_relative = 1e-8);
        }
        assert_relative_eq!(row.pressure_bar, decline(k) / 100.0, max_relative = 1e-9);
    }
}

#[test]
fn test_models_fit_known_curves() {
    let fixture = Fixture::new("models");
    fixture.write_inputs();

    let report = run_directory(&fixture.input(), &fixture.output(), None).unwrap();

    let decline = report.outcomes.decline.unwrap().unwrap();
    assert_relative_eq!(decline.params.t0, 45.0, max_relative = 1e-4);
    assert!(decline.r_squared > 0.999);
    assert_eq!(decline.time_minutes[EVENTS - 1], 40.0);

    let permeance = report.outcomes.permeance.unwrap().unwrap();
    let density = water_density(25.0);
    for (j, fit) in permeance.channels.iter().enumerate() {
        // flux = scale * 100 * p / density
        assert_relative_eq!(fit.slope, CHANNEL_SCALE[j] * 100.0 / density, max_relative = 1e-6);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_flux_table_reloads_for_models() {
    let fixture = Fixture::new("reload");
    fixture.write_inputs();

    run_directory(
        &fixture.input(),
        &fixture.output(),
        Some(ModuleSelection::none()),
    )
    .unwrap();
    assert!(!fixture.output().join(DECLINE_DIR).exists());

    let table_path = fixture.output().join(FLUX_TABLE_FILE);
    let table = FluxTable::load_csv(&table_path).unwrap();
    assert_eq!(table.channel_count(), 3);
    assert_eq!(table.len(), EVENTS);

    let models_dir = fixture.root.join("models");
    let decline = run_decline(&table_path, &models_dir, Default::default()).unwrap();
    assert!(decline.r_squared > 0.999);
    let permeance = run_permeance(&table_path, &models_dir).unwrap();
    assert_eq!(permeance.channels.len(), 3);
    assert!(models_dir.join(PERMEANCE_DIR).join(PERMEANCE_FILE).exists());
}

#[test]
fn test_missing_sample_only_zeroes_its_cell() {
    let fixture = Fixture::new("missing");
    fixture.write_config(5);
    fixture.write_conditions();
    fixture.write_channel(0, time(10, 42, 0), None);
    fixture.write_channel(1, time(10, 42, 0), Some(event_time(2)));
    fixture.write_channel(2, time(10, 42, 0), None);

    let report = run_directory(&fixture.input(), &fixture.output(), None).unwrap();

    assert_eq!(report.stats.cells_missing, 1);
    let rows = report.table.rows();
    assert_eq!(rows[2].flux[1], 0.0);
    assert_relative_eq!(rows[2].flux[0], expected_flux(0, 2), max_relative = 1e-8);
    assert_relative_eq!(rows[3].flux[1], expected_flux(1, 3), max_relative = 1e-8);
    assert_relative_eq!(rows[1].flux[1], expected_flux(1, 1), max_relative = 1e-8);

    let log: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(fixture.output().join(RUN_LOG_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(log["missing_samples"][0]["channel"], 1);
    assert_eq!(log["missing_samples"][0]["start_time"], "10:10:00");
}

#[test]
fn test_duration_out_of_range_writes_nothing() {
    let fixture = Fixture::new("short");
    fixture.write_config(5);
    fixture.write_conditions();
    for channel in 0..CHANNEL_SCALE.len() {
        fixture.write_channel(channel, time(10, 40, 30), None);
    }

    let err = run_directory(&fixture.input(), &fixture.output(), None).unwrap_err();
    assert!(matches!(err, PipelineError::Flux(_)));
    assert!(err.to_string().contains("Channel_0"));
    assert_nothing_written(&fixture.output());
}

#[test]
fn test_config_error_writes_nothing() {
    let fixture = Fixture::new("badconfig");
    fixture.write_inputs();
    fixture.write_config(4);

    let err = run_directory(&fixture.input(), &fixture.output(), None).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert_nothing_written(&fixture.output());
}

#[test]
fn test_missing_channel_file_is_fatal() {
    let fixture = Fixture::new("nochannel");
    fixture.write_inputs();
    std::fs::remove_file(fixture.input().join("data").join("Channel_2.csv")).unwrap();

    let err = run_directory(&fixture.input(), &fixture.output(), None).unwrap_err();
    assert!(matches!(err, PipelineError::Series(_)));
    assert_nothing_written(&fixture.output());
}
