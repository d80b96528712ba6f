//! Membrane Flux Analysis - flux extraction and modelling for filtration tests.
//!
//! This library turns load-cell recordings from a membrane filtration rig
//! into flux values, then fits flux-decline and permeance models to them.
//!
//! # Pipeline
//!
//! - **Normalize**: pressures to bar, membrane geometry to a surface area,
//!   mass to volume through the water density
//! - **Smooth**: centered rolling mean per channel
//! - **Extract**: one flux cell per (channel, test event)
//! - **Aggregate**: mean, population standard deviation and relative error per event
//! - **Model**: exponential flux decline and per-channel permeance
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Membrane Flux Analysis                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Series    │──▶│  Smoothing  │──▶│  Extractor  │       │
//! │  │ (Channel_i) │   │ (centered)  │   │ (LMH cells) │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │   Run Log   │                     │ Flux Table  │       │
//! │  └─────────────┘                     └─────────────┘       │
//! │                                         │         │         │
//! │                                         ▼         ▼         │
//! │                                  ┌─────────┐ ┌──────────┐   │
//! │                                  │ Decline │ │Permeance │   │
//! │                                  └─────────┘ └──────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use membrane_flux_analysis::pipeline::run_directory;
//! use std::path::Path;
//!
//! let report = run_directory(Path::new("inputs"), Path::new("outputs"), None)
//!     .expect("flux analysis failed");
//! println!("{}", report.summary);
//! ```

pub mod config;
pub mod core;
pub mod diagnostics;
pub mod models;
pub mod pipeline;
pub mod series;

// Re-export key types at crate root for convenience
pub use config::{ConfigError, ExperimentConfig, ModuleSelection, RunParameters};
pub use crate::core::{FluxError, FluxMatrix, FluxTable, PressureUnit, SurfaceArea};
pub use diagnostics::{RunLog, RunStats};
pub use models::{ExponentialFitResult, FitError, PermeanceError, PermeanceFitResult};
pub use pipeline::{run_directory, FluxPipeline, PipelineError, RunReport};
pub use series::{ChannelSeries, SeriesError, TestEvent};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
