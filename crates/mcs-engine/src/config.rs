use std::fs;
use std::path::Path;

use mcs_core::errors::ErrorInfo;
use mcs_core::McError;
use serde::{Deserialize, Serialize};

/// Step-execution algorithm used by a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepAlgorithm {
    /// Discrete-time accept/reject loop.
    #[default]
    Standard,
    /// Continuous-time loop that always fires one enumerated step.
    RejectionFree,
}

/// Parameters of a Metropolis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetropolisParameters {
    /// Steps discarded before the first measurement.
    #[serde(default = "default_relaxation_steps")]
    pub relaxation_steps: u64,
    /// Number of measurement windows.
    #[serde(default = "default_measurement_number")]
    pub measurement_number: u64,
    /// Steps performed inside each measurement window.
    #[serde(default = "default_steps_between_measurement")]
    pub steps_between_measurement: u64,
    /// Independent runs (and worker threads) of the parallel variant.
    #[serde(default = "default_process_number")]
    pub process_number: usize,
    /// Step-execution algorithm.
    #[serde(default)]
    pub algorithm: StepAlgorithm,
}

fn default_relaxation_steps() -> u64 {
    1000
}

fn default_measurement_number() -> u64 {
    100
}

fn default_steps_between_measurement() -> u64 {
    100
}

fn default_process_number() -> usize {
    1
}

impl Default for MetropolisParameters {
    fn default() -> Self {
        Self {
            relaxation_steps: default_relaxation_steps(),
            measurement_number: default_measurement_number(),
            steps_between_measurement: default_steps_between_measurement(),
            process_number: default_process_number(),
            algorithm: StepAlgorithm::default(),
        }
    }
}

impl MetropolisParameters {
    /// Rejects parameter sets that cannot drive a run.
    pub fn validate(&self) -> Result<(), McError> {
        if self.process_number == 0 {
            return Err(config_error("process-number", "process_number must be positive"));
        }
        Ok(())
    }
}

/// Maps energies onto integer histogram bins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyBinning {
    /// Energy that falls in the centre of bin 0.
    #[serde(default)]
    pub reference: f64,
    /// Width of a single bin.
    #[serde(default = "default_bin_width")]
    pub width: f64,
}

fn default_bin_width() -> f64 {
    1.0
}

impl Default for EnergyBinning {
    fn default() -> Self {
        Self {
            reference: 0.0,
            width: default_bin_width(),
        }
    }
}

impl EnergyBinning {
    /// Bin index holding `energy`.
    pub fn bin(&self, energy: f64) -> i64 {
        ((energy - self.reference) / self.width).round() as i64
    }

    /// Representative energy of a bin.
    pub fn energy(&self, bin: i64) -> f64 {
        self.reference + bin as f64 * self.width
    }
}

/// Parameters of a Wang-Landau run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WangLandauParameters {
    /// Minimum ratio of smallest to mean incidence count for a flat histogram.
    #[serde(default = "default_flatness")]
    pub flatness: f64,
    /// Modification factor of the first iteration.
    #[serde(default = "default_modification_factor_initial")]
    pub modification_factor_initial: f64,
    /// The simulation stops once the modification factor falls to this value.
    #[serde(default = "default_modification_factor_final")]
    pub modification_factor_final: f64,
    /// Shrink constant applied at every refinement.
    #[serde(default = "default_modification_factor_multiplier")]
    pub modification_factor_multiplier: f64,
    /// Steps between two flatness checks.
    #[serde(default = "default_sweep_steps")]
    pub sweep_steps: u64,
    /// Steps into energies below this value are never accepted.
    #[serde(default)]
    pub energy_cutoff_lower: Option<f64>,
    /// Steps into energies above this value are never accepted.
    #[serde(default)]
    pub energy_cutoff_upper: Option<f64>,
    /// Histogram binning.
    #[serde(default)]
    pub binning: EnergyBinning,
    /// Step-execution algorithm.
    #[serde(default)]
    pub algorithm: StepAlgorithm,
}

fn default_flatness() -> f64 {
    0.8
}

fn default_modification_factor_initial() -> f64 {
    1.0
}

fn default_modification_factor_final() -> f64 {
    1e-7
}

fn default_modification_factor_multiplier() -> f64 {
    0.9
}

fn default_sweep_steps() -> u64 {
    1000
}

impl Default for WangLandauParameters {
    fn default() -> Self {
        Self {
            flatness: default_flatness(),
            modification_factor_initial: default_modification_factor_initial(),
            modification_factor_final: default_modification_factor_final(),
            modification_factor_multiplier: default_modification_factor_multiplier(),
            sweep_steps: default_sweep_steps(),
            energy_cutoff_lower: None,
            energy_cutoff_upper: None,
            binning: EnergyBinning::default(),
            algorithm: StepAlgorithm::default(),
        }
    }
}

impl WangLandauParameters {
    /// Rejects parameter sets for which the refinement loop cannot terminate.
    pub fn validate(&self) -> Result<(), McError> {
        if !(self.modification_factor_multiplier > 0.0 && self.modification_factor_multiplier < 1.0)
        {
            return Err(invalid_value(
                "modification-factor-multiplier",
                "modification_factor_multiplier must lie in (0, 1)",
                self.modification_factor_multiplier,
            ));
        }
        if !(self.modification_factor_final > 0.0) {
            return Err(invalid_value(
                "modification-factor-final",
                "modification_factor_final must be positive",
                self.modification_factor_final,
            ));
        }
        if !(self.flatness > 0.0 && self.flatness <= 1.0) {
            return Err(invalid_value(
                "flatness",
                "flatness must lie in (0, 1]",
                self.flatness,
            ));
        }
        if self.sweep_steps == 0 {
            return Err(config_error("sweep-steps", "sweep_steps must be positive"));
        }
        if !(self.binning.width > 0.0) {
            return Err(invalid_value(
                "bin-width",
                "binning width must be positive",
                self.binning.width,
            ));
        }
        Ok(())
    }
}

/// Parameters of an entropic sampling run.
///
/// `log g` stays fixed during a sweep; between sweeps it is corrected by the
/// logarithm of the visits collected in that sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropicSamplingParameters {
    /// Flatness of a single sweep's incidence counter that ends the run.
    #[serde(default = "default_entropic_flatness")]
    pub flatness: f64,
    /// Steps per sweep.
    #[serde(default = "default_entropic_sweep_steps")]
    pub sweep_steps: u64,
    /// Steps into energies below this value are never accepted.
    #[serde(default)]
    pub energy_cutoff_lower: Option<f64>,
    /// Steps into energies above this value are never accepted.
    #[serde(default)]
    pub energy_cutoff_upper: Option<f64>,
    /// Histogram binning.
    #[serde(default)]
    pub binning: EnergyBinning,
    /// Step-execution algorithm.
    #[serde(default)]
    pub algorithm: StepAlgorithm,
}

fn default_entropic_flatness() -> f64 {
    0.9
}

fn default_entropic_sweep_steps() -> u64 {
    10_000
}

impl Default for EntropicSamplingParameters {
    fn default() -> Self {
        Self {
            flatness: default_entropic_flatness(),
            sweep_steps: default_entropic_sweep_steps(),
            energy_cutoff_lower: None,
            energy_cutoff_upper: None,
            binning: EnergyBinning::default(),
            algorithm: StepAlgorithm::default(),
        }
    }
}

impl EntropicSamplingParameters {
    /// Rejects parameter sets for which a sweep cannot be evaluated.
    pub fn validate(&self) -> Result<(), McError> {
        if !(self.flatness > 0.0 && self.flatness <= 1.0) {
            return Err(invalid_value(
                "flatness",
                "flatness must lie in (0, 1]",
                self.flatness,
            ));
        }
        if self.sweep_steps == 0 {
            return Err(config_error("sweep-steps", "sweep_steps must be positive"));
        }
        if !(self.binning.width > 0.0) {
            return Err(invalid_value(
                "bin-width",
                "binning width must be positive",
                self.binning.width,
            ));
        }
        Ok(())
    }
}

/// Parameters of a parallel tempering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperingParameters {
    /// Worker threads used to advance replicas.
    #[serde(default = "default_process_number")]
    pub process_number: usize,
    /// Steps per replica discarded before the first measurement.
    #[serde(default = "default_relaxation_steps")]
    pub relaxation_steps: u64,
    /// Number of measurement windows.
    #[serde(default = "default_measurement_number")]
    pub measurement_number: u64,
    /// Steps per replica inside each measurement window.
    #[serde(default = "default_steps_between_measurement")]
    pub steps_between_measurement: u64,
    /// Steps per replica between two exchange sweeps.
    #[serde(default = "default_steps_between_replica_exchange")]
    pub steps_between_replica_exchange: u64,
}

fn default_steps_between_replica_exchange() -> u64 {
    10
}

impl Default for TemperingParameters {
    fn default() -> Self {
        Self {
            process_number: default_process_number(),
            relaxation_steps: default_relaxation_steps(),
            measurement_number: default_measurement_number(),
            steps_between_measurement: default_steps_between_measurement(),
            steps_between_replica_exchange: default_steps_between_replica_exchange(),
        }
    }
}

impl TemperingParameters {
    /// Rejects parameter sets that cannot drive a run.
    pub fn validate(&self) -> Result<(), McError> {
        if self.process_number == 0 {
            return Err(config_error("process-number", "process_number must be positive"));
        }
        if self.steps_between_replica_exchange == 0 {
            return Err(config_error(
                "steps-between-replica-exchange",
                "steps_between_replica_exchange must be positive",
            ));
        }
        Ok(())
    }
}

/// Ladder update rule applied by the optimizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OptimizationAlgorithm {
    /// Rescale intervals proportionally to measured exchange acceptance.
    #[default]
    Berg,
    /// Redistribute rungs along the integrated replica-flow derivative.
    Katzgraber {
        /// Re-runs allowed while the flow derivative is negative or undefined.
        #[serde(default = "default_max_derivative_retries")]
        max_derivative_retries: usize,
    },
}

fn default_max_derivative_retries() -> usize {
    100
}

/// How recorded ladders are averaged into the final one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeightPolicy {
    /// Keep only the most recently measured ladder.
    #[default]
    OnlyLast,
    /// Weight each ladder by its worst pair acceptance.
    WorstAcceptance,
    /// Weight by inverse standard deviation assuming independent pairs.
    IndependentAcceptance,
}

/// Settings for inverse temperature optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Ladder update rule.
    #[serde(default)]
    pub algorithm: OptimizationAlgorithm,
    /// Number of optimization iterations.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Averaging policy for the final ladder.
    #[serde(default)]
    pub weight_policy: WeightPolicy,
    /// Windows allowed per iteration before a pair without accepted exchanges is fatal.
    #[serde(default = "default_max_measurement_rounds")]
    pub max_measurement_rounds: usize,
}

fn default_iterations() -> usize {
    10
}

fn default_max_measurement_rounds() -> usize {
    100
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            algorithm: OptimizationAlgorithm::default(),
            iterations: default_iterations(),
            weight_policy: WeightPolicy::default(),
            max_measurement_rounds: default_max_measurement_rounds(),
        }
    }
}

impl OptimizationConfig {
    /// Rejects settings under which no ladder can ever be measured.
    pub fn validate(&self) -> Result<(), McError> {
        if self.max_measurement_rounds == 0 {
            return Err(config_error(
                "max-measurement-rounds",
                "max_measurement_rounds must be positive",
            ));
        }
        Ok(())
    }
}

/// Complete engine configuration as read from YAML.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Master seed for every random stream of the run.
    #[serde(default)]
    pub seed: u64,
    /// Metropolis settings.
    #[serde(default)]
    pub metropolis: MetropolisParameters,
    /// Wang-Landau settings.
    #[serde(default)]
    pub wang_landau: WangLandauParameters,
    /// Entropic sampling settings.
    #[serde(default)]
    pub entropic_sampling: EntropicSamplingParameters,
    /// Parallel tempering settings.
    #[serde(default)]
    pub tempering: TemperingParameters,
    /// Ladder optimization settings.
    #[serde(default)]
    pub optimization: OptimizationConfig,
}

impl EngineConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, McError> {
        let config: Self = serde_yaml::from_str(text).map_err(|err| {
            McError::Serde(ErrorInfo::new("config-parse", err.to_string()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, McError> {
        let text = fs::read_to_string(path).map_err(|err| McError::io("config-read", err, path))?;
        Self::from_yaml_str(&text).map_err(|err| match err {
            McError::Serde(info) => {
                McError::Serde(info.with_context("path", path.display().to_string()))
            }
            other => other,
        })
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), McError> {
        self.metropolis.validate()?;
        self.wang_landau.validate()?;
        self.entropic_sampling.validate()?;
        self.tempering.validate()?;
        self.optimization.validate()?;
        Ok(())
    }
}

fn config_error(code: &str, message: &str) -> McError {
    McError::Config(ErrorInfo::new(code, message))
}

fn invalid_value(code: &str, message: &str, value: f64) -> McError {
    McError::Config(ErrorInfo::new(code, message).with_context("value", value.to_string()))
}
