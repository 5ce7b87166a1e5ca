//! TOML configuration deserialisation for reconstruction jobs.

use anyhow::{ensure, Context};
use serde::Deserialize;

use ptyx_core::sim::DatasetParams;
use ptyx_core::{Algorithm, CgradOptions, LstsqOptions, ReconstructionParams};

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub dataset: DatasetParams,
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Reconstruction parameters from TOML.
///
/// Tuning constants that are left out keep the solver defaults.
#[derive(Debug, Deserialize)]
pub struct ReconstructionConfig {
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default = "default_num_iter")]
    pub num_iter: usize,
    #[serde(default = "default_cg_iter")]
    pub cg_iter: usize,
    #[serde(default = "default_true")]
    pub recover_psi: bool,
    #[serde(default = "default_true")]
    pub recover_probe: bool,
    #[serde(default)]
    pub recover_positions: bool,
    /// Number of eigen-probe components (0 disables probe variation).
    #[serde(default)]
    pub eigen_components: usize,
    #[serde(default)]
    pub orthogonalize_probe: bool,
    #[serde(default)]
    pub diagnostics: bool,
    /// Compute backend: "auto" or "cpu". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,

    pub farfield_step: Option<f64>,
    pub eigen_learning_rate: Option<f64>,
    pub curvature_offset: Option<f64>,
    pub step_stabilization: Option<f64>,
    pub weight_stabilization: Option<f64>,
    pub object_step_length: Option<f64>,
    pub probe_step_length: Option<f64>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            num_iter: default_num_iter(),
            cg_iter: default_cg_iter(),
            recover_psi: true,
            recover_probe: true,
            recover_positions: false,
            eigen_components: 0,
            orthogonalize_probe: false,
            diagnostics: false,
            backend: default_backend(),
            farfield_step: None,
            eigen_learning_rate: None,
            curvature_offset: None,
            step_stabilization: None,
            weight_stabilization: None,
            object_step_length: None,
            probe_step_length: None,
        }
    }
}

impl ReconstructionConfig {
    /// Solver parameters with the file's overrides applied to the defaults.
    pub fn to_params(&self) -> ReconstructionParams {
        let lstsq_defaults = LstsqOptions::default();
        let cgrad_defaults = CgradOptions::default();
        ReconstructionParams {
            algorithm: self.algorithm,
            num_iter: self.num_iter,
            orthogonalize_probe: self.orthogonalize_probe,
            lstsq: LstsqOptions {
                recover_psi: self.recover_psi,
                recover_probe: self.recover_probe,
                recover_positions: self.recover_positions,
                cg_iter: self.cg_iter,
                farfield_step: self.farfield_step.unwrap_or(lstsq_defaults.farfield_step),
                eigen_learning_rate: self.eigen_learning_rate.unwrap_or(lstsq_defaults.eigen_learning_rate),
                curvature_offset: self.curvature_offset.unwrap_or(lstsq_defaults.curvature_offset),
                step_stabilization: self.step_stabilization.unwrap_or(lstsq_defaults.step_stabilization),
                weight_stabilization: self.weight_stabilization.unwrap_or(lstsq_defaults.weight_stabilization),
                diagnostics: self.diagnostics,
            },
            cgrad: CgradOptions {
                recover_psi: self.recover_psi,
                recover_probe: self.recover_probe,
                recover_positions: self.recover_positions,
                cg_iter: self.cg_iter,
                object_step_length: self.object_step_length.unwrap_or(cgrad_defaults.object_step_length),
                probe_step_length: self.probe_step_length.unwrap_or(cgrad_defaults.probe_step_length),
            },
        }
    }
}

fn default_num_iter() -> usize {
    50
}
fn default_cg_iter() -> usize {
    4
}
fn default_backend() -> String {
    "auto".into()
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save the cost history as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_cost_csv: bool,
    /// Whether to also save the reconstruction report as JSON (default: false).
    #[serde(default)]
    pub save_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_cost_csv: true,
            save_json: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Reject parameter combinations the operators cannot handle.
    pub fn check(&self) -> anyhow::Result<()> {
        let d = &self.dataset;
        ensure!(d.ntheta > 0, "dataset.ntheta must be positive");
        ensure!(d.nmodes > 0, "dataset.nmodes must be positive");
        ensure!(d.probe_shape > 0, "dataset.probe_shape must be positive");
        ensure!(
            d.probe_shape <= d.detector_shape,
            "dataset.probe_shape ({}) must not exceed dataset.detector_shape ({})",
            d.probe_shape,
            d.detector_shape
        );
        ensure!(
            d.probe_shape <= d.object_shape,
            "dataset.probe_shape ({}) must not exceed dataset.object_shape ({})",
            d.probe_shape,
            d.object_shape
        );
        ensure!(d.scan_step > 0.0, "dataset.scan_step must be positive");
        ensure!(
            matches!(self.reconstruction.backend.as_str(), "auto" | "cpu"),
            "unknown backend '{}' (expected \"auto\" or \"cpu\")",
            self.reconstruction.backend
        );
        Ok(())
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: JobConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config.check()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptyx_core::NoiseModel;

    #[test]
    fn test_empty_file_uses_defaults() {
        let job: JobConfig = toml::from_str("").unwrap();
        assert_eq!(job.dataset.ntheta, 8);
        assert_eq!(job.dataset.object_shape, 16);
        assert_eq!(job.reconstruction.algorithm, Algorithm::Lstsq);
        assert_eq!(job.reconstruction.num_iter, 50);
        assert!(job.output.save_cost_csv);
        let params = job.reconstruction.to_params();
        assert_eq!(params.lstsq.farfield_step, 0.5);
        assert_eq!(params.cgrad.probe_step_length, 4.0);
        job.check().unwrap();
    }

    #[test]
    fn test_overrides() {
        let job: JobConfig = toml::from_str(
            r#"
            [dataset]
            ntheta = 2
            noise_model = "poisson"

            [reconstruction]
            algorithm = "cgrad"
            num_iter = 3
            farfield_step = 0.25
            curvature_offset = 0.75
            eigen_components = 2

            [output]
            directory = "out"
            save_json = true
            "#,
        )
        .unwrap();
        assert_eq!(job.dataset.ntheta, 2);
        assert_eq!(job.dataset.probe_shape, 8);
        assert_eq!(job.dataset.noise_model, NoiseModel::Poisson);
        assert_eq!(job.reconstruction.algorithm, Algorithm::Cgrad);
        assert_eq!(job.reconstruction.eigen_components, 2);
        assert_eq!(job.reconstruction.to_params().lstsq.farfield_step, 0.25);
        assert_eq!(job.reconstruction.to_params().lstsq.curvature_offset, 0.75);
        assert_eq!(job.output.directory, "out");
        assert!(job.output.save_json);
    }

    #[test]
    fn test_probe_larger_than_detector_is_rejected() {
        let job: JobConfig = toml::from_str("[dataset]\nprobe_shape = 12\ndetector_shape = 8\n").unwrap();
        assert!(job.check().is_err());
    }

    #[test]
    fn test_unknown_algorithm_fails_to_parse() {
        assert!(toml::from_str::<JobConfig>("[reconstruction]\nalgorithm = \"rpie\"\n").is_err());
    }
}
