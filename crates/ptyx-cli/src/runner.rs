//! Reconstruction runner: ties together the synthetic dataset, the backend,
//! and the solver.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ptyx_compute::ComputeBackend;
use ptyx_core::probe::init_eigen;
use ptyx_core::sim::SyntheticDataset;
use ptyx_core::{reconstruct, ReconstructionReport};

use crate::config::JobConfig;

/// Run a full reconstruction from a parsed job configuration.
pub fn run_reconstruction(job: &JobConfig) -> Result<ReconstructionReport> {
    let backend = create_backend(&job.reconstruction.backend)?;

    let (op, dataset) = SyntheticDataset::generate(&job.dataset, backend)
        .context("failed to simulate the synthetic dataset")?;
    let nscan = dataset.nscan();
    println!(
        "  Dataset: {} views x {} positions, object {}x{}, probe {}, detector {}",
        job.dataset.ntheta,
        nscan,
        job.dataset.object_shape,
        job.dataset.object_shape,
        job.dataset.probe_shape,
        job.dataset.detector_shape
    );
    if nscan == 0 {
        bail!("No scan positions generated; check the dataset shapes and scan_step");
    }

    let mut state = dataset.initial_state();
    let ncomp = job.reconstruction.eigen_components;
    if ncomp > 0 {
        let mut rng = StdRng::seed_from_u64(job.dataset.seed.wrapping_add(1));
        let (eigen_probe, eigen_weights) = init_eigen(
            job.dataset.ntheta,
            nscan,
            ncomp,
            job.dataset.nmodes,
            job.dataset.probe_shape,
            &mut rng,
        );
        state = state.with_eigen(eigen_probe, eigen_weights);
        println!("  Eigen probes: {} components", ncomp);
    }

    let params = job.reconstruction.to_params();
    let report = reconstruct(&op, &[dataset.data.clone()], &mut state, &params)
        .context("reconstruction failed")?;

    let total = report.costs.len();
    for (i, cost) in report.costs.iter().enumerate() {
        if (i + 1) % 10 == 0 || i == 0 || i + 1 == total {
            println!("  [{}/{}] cost = {:.6e}", i + 1, total, cost);
        }
    }
    Ok(report)
}

/// Write the cost history to a CSV file.
pub fn write_cost_csv(report: &ReconstructionReport, path: &Path, job: &JobConfig) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    writeln!(file, "# Ptyx reconstruction cost history")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "# method: {}", report.method)?;
    writeln!(
        file,
        "# dataset: ntheta={}, object={}, probe={}, detector={}, nmodes={}, noise_model={:?}",
        job.dataset.ntheta,
        job.dataset.object_shape,
        job.dataset.probe_shape,
        job.dataset.detector_shape,
        job.dataset.nmodes,
        job.dataset.noise_model
    )?;
    writeln!(file, "#")?;
    writeln!(file, "iteration,cost")?;
    for (i, cost) in report.costs.iter().enumerate() {
        writeln!(file, "{},{:.9e}", i, cost)?;
    }

    println!("Cost history written to: {}", path.display());
    Ok(())
}

/// Write the reconstruction report as JSON.
pub fn write_report_json(report: &ReconstructionReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(report).context("JSON serialisation error")?;
    std::fs::write(path, json)?;

    println!("Report (JSON) written to: {}", path.display());
    Ok(())
}

/// Select a compute backend by name.
fn create_backend(preference: &str) -> Result<Arc<dyn ComputeBackend>> {
    match preference {
        "cpu" | "auto" => {
            let backend = ptyx_compute::CpuBackend::new();
            println!("Backend: {}", backend.device_info().name);
            Ok(Arc::new(backend))
        }
        other => bail!("Unknown backend '{}'", other),
    }
}
