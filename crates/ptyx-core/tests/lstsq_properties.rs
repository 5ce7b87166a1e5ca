//! Properties of a single least-squares iteration.

use std::sync::Arc;

use ndarray::{Array3, Array4, Array5, Axis};
use num_complex::Complex64;
use ptyx_compute::CpuBackend;
use ptyx_core::probe::init_eigen;
use ptyx_core::sim::{gaussian_probe, random_unit_modulus, raster_scan, DatasetParams, SyntheticDataset};
use ptyx_core::solver::lstsq::lstsq_grad;
use ptyx_core::{reconstruct, LstsqOptions, NoiseModel, Ptycho, PtychoError, PtychoState, ReconstructionParams};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn dataset(nmodes: usize) -> (Ptycho, SyntheticDataset) {
    let params = DatasetParams {
        nmodes,
        ..DatasetParams::default()
    };
    SyntheticDataset::generate(&params, Arc::new(CpuBackend::new())).unwrap()
}

fn recover_both() -> LstsqOptions {
    LstsqOptions {
        recover_probe: true,
        ..LstsqOptions::default()
    }
}

// ---------------------------------------------------------------
// Finite updates
// ---------------------------------------------------------------

#[test]
fn test_one_iteration_gives_finite_object_and_probe() {
    let (op, dataset) = dataset(1);
    let mut state = dataset.initial_state();
    let cost = lstsq_grad(&op, &[dataset.data.clone()], &mut state, &recover_both()).unwrap();

    assert!(cost.is_finite() && cost > 0.0);
    assert_eq!(state.psi[0].shape(), &[8, 16, 16]);
    assert!(state.psi[0].iter().all(|z| z.re.is_finite() && z.im.is_finite()));
    assert!(state.probe[0].iter().all(|z| z.re.is_finite() && z.im.is_finite()));
    assert_ne!(state.psi[0], dataset.initial_state().psi[0]);
}

#[test]
fn test_two_modes_with_padded_detector() {
    let mut rng = StdRng::seed_from_u64(40);
    let op = Ptycho::new(2, 6, 8, NoiseModel::Poisson, Arc::new(CpuBackend::new()));
    let truth: Array3<Complex64> = random_unit_modulus((2, 14, 14), &mut rng);
    let scan = raster_scan(2, 14, 6, 1.5);
    let probe = gaussian_probe(2, 2, 6);
    let data = op
        .simulate(truth.view(), scan.view(), probe.view().insert_axis(Axis(1)))
        .unwrap();

    let psi = Array3::from_elem((2, 14, 14), Complex64::new(1.0, 0.0));
    let mut state = PtychoState::new(psi, probe, scan);
    let cost = lstsq_grad(&op, &[data], &mut state, &recover_both()).unwrap();
    assert!(cost.is_finite());
    assert!(state.psi[0].iter().all(|z| z.norm().is_finite()));
}

#[test]
fn test_positions_are_left_unchanged() {
    let (op, dataset) = dataset(1);
    let mut state = dataset.initial_state();
    let options = LstsqOptions {
        recover_positions: true,
        ..recover_both()
    };
    lstsq_grad(&op, &[dataset.data.clone()], &mut state, &options).unwrap();
    assert_eq!(state.scan[0], dataset.scan);
}

#[test]
fn test_probe_only_recovery_leaves_object_untouched() {
    let (op, dataset) = dataset(1);
    let mut state = dataset.initial_state();
    let options = LstsqOptions {
        recover_psi: false,
        recover_probe: true,
        diagnostics: true,
        ..LstsqOptions::default()
    };
    let psi_before = state.psi[0].clone();
    let probe_before = state.probe[0].clone();

    let costs: Vec<f64> = (0..20)
        .map(|_| lstsq_grad(&op, &[dataset.data.clone()], &mut state, &options).unwrap())
        .collect();

    assert_eq!(state.psi[0], psi_before);
    assert!(costs.iter().all(|c| c.is_finite()));
    assert!(costs[19] < costs[0], "cost {} -> {}", costs[0], costs[19]);
    assert_ne!(state.probe[0], probe_before);
    assert!(state.probe[0].iter().all(|z| z.norm().is_finite()));
}

#[test]
fn test_object_only_recovery_with_diagnostics() {
    let (op, dataset) = dataset(1);
    let mut state = dataset.initial_state();
    let options = LstsqOptions {
        diagnostics: true,
        ..LstsqOptions::default()
    };
    let psi_before = state.psi[0].clone();
    let probe_before = state.probe[0].clone();

    for _ in 0..3 {
        let cost = lstsq_grad(&op, &[dataset.data.clone()], &mut state, &options).unwrap();
        assert!(cost.is_finite());
    }

    assert_eq!(state.probe[0], probe_before);
    assert_ne!(state.psi[0], psi_before);
    assert!(state.psi[0].iter().all(|z| z.norm().is_finite()));
}

// ---------------------------------------------------------------
// Eigen probes
// ---------------------------------------------------------------

#[test]
fn test_eigen_weights_have_zero_mean_after_update() {
    let (op, dataset) = dataset(1);
    let mut rng = StdRng::seed_from_u64(41);
    let (eigen_probe, eigen_weights) = init_eigen(8, dataset.nscan(), 2, 1, 8, &mut rng);
    let mut state = dataset.initial_state().with_eigen(eigen_probe, eigen_weights);

    for _ in 0..2 {
        lstsq_grad(&op, &[dataset.data.clone()], &mut state, &recover_both()).unwrap();
    }

    let weights = &state.eigen_weights.as_ref().unwrap()[0];
    assert!(weights.iter().any(|&w| w != 0.0), "weights were never updated");
    let mean = weights.mean_axis(Axis(1)).unwrap();
    for &m in mean.iter() {
        assert!(m.abs() < 1e-12, "mean weight {}", m);
    }

    let eigen = &state.eigen_probe.as_ref().unwrap()[0];
    for t in 0..8 {
        for c in 0..2 {
            let energy: f64 = eigen
                .slice(ndarray::s![t, c, 0, .., ..])
                .iter()
                .map(|z| z.norm_sqr())
                .sum();
            assert!((energy - 1.0).abs() < 1e-10);
        }
    }
}

#[test]
fn test_eigen_components_stay_nearly_orthogonal() {
    let (op, dataset) = dataset(1);
    let mut rng = StdRng::seed_from_u64(42);
    let (eigen_probe, eigen_weights) = init_eigen(8, dataset.nscan(), 3, 1, 8, &mut rng);
    let mut state = dataset.initial_state().with_eigen(eigen_probe, eigen_weights);

    for _ in 0..10 {
        lstsq_grad(&op, &[dataset.data.clone()], &mut state, &recover_both()).unwrap();
    }

    // Components are renormalized but not re-orthogonalized, so only a
    // bounded drift is expected.
    let eigen = &state.eigen_probe.as_ref().unwrap()[0];
    let mut worst: f64 = 0.0;
    for t in 0..8 {
        for i in 0..3 {
            for j in (i + 1)..3 {
                let a = eigen.slice(ndarray::s![t, i, 0, .., ..]);
                let b = eigen.slice(ndarray::s![t, j, 0, .., ..]);
                let overlap: Complex64 = a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum();
                worst = worst.max(overlap.norm());
            }
        }
    }
    assert!(worst < 0.3, "worst component overlap {}", worst);
}

#[test]
fn test_zero_eigen_probe_reports_non_finite_weights() {
    let (op, dataset) = dataset(1);
    let nscan = dataset.nscan();
    let eigen_probe = Array5::<Complex64>::zeros((8, 1, 1, 8, 8));
    let eigen_weights = Array4::<f64>::zeros((8, nscan, 1, 1));
    let mut state = dataset.initial_state().with_eigen(eigen_probe, eigen_weights);

    let direct = lstsq_grad(&op, &[dataset.data.clone()], &mut state, &recover_both());
    assert!(matches!(
        direct,
        Err(PtychoError::NonFiniteEigenWeights { mode: 0, component: 0 })
    ));

    let params = ReconstructionParams {
        num_iter: 3,
        lstsq: recover_both(),
        ..ReconstructionParams::default()
    };
    let err = reconstruct(&op, &[dataset.data.clone()], &mut state, &params).unwrap_err();
    assert!(err.is_numerical_failure());
    assert!(matches!(err, PtychoError::AtIteration { iteration: 0, .. }));
}

// ---------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------

#[test]
fn test_rejects_multiple_devices() {
    let (op, dataset) = dataset(1);
    let mut state = dataset.initial_state();
    state.psi.push(state.psi[0].clone());
    let err = lstsq_grad(&op, &[dataset.data.clone()], &mut state, &LstsqOptions::default()).unwrap_err();
    assert!(matches!(err, PtychoError::DeviceCount { found: 2 }));
}

#[test]
fn test_rejects_mismatched_data() {
    let (op, dataset) = dataset(1);
    let mut state = dataset.initial_state();
    let data = Array4::<f64>::zeros((8, 3, 8, 8));
    let before = state.psi[0].clone();
    let err = lstsq_grad(&op, &[data], &mut state, &LstsqOptions::default()).unwrap_err();
    assert!(matches!(err, PtychoError::ShapeMismatch { what: "data", .. }));
    assert_eq!(state.psi[0], before);
}

#[test]
fn test_rejects_half_eigen_state() {
    let (op, dataset) = dataset(1);
    let mut state = dataset.initial_state();
    state.eigen_probe = Some(vec![Array5::zeros((8, 1, 1, 8, 8))]);
    let err = lstsq_grad(&op, &[dataset.data.clone()], &mut state, &LstsqOptions::default()).unwrap_err();
    assert!(matches!(err, PtychoError::IncompleteEigenState));
}
