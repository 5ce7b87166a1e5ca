//! Full reconstructions of noiseless synthetic data.

use std::sync::Arc;

use ptyx_compute::CpuBackend;
use ptyx_core::sim::{DatasetParams, SyntheticDataset};
use ptyx_core::{reconstruct, Algorithm, CgradOptions, LstsqOptions, ReconstructionParams};

fn dataset() -> (ptyx_core::Ptycho, SyntheticDataset) {
    SyntheticDataset::generate(&DatasetParams::default(), Arc::new(CpuBackend::new())).unwrap()
}

#[test]
fn test_lstsq_decreases_cost_over_fifty_iterations() {
    let (op, dataset) = dataset();
    let mut state = dataset.initial_state();
    let params = ReconstructionParams {
        algorithm: Algorithm::Lstsq,
        num_iter: 50,
        lstsq: LstsqOptions {
            recover_psi: true,
            recover_probe: true,
            ..LstsqOptions::default()
        },
        ..ReconstructionParams::default()
    };

    let report = reconstruct(&op, &[dataset.data.clone()], &mut state, &params).unwrap();
    assert_eq!(report.costs.len(), 50);
    assert!(report.costs.iter().all(|c| c.is_finite()));
    eprintln!(
        "lstsq cost: first = {:.4e}, last = {:.4e}",
        report.costs[0], report.costs[49]
    );
    assert!(report.costs[49] < report.costs[0]);
}

#[test]
fn test_cgrad_decreases_cost() {
    let (op, dataset) = dataset();
    let mut state = dataset.initial_state();
    let params = ReconstructionParams {
        algorithm: Algorithm::Cgrad,
        num_iter: 5,
        cgrad: CgradOptions {
            recover_probe: false,
            ..CgradOptions::default()
        },
        ..ReconstructionParams::default()
    };

    let report = reconstruct(&op, &[dataset.data.clone()], &mut state, &params).unwrap();
    assert_eq!(report.method, "Conjugate gradient (cgrad)");
    assert!(report.costs[4] <= report.costs[0]);
    let initial = op
        .cost(
            dataset.data.view(),
            dataset.initial_state().psi[0].view(),
            dataset.scan.view(),
            dataset.probe.view().insert_axis(ndarray::Axis(1)),
        )
        .unwrap();
    assert!(report.costs[0] < initial);
}

#[test]
fn test_orthogonalized_modes_stay_orthogonal() {
    let params = DatasetParams {
        nmodes: 2,
        ntheta: 2,
        ..DatasetParams::default()
    };
    let (op, dataset) = SyntheticDataset::generate(&params, Arc::new(CpuBackend::new())).unwrap();
    let mut state = dataset.initial_state();
    let params = ReconstructionParams {
        num_iter: 3,
        orthogonalize_probe: true,
        lstsq: LstsqOptions {
            recover_probe: true,
            ..LstsqOptions::default()
        },
        ..ReconstructionParams::default()
    };
    reconstruct(&op, &[dataset.data.clone()], &mut state, &params).unwrap();

    let probe = &state.probe[0];
    for t in 0..2 {
        let overlap = ptyx_core::linalg::inner(
            &probe.slice(ndarray::s![t, 0, .., ..]),
            &probe.slice(ndarray::s![t, 1, .., ..]),
        );
        assert!(overlap.norm() < 1e-10, "view {} overlap {}", t, overlap);
    }
}
