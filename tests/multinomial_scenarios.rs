use approx::assert_abs_diff_eq;
use msgl::config::{DesignBackend, ObjectiveConfig};
use msgl::data::MultinomialData;
use msgl::design::{AnyDesign, DesignMatrix};
use msgl::multinomial::{LossError, MultinomialLoss, ProbabilityState};
use msgl::objective::MultinomialObjective;
use msgl::response::{ResponseSummary, predict};
use ndarray::{Array1, Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn three_samples_two_classes_at_zero() {
    init_logging();
    let x = Array2::<f64>::zeros((3, 1));
    let data = MultinomialData::uniform_weights(x, &[1, 2, 1], &ObjectiveConfig::default()).unwrap();
    let loss = data.loss();

    assert_eq!(loss.state(), ProbabilityState::Uniform);
    for &p in loss.probabilities().iter() {
        assert_abs_diff_eq!(p, 0.5, epsilon = 1e-15);
    }
    assert_abs_diff_eq!(loss.loss_value(), 3.0 * 2f64.ln(), epsilon = 1e-12);
    let grad = loss.gradient();
    assert_abs_diff_eq!(grad[[0, 0]], -0.5, epsilon = 1e-15);
    assert_abs_diff_eq!(grad[[0, 1]], 0.5, epsilon = 1e-15);
}

/// Plain gradient descent on a separable-ish three class problem must lower
/// the objective and end up predicting most training labels.
#[test]
fn gradient_descent_lowers_loss_and_learns_classes() {
    init_logging();
    let n = 90;
    let k = 3;
    let mut rng = StdRng::seed_from_u64(2024);
    let noise = Normal::new(0.0, 0.3).unwrap();
    let centers = array![[2.0, 0.0], [-1.0, 1.7], [-1.0, -1.7]];

    let mut labels = Vec::with_capacity(n);
    let mut x = Array2::<f64>::zeros((n, 3));
    for i in 0..n {
        let class = rng.gen_range(0..k);
        labels.push(class + 1);
        x[[i, 0]] = 1.0;
        x[[i, 1]] = centers[[class, 0]] + noise.sample(&mut rng);
        x[[i, 2]] = centers[[class, 1]] + noise.sample(&mut rng);
    }

    let config = ObjectiveConfig {
        backend: DesignBackend::Sparse,
        ..ObjectiveConfig::default()
    };
    let design = AnyDesign::from_dense(x.clone(), &config).unwrap();
    let data = MultinomialData::uniform_weights(design, &labels, &config).unwrap();
    assert_eq!(data.n_classes(), k);

    let mut objective = MultinomialObjective::new(&data);
    let start = objective.value();
    // Σ_j bound_j ≥ λ_max of the full Hessian, and there are 3 features.
    let step = 1.0 / (3.0 * objective.hessian_bound());
    let mut beta = Array2::<f64>::zeros((3, k));
    let mut previous = start;
    for _ in 0..200 {
        let grad = objective.gradient();
        beta.scaled_add(-step, &grad);
        objective.at(beta.view()).unwrap();
        let value = objective.value();
        assert!(value <= previous + 1e-12);
        previous = value;
    }
    assert!(previous < 0.25 * start);

    let responses = predict(&x, beta.view()).unwrap();
    let summary = ResponseSummary::from_responses(&responses).unwrap();
    let correct = summary
        .classes
        .iter()
        .zip(labels.iter())
        .filter(|(a, b)| a == b)
        .count();
    assert!(correct as f64 >= 0.9 * n as f64);
    for row in summary.response.rows() {
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn refresh_failure_surfaces_to_caller() {
    init_logging();
    let grouping = array![0, 1, 2];
    let weights = array![1.0, 1.0, 1.0];
    let mut loss = MultinomialLoss::new(3, 3, grouping.view(), weights.view()).unwrap();
    let mut lp = Array2::<f64>::zeros((3, 3));
    lp[[2, 1]] = f64::NAN;
    assert_eq!(
        loss.refresh(lp.view()),
        Err(LossError::NonFiniteProbabilities { sample: 2 })
    );
    assert_eq!(loss.state(), ProbabilityState::Uniform);
}

#[test]
fn readers_share_lazily_computed_hessians() {
    init_logging();
    let n = 200;
    let k = 5;
    let mut rng = StdRng::seed_from_u64(77);
    let grouping = Array1::from_shape_fn(n, |_| rng.gen_range(0..k));
    let weights = Array1::from_shape_fn(n, |_| rng.r#gen::<f64>());
    let lp = Array2::from_shape_fn((n, k), |_| rng.r#gen::<f64>() * 4.0 - 2.0);
    let mut loss = MultinomialLoss::new(n, k, grouping.view(), weights.view()).unwrap();
    loss.refresh(lp.view()).unwrap();

    let loss = &loss;
    let traces: Vec<f64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                scope.spawn(move || {
                    (t..n)
                        .step_by(4)
                        .map(|i| loss.hessian(i).unwrap().diag().sum())
                        .sum::<f64>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let expected: f64 = (0..n)
        .map(|i| {
            let p = loss.probabilities().row(i).to_owned();
            weights[i] * (p.sum() - p.dot(&p))
        })
        .sum();
    assert!(loss.hessians_valid());
    assert_abs_diff_eq!(traces.iter().sum::<f64>(), expected, epsilon = 1e-9);
}

#[test]
fn design_backends_report_same_shape() {
    let x = array![[0.0, 1.0, 0.0], [2.0, 0.0, 0.0]];
    let sparse_config = ObjectiveConfig::from_toml_str("backend = \"sparse\"").unwrap();
    let dense = AnyDesign::from_dense(x.clone(), &ObjectiveConfig::default()).unwrap();
    let sparse = AnyDesign::from_dense(x, &sparse_config).unwrap();
    assert_eq!((dense.nrows(), dense.ncols()), (sparse.nrows(), sparse.ncols()));
    assert_eq!(sparse.column_entries(2), Vec::new());
}
