use std::time::Instant;

use super::super::encoder::Encoder;
use super::super::params::{Check, Params};
use super::{holdout_evaluation, Outcome, Session};
use crate::error::{zeroed, Error, Result};

pub(super) fn params() -> Params {
    Params::new()
        .float(
            "c2",
            1.0,
            Check::NonNegative,
            "Coefficient for L2 regularization.",
        )
        .int(
            "max_iterations",
            1000,
            Check::AtLeastOne,
            "The maximum number of iterations (epochs) for SGD optimization.",
        )
        .int(
            "period",
            10,
            Check::AtLeastOne,
            "The duration of iterations to test the stopping criterion.",
        )
        .float(
            "delta",
            1e-6,
            Check::NonNegative,
            "The threshold for the stopping criterion; an optimization process stops when \
             the improvement of the log likelihood over the last ${period} iterations is no \
             greater than this threshold.",
        )
        .float(
            "calibration.eta",
            0.1,
            Check::Positive,
            "The initial value of learning rate (eta) used for calibration.",
        )
        .float(
            "calibration.rate",
            2.0,
            Check::Positive,
            "The rate of increase/decrease of learning rate for calibration.",
        )
        .int(
            "calibration.samples",
            1000,
            Check::AtLeastOne,
            "The number of instances used for calibration.",
        )
        .int(
            "calibration.candidates",
            10,
            Check::AtLeastOne,
            "The number of candidates of learning rate.",
        )
        .int(
            "calibration.max_trials",
            20,
            Check::AtLeastOne,
            "The maximum number of trials of learning rates for calibration.",
        )
}

/// L2SGD training parameters.
#[derive(Debug, Clone)]
struct Options {
    c2: f64,
    max_iterations: usize,
    period: usize,
    delta: f64,
    calibration_eta: f64,
    calibration_rate: f64,
    calibration_samples: usize,
    calibration_candidates: usize,
    calibration_max_trials: usize,
}

impl Options {
    fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            c2: params.get_float("c2")?,
            max_iterations: params.get_usize("max_iterations")?,
            period: params.get_usize("period")?,
            delta: params.get_float("delta")?,
            calibration_eta: params.get_float("calibration.eta")?,
            calibration_rate: params.get_float("calibration.rate")?,
            calibration_samples: params.get_usize("calibration.samples")?,
            calibration_candidates: params.get_usize("calibration.candidates")?,
            calibration_max_trials: params.get_usize("calibration.max_trials")?,
        })
    }
}

/// Settings of one SGD run
struct Run {
    /// Number of leading instances of the view to visit
    n: usize,
    t0: f64,
    lambda: f64,
    num_epochs: usize,
    /// Calibration runs are silent, do not shuffle and keep no best weights
    calibration: bool,
    period: usize,
    epsilon: f64,
}

/// Learning-rate schedule of one run, with the weight vector kept in
/// scaled form: the true weights are `decay * w`.
#[derive(Debug, Clone, Copy)]
struct Schedule {
    lambda: f64,
    t0: f64,
    t: f64,
    decay: f64,
}

impl Schedule {
    fn new(lambda: f64, t0: f64) -> Self {
        Self {
            lambda,
            t0,
            t: 0.0,
            decay: 1.0,
        }
    }

    /// Advance one update; returns `(eta, gain)`.
    fn step(&mut self) -> (f64, f64) {
        let eta = 1.0 / (self.lambda * (self.t0 + self.t));
        self.decay *= 1.0 - eta * self.lambda;
        self.t += 1.0;
        (eta, eta / self.decay)
    }
}

/// Run SGD over the first `run.n` instances of the training view.
///
/// Returns the final objective value; when the run was cut short by a
/// non-finite loss the error is returned alongside it.
fn sgd<E: Encoder>(
    s: &mut Session<'_, '_, E>,
    w: &mut [f64],
    run: &Run,
) -> Result<(f64, Option<Error>)> {
    let num_features = w.len();
    let mut schedule = Schedule::new(run.lambda, run.t0);
    let mut best_sum_loss = f64::MAX;
    let mut sum_loss = 0.0;
    let mut eta = 0.0;
    let (mut pf, mut best_w) = if run.calibration {
        (Vec::new(), Vec::new())
    } else {
        (zeroed::<f64>(run.period)?, zeroed::<f64>(num_features)?)
    };
    let mut error = None;
    let mut epoch = 0;

    w.fill(0.0);
    while epoch < run.num_epochs {
        epoch += 1;
        let clk = Instant::now();
        if !run.calibration {
            logging!(s.lg, "***** Epoch #{} *****", epoch);
            s.trainset.shuffle(&mut *s.rng);
        }

        sum_loss = 0.0;
        let mut loss = 0.0;
        for i in 0..run.n {
            let inst = s.trainset.get(i);
            let (step_eta, gain) = schedule.step();
            eta = step_eta;

            s.encoder.set_weights(w, schedule.decay);
            s.encoder.set_instance(inst, w)?;
            loss = s.encoder.objective_and_gradients(inst, w, gain);
            sum_loss += loss;
        }

        // Terminate when the loss is abnormal (NaN, -Inf, +Inf)
        if !loss.is_finite() {
            if !run.calibration {
                logging!(s.lg, "ERROR: overflow loss");
            }
            sum_loss = loss;
            error = Some(Error::Overflow);
            break;
        }

        // Materialize the decay into the weights
        for x in w.iter_mut() {
            *x *= schedule.decay;
        }
        schedule.decay = 1.0;

        // The factor n is necessary because lambda = 2 * c2 / n
        let norm2: f64 = w.iter().map(|x| x * x).sum();
        sum_loss += 0.5 * run.lambda * norm2 * run.n as f64;

        if !run.calibration {
            if sum_loss < best_sum_loss {
                best_sum_loss = sum_loss;
                best_w.copy_from_slice(w);
            }

            // No stopping test until a full period of history exists
            let slot = (epoch - 1) % run.period;
            let improvement = if run.period < epoch {
                (pf[slot] - sum_loss) / sum_loss
            } else {
                run.epsilon
            };
            pf[slot] = sum_loss;

            logging!(s.lg, "Loss: {:.6}", sum_loss);
            if run.period < epoch {
                logging!(s.lg, "Improvement ratio: {:.6}", improvement);
            }
            logging!(s.lg, "Feature L2-norm: {:.6}", norm2.sqrt());
            logging!(s.lg, "Learning rate (eta): {:.6}", eta);
            logging!(s.lg, "Total number of feature updates: {:.0}", schedule.t);
            logging!(s.lg, "Seconds required for this iteration: {:.3}", clk.elapsed().as_secs_f64());

            if let Some(testset) = s.testset {
                holdout_evaluation(&mut *s.encoder, testset, w, &mut *s.lg)?;
            }
            logging!(s.lg, "");

            if improvement < run.epsilon {
                break;
            }
        }
    }

    if !run.calibration {
        if error.is_some() {
            logging!(s.lg, "SGD terminated with an overflow");
        } else if epoch < run.num_epochs {
            logging!(s.lg, "SGD terminated with the stopping criteria");
        } else {
            logging!(s.lg, "SGD terminated with the maximum number of iterations");
        }
        // Restore the best weights; zeros when no epoch ended with a finite loss
        w.copy_from_slice(&best_w);
        if best_sum_loss < f64::MAX {
            sum_loss = best_sum_loss;
        }
    }
    Ok((sum_loss, error))
}

/// Pick the initial learning rate by trial runs over a sample.
///
/// The rate grows by `calibration.rate` while trials keep improving on the
/// initial loss, then shrinks from the starting point; the best finite
/// loss wins. Returns the offset `t0` of the learning-rate schedule.
fn calibrate<E: Encoder>(
    s: &mut Session<'_, '_, E>,
    w: &mut [f64],
    opts: &Options,
    lambda: f64,
) -> Result<f64> {
    let n = s.trainset.len();
    let samples = n.min(opts.calibration_samples);
    let init_eta = opts.calibration_eta;
    let rate = opts.calibration_rate;
    let begin = Instant::now();

    logging!(s.lg, "Calibrating the learning rate (eta)");
    logging!(s.lg, "calibration.eta: {:.6}", init_eta);
    logging!(s.lg, "calibration.rate: {:.6}", rate);
    logging!(s.lg, "calibration.samples: {}", samples);
    logging!(s.lg, "calibration.candidates: {}", opts.calibration_candidates);
    logging!(s.lg, "calibration.max_trials: {}", opts.calibration_max_trials);

    s.trainset.shuffle(&mut *s.rng);

    // Loss of the zero weight vector on the sample
    w.fill(0.0);
    s.encoder.set_weights(w, 1.0);
    let mut init_loss = 0.0;
    for i in 0..samples {
        let inst = s.trainset.get(i);
        s.encoder.set_instance(inst, w)?;
        init_loss -= s.encoder.score(&inst.labels);
        init_loss += s.encoder.partition_factor();
    }
    logging!(s.lg, "Initial loss: {:.6}", init_loss);

    let mut num = opts.calibration_candidates;
    let mut dec = false;
    let mut trials = 1;
    let mut eta = init_eta;
    let mut best_eta = init_eta;
    let mut best_loss = f64::MAX;

    while num > 0 || !dec {
        let run = Run {
            n: samples,
            t0: 1.0 / (lambda * eta),
            lambda,
            num_epochs: 1,
            calibration: true,
            period: 1,
            epsilon: 0.0,
        };
        let (loss, _) = sgd(s, w, &run)?;

        // Make sure that the learning rate decreases the loss
        let ok = loss.is_finite() && loss < init_loss;
        if ok {
            logging!(s.lg, "Trial #{} (eta = {:.6}): {:.6}", trials, eta, loss);
            num -= 1;
        } else {
            logging!(s.lg, "Trial #{} (eta = {:.6}): {:.6} (worse)", trials, eta, loss);
        }

        if loss.is_finite() && loss < best_loss {
            best_loss = loss;
            best_eta = eta;
        }

        if !dec {
            if ok && num > 0 {
                eta *= rate;
            } else {
                dec = true;
                num = opts.calibration_candidates;
                eta = init_eta / rate;
            }
        } else {
            eta /= rate;
        }

        trials += 1;
        if opts.calibration_max_trials <= trials {
            break;
        }
    }

    logging!(s.lg, "Best learning rate (eta): {:.6}", best_eta);
    logging!(s.lg, "Seconds required: {:.3}", begin.elapsed().as_secs_f64());
    logging!(s.lg, "");
    Ok(1.0 / (lambda * best_eta))
}

/// Train using stochastic gradient descent with L2 regularization.
pub(super) fn train<E: Encoder>(s: &mut Session<'_, '_, E>) -> Result<Outcome> {
    let opts = Options::from_params(s.params)?;
    let num_features = s.encoder.num_features();
    let n = s.trainset.len();
    if opts.c2 <= 0.0 {
        return Err(Error::InvalidParameter(
            "c2 must be positive for SGD training".to_string(),
        ));
    }
    let lambda = 2.0 * opts.c2 / n as f64;

    logging!(s.lg, "Stochastic Gradient Descent (SGD)");
    logging!(s.lg, "c2: {:.6}", opts.c2);
    logging!(s.lg, "max_iterations: {}", opts.max_iterations);
    logging!(s.lg, "period: {}", opts.period);
    logging!(s.lg, "delta: {:.6}", opts.delta);
    logging!(s.lg, "");
    let begin = Instant::now();

    let mut w = zeroed::<f64>(num_features)?;
    let t0 = calibrate(s, &mut w, &opts, lambda)?;

    let run = Run {
        n,
        t0,
        lambda,
        num_epochs: opts.max_iterations,
        calibration: false,
        period: opts.period,
        epsilon: opts.delta,
    };
    let (loss, error) = sgd(s, &mut w, &run)?;

    logging!(s.lg, "Loss: {:.6}", loss);
    logging!(s.lg, "Total seconds required for training: {:.3}", begin.elapsed().as_secs_f64());
    logging!(s.lg, "");
    Ok(Outcome { weights: w, error })
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::attribute::Attribute;
    use crate::dataset::{Dataset, DatasetView};
    use crate::train::encoder::Crf1dEncoder;
    use crate::train::feature_gen::FeatureOptions;
    use crate::train::logging::Logging;

    #[test]
    fn test_schedule() {
        let lambda = 0.5;
        let mut schedule = Schedule::new(lambda, 1.0 / (lambda * 0.1));
        let (eta, gain) = schedule.step();
        assert!((eta - 0.1).abs() < 1e-12);
        assert!((schedule.decay - 0.95).abs() < 1e-12);
        assert!((gain - 0.1 / 0.95).abs() < 1e-12);

        // the rate decays as 1 / (lambda * (t0 + t))
        let (eta2, _) = schedule.step();
        assert!(eta2 < eta);
        assert_eq!(schedule.t, 2.0);
    }

    #[test]
    fn test_overflow_in_first_epoch_yields_zero_weights() {
        let mut data = Dataset::new();
        let xseq = vec![vec![Attribute::new("x", 1e200)]];
        data.append(&xseq, &["A"], 1.0, 0).unwrap();
        data.append(&xseq, &["B"], 1.0, 0).unwrap();

        let mut lg = Logging::new();
        let mut trainset = DatasetView::all(&data);
        let mut encoder = Crf1dEncoder::new(FeatureOptions::default()).unwrap();
        encoder.initialize(&trainset, &mut lg).unwrap();
        let params = params();
        let mut rng = StdRng::seed_from_u64(1);
        let mut session = Session {
            encoder: &mut encoder,
            trainset: &mut trainset,
            testset: None,
            params: &params,
            lg: &mut lg,
            rng: &mut rng,
        };

        // eta starts at 0.5, so the second instance sees weights near 1e200
        let lambda = 1.0;
        let run = Run {
            n: 2,
            t0: 2.0 / lambda,
            lambda,
            num_epochs: 1,
            calibration: false,
            period: 10,
            epsilon: 1e-6,
        };
        let mut w = vec![0.5; session.encoder.num_features()];
        let (_, error) = sgd(&mut session, &mut w, &run).unwrap();
        assert!(matches!(error, Some(Error::Overflow)));
        assert!(w.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_defaults() {
        let opts = Options::from_params(&params()).unwrap();
        assert_eq!(opts.c2, 1.0);
        assert_eq!(opts.max_iterations, 1000);
        assert_eq!(opts.period, 10);
        assert_eq!(opts.delta, 1e-6);
        assert_eq!(opts.calibration_eta, 0.1);
        assert_eq!(opts.calibration_rate, 2.0);
        assert_eq!(opts.calibration_samples, 1000);
        assert_eq!(opts.calibration_candidates, 10);
        assert_eq!(opts.calibration_max_trials, 20);
    }
}
