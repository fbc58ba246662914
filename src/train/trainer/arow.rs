use std::time::Instant;

use super::super::delta::Delta;
use super::super::encoder::Encoder;
use super::super::params::{Check, Params};
use super::averaged_perceptron::diff;
use super::{holdout_evaluation, Outcome, Session};
use crate::error::{zeroed, Result};

pub(super) fn params() -> Params {
    Params::new()
        .float(
            "variance",
            1.0,
            Check::Positive,
            "The initial variance of every feature weight.",
        )
        .float("gamma", 1.0, Check::Positive, "Tradeoff parameter.")
        .int(
            "max_iterations",
            100,
            Check::AtLeastOne,
            "The maximum number of iterations.",
        )
        .float(
            "epsilon",
            0.0,
            Check::NonNegative,
            "The stopping criterion (the mean loss).",
        )
}

/// AROW training parameters.
#[derive(Debug, Clone)]
struct Options {
    variance: f64,
    gamma: f64,
    max_iterations: usize,
    epsilon: f64,
}

impl Options {
    fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            variance: params.get_float("variance")?,
            gamma: params.get_float("gamma")?,
            max_iterations: params.get_usize("max_iterations")?,
            epsilon: params.get_float("epsilon")?,
        })
    }
}

/// Mean and diagonal covariance of the weight distribution
struct Gaussian {
    mean: Vec<f64>,
    cov: Vec<f64>,
}

impl Gaussian {
    fn new(num_features: usize, variance: f64) -> Result<Self> {
        let mut cov = zeroed::<f64>(num_features)?;
        cov.fill(variance);
        Ok(Self {
            mean: zeroed(num_features)?,
            cov,
        })
    }

    /// Move the mean along `delta` by `cost` and shrink the touched variances.
    fn update(&mut self, delta: &Delta, cost: f64, gamma: f64) {
        let frac = gamma
            + delta
                .iter()
                .map(|(k, d)| d * d * self.cov[k])
                .sum::<f64>();
        let alpha = cost / frac;
        for (k, d) in delta.iter() {
            self.mean[k] += alpha * self.cov[k] * d;
            self.cov[k] = 1.0 / (1.0 / self.cov[k] + d * d / gamma);
        }
    }
}

/// Train using Adaptive Regularization of Weight Vectors.
///
/// The model is the mean of a Gaussian over weights; features that are
/// updated often grow confident and move less.
pub(super) fn train<E: Encoder>(s: &mut Session<'_, '_, E>) -> Result<Outcome> {
    let opts = Options::from_params(s.params)?;
    let num_features = s.encoder.num_features();
    let num_instances = s.trainset.len() as f64;

    let mut gauss = Gaussian::new(num_features, opts.variance)?;
    let mut viterbi = zeroed::<u32>(s.trainset.max_items())?;
    let mut delta = Delta::new(num_features)?;

    logging!(s.lg, "Adaptive Regularization of Weights (AROW)");
    logging!(s.lg, "variance: {:.6}", opts.variance);
    logging!(s.lg, "gamma: {:.6}", opts.gamma);
    logging!(s.lg, "max_iterations: {}", opts.max_iterations);
    logging!(s.lg, "epsilon: {:.6}", opts.epsilon);
    logging!(s.lg, "");
    let begin = Instant::now();

    for epoch in 0..opts.max_iterations {
        let clk = Instant::now();
        let mut sum_loss = 0.0;

        s.trainset.shuffle(&mut *s.rng);
        for n in 0..s.trainset.len() {
            let inst = s.trainset.get(n);
            let predicted = &mut viterbi[..inst.num_items()];

            s.encoder.set_weights(&gauss.mean, 1.0);
            s.encoder.set_instance(inst, &gauss.mean)?;
            let sv = s.encoder.viterbi(predicted);

            let num_diff = diff(&inst.labels, predicted);
            if num_diff > 0 {
                let sc = s.encoder.score(&inst.labels);
                let cost = sv - sc + num_diff as f64;

                delta.reset();
                s.encoder
                    .features_on_path(inst, &inst.labels, &mut |fid, v| delta.collect(fid, v, 1.0));
                s.encoder
                    .features_on_path(inst, predicted, &mut |fid, v| delta.collect(fid, v, -1.0));
                delta.finalize();

                gauss.update(&delta, cost, opts.gamma);
                sum_loss += cost;
            }
        }

        let feature_norm = gauss.mean.iter().map(|x| x * x).sum::<f64>().sqrt();
        logging!(s.lg, "***** Iteration #{} *****", epoch + 1);
        logging!(s.lg, "Loss: {:.6}", sum_loss);
        logging!(s.lg, "Feature norm: {:.6}", feature_norm);
        logging!(s.lg, "Seconds required for this iteration: {:.3}", clk.elapsed().as_secs_f64());

        if let Some(testset) = s.testset {
            holdout_evaluation(&mut *s.encoder, testset, &gauss.mean, &mut *s.lg)?;
        }
        logging!(s.lg, "");

        if sum_loss / num_instances <= opts.epsilon {
            logging!(s.lg, "Terminated with the stopping criterion");
            logging!(s.lg, "");
            break;
        }
    }

    logging!(s.lg, "Total seconds required for training: {:.3}", begin.elapsed().as_secs_f64());
    logging!(s.lg, "");
    Ok(Outcome::done(gauss.mean))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_shrinks_variance() {
        let mut gauss = Gaussian::new(3, 1.0).unwrap();
        let mut delta = Delta::new(3).unwrap();
        delta.collect(0, 1.0, 1.0);
        delta.collect(2, 1.0, -1.0);
        delta.finalize();

        // frac = 1 + 1 + 1, alpha = 3 / 3
        gauss.update(&delta, 3.0, 1.0);
        assert_eq!(gauss.mean, vec![1.0, 0.0, -1.0]);
        assert_eq!(gauss.cov, vec![0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_defaults() {
        let opts = Options::from_params(&params()).unwrap();
        assert_eq!(opts.variance, 1.0);
        assert_eq!(opts.gamma, 1.0);
        assert_eq!(opts.max_iterations, 100);
    }
}
