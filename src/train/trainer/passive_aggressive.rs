use std::time::Instant;

use super::super::delta::Delta;
use super::super::encoder::Encoder;
use super::super::params::{Check, Params};
use super::averaged_perceptron::diff;
use super::{holdout_evaluation, Outcome, Session};
use crate::error::{zeroed, Error, Result};

/// Passive Aggressive variant, choosing how the step size is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaType {
    /// PA without slack variables
    Pa,
    /// PA-I: step size clipped at `c`
    PaI,
    /// PA-II: squared slack penalty
    PaII,
}

impl PaType {
    fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Pa),
            1 => Ok(Self::PaI),
            2 => Ok(Self::PaII),
            other => Err(Error::InvalidParameter(format!(
                "type must be one of 0, 1, 2, got {}",
                other
            ))),
        }
    }

    fn tau(self, cost: f64, norm2: f64, c: f64) -> f64 {
        match self {
            Self::Pa => cost / norm2,
            Self::PaI => c.min(cost / norm2),
            Self::PaII => cost / (norm2 + 0.5 / c),
        }
    }
}

pub(super) fn params() -> Params {
    Params::new()
        .int(
            "type",
            1,
            Check::NonNegative,
            "The strategy for updating feature weights: \
             {0: PA without slack variables, 1: PA type I, 2: PA type II}.",
        )
        .float("c", 1.0, Check::Positive, "The aggressiveness parameter.")
        .int(
            "error_sensitive",
            1,
            Check::Any,
            "Consider the number of incorrect labels to the cost function.",
        )
        .int(
            "averaging",
            1,
            Check::Any,
            "Compute the average of feature weights (similarly to Averaged Perceptron).",
        )
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

/// Passive Aggressive training parameters.
#[derive(Debug, Clone)]
struct Options {
    pa_type: PaType,
    c: f64,
    error_sensitive: bool,
    averaging: bool,
    max_iterations: usize,
    epsilon: f64,
}

impl Options {
    fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            pa_type: PaType::from_code(params.get_int("type")?)?,
            c: params.get_float("c")?,
            error_sensitive: params.get_bool("error_sensitive")?,
            averaging: params.get_bool("averaging")?,
            max_iterations: params.get_usize("max_iterations")?,
            epsilon: params.get_float("epsilon")?,
        })
    }

    /// Margin violation `err` plus the label-distance term.
    fn cost(&self, err: f64, num_diff: usize) -> f64 {
        if self.error_sensitive {
            err + (num_diff as f64).sqrt()
        } else {
            err + 1.0
        }
    }
}

/// Train using the Passive Aggressive algorithm.
pub(super) fn train<E: Encoder>(s: &mut Session<'_, '_, E>) -> Result<Outcome> {
    let opts = Options::from_params(s.params)?;
    let num_features = s.encoder.num_features();
    let num_instances = s.trainset.len() as f64;

    let mut w = zeroed::<f64>(num_features)?;
    let mut ws = zeroed::<f64>(num_features)?;
    let mut wa = zeroed::<f64>(num_features)?;
    let mut viterbi = zeroed::<u32>(s.trainset.max_items())?;
    let mut delta = Delta::new(num_features)?;

    logging!(s.lg, "Passive Aggressive");
    logging!(s.lg, "type: {}", s.params.get_int("type")?);
    logging!(s.lg, "c: {:.6}", opts.c);
    logging!(s.lg, "error_sensitive: {}", opts.error_sensitive as i32);
    logging!(s.lg, "averaging: {}", opts.averaging as i32);
    logging!(s.lg, "max_iterations: {}", opts.max_iterations);
    logging!(s.lg, "epsilon: {:.6}", opts.epsilon);
    logging!(s.lg, "");
    let begin = Instant::now();

    let mut u = 1.0;
    for epoch in 0..opts.max_iterations {
        let clk = Instant::now();
        let mut sum_loss = 0.0;

        s.trainset.shuffle(&mut *s.rng);
        for n in 0..s.trainset.len() {
            let inst = s.trainset.get(n);
            let predicted = &mut viterbi[..inst.num_items()];

            s.encoder.set_weights(&w, 1.0);
            s.encoder.set_instance(inst, &w)?;
            let sv = s.encoder.viterbi(predicted);

            let num_diff = diff(&inst.labels, predicted);
            if num_diff > 0 {
                let sc = s.encoder.score(&inst.labels);
                let cost = opts.cost(sv - sc, num_diff);

                // delta = features(reference) - features(prediction)
                delta.reset();
                s.encoder
                    .features_on_path(inst, &inst.labels, &mut |fid, v| delta.collect(fid, v, 1.0));
                s.encoder
                    .features_on_path(inst, predicted, &mut |fid, v| delta.collect(fid, v, -1.0));
                delta.finalize();

                let norm2 = delta.norm2();
                if norm2 > 0.0 {
                    let tau = opts.pa_type.tau(cost, norm2, opts.c);
                    for (fid, d) in delta.iter() {
                        w[fid] += tau * d;
                        ws[fid] += tau * u * d;
                    }
                }
                sum_loss += cost;
            }
            u += 1.0;
        }

        if opts.averaging {
            for ((a, &x), &y) in wa.iter_mut().zip(&w).zip(&ws) {
                *a = x - y / u;
            }
        } else {
            wa.copy_from_slice(&w);
        }

        let feature_norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
        logging!(s.lg, "***** Iteration #{} *****", epoch + 1);
        logging!(s.lg, "Loss: {:.6}", sum_loss);
        logging!(s.lg, "Feature norm: {:.6}", feature_norm);
        logging!(s.lg, "Seconds required for this iteration: {:.3}", clk.elapsed().as_secs_f64());

        if let Some(testset) = s.testset {
            holdout_evaluation(&mut *s.encoder, testset, &wa, &mut *s.lg)?;
        }
        logging!(s.lg, "");

        if sum_loss / num_instances < opts.epsilon {
            logging!(s.lg, "Terminated with the stopping criterion");
            logging!(s.lg, "");
            break;
        }
    }

    logging!(s.lg, "Total seconds required for training: {:.3}", begin.elapsed().as_secs_f64());
    logging!(s.lg, "");
    Ok(Outcome::done(wa))
}
