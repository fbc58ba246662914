use std::time::Instant;

use super::super::encoder::Encoder;
use super::super::params::{Check, Params};
use super::{holdout_evaluation, Outcome, Session};
use crate::error::{zeroed, Result};

pub(super) fn params() -> Params {
    Params::new()
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
            "The stopping criterion (the ratio of incorrect label predictions).",
        )
}

/// Averaged Perceptron training parameters.
#[derive(Debug, Clone)]
struct Options {
    max_iterations: usize,
    epsilon: f64,
}

impl Options {
    fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            max_iterations: params.get_usize("max_iterations")?,
            epsilon: params.get_float("epsilon")?,
        })
    }
}

/// Number of positions where two label sequences disagree
pub(super) fn diff(x: &[u32], y: &[u32]) -> usize {
    x.iter().zip(y).filter(|(a, b)| a != b).count()
}

/// Train using the averaged perceptron.
///
/// Every mistake moves the weights toward the reference path and away from
/// the predicted one; the returned weights are the average over all steps,
/// computed in closed form as `w - ws / c`.
pub(super) fn train<E: Encoder>(s: &mut Session<'_, '_, E>) -> Result<Outcome> {
    let opts = Options::from_params(s.params)?;
    let num_features = s.encoder.num_features();
    let num_instances = s.trainset.len() as f64;

    let mut w = zeroed::<f64>(num_features)?;
    let mut ws = zeroed::<f64>(num_features)?;
    let mut wa = zeroed::<f64>(num_features)?;
    let mut viterbi = zeroed::<u32>(s.trainset.max_items())?;
    // Update counter
    let mut c = 1.0;

    logging!(s.lg, "Averaged perceptron");
    logging!(s.lg, "max_iterations: {}", opts.max_iterations);
    logging!(s.lg, "epsilon: {:.6}", opts.epsilon);
    logging!(s.lg, "");
    let begin = Instant::now();

    for epoch in 0..opts.max_iterations {
        let clk = Instant::now();
        let mut loss = 0.0;

        s.trainset.shuffle(&mut *s.rng);
        for n in 0..s.trainset.len() {
            let inst = s.trainset.get(n);
            let seq_len = inst.num_items();
            let predicted = &mut viterbi[..seq_len];

            // Predict with current weights
            s.encoder.set_weights(&w, 1.0);
            s.encoder.set_instance(inst, &w)?;
            s.encoder.viterbi(predicted);

            let num_diff = diff(&inst.labels, predicted);
            if num_diff > 0 {
                // w += weight * (reference features - predicted features)
                let weight = inst.weight;
                let mut update = |fid: usize, value: f64, sign: f64| {
                    w[fid] += weight * value * sign;
                    ws[fid] += c * weight * value * sign;
                };
                s.encoder
                    .features_on_path(inst, &inst.labels, &mut |fid, v| update(fid, v, 1.0));
                s.encoder
                    .features_on_path(inst, predicted, &mut |fid, v| update(fid, v, -1.0));

                // Loss is the ratio of wrongly predicted labels
                loss += num_diff as f64 / seq_len as f64 * weight;
            }
            c += 1.0;
        }

        // Average the weights
        for ((a, &x), &y) in wa.iter_mut().zip(&w).zip(&ws) {
            *a = x - y / c;
        }

        let feature_norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
        logging!(s.lg, "***** Iteration #{} *****", epoch + 1);
        logging!(s.lg, "Loss: {:.6}", loss);
        logging!(s.lg, "Feature norm: {:.6}", feature_norm);
        logging!(s.lg, "Seconds required for this iteration: {:.3}", clk.elapsed().as_secs_f64());

        if let Some(testset) = s.testset {
            holdout_evaluation(&mut *s.encoder, testset, &wa, &mut *s.lg)?;
        }
        logging!(s.lg, "");

        // Check stopping criterion (error rate)
        if loss / num_instances < opts.epsilon {
            logging!(s.lg, "Terminated with the stopping criterion");
            logging!(s.lg, "");
            break;
        }
    }

    logging!(s.lg, "Total seconds required for training: {:.3}", begin.elapsed().as_secs_f64());
    logging!(s.lg, "");
    Ok(Outcome::done(wa))
}
