use std::cell::RefCell;
use std::time::Instant;

use super::super::encoder::Encoder;
use super::super::params::{Check, Params};
use super::{holdout_evaluation, Outcome, Session};
use crate::error::{zeroed, Error, Result};

/// Line search algorithm for L-BFGS optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LineSearchAlgorithm {
    /// More-Thuente line search
    #[default]
    MoreThuente,
    /// Backtracking with the Wolfe condition
    Backtracking,
    /// Backtracking with the strong Wolfe condition
    StrongBacktracking,
}

impl LineSearchAlgorithm {
    const NAMES: &'static [&'static str] = &["MoreThuente", "Backtracking", "StrongBacktracking"];

    fn parse(name: &str) -> Result<Self> {
        match name {
            "MoreThuente" => Ok(Self::MoreThuente),
            "Backtracking" => Ok(Self::Backtracking),
            "StrongBacktracking" => Ok(Self::StrongBacktracking),
            other => Err(Error::InvalidParameter(format!(
                "unknown line search algorithm {:?}",
                other
            ))),
        }
    }

    fn to_liblbfgs_str(self) -> &'static str {
        match self {
            Self::MoreThuente => "MoreThuente",
            Self::Backtracking => "BacktrackingWolfe",
            Self::StrongBacktracking => "BacktrackingStrongWolfe",
        }
    }
}

pub(super) fn params() -> Params {
    Params::new()
        .float(
            "c1",
            0.0,
            Check::NonNegative,
            "Coefficient for L1 regularization.",
        )
        .float(
            "c2",
            1.0,
            Check::NonNegative,
            "Coefficient for L2 regularization.",
        )
        .int(
            "num_memories",
            6,
            Check::AtLeastOne,
            "The number of limited memories for approximating the inverse hessian matrix.",
        )
        .int(
            "max_iterations",
            i64::from(i32::MAX),
            Check::AtLeastOne,
            "The maximum number of iterations for L-BFGS optimization.",
        )
        .float(
            "epsilon",
            1e-5,
            Check::NonNegative,
            "Epsilon for testing the convergence of the objective.",
        )
        .int(
            "period",
            10,
            Check::NonNegative,
            "The duration of iterations to test the stopping criterion.",
        )
        .float(
            "delta",
            1e-5,
            Check::NonNegative,
            "The threshold for the stopping criterion; an L-BFGS iteration stops when the \
             improvement of the log likelihood over the last ${period} iterations is no \
             greater than this threshold.",
        )
        .string(
            "linesearch",
            "MoreThuente",
            Check::OneOf(LineSearchAlgorithm::NAMES),
            "The line search algorithm used in L-BFGS updates: \
             {MoreThuente, Backtracking, StrongBacktracking}.",
        )
        .int(
            "max_linesearch",
            20,
            Check::AtLeastOne,
            "The maximum number of trials for the line search algorithm.",
        )
}

/// L-BFGS training parameters.
#[derive(Debug, Clone)]
struct Options {
    c1: f64,
    c2: f64,
    /// Accepted for compatibility; liblbfgs keeps its own history size.
    num_memories: usize,
    max_iterations: usize,
    epsilon: f64,
    period: usize,
    delta: f64,
    linesearch: LineSearchAlgorithm,
    max_linesearch: usize,
}

impl Options {
    fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            c1: params.get_float("c1")?,
            c2: params.get_float("c2")?,
            num_memories: params.get_usize("num_memories")?,
            max_iterations: params.get_usize("max_iterations")?,
            epsilon: params.get_float("epsilon")?,
            period: params.get_usize("period")?,
            delta: params.get_float("delta")?,
            linesearch: LineSearchAlgorithm::parse(params.get_str("linesearch")?)?,
            max_linesearch: params.get_usize("max_linesearch")?,
        })
    }
}

/// Train by minimizing the regularized negative log-likelihood with L-BFGS.
///
/// An L1 term switches the solver to OWL-QN, which only works with the
/// strong-Wolfe backtracking line search.
pub(super) fn train<E: Encoder>(s: &mut Session<'_, '_, E>) -> Result<Outcome> {
    let opts = Options::from_params(s.params)?;
    let num_features = s.encoder.num_features();
    let lg = &mut *s.lg;

    logging!(lg, "L-BFGS optimization");
    logging!(lg, "c1: {:.6}", opts.c1);
    logging!(lg, "c2: {:.6}", opts.c2);
    logging!(lg, "num_memories: {}", opts.num_memories);
    logging!(lg, "max_iterations: {}", opts.max_iterations);
    logging!(lg, "epsilon: {:.6}", opts.epsilon);
    logging!(lg, "stop: {}", opts.period);
    logging!(lg, "delta: {:.6}", opts.delta);
    logging!(lg, "linesearch: {:?}", opts.linesearch);
    logging!(lg, "linesearch.max_iterations: {}", opts.max_linesearch);
    logging!(lg, "");

    let mut weights = zeroed::<f64>(num_features)?;
    let mut best_w = zeroed::<f64>(num_features)?;
    let mut holdout_error: Option<Error> = None;

    let encoder = RefCell::new(&mut *s.encoder);
    let trainset = &*s.trainset;
    let testset = s.testset;
    let c2 = opts.c2;
    let begin = Instant::now();
    let mut clk = Instant::now();

    // Objective function: negative log-likelihood + L2 regularization
    let evaluate = |x: &[f64], gx: &mut [f64]| -> Result<f64, anyhow::Error> {
        let mut f = encoder
            .borrow_mut()
            .objective_and_gradients_batch(trainset, x, gx)?;
        if c2 > 0.0 {
            // d/dx of c2 * x^2 is 2 * c2 * x
            let mut norm2 = 0.0;
            for (g, &xi) in gx.iter_mut().zip(x) {
                *g += 2.0 * c2 * xi;
                norm2 += xi * xi;
            }
            f += c2 * norm2;
        }
        Ok(f)
    };

    let progress = |prgr: &liblbfgs::Progress| -> bool {
        // the weights of the latest iteration are the ones we keep
        best_w.copy_from_slice(prgr.x);
        let num_active = prgr.x.iter().filter(|&&x| x != 0.0).count();

        logging!(lg, "***** Iteration #{} *****", prgr.niter);
        logging!(lg, "Loss: {:.6}", prgr.fx);
        logging!(lg, "Feature norm: {:.6}", prgr.xnorm);
        logging!(lg, "Error norm: {:.6}", prgr.gnorm);
        logging!(lg, "Active features: {}", num_active);
        logging!(lg, "Line search trials: {}", prgr.ncall);
        logging!(lg, "Line search step: {:.6}", prgr.step);
        logging!(lg, "Seconds required for this iteration: {:.3}", clk.elapsed().as_secs_f64());

        if let Some(testset) = testset {
            if let Err(err) = holdout_evaluation(&mut **encoder.borrow_mut(), testset, prgr.x, lg) {
                holdout_error = Some(err);
                return true;
            }
        }
        logging!(lg, "");
        clk = Instant::now();
        false
    };

    let mut lbfgs = liblbfgs::lbfgs()
        .with_max_iterations(opts.max_iterations)
        .with_epsilon(opts.epsilon)
        .with_fx_delta(opts.delta, opts.period)
        .with_max_linesearch(opts.max_linesearch);
    if opts.c1 > 0.0 {
        lbfgs = lbfgs
            .with_linesearch_algorithm("BacktrackingStrongWolfe")
            .with_orthantwise(opts.c1, 0, num_features);
    } else {
        lbfgs = lbfgs.with_linesearch_algorithm(opts.linesearch.to_liblbfgs_str());
    }

    let result = lbfgs.minimize(&mut weights, evaluate, progress);

    let mut error = holdout_error;
    match result {
        Ok(_) => logging!(lg, "L-BFGS resulted in convergence"),
        Err(err) => match err.downcast::<Error>() {
            // failures of the objective itself are fatal
            Ok(err) => return Err(err),
            Err(err) => {
                logging!(lg, "L-BFGS terminated with error: {}", err);
                if !best_w.iter().all(|w| w.is_finite()) {
                    error = Some(Error::Overflow);
                }
            }
        },
    }
    logging!(lg, "Total seconds required for training: {:.3}", begin.elapsed().as_secs_f64());
    logging!(lg, "");

    Ok(Outcome {
        weights: best_w,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::from_params(&params()).unwrap();
        assert_eq!(opts.c1, 0.0);
        assert_eq!(opts.c2, 1.0);
        assert_eq!(opts.num_memories, 6);
        assert_eq!(opts.max_iterations, i32::MAX as usize);
        assert_eq!(opts.period, 10);
        assert_eq!(opts.linesearch, LineSearchAlgorithm::MoreThuente);
        assert_eq!(opts.max_linesearch, 20);
    }

    #[test]
    fn test_linesearch_names() {
        let mut params = params();
        params.set("linesearch", "StrongBacktracking").unwrap();
        let opts = Options::from_params(&params).unwrap();
        assert_eq!(opts.linesearch.to_liblbfgs_str(), "BacktrackingStrongWolfe");
        assert_eq!(
            LineSearchAlgorithm::Backtracking.to_liblbfgs_str(),
            "BacktrackingWolfe"
        );
        assert!(params.set("linesearch", "Armijo").is_err());
    }
}
