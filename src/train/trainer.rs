use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::encoder::{Crf1dEncoder, Encoder};
use super::feature_gen::FeatureOptions;
use super::logging::Logging;
use super::params::{Check, Params};
use crate::attribute::Attribute;
use crate::dataset::{Dataset, DatasetView};
use crate::error::{Error, Result};
use crate::evaluation::Evaluation;

mod arow;
mod averaged_perceptron;
mod l2sgd;
mod lbfgs;
mod passive_aggressive;

/// Training algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Gradient descent using the L-BFGS method
    LBFGS,
    /// Stochastic Gradient Descent with L2 regularization term
    L2SGD,
    /// Averaged Perceptron
    AP,
    /// Passive Aggressive
    PA,
    /// Adaptive Regularization Of Weight Vector
    AROW,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::LBFGS => "lbfgs",
            Algorithm::L2SGD => "l2sgd",
            Algorithm::AP => "ap",
            Algorithm::PA => "pa",
            Algorithm::AROW => "arow",
        }
    }

    fn params(self) -> Params {
        let algo = match self {
            Algorithm::LBFGS => lbfgs::params(),
            Algorithm::L2SGD => l2sgd::params(),
            Algorithm::AP => averaged_perceptron::params(),
            Algorithm::PA => passive_aggressive::params(),
            Algorithm::AROW => arow::params(),
        };
        feature_params().merge(algo)
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lbfgs" => Ok(Algorithm::LBFGS),
            "l2sgd" => Ok(Algorithm::L2SGD),
            "ap" | "averaged-perceptron" => Ok(Algorithm::AP),
            "pa" | "passive-aggressive" => Ok(Algorithm::PA),
            "arow" => Ok(Algorithm::AROW),
            _ => Err(Error::InvalidParameter(format!(
                "unknown training algorithm {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn feature_params() -> Params {
    Params::new()
        .float(
            "feature.minfreq",
            0.0,
            Check::NonNegative,
            "The minimum frequency of features.",
        )
        .int(
            "feature.possible_states",
            0,
            Check::Any,
            "Force to generate possible state features.",
        )
        .int(
            "feature.possible_transitions",
            0,
            Check::Any,
            "Force to generate possible transition features.",
        )
}

fn feature_options(params: &Params) -> Result<FeatureOptions> {
    Ok(FeatureOptions {
        minfreq: params.get_float("feature.minfreq")?,
        possible_states: params.get_bool("feature.possible_states")?,
        possible_transitions: params.get_bool("feature.possible_transitions")?,
    })
}

/// Weights produced by a training algorithm.
///
/// An algorithm that stops on an error still hands back the best weights
/// it reached, so they can be stored before the error is reported.
pub(crate) struct Outcome {
    pub weights: Vec<f64>,
    pub error: Option<Error>,
}

impl Outcome {
    fn done(weights: Vec<f64>) -> Self {
        Self {
            weights,
            error: None,
        }
    }
}

/// Shared state handed to every training algorithm
pub(crate) struct Session<'s, 'd, E: Encoder> {
    pub encoder: &'s mut E,
    pub trainset: &'s mut DatasetView<'d>,
    pub testset: Option<&'s DatasetView<'d>>,
    pub params: &'s Params,
    pub lg: &'s mut Logging,
    pub rng: &'s mut StdRng,
}

/// Tag the holdout set with `w` and log the accuracy report.
pub(crate) fn holdout_evaluation<E: Encoder>(
    encoder: &mut E,
    testset: &DatasetView<'_>,
    w: &[f64],
    lg: &mut Logging,
) -> Result<()> {
    let mut eval = Evaluation::new(testset.num_labels());
    let mut path = vec![0u32; testset.max_items()];

    encoder.set_weights(w, 1.0);
    for inst in testset.iter() {
        let path = &mut path[..inst.num_items()];
        encoder.set_instance(inst, w)?;
        encoder.viterbi(path);
        eval.accumulate(&inst.labels, path)?;
    }
    eval.finalize();

    let labels = testset.dataset().labels();
    for line in eval.report(labels).to_string().lines() {
        logging!(lg, "{}", line);
    }
    Ok(())
}

/// CRF Trainer
///
/// Collects labeled sequences, holds the parameters of the selected
/// algorithm and writes the trained model to a file.
#[derive(Debug)]
pub struct Trainer {
    data: Dataset,
    algorithm: Option<Algorithm>,
    params: Params,
    logging: Logging,
    shuffle_seed: Option<u64>,
}

impl Trainer {
    /// Create a new trainer; a verbose trainer prints progress to stdout.
    pub fn new(verbose: bool) -> Self {
        let mut logging = Logging::new();
        if verbose {
            logging.set_callback(Some(Box::new(|msg: &str| println!("{}", msg))));
        }
        Self {
            data: Dataset::new(),
            algorithm: None,
            params: feature_params(),
            logging,
            shuffle_seed: None,
        }
    }

    /// Select the training algorithm, resetting parameters to its defaults.
    pub fn select(&mut self, algorithm: Algorithm) -> Result<()> {
        self.algorithm = Some(algorithm);
        self.params = algorithm.params();
        Ok(())
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Append an instance (item/label sequence) to the data set.
    pub fn append<I, L>(&mut self, xseq: &[I], yseq: &[L]) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        self.append_with_weight(xseq, yseq, 1.0, 0)
    }

    /// Append an instance belonging to `group`, for holdout evaluation.
    pub fn append_with_group<I, L>(&mut self, xseq: &[I], yseq: &[L], group: u32) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        self.append_with_weight(xseq, yseq, 1.0, group)
    }

    /// Append an instance whose loss and updates are scaled by `weight`.
    pub fn append_with_weight<I, L>(
        &mut self,
        xseq: &[I],
        yseq: &[L],
        weight: f64,
        group: u32,
    ) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::InvalidInput(
                "instance weight must be finite and non-negative".to_string(),
            ));
        }
        self.data.append(xseq, yseq, weight, group)
    }

    /// Number of appended instances
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remove all instances in the data set.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Set a training parameter.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        self.params.set(name, value)
    }

    /// Get the value of a training parameter.
    pub fn get(&self, name: &str) -> Result<String> {
        self.params.get(name)
    }

    /// Get the help message of a training parameter.
    pub fn help(&self, name: &str) -> Result<&'static str> {
        self.params.help(name)
    }

    /// Parameters of the selected algorithm
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Receive every progress message; replaces verbose printing.
    pub fn set_message_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.logging.set_callback(Some(Box::new(callback)));
    }

    /// Seed the instance shuffling of the online algorithms.
    ///
    /// Without a seed the order is drawn from system entropy.
    pub fn set_shuffle_seed(&mut self, seed: Option<u64>) {
        self.shuffle_seed = seed;
    }

    /// Run the training algorithm and store the model to `path`.
    pub fn train<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.run(path.as_ref(), None)
    }

    /// Train on every group but `holdout` and evaluate on `holdout` as training proceeds.
    pub fn train_with_holdout<P: AsRef<Path>>(&mut self, path: P, holdout: u32) -> Result<()> {
        self.run(path.as_ref(), Some(holdout))
    }

    fn run(&mut self, path: &Path, holdout: Option<u32>) -> Result<()> {
        let algorithm = self.algorithm.ok_or_else(|| {
            Error::InvalidInput("no training algorithm has been selected".to_string())
        })?;
        if self.data.is_empty() {
            return Err(Error::InvalidInput("no training data".to_string()));
        }

        let lg = &mut self.logging;
        let mut trainset = DatasetView::train(&self.data, holdout);
        if trainset.is_empty() {
            return Err(Error::InvalidInput(
                "every instance belongs to the holdout group".to_string(),
            ));
        }
        let testset = holdout.map(|group| DatasetView::test(&self.data, Some(group)));

        let begin = Instant::now();
        logging!(lg, "Training with {}", algorithm);
        if let Some(group) = holdout {
            logging!(lg, "Holdout group: {}", group);
        }
        let num_items: usize = trainset.iter().map(|inst| inst.num_items()).sum();
        logging!(lg, "Number of instances: {}", trainset.len());
        logging!(lg, "Number of items: {}", num_items);
        logging!(lg, "Number of attributes: {}", trainset.num_attrs());
        logging!(lg, "Number of labels: {}", trainset.num_labels());
        logging!(lg, "");

        let mut encoder = Crf1dEncoder::new(feature_options(&self.params)?)?;
        encoder.initialize(&trainset, lg)?;

        let mut rng = match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut session = Session {
            encoder: &mut encoder,
            trainset: &mut trainset,
            testset: testset.as_ref(),
            params: &self.params,
            lg,
            rng: &mut rng,
        };
        let outcome = match algorithm {
            Algorithm::LBFGS => lbfgs::train(&mut session)?,
            Algorithm::L2SGD => l2sgd::train(&mut session)?,
            Algorithm::AP => averaged_perceptron::train(&mut session)?,
            Algorithm::PA => passive_aggressive::train(&mut session)?,
            Algorithm::AROW => arow::train(&mut session)?,
        };

        drop(session);
        let lg = &mut self.logging;
        encoder.save_model(
            path,
            &outcome.weights,
            self.data.labels(),
            self.data.attrs(),
            lg,
        )?;
        logging!(lg, "Total seconds required: {:.3}", begin.elapsed().as_secs_f64());

        match outcome.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
