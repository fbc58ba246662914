use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use std::time::Instant;

use crate::context::{Context, Flag, Reset};
use crate::dataset::{DatasetView, Instance};
use crate::dictionary::StringTable;
use crate::error::Result;

use super::feature_gen::{FeatureGenerator, FeatureOptions};
use super::logging::Logging;
use super::model_writer::write_pruned;

/// The interface the training algorithms drive a graphical model through.
///
/// Weights are installed with [`set_weights`](Encoder::set_weights), an
/// instance with [`set_instance`](Encoder::set_instance); the inference
/// methods then answer for that pair.
pub trait Encoder {
    /// Generate features for `data` and size the work space.
    fn initialize(&mut self, data: &DatasetView<'_>, lg: &mut Logging) -> Result<()>;

    fn num_features(&self) -> usize;

    /// Install weights `w`, each multiplied by `scale`.
    fn set_weights(&mut self, w: &[f64], scale: f64);

    /// Compute the state scores of `inst` from `w` and the current scale.
    fn set_instance(&mut self, inst: &Instance, w: &[f64]) -> Result<()>;

    /// Score of `path` under the current weights and instance.
    fn score(&self, path: &[u32]) -> f64;

    /// Best path of the current instance, written to `path`, and its score.
    fn viterbi(&mut self, path: &mut [u32]) -> f64;

    /// Log of the partition factor of the current instance.
    fn partition_factor(&mut self) -> f64;

    /// Marginal probability of label `l` at position `t`.
    fn marginal_point(&mut self, l: usize, t: usize) -> f64;

    /// Call `visit(fid, value)` for every feature fired along `path`.
    fn features_on_path(&self, inst: &Instance, path: &[u32], visit: &mut dyn FnMut(usize, f64));

    /// Add the gradient of the current instance, scaled by `gain`, to `g`
    /// and return its negative log-likelihood.
    ///
    /// The weights and the instance must have been set before.
    fn objective_and_gradients(&mut self, inst: &Instance, g: &mut [f64], gain: f64) -> f64;

    /// Negative log-likelihood of `data` under `w`, with its gradient in `g`.
    fn objective_and_gradients_batch(
        &mut self,
        data: &DatasetView<'_>,
        w: &[f64],
        g: &mut [f64],
    ) -> Result<f64>;

    /// Write the model for weights `w` to `path`.
    fn save_model(
        &self,
        path: &Path,
        w: &[f64],
        labels: &dyn StringTable,
        attrs: &dyn StringTable,
        lg: &mut Logging,
    ) -> Result<()>;
}

/// How much of the computation is current, in order of dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    None,
    Weight,
    Instance,
    AlphaBeta,
    Marginal,
}

/// First-order linear-chain CRF encoder
#[derive(Debug)]
pub struct Crf1dEncoder {
    opts: FeatureOptions,
    fgen: FeatureGenerator,
    ctx: Context,
    level: Level,
    /// Multiplier of the installed weights
    scale: f64,
    /// Whether `exp_trans` matches the installed weights
    exp_trans_ready: bool,
}

impl Crf1dEncoder {
    pub fn new(opts: FeatureOptions) -> Result<Self> {
        Ok(Self {
            opts,
            fgen: FeatureGenerator::default(),
            ctx: Context::new(Flag::VITERBI | Flag::MARGINALS, 0, 0)?,
            level: Level::None,
            scale: 1.0,
            exp_trans_ready: false,
        })
    }

    pub fn features(&self) -> &FeatureGenerator {
        &self.fgen
    }

    fn transition_score(&mut self, w: &[f64], scale: f64) {
        self.ctx.reset(Reset::TRANS);
        let fgen = &self.fgen;
        for i in 0..self.ctx.num_labels() {
            let trans = self.ctx.trans_mut(i);
            for &fid in fgen.label_refs.get(i) {
                let f = &fgen.features[fid as usize];
                trans[f.dst as usize] = w[fid as usize] * scale;
            }
        }
    }

    fn state_score(&mut self, inst: &Instance, w: &[f64], scale: f64) {
        let fgen = &self.fgen;
        for (t, item) in inst.items.iter().enumerate() {
            let state = self.ctx.state_mut(t);
            for attr in item {
                for &fid in fgen.attr_refs.get(attr.id as usize) {
                    let f = &fgen.features[fid as usize];
                    state[f.dst as usize] += w[fid as usize] * attr.value * scale;
                }
            }
        }
    }

    /// Bring the lattice computations up to `level`.
    fn ensure(&mut self, level: Level) {
        if self.level < Level::AlphaBeta && level >= Level::AlphaBeta {
            if !self.exp_trans_ready {
                self.ctx.exp_transition();
                self.exp_trans_ready = true;
            }
            self.ctx.exp_state();
            self.ctx.alpha_score();
            self.ctx.beta_score();
            self.level = Level::AlphaBeta;
        }
        if self.level < Level::Marginal && level >= Level::Marginal {
            self.ctx.marginals();
            self.level = Level::Marginal;
        }
    }

    /// Accumulate the model expectations of the current instance into `g`.
    fn model_expectation(&self, inst: &Instance, g: &mut [f64], scale: f64) {
        let fgen = &self.fgen;
        for (t, item) in inst.items.iter().enumerate() {
            let prob = self.ctx.mexp_state(t);
            for attr in item {
                for &fid in fgen.attr_refs.get(attr.id as usize) {
                    let f = &fgen.features[fid as usize];
                    g[fid as usize] += prob[f.dst as usize] * attr.value * scale;
                }
            }
        }
        for i in 0..self.ctx.num_labels() {
            let prob = self.ctx.mexp_trans(i);
            for &fid in fgen.label_refs.get(i) {
                let f = &fgen.features[fid as usize];
                g[fid as usize] += prob[f.dst as usize] * scale;
            }
        }
    }

    /// Write the model for weights `w` into `inner`.
    pub fn write_model<W: Write + Seek>(
        &self,
        inner: W,
        w: &[f64],
        labels: &dyn StringTable,
        attrs: &dyn StringTable,
        lg: &mut Logging,
    ) -> Result<W> {
        write_pruned(
            inner,
            &self.fgen.features,
            &self.fgen.attr_refs,
            &self.fgen.label_refs,
            w,
            labels,
            attrs,
            lg,
        )
    }
}

impl Encoder for Crf1dEncoder {
    fn initialize(&mut self, data: &DatasetView<'_>, lg: &mut Logging) -> Result<()> {
        let num_labels = data.num_labels();
        let num_attrs = data.num_attrs();

        let begin = Instant::now();
        logging!(lg, "Feature generation");
        logging!(lg, "type: CRF1d");
        logging!(lg, "feature.minfreq: {}", self.opts.minfreq);
        logging!(lg, "feature.possible_states: {}", self.opts.possible_states as i32);
        logging!(lg, "feature.possible_transitions: {}", self.opts.possible_transitions as i32);
        self.fgen = FeatureGenerator::generate(data, num_labels, num_attrs, &self.opts)?;
        logging!(lg, "Number of features: {}", self.fgen.num_features());
        logging!(lg, "Seconds required: {:.3}", begin.elapsed().as_secs_f64());
        logging!(lg, "");

        self.ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, num_labels, data.max_items())?;
        self.level = Level::None;
        self.exp_trans_ready = false;
        Ok(())
    }

    fn num_features(&self) -> usize {
        self.fgen.num_features()
    }

    fn set_weights(&mut self, w: &[f64], scale: f64) {
        self.transition_score(w, scale);
        self.scale = scale;
        self.exp_trans_ready = false;
        self.level = Level::Weight;
    }

    fn set_instance(&mut self, inst: &Instance, w: &[f64]) -> Result<()> {
        self.ctx.set_num_items(inst.num_items())?;
        self.ctx.reset(Reset::STATE);
        self.state_score(inst, w, self.scale);
        self.level = Level::Instance;
        Ok(())
    }

    fn score(&self, path: &[u32]) -> f64 {
        self.ctx.score(path)
    }

    fn viterbi(&mut self, path: &mut [u32]) -> f64 {
        let score = self.ctx.viterbi(path);
        // the forward matrix now holds Viterbi scores
        self.level = self.level.min(Level::Instance);
        score
    }

    fn partition_factor(&mut self) -> f64 {
        self.ensure(Level::AlphaBeta);
        self.ctx.log_norm()
    }

    fn marginal_point(&mut self, l: usize, t: usize) -> f64 {
        self.ensure(Level::AlphaBeta);
        self.ctx.marginal_point(l, t)
    }

    fn features_on_path(&self, inst: &Instance, path: &[u32], visit: &mut dyn FnMut(usize, f64)) {
        let fgen = &self.fgen;
        let mut prev: Option<u32> = None;
        for (item, &cur) in inst.items.iter().zip(path) {
            for attr in item {
                for &fid in fgen.attr_refs.get(attr.id as usize) {
                    if fgen.features[fid as usize].dst == cur {
                        visit(fid as usize, attr.value);
                    }
                }
            }
            if let Some(prev) = prev {
                for &fid in fgen.label_refs.get(prev as usize) {
                    if fgen.features[fid as usize].dst == cur {
                        visit(fid as usize, 1.0);
                    }
                }
            }
            prev = Some(cur);
        }
    }

    fn objective_and_gradients(&mut self, inst: &Instance, g: &mut [f64], gain: f64) -> f64 {
        self.ensure(Level::Marginal);
        let gain = gain * inst.weight;

        // observed features along the reference path
        self.features_on_path(inst, &inst.labels, &mut |fid, value| {
            g[fid] += gain * value;
        });
        self.model_expectation(inst, g, -gain);

        let logl = self.ctx.score(&inst.labels) - self.ctx.log_norm();
        -logl * inst.weight
    }

    fn objective_and_gradients_batch(
        &mut self,
        data: &DatasetView<'_>,
        w: &[f64],
        g: &mut [f64],
    ) -> Result<f64> {
        // the observed counts enter the gradient with a negative sign
        for (gi, f) in g.iter_mut().zip(&self.fgen.features) {
            *gi = -f.freq;
        }

        self.set_weights(w, 1.0);
        let mut logl = 0.0;
        for inst in data.iter() {
            self.set_instance(inst, w)?;
            self.ensure(Level::Marginal);

            let logp = self.ctx.score(&inst.labels) - self.ctx.log_norm();
            logl += logp * inst.weight;
            self.model_expectation(inst, g, inst.weight);
        }
        Ok(-logl)
    }

    fn save_model(
        &self,
        path: &Path,
        w: &[f64],
        labels: &dyn StringTable,
        attrs: &dyn StringTable,
        lg: &mut Logging,
    ) -> Result<()> {
        let begin = Instant::now();
        logging!(lg, "Storing the model");
        let file = BufWriter::new(File::create(path)?);
        let mut file = self.write_model(file, w, labels, attrs, lg)?;
        file.flush()?;
        logging!(lg, "Seconds required: {:.3}", begin.elapsed().as_secs_f64());
        logging!(lg, "");
        Ok(())
    }
}
