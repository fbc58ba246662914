use std::thread;

use crate::attribute::Attribute;
use crate::context::{Context, Flag, Reset};
use crate::dataset::{self, Instance, Item};
use crate::error::{Error, Result};
use crate::model::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    /// No input sequence
    None,
    /// State scores of the input sequence are set
    Set,
    /// Forward-backward scores are current
    AlphaBeta,
}

/// The tagger provides the functionality for predicting label sequences for input sequences using a model
#[derive(Debug, Clone)]
pub struct Tagger<'a> {
    /// CRF model
    model: &'a Model<'a>,
    /// CRF context
    context: Context,
    level: Level,
}

impl<'a> Tagger<'a> {
    pub(crate) fn new(model: &'a Model<'a>) -> Result<Self> {
        let num_labels = model.num_labels() as usize;
        let mut context = Context::new(Flag::VITERBI | Flag::MARGINALS, num_labels, 0)?;
        context.reset(Reset::TRANS);
        let mut tagger = Self {
            model,
            context,
            level: Level::None,
        };
        tagger.transition_score()?;
        tagger.context.exp_transition();
        Ok(tagger)
    }

    /// Set an item sequence; attributes unknown to the model are ignored.
    pub fn set<T: AsRef<[Attribute]>>(&mut self, xseq: &[T]) -> Result<()> {
        let mut instance = Instance::with_capacity(xseq.len());
        for item in xseq {
            let item: Item = item
                .as_ref()
                .iter()
                .filter_map(|x| {
                    self.model
                        .to_attr_id(&x.name)
                        .map(|id| dataset::Attribute::new(id, x.value))
                })
                .collect();
            instance.push(item, 0);
        }

        self.context.set_num_items(instance.num_items())?;
        self.context.reset(Reset::STATE);
        self.state_score(&instance)?;
        self.level = Level::Set;
        Ok(())
    }

    /// Number of items in the current sequence
    pub fn len(&self) -> usize {
        self.context.num_items()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Predict the label sequence for the item sequence.
    pub fn tag<T: AsRef<[Attribute]>>(&mut self, xseq: &[T]) -> Result<Vec<&'a str>> {
        self.set(xseq)?;
        let (label_ids, _score) = self.viterbi()?;
        let model = self.model;
        label_ids
            .into_iter()
            .map(|id| {
                model
                    .to_label(id)
                    .ok_or_else(|| Error::InternalLogic(format!("label id {} out of range", id)))
            })
            .collect()
    }

    /// Best label ids of the current sequence and their score.
    pub fn viterbi(&mut self) -> Result<(Vec<u32>, f64)> {
        self.require_input()?;
        let mut labels = vec![0; self.context.num_items()];
        let score = self.context.viterbi(&mut labels);
        // the forward matrix was reused as the Viterbi table
        self.level = Level::Set;
        Ok((labels, score))
    }

    /// Conditional probability of the label sequence `yseq` given the current sequence.
    pub fn probability<S: AsRef<str>>(&mut self, yseq: &[S]) -> Result<f64> {
        self.require_input()?;
        if yseq.len() != self.context.num_items() {
            return Err(Error::InvalidInput(format!(
                "expected {} labels, got {}",
                self.context.num_items(),
                yseq.len()
            )));
        }
        let labels = yseq
            .iter()
            .map(|y| self.label_id(y.as_ref()))
            .collect::<Result<Vec<u32>>>()?;
        self.forward_backward();
        Ok((self.context.score(&labels) - self.context.log_norm()).exp())
    }

    /// Marginal probability of `label` at position `t` of the current sequence.
    pub fn marginal(&mut self, label: &str, t: usize) -> Result<f64> {
        self.require_input()?;
        if t >= self.context.num_items() {
            return Err(Error::InvalidInput(format!("position {} out of range", t)));
        }
        let l = self.label_id(label)? as usize;
        self.forward_backward();
        Ok(self.context.marginal_point(l, t))
    }

    /// Log of the partition factor of the current sequence.
    pub fn lognorm(&mut self) -> Result<f64> {
        self.require_input()?;
        self.forward_backward();
        Ok(self.context.log_norm())
    }

    fn require_input(&self) -> Result<()> {
        if self.level == Level::None {
            return Err(Error::InternalLogic(
                "no item sequence has been set".to_string(),
            ));
        }
        Ok(())
    }

    fn label_id(&self, label: &str) -> Result<u32> {
        self.model
            .to_label_id(label)
            .ok_or_else(|| Error::InvalidInput(format!("unknown label {:?}", label)))
    }

    fn forward_backward(&mut self) {
        if self.level < Level::AlphaBeta {
            self.context.exp_state();
            self.context.alpha_score();
            self.context.beta_score();
            self.level = Level::AlphaBeta;
        }
    }

    fn transition_score(&mut self) -> Result<()> {
        // Compute transition scores between two labels
        for i in 0..self.model.num_labels() {
            let edge = self.model.label_ref(i)?;
            let trans = self.context.trans_mut(i as usize);
            for fid in edge.iter() {
                // Transition feature from #i to #(feature.dst)
                let feature = self.model.feature(fid)?;
                trans[feature.dst as usize] = feature.weight;
            }
        }
        Ok(())
    }

    fn state_score(&mut self, instance: &Instance) -> Result<()> {
        // Loop over the items in the sequence
        for (t, item) in instance.items.iter().enumerate() {
            let state = self.context.state_mut(t);
            // Loop over the attributes attached to the item
            for attr in item {
                // A scale usually represents the attribute frequency in the item
                let value = attr.value;
                for fid in self.model.attr_ref(attr.id)?.iter() {
                    let feature = self.model.feature(fid)?;
                    state[feature.dst as usize] += feature.weight * value;
                }
            }
        }
        Ok(())
    }
}

/// Tag many sequences on `workers` threads sharing one model.
///
/// Each worker owns a tagger; results come back in input order.
pub fn tag_parallel<'a, S, T>(model: &'a Model<'a>, xseqs: &[S], workers: usize) -> Result<Vec<Vec<&'a str>>>
where
    S: AsRef<[T]> + Sync,
    T: AsRef<[Attribute]>,
{
    if xseqs.is_empty() {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, xseqs.len());
    let chunk_size = (xseqs.len() + workers - 1) / workers;

    thread::scope(|scope| {
        let handles: Vec<_> = xseqs
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || -> Result<Vec<Vec<&'a str>>> {
                    let mut tagger = Tagger::new(model)?;
                    chunk.iter().map(|xseq| tagger.tag(xseq.as_ref())).collect()
                })
            })
            .collect();

        let mut out = Vec::with_capacity(xseqs.len());
        for handle in handles {
            let tagged = handle
                .join()
                .map_err(|_| Error::InternalLogic("tagging worker panicked".to_string()))??;
            out.extend(tagged);
        }
        Ok(out)
    })
}
