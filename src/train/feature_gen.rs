use std::collections::{BTreeMap, BTreeSet};

use crate::dataset::DatasetView;
use crate::error::{Error, Result};
use crate::feature::FeatureType;

/// A training-time feature descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub ftype: FeatureType,
    /// Attribute id for state features, previous label id for transitions
    pub src: u32,
    /// Label id
    pub dst: u32,
    /// Accumulated (value-weighted) observation count
    pub freq: f64,
}

/// Options controlling feature generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureOptions {
    /// Features observed less than this are dropped
    pub minfreq: f64,
    /// Connect every occurring attribute to every label
    pub possible_states: bool,
    /// Connect every label pair
    pub possible_transitions: bool,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            minfreq: 0.0,
            possible_states: false,
            possible_transitions: false,
        }
    }
}

/// Per-key lists of feature ids stored back to back in one arena.
///
/// Built in two passes: the first tallies how many features each key owns,
/// the second fills an exactly sized id array.
#[derive(Debug, Clone, Default)]
pub struct RefTable {
    offsets: Vec<usize>,
    fids: Vec<u32>,
}

impl RefTable {
    fn build<I>(num_keys: usize, entries: I) -> Result<Self>
    where
        I: Iterator<Item = (usize, u32)> + Clone,
    {
        let mut counts = crate::error::zeroed::<usize>(num_keys)?;
        for (key, _) in entries.clone() {
            let slot = counts
                .get_mut(key)
                .ok_or_else(|| Error::InternalLogic(format!("reference key {} out of range", key)))?;
            *slot += 1;
        }

        let mut offsets = crate::error::zeroed::<usize>(num_keys + 1)?;
        for key in 0..num_keys {
            offsets[key + 1] = offsets[key] + counts[key];
        }

        let mut fids = crate::error::zeroed::<u32>(offsets[num_keys])?;
        let mut cursor = offsets[..num_keys].to_vec();
        for (key, fid) in entries {
            fids[cursor[key]] = fid;
            cursor[key] += 1;
        }
        Ok(Self { offsets, fids })
    }

    #[cfg(test)]
    pub(crate) fn from_lists(lists: &[Vec<u32>]) -> Self {
        let entries: Vec<(usize, u32)> = lists
            .iter()
            .enumerate()
            .flat_map(|(key, fids)| fids.iter().map(move |&fid| (key, fid)))
            .collect();
        Self::build(lists.len(), entries.into_iter()).unwrap()
    }

    /// Feature ids owned by `key`, in ascending order.
    #[inline]
    pub fn get(&self, key: usize) -> &[u32] {
        match (self.offsets.get(key), self.offsets.get(key + 1)) {
            (Some(&begin), Some(&end)) => &self.fids[begin..end],
            _ => &[],
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Feature set of a dataset
#[derive(Debug, Clone, Default)]
pub struct FeatureGenerator {
    /// Features, indexed by feature id
    pub features: Vec<Feature>,
    /// State feature ids by attribute id
    pub attr_refs: RefTable,
    /// Transition feature ids by source label id
    pub label_refs: RefTable,
}

impl FeatureGenerator {
    /// Generate the features of a dataset.
    ///
    /// Candidates are keyed by `(type, src, dst)` and accumulate their
    /// frequency on repeat; feature ids follow key order, so the result does
    /// not depend on instance order.
    pub fn generate(
        data: &DatasetView<'_>,
        num_labels: usize,
        num_attrs: usize,
        opts: &FeatureOptions,
    ) -> Result<Self> {
        let mut candidates: BTreeMap<(FeatureType, u32, u32), f64> = BTreeMap::new();
        let mut seen_attrs = BTreeSet::new();

        for inst in data.iter() {
            let mut prev: Option<u32> = None;
            for (item, &label) in inst.items.iter().zip(&inst.labels) {
                if label as usize >= num_labels {
                    return Err(Error::InvalidInput(format!("label id {} out of range", label)));
                }
                if let Some(prev) = prev {
                    *candidates
                        .entry((FeatureType::Transition, prev, label))
                        .or_insert(0.0) += inst.weight;
                }
                for attr in item {
                    if attr.id as usize >= num_attrs {
                        return Err(Error::InvalidInput(format!(
                            "attribute id {} out of range",
                            attr.id
                        )));
                    }
                    *candidates
                        .entry((FeatureType::State, attr.id, label))
                        .or_insert(0.0) += attr.value * inst.weight;
                    if opts.possible_states {
                        seen_attrs.insert(attr.id);
                    }
                }
                prev = Some(label);
            }
        }

        let num_labels_u32 = u32::try_from(num_labels)
            .map_err(|_| Error::InvalidInput("too many labels".to_string()))?;
        for &aid in &seen_attrs {
            for lid in 0..num_labels_u32 {
                candidates.entry((FeatureType::State, aid, lid)).or_insert(0.0);
            }
        }
        if opts.possible_transitions {
            for src in 0..num_labels_u32 {
                for dst in 0..num_labels_u32 {
                    candidates
                        .entry((FeatureType::Transition, src, dst))
                        .or_insert(0.0);
                }
            }
        }

        let features: Vec<Feature> = candidates
            .into_iter()
            .filter(|&(_, freq)| opts.minfreq <= freq)
            .map(|((ftype, src, dst), freq)| Feature {
                ftype,
                src,
                dst,
                freq,
            })
            .collect();
        if u32::try_from(features.len()).is_err() {
            return Err(Error::InvalidInput("too many features".to_string()));
        }

        let attr_refs = RefTable::build(
            num_attrs,
            Self::refs_of(&features, FeatureType::State),
        )?;
        let label_refs = RefTable::build(
            num_labels,
            Self::refs_of(&features, FeatureType::Transition),
        )?;

        Ok(Self {
            features,
            attr_refs,
            label_refs,
        })
    }

    fn refs_of(
        features: &[Feature],
        ftype: FeatureType,
    ) -> impl Iterator<Item = (usize, u32)> + Clone + '_ {
        features
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.ftype == ftype)
            .map(|(fid, f)| (f.src as usize, fid as u32))
    }

    /// Get the number of features
    pub fn num_features(&self) -> usize {
        self.features.len()
    }
}
