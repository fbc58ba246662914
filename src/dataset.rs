use rand::seq::SliceRandom;
use rand::Rng;

use crate::attribute::Attribute as NamedAttribute;
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};

/// An attribute consists of an attribute id with its value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attribute {
    /// Attribute id
    pub id: u32,
    /// Value of the attribute
    pub value: f64,
}

impl Attribute {
    pub fn new(id: u32, value: f64) -> Self {
        Self { id, value }
    }
}

/// An item consists of an array of attributes
pub type Item = Vec<Attribute>;

/// An instance consists of a sequence of items and labels
#[derive(Debug, Clone)]
pub struct Instance {
    /// Array of the item sequence
    pub items: Vec<Item>,
    /// Array of the label sequence, parallel to `items`
    pub labels: Vec<u32>,
    /// Instance weight
    pub weight: f64,
    /// Group id, used to carve out a holdout set
    pub group: u32,
}

impl Instance {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
            labels: Vec::with_capacity(cap),
            weight: 1.0,
            group: 0,
        }
    }

    pub fn push(&mut self, item: Item, label: u32) {
        self.items.push(item);
        self.labels.push(label);
    }

    /// Number of items/labels in the sequence
    #[inline]
    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Append-only instance store together with its attribute and label dictionaries.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    instances: Vec<Instance>,
    attrs: Dictionary,
    labels: Dictionary,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern the strings of one labeled sequence and store it.
    pub fn append<I, L>(&mut self, xseq: &[I], yseq: &[L], weight: f64, group: u32) -> Result<()>
    where
        I: AsRef<[NamedAttribute]>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return Err(Error::InvalidInput(
                "xseq and yseq must have the same length".to_string(),
            ));
        }
        if xseq.is_empty() {
            return Err(Error::InvalidInput(
                "empty sequences are not allowed".to_string(),
            ));
        }

        let mut instance = Instance::with_capacity(xseq.len());
        instance.weight = weight;
        instance.group = group;
        for (item, label) in xseq.iter().zip(yseq) {
            let mut attrs = Item::with_capacity(item.as_ref().len());
            for attr in item.as_ref() {
                let aid = self.attrs.get_or_create(&attr.name)?;
                attrs.push(Attribute::new(aid, attr.value));
            }
            let lid = self.labels.get_or_create(label.as_ref())?;
            instance.push(attrs, lid);
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Store an instance whose ids were interned elsewhere.
    pub fn push(&mut self, instance: Instance) -> Result<()> {
        if instance.items.len() != instance.labels.len() {
            return Err(Error::InvalidInput(
                "items and labels must have the same length".to_string(),
            ));
        }
        let num_labels = self.labels.len() as u32;
        let num_attrs = self.attrs.len() as u32;
        let labels_ok = instance.labels.iter().all(|&l| l < num_labels);
        let attrs_ok = instance
            .items
            .iter()
            .flatten()
            .all(|a| a.id < num_attrs);
        if !labels_ok || !attrs_ok {
            return Err(Error::InvalidInput(
                "instance refers to an id missing from the dictionaries".to_string(),
            ));
        }
        self.instances.push(instance);
        Ok(())
    }

    pub fn attrs(&self) -> &Dictionary {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Dictionary {
        &mut self.attrs
    }

    pub fn labels(&self) -> &Dictionary {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut Dictionary {
        &mut self.labels
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.attrs.clear();
        self.labels.clear();
    }
}

/// A permutation over the instances of a [`Dataset`].
///
/// Views never copy instance payloads; shuffling permutes the index array only.
#[derive(Debug, Clone)]
pub struct DatasetView<'a> {
    data: &'a Dataset,
    perm: Vec<usize>,
}

impl<'a> DatasetView<'a> {
    /// Every instance in insertion order.
    pub fn all(data: &'a Dataset) -> Self {
        Self {
            data,
            perm: (0..data.len()).collect(),
        }
    }

    /// Instances whose group differs from `holdout`; all of them when there is no holdout.
    pub fn train(data: &'a Dataset, holdout: Option<u32>) -> Self {
        Self::filtered(data, |inst| Some(inst.group) != holdout)
    }

    /// Instances of the `holdout` group; empty when there is no holdout.
    pub fn test(data: &'a Dataset, holdout: Option<u32>) -> Self {
        Self::filtered(data, |inst| Some(inst.group) == holdout)
    }

    fn filtered<F: Fn(&Instance) -> bool>(data: &'a Dataset, keep: F) -> Self {
        let perm = data
            .instances
            .iter()
            .enumerate()
            .filter(|(_, inst)| keep(inst))
            .map(|(i, _)| i)
            .collect();
        Self { data, perm }
    }

    /// Fisher-Yates shuffle of the permutation.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.perm.shuffle(rng);
    }

    /// The `i`-th instance of the view.
    #[inline]
    pub fn get(&self, i: usize) -> &'a Instance {
        &self.data.instances[self.perm[i]]
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Instance> + '_ {
        self.perm.iter().map(move |&i| &self.data.instances[i])
    }

    /// Length of the longest sequence in the view
    pub fn max_items(&self) -> usize {
        self.iter().map(Instance::num_items).max().unwrap_or(0)
    }

    pub fn num_labels(&self) -> usize {
        self.data.labels.len()
    }

    pub fn num_attrs(&self) -> usize {
        self.data.attrs.len()
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.data
    }
}
