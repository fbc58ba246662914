use std::convert::TryFrom;

use crate::error::{Error, Result};

/// Feature type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureType {
    /// State feature: (attribute, label)
    State = 0,
    /// Transition feature: (previous label, label)
    Transition = 1,
}

impl TryFrom<u32> for FeatureType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::State),
            1 => Ok(Self::Transition),
            other => Err(Error::IncompatibleModel(format!(
                "unknown feature type {}",
                other
            ))),
        }
    }
}

/// A feature as stored in a model file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub ftype: FeatureType,
    /// Attribute id for state features, source label id for transitions
    pub src: u32,
    /// Destination label id
    pub dst: u32,
    pub weight: f64,
}

/// Feature references
///
/// A borrowed array of little-endian feature ids read straight out of the
/// model buffer.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRefs<'a> {
    feature_ids: &'a [u8],
}

impl<'a> FeatureRefs<'a> {
    pub(crate) fn new(feature_ids: &'a [u8]) -> Self {
        Self { feature_ids }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.feature_ids.len() / 4
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.feature_ids.len() < 4
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<u32> {
        let start = index.checked_mul(4)?;
        let bytes = self.feature_ids.get(start..start + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + 'a {
        self.feature_ids
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_type_from_u32() {
        assert_eq!(FeatureType::try_from(0).unwrap(), FeatureType::State);
        assert_eq!(FeatureType::try_from(1).unwrap(), FeatureType::Transition);
        assert!(FeatureType::try_from(2).is_err());
    }

    #[test]
    fn test_feature_refs() {
        let bytes = [1u8, 0, 0, 0, 7, 0, 0, 0];
        let refs = FeatureRefs::new(&bytes);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs.get(1), Some(7));
        assert_eq!(refs.get(2), None);
        assert_eq!(refs.iter().collect::<Vec<_>>(), vec![1, 7]);
    }
}
