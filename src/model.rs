use std::convert::TryFrom;
use std::fmt;
use std::io::{self, Write};

use bstr::ByteSlice;
use cqdb::CQDB;

use crate::dictionary::StringTable;
use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureRefs, FeatureType};
use crate::tagger::Tagger;

pub(crate) const MAGIC: &[u8; 4] = b"lCRF";
pub(crate) const MODEL_TYPE: &[u8; 4] = b"FOMC";
pub(crate) const VERSION: u32 = 100;
pub(crate) const HEADER_SIZE: usize = 48;
pub(crate) const CHUNK_SIZE: usize = 12;
pub(crate) const FEATURE_SIZE: usize = 20;

#[inline]
pub(crate) fn unpack_u32(buf: &[u8], offset: usize) -> Result<u32> {
    buf.get(offset..offset.saturating_add(4))
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::IncompatibleModel(format!("truncated at offset {:#X}", offset)))
}

#[inline]
fn unpack_f64(buf: &[u8], offset: usize) -> Result<f64> {
    let b = buf
        .get(offset..offset.saturating_add(8))
        .ok_or_else(|| Error::IncompatibleModel(format!("truncated at offset {:#X}", offset)))?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(b);
    Ok(f64::from_le_bytes(bytes))
}

/// The fixed-size file header
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Header {
    pub magic: [u8; 4],
    pub size: u32,
    pub r#type: [u8; 4],
    pub version: u32,
    pub num_features: u32,
    pub num_labels: u32,
    pub num_attrs: u32,
    pub off_features: u32,
    pub off_labels: u32,
    pub off_attrs: u32,
    pub off_label_refs: u32,
    pub off_attr_refs: u32,
}

impl Header {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::IncompatibleModel("file is too small".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        let mut r#type = [0u8; 4];
        r#type.copy_from_slice(&buf[8..12]);
        Ok(Self {
            magic,
            size: unpack_u32(buf, 4)?,
            r#type,
            version: unpack_u32(buf, 12)?,
            num_features: unpack_u32(buf, 16)?,
            num_labels: unpack_u32(buf, 20)?,
            num_attrs: unpack_u32(buf, 24)?,
            off_features: unpack_u32(buf, 28)?,
            off_labels: unpack_u32(buf, 32)?,
            off_attrs: unpack_u32(buf, 36)?,
            off_label_refs: unpack_u32(buf, 40)?,
            off_attr_refs: unpack_u32(buf, 44)?,
        })
    }

    pub(crate) fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.magic)?;
        w.write_all(&self.size.to_le_bytes())?;
        w.write_all(&self.r#type)?;
        for v in [
            self.version,
            self.num_features,
            self.num_labels,
            self.num_attrs,
            self.off_features,
            self.off_labels,
            self.off_attrs,
            self.off_label_refs,
            self.off_attr_refs,
        ] {
            w.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }
}

/// A string table of a loaded model
#[derive(Clone, Copy)]
pub struct ModelTable<'m, 'a> {
    db: &'m CQDB<'a>,
    count: u32,
}

impl<'m, 'a> StringTable for ModelTable<'m, 'a> {
    fn lookup(&self, s: &str) -> Result<u32> {
        self.db.to_id(s).ok_or(Error::NotFound)
    }

    fn to_str(&self, id: u32) -> Result<&str> {
        if id >= self.count {
            return Err(Error::NotFound);
        }
        self.db
            .to_str(id)
            .and_then(|s| s.to_str().ok())
            .ok_or(Error::NotFound)
    }

    fn count(&self) -> usize {
        self.count as usize
    }
}

/// The CRF model
///
/// Borrows the serialized bytes and never allocates after loading, so one
/// model can serve any number of taggers, across threads included.
#[derive(Clone)]
pub struct Model<'a> {
    buffer: &'a [u8],
    header: Header,
    labels: CQDB<'a>,
    attrs: CQDB<'a>,
}

impl<'a> fmt::Debug for Model<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("header", &self.header)
            .finish()
    }
}

impl<'a> Model<'a> {
    /// Create an instance of a model object from a model in memory
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let header = Header::parse(buf)?;
        if &header.magic != MAGIC {
            return Err(Error::IncompatibleModel("magic mismatch".to_string()));
        }
        if &header.r#type != MODEL_TYPE {
            return Err(Error::IncompatibleModel("unknown model type".to_string()));
        }
        if header.version != VERSION {
            return Err(Error::IncompatibleModel(format!(
                "unsupported version {}",
                header.version
            )));
        }
        let size = buf.len();
        for offset in [
            header.off_features,
            header.off_labels,
            header.off_attrs,
            header.off_label_refs,
            header.off_attr_refs,
        ] {
            if offset as usize + CHUNK_SIZE > size {
                return Err(Error::IncompatibleModel(format!(
                    "chunk offset {:#X} is out of bounds",
                    offset
                )));
            }
        }
        let features_end = header.off_features as usize
            + CHUNK_SIZE
            + FEATURE_SIZE * header.num_features as usize;
        if features_end > size {
            return Err(Error::IncompatibleModel("truncated feature chunk".to_string()));
        }

        let labels = CQDB::new(&buf[header.off_labels as usize..])
            .map_err(|e| Error::IncompatibleModel(format!("label table: {}", e)))?;
        let attrs = CQDB::new(&buf[header.off_attrs as usize..])
            .map_err(|e| Error::IncompatibleModel(format!("attribute table: {}", e)))?;
        Ok(Self {
            buffer: buf,
            header,
            labels,
            attrs,
        })
    }

    /// Number of attributes
    pub fn num_attrs(&self) -> u32 {
        self.header.num_attrs
    }

    /// Number of labels
    pub fn num_labels(&self) -> u32 {
        self.header.num_labels
    }

    /// Number of features
    pub fn num_features(&self) -> u32 {
        self.header.num_features
    }

    /// Convert a label ID to label string
    pub fn to_label(&self, lid: u32) -> Option<&str> {
        if lid >= self.header.num_labels {
            return None;
        }
        self.labels.to_str(lid).and_then(|s| s.to_str().ok())
    }

    /// Convert a label string to label ID
    pub fn to_label_id(&self, value: &str) -> Option<u32> {
        self.labels.to_id(value)
    }

    /// Convert a attribute ID to attribute string
    pub fn to_attr(&self, aid: u32) -> Option<&str> {
        if aid >= self.header.num_attrs {
            return None;
        }
        self.attrs.to_str(aid).and_then(|s| s.to_str().ok())
    }

    /// Convert a attribute string to attribute ID
    pub fn to_attr_id(&self, value: &str) -> Option<u32> {
        self.attrs.to_id(value)
    }

    /// The label table
    pub fn labels(&self) -> ModelTable<'_, 'a> {
        ModelTable {
            db: &self.labels,
            count: self.header.num_labels,
        }
    }

    /// The attribute table
    pub fn attrs(&self) -> ModelTable<'_, 'a> {
        ModelTable {
            db: &self.attrs,
            count: self.header.num_attrs,
        }
    }

    fn refs(&self, chunk: u32, index: u32, count: u32) -> Result<FeatureRefs<'a>> {
        if index >= count {
            return Err(Error::NotFound);
        }
        let slot = chunk as usize + CHUNK_SIZE + 4 * index as usize;
        let offset = unpack_u32(self.buffer, slot)? as usize;
        let num_features = unpack_u32(self.buffer, offset)? as usize;
        let begin = offset + 4;
        let feature_ids = self
            .buffer
            .get(begin..begin + 4 * num_features)
            .ok_or_else(|| Error::IncompatibleModel("truncated reference list".to_string()))?;
        Ok(FeatureRefs::new(feature_ids))
    }

    /// Ids of the transition features leaving label `lid`
    pub fn label_ref(&self, lid: u32) -> Result<FeatureRefs<'a>> {
        self.refs(self.header.off_label_refs, lid, self.header.num_labels)
    }

    /// Ids of the state features of attribute `aid`
    pub fn attr_ref(&self, aid: u32) -> Result<FeatureRefs<'a>> {
        self.refs(self.header.off_attr_refs, aid, self.header.num_attrs)
    }

    pub fn feature(&self, fid: u32) -> Result<Feature> {
        if fid >= self.header.num_features {
            return Err(Error::NotFound);
        }
        let index = self.header.off_features as usize + CHUNK_SIZE + FEATURE_SIZE * fid as usize;
        let feature = Feature {
            ftype: FeatureType::try_from(unpack_u32(self.buffer, index)?)?,
            src: unpack_u32(self.buffer, index + 4)?,
            dst: unpack_u32(self.buffer, index + 8)?,
            weight: unpack_f64(self.buffer, index + 12)?,
        };
        let num_src = match feature.ftype {
            FeatureType::State => self.header.num_attrs,
            FeatureType::Transition => self.header.num_labels,
        };
        if feature.src >= num_src || feature.dst >= self.header.num_labels {
            return Err(Error::IncompatibleModel(format!(
                "feature #{} ({} --> {}) is out of range",
                fid, feature.src, feature.dst
            )));
        }
        Ok(feature)
    }

    /// Iterate over every feature in id order
    pub fn features(&self) -> impl Iterator<Item = Result<Feature>> + '_ {
        (0..self.header.num_features).map(move |fid| self.feature(fid))
    }

    /// Get a new tagger
    pub fn tagger(&self) -> Result<Tagger<'_>> {
        Tagger::new(self)
    }

    /// Print the model in human-readable format
    pub fn dump<W: Write>(&self, w: &mut W) -> Result<()> {
        let header = &self.header;
        writeln!(w, "FILEHEADER = {{")?;
        writeln!(w, "  magic: {}", header.magic.as_bstr())?;
        writeln!(w, "  size: {}", header.size)?;
        writeln!(w, "  type: {}", header.r#type.as_bstr())?;
        writeln!(w, "  version: {}", header.version)?;
        writeln!(w, "  num_features: {}", header.num_features)?;
        writeln!(w, "  num_labels: {}", header.num_labels)?;
        writeln!(w, "  num_attrs: {}", header.num_attrs)?;
        writeln!(w, "  off_features: {:#X}", header.off_features)?;
        writeln!(w, "  off_labels: {:#X}", header.off_labels)?;
        writeln!(w, "  off_attrs: {:#X}", header.off_attrs)?;
        writeln!(w, "  off_labelrefs: {:#X}", header.off_label_refs)?;
        writeln!(w, "  off_attrrefs: {:#X}", header.off_attr_refs)?;
        writeln!(w, "}}\n")?;

        let labels = self.labels();
        let attrs = self.attrs();

        writeln!(w, "LABELS = {{")?;
        for i in 0..header.num_labels {
            writeln!(w, "  {:>5}: {}", i, labels.to_str(i)?)?;
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "ATTRIBUTES = {{")?;
        for i in 0..header.num_attrs {
            writeln!(w, "  {:>5}: {}", i, attrs.to_str(i)?)?;
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "TRANSITIONS = {{")?;
        for i in 0..header.num_labels {
            for fid in self.label_ref(i)?.iter() {
                let f = self.feature(fid)?;
                writeln!(
                    w,
                    "  ({}) {} --> {}: {:.6}",
                    f.ftype as u32,
                    labels.to_str(f.src)?,
                    labels.to_str(f.dst)?,
                    f.weight
                )?;
            }
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "STATE_FEATURES = {{")?;
        for i in 0..header.num_attrs {
            for fid in self.attr_ref(i)?.iter() {
                let f = self.feature(fid)?;
                writeln!(
                    w,
                    "  ({}) {} --> {}: {:.6}",
                    f.ftype as u32,
                    attrs.to_str(f.src)?,
                    labels.to_str(f.dst)?,
                    f.weight
                )?;
            }
        }
        writeln!(w, "}}\n")?;
        Ok(())
    }
}
