use std::io::{Seek, SeekFrom, Write};

use cqdb::CQDBWriter;

use super::feature_gen::{Feature as GenFeature, RefTable};
use super::logging::Logging;
use crate::dictionary::StringTable;
use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureType};
use crate::model::{Header, CHUNK_SIZE, HEADER_SIZE, MAGIC, MODEL_TYPE, VERSION};

/// Which chunk the writer has open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    None,
    Labels,
    Attrs,
    LabelRefs,
    AttrRefs,
    Features,
}

#[derive(Debug)]
struct RefChunk {
    chunk: &'static [u8; 4],
    begin: u64,
    offsets: Vec<u32>,
}

/// Chunked writer of the binary model format.
///
/// Every chunk is written between an `open_*` and a `close_*` call; calls out
/// of that order fail with [`Error::InternalLogic`]. The file header is
/// written last by [`ModelWriter::close`].
#[derive(Debug)]
pub struct ModelWriter<W: Write + Seek> {
    inner: W,
    state: WriterState,
    header: Header,
    strings: Vec<(String, u32)>,
    refs: Option<RefChunk>,
    num_written: u32,
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InternalLogic(format!("{} exceeds u32::MAX", what)))
}

impl<W: Write + Seek> ModelWriter<W> {
    /// Reserve room for the header at the current position.
    pub fn new(mut inner: W) -> Result<Self> {
        inner.write_all(&[0u8; HEADER_SIZE])?;
        let header = Header {
            magic: *MAGIC,
            r#type: *MODEL_TYPE,
            version: VERSION,
            ..Header::default()
        };
        Ok(Self {
            inner,
            state: WriterState::None,
            header,
            strings: Vec::new(),
            refs: None,
            num_written: 0,
        })
    }

    fn expect(&self, state: WriterState) -> Result<()> {
        if self.state != state {
            return Err(Error::InternalLogic(format!(
                "expected {:?} state, writer is in {:?}",
                state, self.state
            )));
        }
        Ok(())
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    fn align(&mut self) -> Result<u64> {
        let mut pos = self.position()?;
        while pos % 4 != 0 {
            self.inner.write_all(&[0])?;
            pos += 1;
        }
        Ok(pos)
    }

    pub fn open_labels(&mut self, num_labels: u32) -> Result<()> {
        self.expect(WriterState::None)?;
        self.header.off_labels = to_u32(self.position()?, "label table offset")?;
        self.header.num_labels = num_labels;
        self.strings.clear();
        self.state = WriterState::Labels;
        Ok(())
    }

    pub fn put_label(&mut self, lid: u32, value: &str) -> Result<()> {
        self.expect(WriterState::Labels)?;
        self.strings.push((value.to_string(), lid));
        Ok(())
    }

    pub fn close_labels(&mut self) -> Result<()> {
        self.expect(WriterState::Labels)?;
        self.flush_strings()?;
        self.state = WriterState::None;
        Ok(())
    }

    pub fn open_attrs(&mut self, num_attrs: u32) -> Result<()> {
        self.expect(WriterState::None)?;
        self.header.off_attrs = to_u32(self.position()?, "attribute table offset")?;
        self.header.num_attrs = num_attrs;
        self.strings.clear();
        self.state = WriterState::Attrs;
        Ok(())
    }

    pub fn put_attr(&mut self, aid: u32, value: &str) -> Result<()> {
        self.expect(WriterState::Attrs)?;
        self.strings.push((value.to_string(), aid));
        Ok(())
    }

    pub fn close_attrs(&mut self) -> Result<()> {
        self.expect(WriterState::Attrs)?;
        self.flush_strings()?;
        self.state = WriterState::None;
        Ok(())
    }

    fn flush_strings(&mut self) -> Result<()> {
        {
            let mut db = CQDBWriter::new(&mut self.inner)?;
            for (s, id) in &self.strings {
                db.put(s, *id)?;
            }
            // The database is written out when `db` is dropped.
        }
        self.strings.clear();
        self.inner.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn open_refs(&mut self, chunk: &'static [u8; 4], num: u32) -> Result<u64> {
        let begin = self.align()?;
        let reserved = CHUNK_SIZE + 4 * num as usize;
        self.inner.write_all(&vec![0u8; reserved])?;
        self.refs = Some(RefChunk {
            chunk,
            begin,
            offsets: vec![0; num as usize],
        });
        Ok(begin)
    }

    fn put_refs(&mut self, index: u32, fids: &[u32]) -> Result<()> {
        let pos = to_u32(self.position()?, "reference offset")?;
        let refs = self
            .refs
            .as_mut()
            .ok_or_else(|| Error::InternalLogic("no reference chunk is open".to_string()))?;
        let slot = refs
            .offsets
            .get_mut(index as usize)
            .ok_or_else(|| Error::InternalLogic(format!("reference index {} out of range", index)))?;
        *slot = pos;
        self.inner.write_all(&(fids.len() as u32).to_le_bytes())?;
        for fid in fids {
            self.inner.write_all(&fid.to_le_bytes())?;
        }
        Ok(())
    }

    fn close_refs(&mut self) -> Result<()> {
        let refs = self
            .refs
            .take()
            .ok_or_else(|| Error::InternalLogic("no reference chunk is open".to_string()))?;
        let end = self.position()?;
        let size = to_u32(end - refs.begin, "reference chunk size")?;
        self.inner.seek(SeekFrom::Start(refs.begin))?;
        self.inner.write_all(refs.chunk)?;
        self.inner.write_all(&size.to_le_bytes())?;
        self.inner.write_all(&(refs.offsets.len() as u32).to_le_bytes())?;
        for offset in &refs.offsets {
            self.inner.write_all(&offset.to_le_bytes())?;
        }
        self.inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    pub fn open_label_refs(&mut self, num_labels: u32) -> Result<()> {
        self.expect(WriterState::None)?;
        let begin = self.open_refs(b"LFRF", num_labels)?;
        self.header.off_label_refs = to_u32(begin, "label reference offset")?;
        self.state = WriterState::LabelRefs;
        Ok(())
    }

    /// Write the ids of the transition features leaving label `lid`.
    pub fn put_label_ref(&mut self, lid: u32, fids: &[u32]) -> Result<()> {
        self.expect(WriterState::LabelRefs)?;
        self.put_refs(lid, fids)
    }

    pub fn close_label_refs(&mut self) -> Result<()> {
        self.expect(WriterState::LabelRefs)?;
        self.close_refs()?;
        self.state = WriterState::None;
        Ok(())
    }

    pub fn open_attr_refs(&mut self, num_attrs: u32) -> Result<()> {
        self.expect(WriterState::None)?;
        let begin = self.open_refs(b"AFRF", num_attrs)?;
        self.header.off_attr_refs = to_u32(begin, "attribute reference offset")?;
        self.state = WriterState::AttrRefs;
        Ok(())
    }

    /// Write the ids of the state features of attribute `aid`.
    pub fn put_attr_ref(&mut self, aid: u32, fids: &[u32]) -> Result<()> {
        self.expect(WriterState::AttrRefs)?;
        self.put_refs(aid, fids)
    }

    pub fn close_attr_refs(&mut self) -> Result<()> {
        self.expect(WriterState::AttrRefs)?;
        self.close_refs()?;
        self.state = WriterState::None;
        Ok(())
    }

    pub fn open_features(&mut self) -> Result<()> {
        self.expect(WriterState::None)?;
        self.header.off_features = to_u32(self.position()?, "feature offset")?;
        self.inner.write_all(&[0u8; CHUNK_SIZE])?;
        self.num_written = 0;
        self.state = WriterState::Features;
        Ok(())
    }

    /// Append feature `fid`; features must arrive as #0, #1, ... in order.
    pub fn put_feature(&mut self, fid: u32, f: &Feature) -> Result<()> {
        self.expect(WriterState::Features)?;
        if fid != self.num_written {
            return Err(Error::InternalLogic(format!(
                "feature #{} written out of order, expected #{}",
                fid, self.num_written
            )));
        }
        self.inner.write_all(&(f.ftype as u32).to_le_bytes())?;
        self.inner.write_all(&f.src.to_le_bytes())?;
        self.inner.write_all(&f.dst.to_le_bytes())?;
        self.inner.write_all(&f.weight.to_le_bytes())?;
        self.num_written += 1;
        Ok(())
    }

    pub fn close_features(&mut self) -> Result<()> {
        self.expect(WriterState::Features)?;
        let begin = u64::from(self.header.off_features);
        let end = self.position()?;
        let size = to_u32(end - begin, "feature chunk size")?;
        self.inner.seek(SeekFrom::Start(begin))?;
        self.inner.write_all(b"FEAT")?;
        self.inner.write_all(&size.to_le_bytes())?;
        self.inner.write_all(&self.num_written.to_le_bytes())?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.header.num_features = self.num_written;
        self.state = WriterState::None;
        Ok(())
    }

    /// Write the header and hand back the underlying stream.
    pub fn close(mut self) -> Result<W> {
        self.expect(WriterState::None)?;
        let end = self.position()?;
        self.header.size = to_u32(end, "model size")?;
        self.inner.seek(SeekFrom::Start(0))?;
        self.header.write_to(&mut self.inner)?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Write weights `w` for `features` as a model, dropping zero-weight features.
///
/// Surviving features keep their relative order and get dense ids; attributes
/// are renumbered in the order their first surviving feature appears.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_pruned<W: Write + Seek>(
    inner: W,
    features: &[GenFeature],
    attr_refs: &RefTable,
    label_refs: &RefTable,
    w: &[f64],
    labels: &dyn StringTable,
    attrs: &dyn StringTable,
    lg: &mut Logging,
) -> Result<W> {
    let num_labels = labels.count();
    let num_attrs = attrs.count();

    let mut fmap: Vec<Option<u32>> = vec![None; features.len()];
    let mut amap: Vec<Option<u32>> = vec![None; num_attrs];
    let mut num_active_attrs = 0u32;
    let mut num_active = 0u32;

    let mut writer = ModelWriter::new(inner)?;
    writer.open_features()?;
    for (k, f) in features.iter().enumerate() {
        let weight = w[k];
        if weight == 0.0 {
            continue;
        }
        fmap[k] = Some(num_active);
        let src = match f.ftype {
            FeatureType::State => {
                let slot = amap.get_mut(f.src as usize).ok_or_else(|| {
                    Error::InternalLogic(format!("attribute id {} out of range", f.src))
                })?;
                *slot.get_or_insert_with(|| {
                    num_active_attrs += 1;
                    num_active_attrs - 1
                })
            }
            FeatureType::Transition => f.src,
        };
        let feature = Feature {
            ftype: f.ftype,
            src,
            dst: f.dst,
            weight,
        };
        writer.put_feature(num_active, &feature)?;
        num_active += 1;
    }
    writer.close_features()?;

    logging!(lg, "Number of active features: {} ({})", num_active, features.len());
    logging!(lg, "Number of active attributes: {} ({})", num_active_attrs, num_attrs);
    logging!(lg, "Number of active labels: {} ({})", num_labels, num_labels);

    logging!(lg, "Writing labels");
    writer.open_labels(num_labels as u32)?;
    for lid in 0..num_labels as u32 {
        writer.put_label(lid, labels.to_str(lid)?)?;
    }
    writer.close_labels()?;

    logging!(lg, "Writing attributes");
    writer.open_attrs(num_active_attrs)?;
    for (aid, mapped) in amap.iter().enumerate() {
        if let Some(new_aid) = mapped {
            writer.put_attr(*new_aid, attrs.to_str(aid as u32)?)?;
        }
    }
    writer.close_attrs()?;

    let remap = |fids: &[u32]| -> Vec<u32> {
        fids.iter()
            .filter_map(|&fid| fmap.get(fid as usize).copied().flatten())
            .collect()
    };

    logging!(lg, "Writing feature references for transitions");
    // Two trailing slots are kept empty for compatibility with CRFsuite.
    writer.open_label_refs(num_labels as u32 + 2)?;
    for lid in 0..num_labels {
        writer.put_label_ref(lid as u32, &remap(label_refs.get(lid)))?;
    }
    writer.close_label_refs()?;

    logging!(lg, "Writing feature references for attributes");
    writer.open_attr_refs(num_active_attrs)?;
    for (aid, mapped) in amap.iter().enumerate() {
        if let Some(new_aid) = mapped {
            writer.put_attr_ref(*new_aid, &remap(attr_refs.get(aid)))?;
        }
    }
    writer.close_attr_refs()?;

    writer.close()
}
