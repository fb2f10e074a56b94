//! Building flat TTrees from in-memory columns.
//!
//! Each column becomes one branch with one leaf: a scalar, a fixed-size
//! array, or a variable-size array whose length per entry is read from an
//! earlier integer column (ROOT's `pt[nJet]/F`).

use crate::basket::{BasketHeader, encode_payload};
use crate::error::{Result, RootError};
use crate::objects::{BranchSpec, DEFAULT_ENTRY_OFFSET_LEN, LeafSpec, TreeSpec, write_ttree};
use crate::tree::LeafType;
use crate::wbuffer::WBuffer;
use crate::writer::{BEGIN, RootWriter};

/// Entries per basket unless configured otherwise.
pub const DEFAULT_BASKET_ENTRIES: usize = 1000;

/// Column values of one element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    /// `F` values.
    F32(Vec<f32>),
    /// `D` values.
    F64(Vec<f64>),
    /// `I` values.
    I32(Vec<i32>),
    /// `L` values.
    I64(Vec<i64>),
    /// `i` values.
    U32(Vec<u32>),
    /// `l` values.
    U64(Vec<u64>),
    /// `S` values.
    I16(Vec<i16>),
    /// `s` values.
    U16(Vec<u16>),
    /// `B` values.
    I8(Vec<i8>),
    /// `b` values.
    U8(Vec<u8>),
    /// `O` values.
    Bool(Vec<bool>),
}

impl Values {
    /// Element type.
    pub fn leaf_type(&self) -> LeafType {
        match self {
            Values::F32(_) => LeafType::F32,
            Values::F64(_) => LeafType::F64,
            Values::I32(_) => LeafType::I32,
            Values::I64(_) => LeafType::I64,
            Values::U32(_) => LeafType::U32,
            Values::U64(_) => LeafType::U64,
            Values::I16(_) => LeafType::I16,
            Values::U16(_) => LeafType::U16,
            Values::I8(_) => LeafType::I8,
            Values::U8(_) => LeafType::U8,
            Values::Bool(_) => LeafType::Bool,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Values::F32(v) => v.len(),
            Values::F64(v) => v.len(),
            Values::I32(v) => v.len(),
            Values::I64(v) => v.len(),
            Values::U32(v) => v.len(),
            Values::U64(v) => v.len(),
            Values::I16(v) => v.len(),
            Values::U16(v) => v.len(),
            Values::I8(v) => v.len(),
            Values::U8(v) => v.len(),
            Values::Bool(v) => v.len(),
        }
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i` as a signed count, for integer columns.
    fn count_at(&self, i: usize) -> Option<i64> {
        Some(match self {
            Values::I32(v) => v[i] as i64,
            Values::I64(v) => v[i],
            Values::U32(v) => v[i] as i64,
            Values::U64(v) => i64::try_from(v[i]).ok()?,
            Values::I16(v) => v[i] as i64,
            Values::U16(v) => v[i] as i64,
            Values::I8(v) => v[i] as i64,
            Values::U8(v) => v[i] as i64,
            Values::F32(_) | Values::F64(_) | Values::Bool(_) => return None,
        })
    }

    /// Append elements `range` big-endian.
    fn put_range(&self, w: &mut WBuffer, range: std::ops::Range<usize>) {
        match self {
            Values::F32(v) => v[range].iter().for_each(|&x| w.put_f32(x)),
            Values::F64(v) => v[range].iter().for_each(|&x| w.put_f64(x)),
            Values::I32(v) => v[range].iter().for_each(|&x| w.put_i32(x)),
            Values::I64(v) => v[range].iter().for_each(|&x| w.put_i64(x)),
            Values::U32(v) => v[range].iter().for_each(|&x| w.put_u32(x)),
            Values::U64(v) => v[range].iter().for_each(|&x| w.put_u64(x)),
            Values::I16(v) => v[range].iter().for_each(|&x| w.put_i16(x)),
            Values::U16(v) => v[range].iter().for_each(|&x| w.put_u16(x)),
            Values::I8(v) => v[range].iter().for_each(|&x| w.put_u8(x as u8)),
            Values::U8(v) => w.put_bytes(&v[range]),
            Values::Bool(v) => v[range].iter().for_each(|&x| w.put_u8(x as u8)),
        }
    }
}

/// How a column's values map onto entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// One value per entry.
    Scalar,
    /// Exactly `n` values per entry.
    Fixed(usize),
    /// As many values per entry as the named counter column holds.
    Counted(String),
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    shape: Shape,
    values: Values,
}

/// Accumulates columns and writes them as one TTree.
#[derive(Debug, Clone)]
pub struct TreeWriter {
    name: String,
    title: String,
    basket_entries: usize,
    columns: Vec<Column>,
}

impl TreeWriter {
    /// A tree with no columns.
    pub fn new(name: &str, title: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            basket_entries: DEFAULT_BASKET_ENTRIES,
            columns: Vec::new(),
        }
    }

    /// Entries per basket (at least 1).
    pub fn with_basket_entries(mut self, n: usize) -> Self {
        self.basket_entries = n.max(1);
        self
    }

    /// Add a column. Counter columns must be added before their users.
    pub fn column(mut self, name: &str, shape: Shape, values: Values) -> Self {
        self.columns.push(Column { name: name.to_string(), shape, values });
        self
    }

    /// Write baskets and the tree record to `file`; returns the entry count.
    pub fn write(&self, file: &mut RootWriter) -> Result<u64> {
        let layouts = self.plan()?;
        let entries = layouts.first().map(|l| l.starts.len() as u64 - 1).unwrap_or(0);

        let mut branches = Vec::with_capacity(self.columns.len());
        for (col, layout) in self.columns.iter().zip(&layouts) {
            branches.push(self.write_branch(file, col, layout)?);
        }

        let spec = TreeSpec {
            name: self.name.clone(),
            title: self.title.clone(),
            entries,
            tot_bytes: branches.iter().map(|b| b.tot_bytes).sum(),
            zip_bytes: branches.iter().map(|b| b.zip_bytes).sum(),
            compress: file.setting().code(),
            branches,
        };
        let key = file.new_key("TTree", &self.name, &self.title);
        let payload = write_ttree(&spec, key.key_len as usize);
        file.write_object(key, &payload)?;
        log::debug!("wrote tree '{}': {} entries, {} branches", self.name, entries, self.columns.len());
        Ok(entries)
    }

    /// Element offsets of every entry boundary, per column.
    fn plan(&self) -> Result<Vec<ColumnLayout>> {
        let mut layouts: Vec<ColumnLayout> = Vec::with_capacity(self.columns.len());
        for (i, col) in self.columns.iter().enumerate() {
            let len = col.values.len();
            let layout = match &col.shape {
                Shape::Scalar => ColumnLayout::fixed(len, 1),
                Shape::Fixed(0) => {
                    return Err(RootError::Unsupported(format!("column '{}': zero-length array", col.name)));
                }
                Shape::Fixed(n) => {
                    if len % n != 0 {
                        return Err(RootError::EntryMismatch(format!(
                            "column '{}': {} values do not split into arrays of {}",
                            col.name, len, n
                        )));
                    }
                    ColumnLayout::fixed(len / n, *n)
                }
                Shape::Counted(counter) => {
                    let source = self.columns[..i]
                        .iter()
                        .find(|c| &c.name == counter && c.shape == Shape::Scalar)
                        .ok_or_else(|| {
                            RootError::BranchNotFound(format!(
                                "counter '{}' for column '{}' (must be an earlier scalar column)",
                                counter, col.name
                            ))
                        })?;
                    let mut starts = Vec::with_capacity(source.values.len() + 1);
                    starts.push(0usize);
                    for e in 0..source.values.len() {
                        let n = source.values.count_at(e).filter(|n| *n >= 0).ok_or_else(|| {
                            RootError::TypeMismatch(format!(
                                "counter '{}' entry {} is not a non-negative integer",
                                counter, e
                            ))
                        })?;
                        starts.push(starts[e] + n as usize);
                    }
                    if starts[starts.len() - 1] != len {
                        return Err(RootError::EntryMismatch(format!(
                            "column '{}' has {} values, counter '{}' sums to {}",
                            col.name,
                            len,
                            counter,
                            starts[starts.len() - 1]
                        )));
                    }
                    ColumnLayout { starts, variable: true }
                }
            };
            if let Some(first) = layouts.first() {
                if first.starts.len() != layout.starts.len() {
                    return Err(RootError::EntryMismatch(format!(
                        "column '{}' has {} entries, '{}' has {}",
                        col.name,
                        layout.starts.len() - 1,
                        self.columns[0].name,
                        first.starts.len() - 1
                    )));
                }
            }
            layouts.push(layout);
        }
        Ok(layouts)
    }

    fn write_branch(&self, file: &mut RootWriter, col: &Column, layout: &ColumnLayout) -> Result<BranchSpec> {
        let leaf_type = col.values.leaf_type();
        let elem = leaf_type.byte_size();
        let n_entries = layout.starts.len() - 1;
        let variable = layout.variable;
        let is_counter = self
            .columns
            .iter()
            .any(|c| matches!(&c.shape, Shape::Counted(counter) if counter == &col.name));

        let mut spec = BranchSpec {
            name: col.name.clone(),
            title: String::new(),
            leaf: LeafSpec {
                name: col.name.clone(),
                leaf_type,
                len: match col.shape {
                    Shape::Fixed(n) => n as i32,
                    _ => 1,
                },
                count_leaf: match &col.shape {
                    Shape::Counted(c) => Some(c.clone()),
                    _ => None,
                },
                is_range: is_counter,
                maximum: if is_counter { counter_max(&self.columns, &col.name) } else { 0 },
            },
            entry_offset_len: if variable { DEFAULT_ENTRY_OFFSET_LEN } else { 0 },
            entries: n_entries as u64,
            tot_bytes: 0,
            zip_bytes: 0,
            basket_bytes: Vec::new(),
            basket_entry: vec![0],
            basket_seek: Vec::new(),
        };
        spec.title = format!("{}/{}", spec.leaf.title(), leaf_type.type_code());

        let mut first = 0usize;
        while first < n_entries {
            let last = (first + self.basket_entries).min(n_entries);
            let (lo, hi) = (layout.starts[first], layout.starts[last]);

            let mut data = WBuffer::new(0);
            col.values.put_range(&mut data, lo..hi);
            let data = data.into_inner();
            let starts: Option<Vec<usize>> =
                variable.then(|| layout.starts[first..last].iter().map(|s| (s - lo) * elem).collect());

            let mut header = BasketHeader::new(&col.name, &self.name, file.needs_large_keys());
            let key_len = header.key.key_len as usize;
            let payload = encode_payload(&data, starts.as_deref(), key_len);
            let compressed = file.setting().compress(&payload)?;
            let stored = compressed.as_deref().unwrap_or(&payload);

            header.key.datime = file.datime();
            header.key.obj_len = payload.len() as u32;
            header.key.n_bytes = (key_len + stored.len()) as u32;
            header.key.seek_key = file.end();
            header.key.seek_pdir = BEGIN;
            header.buffer_size = (key_len + payload.len()) as i32;
            header.nev_buf_size =
                if variable { DEFAULT_ENTRY_OFFSET_LEN } else { (elem * spec.leaf.len as usize) as i32 };
            header.nev_buf = (last - first) as i32;
            header.last = (key_len + data.len()) as i32;

            let mut record = WBuffer::new(0);
            header.write(&mut record);
            record.put_bytes(stored);
            let seek = file.write_raw(record.as_bytes())?;

            spec.basket_bytes.push(header.key.n_bytes);
            spec.basket_seek.push(seek);
            spec.basket_entry.push(last as u64);
            spec.tot_bytes += (key_len + payload.len()) as i64;
            spec.zip_bytes += header.key.n_bytes as i64;
            first = last;
        }
        Ok(spec)
    }
}

/// Entry boundaries of one column, in elements.
struct ColumnLayout {
    starts: Vec<usize>,
    /// Entries carry an offset table.
    variable: bool,
}

impl ColumnLayout {
    fn fixed(n_entries: usize, per_entry: usize) -> Self {
        Self { starts: (0..=n_entries).map(|e| e * per_entry).collect(), variable: false }
    }
}

/// Largest count stored in the counter column `name`.
fn counter_max(columns: &[Column], name: &str) -> i64 {
    columns
        .iter()
        .find(|c| c.name == name)
        .map(|c| (0..c.values.len()).filter_map(|i| c.values.count_at(i)).max().unwrap_or(0))
        .unwrap_or(0)
}
