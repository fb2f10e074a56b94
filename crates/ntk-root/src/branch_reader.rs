//! Reading whole branches back as columns.

use rayon::prelude::*;

use crate::basket::Basket;
use crate::error::{Result, RootError};
use crate::tree::{BranchInfo, LeafType};

/// Values of a variable-length branch, row by row.
///
/// Row `i` is `flat[offsets[i]..offsets[i + 1]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct JaggedCol {
    /// All values in entry order.
    pub flat: Vec<f64>,
    /// Row boundaries into `flat`, one more than there are rows.
    pub offsets: Vec<usize>,
}

impl JaggedCol {
    /// Values of entry `row`.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.flat[self.offsets[row]..self.offsets[row + 1]]
    }

    /// Number of rows.
    pub fn n_entries(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

/// Decodes every basket of one branch.
pub struct BranchReader<'a> {
    file_data: &'a [u8],
    branch: &'a BranchInfo,
}

impl<'a> BranchReader<'a> {
    /// Reader over `branch` of a file whose bytes are `file_data`.
    pub fn new(file_data: &'a [u8], branch: &'a BranchInfo) -> Self {
        Self { file_data, branch }
    }

    /// All values as `f64`; fixed-size arrays are flattened.
    pub fn as_f64(&self) -> Result<Vec<f64>> {
        let leaf_type = self.numeric_leaf()?;
        let mut out = Vec::with_capacity(self.branch.entries as usize);
        for basket in self.baskets()? {
            push_values(basket.data(), leaf_type, &mut out)?;
        }
        Ok(out)
    }

    /// Values split by entry. Fixed-size branches give equal-length rows.
    pub fn as_jagged_f64(&self) -> Result<JaggedCol> {
        let leaf_type = self.numeric_leaf()?;
        let mut col = JaggedCol { flat: Vec::new(), offsets: vec![0] };
        for basket in self.baskets()? {
            for bytes in entries(&basket) {
                push_values(bytes, leaf_type, &mut col.flat)?;
                col.offsets.push(col.flat.len());
            }
        }
        Ok(col)
    }

    /// The stored bytes of each entry, whatever the leaf class.
    pub fn as_raw_entries(&self) -> Result<Vec<Vec<u8>>> {
        let baskets = self.baskets()?;
        Ok(baskets.iter().flat_map(entries).map(<[u8]>::to_vec).collect())
    }

    fn numeric_leaf(&self) -> Result<LeafType> {
        self.branch.leaf_type().ok_or_else(|| {
            let class = self.branch.leaves.first().map_or("no leaves", |l| l.class_name.as_str());
            RootError::TypeMismatch(format!("branch '{}' is not numeric ({})", self.branch.name, class))
        })
    }

    /// Every basket, checked against the branch's entry index.
    fn baskets(&self) -> Result<Vec<Basket>> {
        let baskets = (0..self.branch.n_baskets)
            .into_par_iter()
            .map(|i| self.basket(i))
            .collect::<Result<Vec<_>>>()?;

        let on_disk: u64 = baskets.iter().map(|b| b.n_entries() as u64).sum();
        if on_disk != self.branch.entries {
            return Err(RootError::Unsupported(format!(
                "branch '{}' keeps {} of its {} entries outside baskets on disk",
                self.branch.name,
                self.branch.entries.saturating_sub(on_disk),
                self.branch.entries
            )));
        }
        Ok(baskets)
    }

    fn basket(&self, i: usize) -> Result<Basket> {
        let branch = self.branch;
        let basket = Basket::read(self.file_data, branch.basket_seek[i])?;
        let expected = branch.basket_range(i).map(|(first, last)| last.saturating_sub(first));
        if expected != Some(basket.n_entries() as u64) {
            return Err(RootError::EntryMismatch(format!(
                "branch '{}' basket {} holds {} entries, index says {:?}",
                branch.name,
                i,
                basket.n_entries(),
                expected
            )));
        }
        Ok(basket)
    }
}

fn entries(basket: &Basket) -> impl Iterator<Item = &[u8]> {
    (0..basket.n_entries()).map(|i| basket.entry(i).unwrap_or_default())
}

/// Decode big-endian values of `leaf_type` from `bytes` onto `out`.
fn push_values(bytes: &[u8], leaf_type: LeafType, out: &mut Vec<f64>) -> Result<()> {
    let width = leaf_type.byte_size();
    if bytes.len() % width != 0 {
        return Err(RootError::Deserialization(format!(
            "{} bytes do not split into {:?} values",
            bytes.len(),
            leaf_type
        )));
    }
    out.extend(bytes.chunks_exact(width).map(|c| value(c, leaf_type)));
    Ok(())
}

fn value(c: &[u8], leaf_type: LeafType) -> f64 {
    fn arr<const N: usize>(c: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&c[..N]);
        out
    }
    match leaf_type {
        LeafType::Bool => f64::from(u8::from(c[0] != 0)),
        LeafType::I8 => f64::from(c[0] as i8),
        LeafType::U8 => f64::from(c[0]),
        LeafType::I16 => f64::from(i16::from_be_bytes(arr(c))),
        LeafType::U16 => f64::from(u16::from_be_bytes(arr(c))),
        LeafType::I32 => f64::from(i32::from_be_bytes(arr(c))),
        LeafType::U32 => f64::from(u32::from_be_bytes(arr(c))),
        LeafType::I64 => i64::from_be_bytes(arr(c)) as f64,
        LeafType::U64 => u64::from_be_bytes(arr(c)) as f64,
        LeafType::F32 => f64::from(f32::from_be_bytes(arr(c))),
        LeafType::F64 => f64::from_be_bytes(arr(c)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_leaf_width_decodes() {
        let mut out = Vec::new();
        push_values(&[0, 3], LeafType::Bool, &mut out).unwrap();
        push_values(&[0xFF], LeafType::I8, &mut out).unwrap();
        push_values(&(-300i16).to_be_bytes(), LeafType::I16, &mut out).unwrap();
        push_values(&70_000u32.to_be_bytes(), LeafType::U32, &mut out).unwrap();
        push_values(&(-5i64).to_be_bytes(), LeafType::I64, &mut out).unwrap();
        push_values(&2.5f32.to_be_bytes(), LeafType::F32, &mut out).unwrap();
        assert_eq!(out, vec![0.0, 1.0, -1.0, -300.0, 70_000.0, -5.0, 2.5]);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let err = push_values(&[0, 0, 0, 0, 1], LeafType::F32, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, RootError::Deserialization(_)));
    }

    #[test]
    fn jagged_rows() {
        let col = JaggedCol { flat: vec![4.0, 5.0, 6.0], offsets: vec![0, 0, 2, 3] };
        assert_eq!(col.n_entries(), 3);
        assert!(col.row(0).is_empty());
        assert_eq!(col.row(1), &[4.0, 5.0]);
        assert_eq!(col.row(2), &[6.0]);
    }
}
