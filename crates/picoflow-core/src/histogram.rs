use auto_ops::impl_op_ex;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    utils::{get_bin_edges, get_bin_index},
    PicoFlowError, PicoFlowResult,
};

/// Parquet persistence for [`HistogramCollection`]s.
pub mod io;

pub use io::{read_histograms, write_histograms};

fn check_binning(bins: usize, range: (f64, f64)) {
    assert!(bins > 0, "Number of bins must be greater than zero!");
    assert!(
        range.1 > range.0,
        "The lower edge of the range must be smaller than the upper edge!"
    );
}

fn bin_center(bin: usize, bins: usize, range: (f64, f64)) -> f64 {
    let width = (range.1 - range.0) / bins as f64;
    range.0 + (bin as f64 - 0.5) * width
}

/// A one-dimensional histogram with evenly spaced bins.
///
/// Bins follow the ROOT numbering: `0` is the underflow bin, `1..=bins` are the regular bins and
/// `bins + 1` is the overflow bin. Every call to [`Histogram1D::fill`] counts as one entry,
/// including fills landing in the underflow or overflow bins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    name: String,
    title: String,
    bins: usize,
    range: (f64, f64),
    contents: Vec<f64>,
    entries: u64,
}

impl Histogram1D {
    /// Create an empty histogram with `bins` regular bins over `range`.
    ///
    /// # Panics
    ///
    /// Panics if `bins` is zero or the range is empty.
    pub fn new(name: &str, title: &str, bins: usize, range: (f64, f64)) -> Self {
        check_binning(bins, range);
        Self {
            name: name.to_string(),
            title: title.to_string(),
            bins,
            range,
            contents: vec![0.0; bins + 2],
            entries: 0,
        }
    }

    pub(crate) fn from_parts(
        name: &str,
        title: &str,
        bins: usize,
        range: (f64, f64),
        contents: Vec<f64>,
        entries: u64,
    ) -> PicoFlowResult<Self> {
        if bins == 0 || range.1 <= range.0 {
            return Err(PicoFlowError::HistogramMismatch {
                name: name.to_string(),
                reason: format!("invalid binning {bins} over [{}, {})", range.0, range.1),
            });
        }
        if contents.len() != bins + 2 {
            return Err(PicoFlowError::HistogramMismatch {
                name: name.to_string(),
                reason: format!(
                    "expected {} bins including flows, found {}",
                    bins + 2,
                    contents.len()
                ),
            });
        }
        Ok(Self {
            name: name.to_string(),
            title: title.to_string(),
            bins,
            range,
            contents,
            entries,
        })
    }

    /// Add one entry at `x`.
    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    /// Add one entry at `x` with the given weight.
    pub fn fill_weighted(&mut self, x: f64, weight: f64) {
        let bin = get_bin_index(x, self.bins, self.range);
        self.contents[bin] += weight;
        self.entries += 1;
    }

    /// The name of the histogram.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The title of the histogram (ROOT `title;x-axis;y-axis` convention).
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Number of regular bins.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Lower and upper edge of the regular bins.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// Edges of the regular bins.
    pub fn bin_edges(&self) -> Vec<f64> {
        get_bin_edges(self.bins, self.range)
    }

    /// Center of a regular bin.
    pub fn bin_center(&self, bin: usize) -> f64 {
        bin_center(bin, self.bins, self.range)
    }

    /// Content of a bin (ROOT numbering), zero outside `0..=bins + 1`.
    pub fn bin_content(&self, bin: usize) -> f64 {
        self.contents.get(bin).copied().unwrap_or(0.0)
    }

    /// All bin contents, including underflow (first) and overflow (last).
    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    /// Content of the underflow bin.
    pub fn underflow(&self) -> f64 {
        self.contents[0]
    }

    /// Content of the overflow bin.
    pub fn overflow(&self) -> f64 {
        self.contents[self.bins + 1]
    }

    /// Number of fills.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum of the regular bin contents.
    pub fn integral(&self) -> f64 {
        self.contents[1..=self.bins].iter().sum()
    }

    /// Mean of the regular bins, using bin centers. `None` for an empty histogram.
    pub fn mean(&self) -> Option<f64> {
        let integral = self.integral();
        if integral == 0.0 {
            return None;
        }
        let weighted: f64 = (1..=self.bins)
            .map(|bin| self.contents[bin] * self.bin_center(bin))
            .sum();
        Some(weighted / integral)
    }

    /// Whether two histograms share the same binning.
    pub fn same_binning(&self, other: &Self) -> bool {
        self.bins == other.bins && self.range == other.range
    }

    /// Add the contents and entries of `other`, failing if the binning differs.
    pub fn try_add(&mut self, other: &Self) -> PicoFlowResult<()> {
        if !self.same_binning(other) {
            return Err(PicoFlowError::HistogramMismatch {
                name: self.name.clone(),
                reason: format!(
                    "cannot add {} bins over {:?} to {} bins over {:?}",
                    other.bins, other.range, self.bins, self.range
                ),
            });
        }
        self.contents
            .iter_mut()
            .zip(&other.contents)
            .for_each(|(a, b)| *a += b);
        self.entries += other.entries;
        Ok(())
    }
}

impl_op_ex!(+= |a: &mut Histogram1D, b: &Histogram1D| {
    debug_assert!(a.same_binning(b), "histograms must share binning");
    a.contents.iter_mut().zip(&b.contents).for_each(|(x, y)| *x += y);
    a.entries += b.entries;
});

/// A two-dimensional histogram with evenly spaced bins along both axes.
///
/// Cells are stored with the $`x`$ bin varying fastest: `bin_x + (bins_x + 2) * bin_y`, each
/// axis using the ROOT underflow/overflow numbering of [`Histogram1D`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram2D {
    name: String,
    title: String,
    bins_x: usize,
    range_x: (f64, f64),
    bins_y: usize,
    range_y: (f64, f64),
    contents: Vec<f64>,
    entries: u64,
}

impl Histogram2D {
    /// Create an empty histogram.
    ///
    /// # Panics
    ///
    /// Panics if either axis has zero bins or an empty range.
    pub fn new(
        name: &str,
        title: &str,
        bins_x: usize,
        range_x: (f64, f64),
        bins_y: usize,
        range_y: (f64, f64),
    ) -> Self {
        check_binning(bins_x, range_x);
        check_binning(bins_y, range_y);
        Self {
            name: name.to_string(),
            title: title.to_string(),
            bins_x,
            range_x,
            bins_y,
            range_y,
            contents: vec![0.0; (bins_x + 2) * (bins_y + 2)],
            entries: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: &str,
        title: &str,
        bins_x: usize,
        range_x: (f64, f64),
        bins_y: usize,
        range_y: (f64, f64),
        contents: Vec<f64>,
        entries: u64,
    ) -> PicoFlowResult<Self> {
        if bins_x == 0 || bins_y == 0 || range_x.1 <= range_x.0 || range_y.1 <= range_y.0 {
            return Err(PicoFlowError::HistogramMismatch {
                name: name.to_string(),
                reason: "invalid two-dimensional binning".to_string(),
            });
        }
        let expected = (bins_x + 2) * (bins_y + 2);
        if contents.len() != expected {
            return Err(PicoFlowError::HistogramMismatch {
                name: name.to_string(),
                reason: format!(
                    "expected {expected} cells including flows, found {}",
                    contents.len()
                ),
            });
        }
        Ok(Self {
            name: name.to_string(),
            title: title.to_string(),
            bins_x,
            range_x,
            bins_y,
            range_y,
            contents,
            entries,
        })
    }

    fn cell(&self, bin_x: usize, bin_y: usize) -> usize {
        bin_x + (self.bins_x + 2) * bin_y
    }

    /// Add one entry at `(x, y)`.
    pub fn fill(&mut self, x: f64, y: f64) {
        let bin_x = get_bin_index(x, self.bins_x, self.range_x);
        let bin_y = get_bin_index(y, self.bins_y, self.range_y);
        let cell = self.cell(bin_x, bin_y);
        self.contents[cell] += 1.0;
        self.entries += 1;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Number of regular bins along $`x`$ and $`y`$.
    pub fn bins(&self) -> (usize, usize) {
        (self.bins_x, self.bins_y)
    }

    pub fn range_x(&self) -> (f64, f64) {
        self.range_x
    }

    pub fn range_y(&self) -> (f64, f64) {
        self.range_y
    }

    /// Content of a cell, zero outside the histogram.
    pub fn bin_content(&self, bin_x: usize, bin_y: usize) -> f64 {
        if bin_x > self.bins_x + 1 || bin_y > self.bins_y + 1 {
            return 0.0;
        }
        self.contents[self.cell(bin_x, bin_y)]
    }

    /// All cell contents, including flows, with $`x`$ varying fastest.
    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum of the cells which are regular along both axes.
    pub fn integral(&self) -> f64 {
        (1..=self.bins_y)
            .flat_map(|bin_y| (1..=self.bins_x).map(move |bin_x| (bin_x, bin_y)))
            .map(|(bin_x, bin_y)| self.contents[self.cell(bin_x, bin_y)])
            .sum()
    }

    pub fn same_binning(&self, other: &Self) -> bool {
        self.bins_x == other.bins_x
            && self.range_x == other.range_x
            && self.bins_y == other.bins_y
            && self.range_y == other.range_y
    }

    /// Add the contents and entries of `other`, failing if the binning differs.
    pub fn try_add(&mut self, other: &Self) -> PicoFlowResult<()> {
        if !self.same_binning(other) {
            return Err(PicoFlowError::HistogramMismatch {
                name: self.name.clone(),
                reason: "cannot add histograms with different binning".to_string(),
            });
        }
        self.contents
            .iter_mut()
            .zip(&other.contents)
            .for_each(|(a, b)| *a += b);
        self.entries += other.entries;
        Ok(())
    }
}

impl_op_ex!(+= |a: &mut Histogram2D, b: &Histogram2D| {
    debug_assert!(a.same_binning(b), "histograms must share binning");
    a.contents.iter_mut().zip(&b.contents).for_each(|(x, y)| *x += y);
    a.entries += b.entries;
});

/// Either kind of histogram, as stored in a [`HistogramCollection`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Histogram {
    /// A one-dimensional histogram.
    OneD(Histogram1D),
    /// A two-dimensional histogram.
    TwoD(Histogram2D),
}

impl Histogram {
    pub fn name(&self) -> &str {
        match self {
            Histogram::OneD(h) => h.name(),
            Histogram::TwoD(h) => h.name(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Histogram::OneD(h) => h.title(),
            Histogram::TwoD(h) => h.title(),
        }
    }

    /// `1` or `2`.
    pub fn dimension(&self) -> u32 {
        match self {
            Histogram::OneD(_) => 1,
            Histogram::TwoD(_) => 2,
        }
    }

    pub fn entries(&self) -> u64 {
        match self {
            Histogram::OneD(h) => h.entries(),
            Histogram::TwoD(h) => h.entries(),
        }
    }

    pub fn integral(&self) -> f64 {
        match self {
            Histogram::OneD(h) => h.integral(),
            Histogram::TwoD(h) => h.integral(),
        }
    }

    /// Add another histogram of the same kind and binning.
    pub fn try_add(&mut self, other: &Histogram) -> PicoFlowResult<()> {
        match (self, other) {
            (Histogram::OneD(a), Histogram::OneD(b)) => a.try_add(b),
            (Histogram::TwoD(a), Histogram::TwoD(b)) => a.try_add(b),
            (a, b) => Err(PicoFlowError::HistogramMismatch {
                name: a.name().to_string(),
                reason: format!(
                    "cannot add a {}-D histogram to a {}-D histogram",
                    b.dimension(),
                    a.dimension()
                ),
            }),
        }
    }
}

impl From<Histogram1D> for Histogram {
    fn from(value: Histogram1D) -> Self {
        Histogram::OneD(value)
    }
}

impl From<Histogram2D> for Histogram {
    fn from(value: Histogram2D) -> Self {
        Histogram::TwoD(value)
    }
}

/// An ordered set of named histograms which is written to a single file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramCollection {
    histograms: IndexMap<String, Histogram>,
}

impl HistogramCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a histogram, replacing any histogram of the same name in place.
    pub fn insert<H: Into<Histogram>>(&mut self, histogram: H) {
        let histogram = histogram.into();
        self.histograms
            .insert(histogram.name().to_string(), histogram);
    }

    pub fn get(&self, name: &str) -> Option<&Histogram> {
        self.histograms.get(name)
    }

    /// Look up a one-dimensional histogram by name.
    pub fn get_1d(&self, name: &str) -> Option<&Histogram1D> {
        match self.histograms.get(name) {
            Some(Histogram::OneD(h)) => Some(h),
            _ => None,
        }
    }

    /// Look up a two-dimensional histogram by name.
    pub fn get_2d(&self, name: &str) -> Option<&Histogram2D> {
        match self.histograms.get(name) {
            Some(Histogram::TwoD(h)) => Some(h),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Histogram names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.histograms.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Histogram> {
        self.histograms.values()
    }

    /// Add every histogram of `other` to the histogram of the same name, inserting histograms
    /// not yet present.
    pub fn merge(&mut self, other: &HistogramCollection) -> PicoFlowResult<()> {
        for histogram in other.iter() {
            match self.histograms.get_mut(histogram.name()) {
                Some(existing) => existing.try_add(histogram)?,
                None => self.insert(histogram.clone()),
            }
        }
        Ok(())
    }
}

impl<H: Into<Histogram>> FromIterator<H> for HistogramCollection {
    fn from_iter<T: IntoIterator<Item = H>>(iter: T) -> Self {
        let mut collection = Self::new();
        for histogram in iter {
            collection.insert(histogram);
        }
        collection
    }
}

/// A destination for histogram collections.
pub trait HistogramSink {
    /// Persist `collection` under `path`.
    fn write_collection(
        &mut self,
        path: &Path,
        collection: &HistogramCollection,
    ) -> PicoFlowResult<()>;
}

/// Writes collections as Parquet files (see [`write_histograms`]), creating parent directories
/// as needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParquetSink;

impl HistogramSink for ParquetSink {
    fn write_collection(
        &mut self,
        path: &Path,
        collection: &HistogramCollection,
    ) -> PicoFlowResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        io::write_histograms_to_path(collection, path)
    }
}

/// Keeps written collections in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    /// Every collection written so far, with its target path.
    pub written: Vec<(PathBuf, HistogramCollection)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last collection written to a path ending with `file_name`.
    pub fn find(&self, file_name: &str) -> Option<&HistogramCollection> {
        self.written
            .iter()
            .rev()
            .find(|(path, _)| path.ends_with(file_name))
            .map(|(_, collection)| collection)
    }
}

impl HistogramSink for MemorySink {
    fn write_collection(
        &mut self,
        path: &Path,
        collection: &HistogramCollection,
    ) -> PicoFlowResult<()> {
        self.written.push((path.to_path_buf(), collection.clone()));
        Ok(())
    }
}

impl<S: HistogramSink + ?Sized> HistogramSink for &mut S {
    fn write_collection(
        &mut self,
        path: &Path,
        collection: &HistogramCollection,
    ) -> PicoFlowResult<()> {
        (**self).write_collection(path, collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fill_with_flows() {
        let mut h = Histogram1D::new("h", "test;x", 4, (0.0, 2.0));
        for x in [-1.0, 0.1, 0.6, 0.7, 1.9, 2.0, 5.0] {
            h.fill(x);
        }
        assert_eq!(h.entries(), 7);
        assert_eq!(h.underflow(), 1.0);
        assert_eq!(h.overflow(), 2.0);
        assert_eq!(h.bin_content(1), 1.0);
        assert_eq!(h.bin_content(2), 2.0);
        assert_eq!(h.bin_content(3), 0.0);
        assert_eq!(h.bin_content(4), 1.0);
        assert_eq!(h.bin_content(99), 0.0);
        assert_relative_eq!(h.integral(), 4.0);
        assert_eq!(h.contents().len(), 6);
    }

    #[test]
    fn test_mean() {
        let mut h = Histogram1D::new("h", "", 10, (0.0, 10.0));
        assert!(h.mean().is_none());
        h.fill(2.2);
        h.fill(4.9);
        // bin centers 2.5 and 4.5
        assert_relative_eq!(h.mean().unwrap(), 3.5);
        assert_relative_eq!(h.bin_center(1), 0.5);
    }

    #[test]
    fn test_merge_is_elementwise() {
        let mut a = Histogram1D::new("h", "", 4, (0.0, 4.0));
        let mut b = a.clone();
        a.fill(0.5);
        a.fill(-3.0);
        b.fill(0.5);
        b.fill(3.5);
        b.fill_weighted(2.5, 2.0);
        let mut sum = a.clone();
        sum += &b;
        for bin in 0..6 {
            assert_eq!(sum.bin_content(bin), a.bin_content(bin) + b.bin_content(bin));
        }
        assert_eq!(sum.entries(), 5);

        let other = Histogram1D::new("h", "", 5, (0.0, 4.0));
        assert!(matches!(
            sum.try_add(&other),
            Err(PicoFlowError::HistogramMismatch { .. })
        ));
    }

    #[test]
    fn test_2d_cells() {
        let mut h = Histogram2D::new("h2", "", 2, (0.0, 2.0), 3, (0.0, 3.0));
        h.fill(0.5, 0.5);
        h.fill(1.5, 2.5);
        h.fill(1.5, 2.5);
        h.fill(-1.0, 10.0);
        assert_eq!(h.entries(), 4);
        assert_eq!(h.bin_content(1, 1), 1.0);
        assert_eq!(h.bin_content(2, 3), 2.0);
        assert_eq!(h.bin_content(0, 4), 1.0);
        assert_relative_eq!(h.integral(), 3.0);
        assert_eq!(h.contents().len(), 4 * 5);
        assert_eq!(h.contents()[2 + 4 * 3], 2.0);

        let mut sum = h.clone();
        sum += &h;
        assert_eq!(sum.bin_content(2, 3), 4.0);
        assert_eq!(sum.entries(), 8);
    }

    #[test]
    fn test_collection_merge() {
        let mut first: HistogramCollection = [Histogram1D::new("a", "", 2, (0.0, 1.0))]
            .into_iter()
            .collect();
        let mut a = Histogram1D::new("a", "", 2, (0.0, 1.0));
        a.fill(0.2);
        let mut second = HistogramCollection::new();
        second.insert(a);
        second.insert(Histogram2D::new("b", "", 1, (0.0, 1.0), 1, (0.0, 1.0)));
        first.merge(&second).unwrap();
        first.merge(&second).unwrap();
        assert_eq!(first.names(), vec!["a", "b"]);
        assert_eq!(first.get_1d("a").unwrap().entries(), 2);
        assert!(first.get_1d("b").is_none());
        assert!(first.get_2d("b").is_some());

        let mut mismatched = HistogramCollection::new();
        mismatched.insert(Histogram2D::new("a", "", 1, (0.0, 1.0), 1, (0.0, 1.0)));
        assert!(first.merge(&mismatched).is_err());
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::new();
        let collection: HistogramCollection = [Histogram1D::new("a", "", 2, (0.0, 1.0))]
            .into_iter()
            .collect();
        sink.write_collection(Path::new("out/00PsiCALCfile.root"), &collection)
            .unwrap();
        assert_eq!(sink.find("00PsiCALCfile.root"), Some(&collection));
        assert!(sink.find("missing").is_none());
    }
}
