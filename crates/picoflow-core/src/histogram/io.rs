//! Histogram collections are stored as one Parquet row per bin (flows included):
//!
//! | column      | type    | notes                                           |
//! |-------------|---------|-------------------------------------------------|
//! | `name`      | Utf8    |                                                 |
//! | `title`     | Utf8    |                                                 |
//! | `dimension` | UInt32  | `1` or `2`                                      |
//! | `bin_x`     | UInt32  | ROOT numbering, `0` is underflow                |
//! | `bin_y`     | UInt32  | always `0` for 1-D histograms                   |
//! | `x_low`     | Float64 | lower bin edge, `-inf` for underflow            |
//! | `x_high`    | Float64 | upper bin edge, `+inf` for overflow             |
//! | `y_low`     | Float64 | null for 1-D histograms                         |
//! | `y_high`    | Float64 | null for 1-D histograms                         |
//! | `content`   | Float64 |                                                 |
//! | `entries`   | UInt64  | per-histogram entry count, repeated on each row |

use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Builder, StringBuilder, UInt32Builder, UInt64Builder},
    datatypes::{DataType, Field, Float64Type, Schema, UInt32Type, UInt64Type},
    record_batch::RecordBatch,
};
use indexmap::IndexMap;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};
use std::{fs::File, path::Path, sync::Arc};

use super::{Histogram, Histogram1D, Histogram2D, HistogramCollection};
use crate::{
    data::io::{canonicalize_input_path, cast_column, expand_output_path},
    PicoFlowError, PicoFlowResult,
};

const NAME: &str = "name";
const TITLE: &str = "title";
const DIMENSION: &str = "dimension";
const BIN_X: &str = "bin_x";
const BIN_Y: &str = "bin_y";
const X_LOW: &str = "x_low";
const X_HIGH: &str = "x_high";
const Y_LOW: &str = "y_low";
const Y_HIGH: &str = "y_high";
const CONTENT: &str = "content";
const ENTRIES: &str = "entries";

fn histogram_schema() -> Schema {
    Schema::new(vec![
        Field::new(NAME, DataType::Utf8, false),
        Field::new(TITLE, DataType::Utf8, false),
        Field::new(DIMENSION, DataType::UInt32, false),
        Field::new(BIN_X, DataType::UInt32, false),
        Field::new(BIN_Y, DataType::UInt32, false),
        Field::new(X_LOW, DataType::Float64, false),
        Field::new(X_HIGH, DataType::Float64, false),
        Field::new(Y_LOW, DataType::Float64, true),
        Field::new(Y_HIGH, DataType::Float64, true),
        Field::new(CONTENT, DataType::Float64, false),
        Field::new(ENTRIES, DataType::UInt64, false),
    ])
}

/// Edges of a bin in ROOT numbering, with infinite outer edges for the flow bins.
fn bin_bounds(bin: usize, bins: usize, range: (f64, f64)) -> (f64, f64) {
    let width = (range.1 - range.0) / bins as f64;
    if bin == 0 {
        (f64::NEG_INFINITY, range.0)
    } else if bin == bins + 1 {
        (range.1, f64::INFINITY)
    } else if bin == bins {
        (range.0 + (bin - 1) as f64 * width, range.1)
    } else {
        (
            range.0 + (bin - 1) as f64 * width,
            range.0 + bin as f64 * width,
        )
    }
}

#[derive(Default)]
struct HistogramRows {
    name: StringBuilder,
    title: StringBuilder,
    dimension: UInt32Builder,
    bin_x: UInt32Builder,
    bin_y: UInt32Builder,
    x_low: Float64Builder,
    x_high: Float64Builder,
    y_low: Float64Builder,
    y_high: Float64Builder,
    content: Float64Builder,
    entries: UInt64Builder,
}

impl HistogramRows {
    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        histogram: &Histogram,
        bin_x: usize,
        bin_y: usize,
        x_bounds: (f64, f64),
        y_bounds: Option<(f64, f64)>,
        content: f64,
    ) {
        self.name.append_value(histogram.name());
        self.title.append_value(histogram.title());
        self.dimension.append_value(histogram.dimension());
        self.bin_x.append_value(bin_x as u32);
        self.bin_y.append_value(bin_y as u32);
        self.x_low.append_value(x_bounds.0);
        self.x_high.append_value(x_bounds.1);
        self.y_low.append_option(y_bounds.map(|b| b.0));
        self.y_high.append_option(y_bounds.map(|b| b.1));
        self.content.append_value(content);
        self.entries.append_value(histogram.entries());
    }

    fn finish(mut self) -> PicoFlowResult<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.name.finish()),
            Arc::new(self.title.finish()),
            Arc::new(self.dimension.finish()),
            Arc::new(self.bin_x.finish()),
            Arc::new(self.bin_y.finish()),
            Arc::new(self.x_low.finish()),
            Arc::new(self.x_high.finish()),
            Arc::new(self.y_low.finish()),
            Arc::new(self.y_high.finish()),
            Arc::new(self.content.finish()),
            Arc::new(self.entries.finish()),
        ];
        Ok(RecordBatch::try_new(Arc::new(histogram_schema()), columns)?)
    }
}

fn collection_to_record_batch(collection: &HistogramCollection) -> PicoFlowResult<RecordBatch> {
    let mut rows = HistogramRows::default();
    for histogram in collection.iter() {
        match histogram {
            Histogram::OneD(h) => {
                for bin in 0..=h.bins() + 1 {
                    let bounds = bin_bounds(bin, h.bins(), h.range());
                    rows.push(histogram, bin, 0, bounds, None, h.bin_content(bin));
                }
            }
            Histogram::TwoD(h) => {
                let (bins_x, bins_y) = h.bins();
                for bin_y in 0..=bins_y + 1 {
                    let y_bounds = bin_bounds(bin_y, bins_y, h.range_y());
                    for bin_x in 0..=bins_x + 1 {
                        let x_bounds = bin_bounds(bin_x, bins_x, h.range_x());
                        rows.push(
                            histogram,
                            bin_x,
                            bin_y,
                            x_bounds,
                            Some(y_bounds),
                            h.bin_content(bin_x, bin_y),
                        );
                    }
                }
            }
        }
    }
    rows.finish()
}

pub(crate) fn write_histograms_to_path(
    collection: &HistogramCollection,
    path: &Path,
) -> PicoFlowResult<()> {
    let batch = collection_to_record_batch(collection)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Write a [`HistogramCollection`] to a Parquet file (`~` and environment variables are
/// expanded).
pub fn write_histograms(collection: &HistogramCollection, file_path: &str) -> PicoFlowResult<()> {
    write_histograms_to_path(collection, &expand_output_path(file_path)?)
}

struct Row {
    title: String,
    dimension: u32,
    bin_x: usize,
    bin_y: usize,
    x_low: f64,
    x_high: f64,
    y_low: Option<f64>,
    y_high: Option<f64>,
    content: f64,
    entries: u64,
}

fn read_rows(batch: &RecordBatch, groups: &mut IndexMap<String, Vec<Row>>) -> PicoFlowResult<()> {
    let name = cast_column(batch, NAME, &DataType::Utf8)?;
    let title = cast_column(batch, TITLE, &DataType::Utf8)?;
    let dimension = cast_column(batch, DIMENSION, &DataType::UInt32)?;
    let bin_x = cast_column(batch, BIN_X, &DataType::UInt32)?;
    let bin_y = cast_column(batch, BIN_Y, &DataType::UInt32)?;
    let x_low = cast_column(batch, X_LOW, &DataType::Float64)?;
    let x_high = cast_column(batch, X_HIGH, &DataType::Float64)?;
    let y_low = cast_column(batch, Y_LOW, &DataType::Float64)?;
    let y_high = cast_column(batch, Y_HIGH, &DataType::Float64)?;
    let content = cast_column(batch, CONTENT, &DataType::Float64)?;
    let entries = cast_column(batch, ENTRIES, &DataType::UInt64)?;

    let name = name.as_string::<i32>();
    let title = title.as_string::<i32>();
    let dimension = dimension.as_primitive::<UInt32Type>();
    let bin_x = bin_x.as_primitive::<UInt32Type>();
    let bin_y = bin_y.as_primitive::<UInt32Type>();
    let x_low = x_low.as_primitive::<Float64Type>();
    let x_high = x_high.as_primitive::<Float64Type>();
    let y_low = y_low.as_primitive::<Float64Type>();
    let y_high = y_high.as_primitive::<Float64Type>();
    let content = content.as_primitive::<Float64Type>();
    let entries = entries.as_primitive::<UInt64Type>();

    for row in 0..batch.num_rows() {
        groups
            .entry(name.value(row).to_string())
            .or_default()
            .push(Row {
                title: title.value(row).to_string(),
                dimension: dimension.value(row),
                bin_x: bin_x.value(row) as usize,
                bin_y: bin_y.value(row) as usize,
                x_low: x_low.value(row),
                x_high: x_high.value(row),
                y_low: y_low.is_valid(row).then(|| y_low.value(row)),
                y_high: y_high.is_valid(row).then(|| y_high.value(row)),
                content: content.value(row),
                entries: entries.value(row),
            });
    }
    Ok(())
}

fn mismatch(name: &str, reason: &str) -> PicoFlowError {
    PicoFlowError::HistogramMismatch {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Recover `(bins, range)` of one axis from its flow-bin rows.
fn axis_binning(
    name: &str,
    rows: &[Row],
    bin: impl Fn(&Row) -> usize,
    low: impl Fn(&Row) -> Option<f64>,
    high: impl Fn(&Row) -> Option<f64>,
) -> PicoFlowResult<(usize, (f64, f64))> {
    let last = rows
        .iter()
        .map(&bin)
        .max()
        .ok_or_else(|| mismatch(name, "no rows"))?;
    if last < 2 {
        return Err(mismatch(name, "missing flow bins"));
    }
    let lower = rows
        .iter()
        .find(|row| bin(row) == 0)
        .and_then(&high)
        .ok_or_else(|| mismatch(name, "missing underflow edge"))?;
    let upper = rows
        .iter()
        .find(|row| bin(row) == last)
        .and_then(&low)
        .ok_or_else(|| mismatch(name, "missing overflow edge"))?;
    Ok((last - 1, (lower, upper)))
}

fn rows_to_histogram(name: &str, rows: Vec<Row>) -> PicoFlowResult<Histogram> {
    let first = rows.first().ok_or_else(|| mismatch(name, "no rows"))?;
    let (title, dimension, entries) = (first.title.clone(), first.dimension, first.entries);
    let (bins_x, range_x) = axis_binning(
        name,
        &rows,
        |row| row.bin_x,
        |row| Some(row.x_low),
        |row| Some(row.x_high),
    )?;
    match dimension {
        1 => {
            let mut contents = vec![0.0; bins_x + 2];
            if rows.len() != contents.len() {
                return Err(mismatch(name, "row count does not match binning"));
            }
            for row in &rows {
                contents[row.bin_x] = row.content;
            }
            Ok(Histogram1D::from_parts(name, &title, bins_x, range_x, contents, entries)?.into())
        }
        2 => {
            let (bins_y, range_y) =
                axis_binning(name, &rows, |row| row.bin_y, |row| row.y_low, |row| row.y_high)?;
            let mut contents = vec![0.0; (bins_x + 2) * (bins_y + 2)];
            if rows.len() != contents.len() {
                return Err(mismatch(name, "row count does not match binning"));
            }
            for row in &rows {
                contents[row.bin_x + (bins_x + 2) * row.bin_y] = row.content;
            }
            Ok(Histogram2D::from_parts(
                name, &title, bins_x, range_x, bins_y, range_y, contents, entries,
            )?
            .into())
        }
        other => Err(mismatch(name, &format!("unsupported dimension {other}"))),
    }
}

/// Read a [`HistogramCollection`] written by [`write_histograms`].
pub fn read_histograms(file_path: &str) -> PicoFlowResult<HistogramCollection> {
    let path = canonicalize_input_path(file_path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut groups: IndexMap<String, Vec<Row>> = IndexMap::new();
    for batch in reader {
        read_rows(&batch?, &mut groups)?;
    }
    groups
        .into_iter()
        .map(|(name, rows)| rows_to_histogram(&name, rows))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::{env, fs, path::PathBuf};

    fn make_temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("picoflow_hist_test_{}", fastrand::u64(..)));
        fs::create_dir(&dir).expect("temp dir should be created");
        dir
    }

    #[test]
    fn test_bin_bounds() {
        assert_eq!(bin_bounds(0, 4, (0.0, 2.0)), (f64::NEG_INFINITY, 0.0));
        assert_eq!(bin_bounds(1, 4, (0.0, 2.0)), (0.0, 0.5));
        assert_eq!(bin_bounds(4, 4, (0.0, 2.0)), (1.5, 2.0));
        assert_eq!(bin_bounds(5, 4, (0.0, 2.0)), (2.0, f64::INFINITY));
    }

    #[test]
    fn test_histogram_roundtrip() {
        let dir = make_temp_dir();
        let mut h1 = Histogram1D::new("hPsiRP", "Reaction Plane Angle;#Psi_{RP} (rad)", 200, (-1.0, 1.0));
        h1.fill(0.3);
        h1.fill(-2.0);
        h1.fill(0.3);
        let mut h2 = Histogram2D::new("hV2Calc", "sums", 200, (-100.0, 100.0), 200, (500.0, 2000.0));
        h2.fill(1.5, 6.0);
        h2.fill(-3.0, 900.0);
        let collection: HistogramCollection = vec![Histogram::from(h1.clone()), h2.clone().into()]
            .into_iter()
            .collect();

        let path = dir.join("00PROCESSEDtest.parquet");
        let path_str = path.to_str().unwrap();
        write_histograms(&collection, path_str).unwrap();
        let read = read_histograms(path_str).unwrap();

        assert_eq!(read.names(), vec!["hPsiRP", "hV2Calc"]);
        let r1 = read.get_1d("hPsiRP").unwrap();
        assert_eq!(r1, &h1);
        assert_eq!(r1.entries(), 3);
        assert_eq!(r1.underflow(), 1.0);
        assert_relative_eq!(r1.integral(), 2.0);
        let r2 = read.get_2d("hV2Calc").unwrap();
        assert_eq!(r2, &h2);
        assert_eq!(r2.bin_content(102, 0), 1.0);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_empty_collection_roundtrip() {
        let dir = make_temp_dir();
        let path = dir.join("empty.parquet");
        write_histograms(&HistogramCollection::new(), path.to_str().unwrap()).unwrap();
        assert!(read_histograms(path.to_str().unwrap()).unwrap().is_empty());
        fs::remove_dir_all(dir).ok();
    }
}
