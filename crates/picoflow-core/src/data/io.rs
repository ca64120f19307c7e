//! PicoDst-style event I/O.
//!
//! Events are stored one per row. Event-level values are scalar columns while tracks and hits
//! are list columns, grouped into branches by column prefix:
//!
//! | branch    | column             | type                      |
//! |-----------|--------------------|---------------------------|
//! | `Event`   | `event_ref_mult`   | `Int32` (null = missing)  |
//! | `Track`   | `track_gmom_x`     | `List<Float32 / Float64>` |
//! | `Track`   | `track_gmom_y`     | `List<Float32 / Float64>` |
//! | `Track`   | `track_gmom_z`     | `List<Float32 / Float64>` |
//! | `Track`   | `track_n_hits`     | `List<Int32>`             |
//! | `Track`   | `track_is_primary` | `List<Boolean>`           |
//! | `Track`   | `track_charge`     | `List<Int8 / Int32>`      |
//! | `BTofHit` | `btof_tray`        | `List<Int32>`             |
//!
//! ROOT files use the same names as branches of a single `TTree`, with `std::vector` branches
//! for the list columns.

use super::*;
use arrow::{
    array::{
        Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int32Builder, Int8Builder,
        ListBuilder,
    },
    compute::{can_cast_types, cast},
    datatypes::{
        ArrowPrimitiveType, DataType, Field, Float64Type, Int32Type, Int8Type, Schema, SchemaRef,
    },
    record_batch::RecordBatch,
};
use oxyroot::{Branch as RootBranch, Named, ReaderTree, RootFile};
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter, ProjectionMask};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::data::{BranchStatus, Dataset, PicoDstStorage};

/// Reference multiplicity column of the `Event` branch.
pub const EVENT_REF_MULT: &str = "event_ref_mult";
/// Global momentum $`x`$-components of the `Track` branch.
pub const TRACK_GMOM_X: &str = "track_gmom_x";
/// Global momentum $`y`$-components of the `Track` branch.
pub const TRACK_GMOM_Y: &str = "track_gmom_y";
/// Global momentum $`z`$-components of the `Track` branch.
pub const TRACK_GMOM_Z: &str = "track_gmom_z";
/// Hit counts of the `Track` branch.
pub const TRACK_N_HITS: &str = "track_n_hits";
/// Primary-track flags of the `Track` branch.
pub const TRACK_IS_PRIMARY: &str = "track_is_primary";
/// Charge signs of the `Track` branch.
pub const TRACK_CHARGE: &str = "track_charge";
/// Tray numbers of the `BTofHit` branch.
pub const BTOF_TRAY: &str = "btof_tray";

/// Tree read from ROOT files when no tree name is given.
pub const DEFAULT_ROOT_TREE: &str = "PicoDst";

const DEFAULT_WRITE_BATCH_SIZE: usize = 10_000;

pub(crate) fn canonicalize_input_path(file_path: &str) -> PicoFlowResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

pub(crate) fn expand_output_path(file_path: &str) -> PicoFlowResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// The on-disk format of an event file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputFormat {
    /// Apache Parquet with list columns.
    Parquet,
    /// A ROOT `TTree` with `std::vector` branches.
    Root,
}

impl InputFormat {
    /// Guess the format from a file extension, defaulting to Parquet.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("root") => Self::Root,
            _ => Self::Parquet,
        }
    }
}

/// Indexed reader over a PicoDst-style event file.
///
/// The reader follows the usual lifecycle of a PicoDst reader: construct it, call
/// [`PicoReader::init`], optionally restrict the branches to read with
/// [`PicoReader::set_status`], then fetch events by index. Columns are loaded on the first
/// [`PicoReader::read_event`] call after any branch change, and only the columns of active
/// branches are read from disk. An event whose lists disagree in length fails only when that
/// event is read.
///
/// ```ignore
/// let mut reader = PicoReader::new("st_physics.picoDst.parquet")?;
/// reader.init()?;
/// reader.set_status("*", false)?;
/// reader.set_status("Event", true)?;
/// reader.set_status("Track", true)?;
/// for index in 0..reader.n_events() {
///     let event = reader.read_event(index)?;
/// }
/// ```
#[derive(Debug)]
pub struct PicoReader {
    path: PathBuf,
    format: InputFormat,
    tree: Option<String>,
    status: BranchStatus,
    n_events: Option<usize>,
    storage: Option<PicoDstStorage>,
}

impl PicoReader {
    /// Create a reader for the file at `file_path` (`~` and environment variables are expanded).
    pub fn new(file_path: &str) -> PicoFlowResult<Self> {
        let path = canonicalize_input_path(file_path)?;
        let format = InputFormat::from_path(&path);
        Ok(Self {
            path,
            format,
            tree: None,
            status: BranchStatus::default(),
            n_events: None,
            storage: None,
        })
    }

    /// Select the tree to read from ROOT files. When absent, the `PicoDst` tree is used, or the
    /// only tree in the file.
    pub fn with_tree<S: AsRef<str>>(mut self, name: S) -> Self {
        self.tree = Some(name.as_ref().to_string());
        self
    }

    /// Path of the input file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the input, used to name output artifacts.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Detected file format.
    pub fn format(&self) -> InputFormat {
        self.format
    }

    /// Open the file and count its events.
    pub fn init(&mut self) -> PicoFlowResult<()> {
        let n_events = match self.format {
            InputFormat::Parquet => {
                let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&self.path)?)?;
                builder.metadata().file_metadata().num_rows() as usize
            }
            InputFormat::Root => {
                let mut file = open_root_file(&self.path)?;
                let (tree, _) = resolve_root_tree(&mut file, self.tree.as_deref())?;
                tree.entries().max(0) as usize
            }
        };
        self.n_events = Some(n_events);
        self.storage = None;
        Ok(())
    }

    /// Enable or disable the branches matching `pattern` (`"*"` or a branch name). Any loaded
    /// columns are dropped and re-read on the next event access.
    pub fn set_status(&mut self, pattern: &str, active: bool) -> PicoFlowResult<()> {
        self.status.set(pattern, active)?;
        self.storage = None;
        Ok(())
    }

    /// Current branch selection.
    pub fn status(&self) -> &BranchStatus {
        &self.status
    }

    /// Number of events in the file, or zero before [`PicoReader::init`].
    pub fn n_events(&self) -> usize {
        self.n_events.unwrap_or(0)
    }

    /// Read the event at `index`.
    pub fn read_event(&mut self, index: usize) -> PicoFlowResult<PicoEvent> {
        let n_events = self.n_events.ok_or_else(|| PicoFlowError::EventRead {
            index,
            reason: "reader has not been initialised".to_string(),
        })?;
        if index >= n_events {
            return Err(PicoFlowError::EventRead {
                index,
                reason: format!("index out of bounds for file with {n_events} events"),
            });
        }
        let storage = match self.storage.take() {
            Some(storage) => storage,
            None => self.load()?,
        };
        let event = storage.event(index);
        self.storage = Some(storage);
        event
    }

    /// Release loaded columns.
    pub fn finish(&mut self) {
        self.storage = None;
    }

    fn load(&self) -> PicoFlowResult<PicoDstStorage> {
        match self.format {
            InputFormat::Parquet => read_parquet_storage(&self.path, &self.status),
            InputFormat::Root => read_root_storage(&self.path, self.tree.as_deref(), &self.status),
        }
    }
}

impl EventSource for PicoReader {
    fn n_events(&self) -> usize {
        PicoReader::n_events(self)
    }

    fn read_event(&mut self, index: usize) -> PicoFlowResult<PicoEvent> {
        PicoReader::read_event(self, index)
    }
}

fn read_all(mut reader: PicoReader) -> PicoFlowResult<Dataset> {
    reader.init()?;
    (0..reader.n_events())
        .map(|index| reader.read_event(index))
        .collect()
}

/// Load every event of a Parquet file into a [`Dataset`].
pub fn read_parquet(file_path: &str) -> PicoFlowResult<Dataset> {
    read_all(PicoReader::new(file_path)?)
}

/// Load every event of a ROOT file into a [`Dataset`].
pub fn read_root(file_path: &str, tree: Option<&str>) -> PicoFlowResult<Dataset> {
    let reader = PicoReader::new(file_path)?;
    match tree {
        Some(tree) => read_all(reader.with_tree(tree)),
        None => read_all(reader),
    }
}

fn read_parquet_storage(path: &Path, status: &BranchStatus) -> PicoFlowResult<PicoDstStorage> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let total_rows = builder.metadata().file_metadata().num_rows() as usize;
    let schema: SchemaRef = builder.schema().clone();
    for branch in status.active_branches() {
        for column in branch.columns() {
            if schema.field_with_name(column).is_err() {
                return Err(PicoFlowError::MissingColumn {
                    name: (*column).to_string(),
                });
            }
        }
    }
    let roots: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| status.is_column_active(field.name()))
        .map(|(index, _)| index)
        .collect();
    if roots.is_empty() {
        return Ok(PicoDstStorage::empty(total_rows));
    }

    let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
    let reader = builder.with_projection(mask).build()?;
    let mut storage = PicoDstStorage::with_capacity(total_rows);
    for batch in reader {
        match batch {
            Ok(batch) => append_record_batch(&mut storage, &batch, status)?,
            Err(err) => {
                let reason = format!("Failed to decode record batch: {err}");
                storage.pad_invalid(total_rows, &reason);
                break;
            }
        }
    }
    Ok(storage)
}

/// The first inconsistency among the per-row list lengths of one branch, if any. A length of
/// `None` means the column has no value for the row at all.
fn row_length_error(
    kind: &str,
    lengths: &[(&str, Option<usize>)],
    index: usize,
) -> Option<String> {
    if let Some((name, _)) = lengths.iter().find(|(_, length)| length.is_none()) {
        return Some(format!("{kind} '{name}' has no entry {index}"));
    }
    let (_, expected) = lengths.first()?;
    let expected = (*expected)?;
    lengths.iter().find_map(|(name, length)| {
        let actual = (*length)?;
        (actual != expected).then(|| {
            PicoFlowError::LengthMismatch {
                context: format!("{kind} '{name}'"),
                expected,
                actual,
            }
            .to_string()
        })
    })
}

fn append_record_batch(
    storage: &mut PicoDstStorage,
    batch: &RecordBatch,
    status: &BranchStatus,
) -> PicoFlowResult<()> {
    let n_rows = batch.num_rows();
    let first_row = storage.n_events();

    if status.is_active(Branch::Event) {
        let column = cast_column(batch, EVENT_REF_MULT, &DataType::Int32)?;
        let values = column.as_primitive::<Int32Type>();
        storage
            .ref_mult
            .extend((0..n_rows).map(|row| values.is_valid(row).then(|| values.value(row))));
    } else {
        storage
            .ref_mult
            .extend(std::iter::repeat(None).take(n_rows));
    }

    if status.is_active(Branch::Track) {
        let px = primitive_list::<Float64Type>(batch, TRACK_GMOM_X)?;
        let py = primitive_list::<Float64Type>(batch, TRACK_GMOM_Y)?;
        let pz = primitive_list::<Float64Type>(batch, TRACK_GMOM_Z)?;
        let n_hits = primitive_list::<Int32Type>(batch, TRACK_N_HITS)?;
        let is_primary = boolean_list(batch, TRACK_IS_PRIMARY)?;
        let charge = primitive_list::<Int8Type>(batch, TRACK_CHARGE)?;
        for row in 0..n_rows {
            let lengths = [
                (TRACK_GMOM_X, Some(px.len(row))),
                (TRACK_GMOM_Y, Some(py.len(row))),
                (TRACK_GMOM_Z, Some(pz.len(row))),
                (TRACK_N_HITS, Some(n_hits.len(row))),
                (TRACK_IS_PRIMARY, Some(is_primary.len(row))),
                (TRACK_CHARGE, Some(charge.len(row))),
            ];
            if let Some(reason) = row_length_error("Column", &lengths, first_row + row) {
                storage.mark_invalid(first_row + row, reason);
            } else {
                let tracks = &mut storage.tracks;
                tracks.px.extend_from_slice(px.row(row));
                tracks.py.extend_from_slice(py.row(row));
                tracks.pz.extend_from_slice(pz.row(row));
                tracks.n_hits.extend_from_slice(n_hits.row(row));
                tracks.is_primary.extend_from_slice(is_primary.row(row));
                tracks.charge.extend_from_slice(charge.row(row));
            }
            storage.tracks.offsets.push(storage.tracks.px.len());
        }
    } else {
        let tracks = &mut storage.tracks;
        let last = tracks.offsets.last().copied().unwrap_or(0);
        tracks.offsets.extend(std::iter::repeat(last).take(n_rows));
    }

    let hits = &mut storage.hits;
    if status.is_active(Branch::BTofHit) {
        let tray = primitive_list::<Int32Type>(batch, BTOF_TRAY)?;
        for row in 0..n_rows {
            hits.tray.extend_from_slice(tray.row(row));
            hits.offsets.push(hits.tray.len());
        }
    } else {
        let last = hits.offsets.last().copied().unwrap_or(0);
        hits.offsets.extend(std::iter::repeat(last).take(n_rows));
    }
    Ok(())
}

pub(crate) fn list_type(item: DataType) -> DataType {
    DataType::List(Arc::new(Field::new("item", item, true)))
}

pub(crate) fn cast_column(
    batch: &RecordBatch,
    name: &str,
    to: &DataType,
) -> PicoFlowResult<ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| PicoFlowError::MissingColumn {
            name: name.to_string(),
        })?;
    if !can_cast_types(column.data_type(), to) {
        return Err(PicoFlowError::InvalidColumnType {
            name: name.to_string(),
            datatype: column.data_type().to_string(),
        });
    }
    Ok(cast(column, to)?)
}

/// Flattened values of a list column, with `offsets[row]..offsets[row + 1]` selecting a row.
/// Null rows are empty.
struct FlatList<T> {
    offsets: Vec<usize>,
    values: Vec<T>,
}

impl<T> FlatList<T> {
    fn with_capacity(rows: usize, values: usize) -> Self {
        let mut offsets = Vec::with_capacity(rows + 1);
        offsets.push(0);
        Self {
            offsets,
            values: Vec::with_capacity(values),
        }
    }

    fn end_row(&mut self) {
        self.offsets.push(self.values.len());
    }

    fn len(&self, row: usize) -> usize {
        self.offsets[row + 1] - self.offsets[row]
    }

    fn row(&self, row: usize) -> &[T] {
        &self.values[self.offsets[row]..self.offsets[row + 1]]
    }
}

fn primitive_list<T: ArrowPrimitiveType>(
    batch: &RecordBatch,
    name: &str,
) -> PicoFlowResult<FlatList<T::Native>> {
    let column = cast_column(batch, name, &list_type(T::DATA_TYPE))?;
    let list = column.as_list::<i32>();
    let values = list.values().as_primitive::<T>();
    let offsets = list.value_offsets();
    let mut flat = FlatList::with_capacity(list.len(), values.len());
    for row in 0..list.len() {
        if list.is_valid(row) {
            let (start, end) = (offsets[row] as usize, offsets[row + 1] as usize);
            flat.values.extend((start..end).map(|index| values.value(index)));
        }
        flat.end_row();
    }
    Ok(flat)
}

fn boolean_list(batch: &RecordBatch, name: &str) -> PicoFlowResult<FlatList<bool>> {
    let column = cast_column(batch, name, &list_type(DataType::Boolean))?;
    let list = column.as_list::<i32>();
    let values = list.values().as_boolean();
    let offsets = list.value_offsets();
    let mut flat = FlatList::with_capacity(list.len(), values.len());
    for row in 0..list.len() {
        if list.is_valid(row) {
            let (start, end) = (offsets[row] as usize, offsets[row + 1] as usize);
            flat.values.extend((start..end).map(|index| values.value(index)));
        }
        flat.end_row();
    }
    Ok(flat)
}

fn open_root_file(path: &Path) -> PicoFlowResult<RootFile> {
    RootFile::open(path).map_err(|err| {
        map_root_error(
            &format!("Failed to open ROOT file '{}'", path.display()),
            err,
        )
    })
}

/// Choose the tree to read among the `TTree` keys of a file: the requested one, else
/// `PicoDst`, else the only tree.
fn select_tree_name(tree_names: &[String], requested: Option<&str>) -> PicoFlowResult<String> {
    if let Some(name) = requested {
        return Ok(name.to_string());
    }
    if tree_names.is_empty() {
        return Err(PicoFlowError::Custom(
            "ROOT file does not contain any TTrees".to_string(),
        ));
    }
    if tree_names.iter().any(|name| name == DEFAULT_ROOT_TREE) {
        return Ok(DEFAULT_ROOT_TREE.to_string());
    }
    if tree_names.len() > 1 {
        return Err(PicoFlowError::Custom(format!(
            "Multiple TTrees found ({:?}); specify a tree name to disambiguate",
            tree_names
        )));
    }
    Ok(tree_names[0].clone())
}

fn resolve_root_tree(
    file: &mut RootFile,
    requested: Option<&str>,
) -> PicoFlowResult<(ReaderTree, String)> {
    let tree_names: Vec<String> = file
        .keys()
        .into_iter()
        .filter(|key| key.class_name() == "TTree")
        .map(|key| key.name().to_string())
        .collect();
    let selected = select_tree_name(&tree_names, requested)?;
    let tree = file
        .get_tree(&selected)
        .map_err(|err| map_root_error(&format!("Failed to open ROOT tree '{selected}'"), err))?;
    Ok((tree, selected))
}

fn map_root_error<E: std::fmt::Display>(context: &str, err: E) -> PicoFlowError {
    PicoFlowError::Custom(format!("{context}: {err}"))
}

fn find_branch<'a>(tree: &'a ReaderTree, name: &str) -> PicoFlowResult<&'a RootBranch> {
    tree.branches()
        .find(|branch| branch.name() == name)
        .ok_or_else(|| PicoFlowError::MissingColumn {
            name: name.to_string(),
        })
}

macro_rules! collect_branch {
    ($tree:expr, $name:expr, $ty:ty) => {{
        let name: &str = $name;
        find_branch(&$tree, name)?
            .as_iter::<$ty>()
            .map_err(|err| map_root_error(&format!("Failed to read branch '{name}'"), err))?
            .collect::<Vec<$ty>>()
    }};
}

fn read_root_float_vectors(tree: &ReaderTree, name: &str) -> PicoFlowResult<Vec<Vec<f64>>> {
    let is_double = find_branch(tree, name)?
        .item_type_name()
        .to_ascii_lowercase()
        .contains("double");
    if is_double {
        Ok(collect_branch!(*tree, name, Vec<f64>))
    } else {
        Ok(collect_branch!(*tree, name, Vec<f32>)
            .into_iter()
            .map(|values| values.into_iter().map(f64::from).collect())
            .collect())
    }
}

/// Flags may be stored as `vector<bool>` or as integers.
fn read_root_flag_vectors(tree: &ReaderTree, name: &str) -> PicoFlowResult<Vec<Vec<bool>>> {
    let is_bool = find_branch(tree, name)?.item_type_name().contains("bool");
    if is_bool {
        Ok(collect_branch!(*tree, name, Vec<bool>))
    } else {
        Ok(collect_branch!(*tree, name, Vec<i32>)
            .into_iter()
            .map(|values| values.into_iter().map(|flag| flag != 0).collect())
            .collect())
    }
}

fn read_root_storage(
    path: &Path,
    tree_name: Option<&str>,
    status: &BranchStatus,
) -> PicoFlowResult<PicoDstStorage> {
    let mut file = open_root_file(path)?;
    let (tree, _) = resolve_root_tree(&mut file, tree_name)?;
    let n_events = tree.entries().max(0) as usize;
    let mut storage = PicoDstStorage::with_capacity(n_events);

    if status.is_active(Branch::Event) {
        let ref_mult = collect_branch!(tree, EVENT_REF_MULT, i32);
        for event in 0..n_events {
            let value = ref_mult.get(event).copied();
            if value.is_none() {
                storage.mark_invalid(
                    event,
                    format!("Branch '{EVENT_REF_MULT}' has no entry {event}"),
                );
            }
            storage.ref_mult.push(value);
        }
    } else {
        storage.ref_mult.extend(std::iter::repeat(None).take(n_events));
    }

    if status.is_active(Branch::Track) {
        let px = read_root_float_vectors(&tree, TRACK_GMOM_X)?;
        let py = read_root_float_vectors(&tree, TRACK_GMOM_Y)?;
        let pz = read_root_float_vectors(&tree, TRACK_GMOM_Z)?;
        let n_hits = collect_branch!(tree, TRACK_N_HITS, Vec<i32>);
        let is_primary = read_root_flag_vectors(&tree, TRACK_IS_PRIMARY)?;
        let charge = collect_branch!(tree, TRACK_CHARGE, Vec<i32>);
        for event in 0..n_events {
            let lengths = [
                (TRACK_GMOM_X, px.get(event).map(Vec::len)),
                (TRACK_GMOM_Y, py.get(event).map(Vec::len)),
                (TRACK_GMOM_Z, pz.get(event).map(Vec::len)),
                (TRACK_N_HITS, n_hits.get(event).map(Vec::len)),
                (TRACK_IS_PRIMARY, is_primary.get(event).map(Vec::len)),
                (TRACK_CHARGE, charge.get(event).map(Vec::len)),
            ];
            if let Some(reason) = row_length_error("Branch", &lengths, event) {
                storage.mark_invalid(event, reason);
            } else {
                let tracks = &mut storage.tracks;
                tracks.px.extend_from_slice(&px[event]);
                tracks.py.extend_from_slice(&py[event]);
                tracks.pz.extend_from_slice(&pz[event]);
                tracks.n_hits.extend_from_slice(&n_hits[event]);
                tracks.is_primary.extend_from_slice(&is_primary[event]);
                tracks
                    .charge
                    .extend(charge[event].iter().map(|charge| charge.signum() as i8));
            }
            storage.tracks.offsets.push(storage.tracks.px.len());
        }
    } else {
        storage.tracks.offsets.extend(std::iter::repeat(0).take(n_events));
    }

    if status.is_active(Branch::BTofHit) {
        let trays = collect_branch!(tree, BTOF_TRAY, Vec<i32>);
        for event in 0..n_events {
            match trays.get(event) {
                Some(event_trays) => storage.hits.tray.extend_from_slice(event_trays),
                None => storage.mark_invalid(
                    event,
                    format!("Branch '{BTOF_TRAY}' has no entry {event}"),
                ),
            }
            storage.hits.offsets.push(storage.hits.tray.len());
        }
    } else {
        storage.hits.offsets.extend(std::iter::repeat(0).take(n_events));
    }
    Ok(storage)
}

/// Precision for writing floating-point columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FloatPrecision {
    /// 32-bit floats.
    F32,
    /// 64-bit floats.
    #[default]
    F64,
}

/// Options for writing events to disk.
#[derive(Clone, Debug)]
pub struct EventWriteOptions {
    /// Number of events to include in each batch when writing.
    pub batch_size: usize,
    /// Floating-point precision to use for momentum columns.
    pub precision: FloatPrecision,
}

impl Default for EventWriteOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_WRITE_BATCH_SIZE,
            precision: FloatPrecision::default(),
        }
    }
}

impl EventWriteOptions {
    /// Override the batch size used for writing; defaults to 10_000.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Select the floating-point precision for momentum columns.
    pub fn precision(mut self, precision: FloatPrecision) -> Self {
        self.precision = precision;
        self
    }
}

fn build_event_schema(precision: FloatPrecision) -> Schema {
    let float = match precision {
        FloatPrecision::F64 => DataType::Float64,
        FloatPrecision::F32 => DataType::Float32,
    };
    Schema::new(vec![
        Field::new(EVENT_REF_MULT, DataType::Int32, true),
        Field::new(TRACK_GMOM_X, list_type(float.clone()), false),
        Field::new(TRACK_GMOM_Y, list_type(float.clone()), false),
        Field::new(TRACK_GMOM_Z, list_type(float), false),
        Field::new(TRACK_N_HITS, list_type(DataType::Int32), false),
        Field::new(TRACK_IS_PRIMARY, list_type(DataType::Boolean), false),
        Field::new(TRACK_CHARGE, list_type(DataType::Int8), false),
        Field::new(BTOF_TRAY, list_type(DataType::Int32), false),
    ])
}

fn events_to_record_batch(
    events: &[PicoEvent],
    schema: SchemaRef,
    precision: FloatPrecision,
) -> PicoFlowResult<RecordBatch> {
    let mut ref_mult = Int32Builder::with_capacity(events.len());
    let mut px = ListBuilder::new(Float64Builder::new());
    let mut py = ListBuilder::new(Float64Builder::new());
    let mut pz = ListBuilder::new(Float64Builder::new());
    let mut n_hits = ListBuilder::new(Int32Builder::new());
    let mut is_primary = ListBuilder::new(BooleanBuilder::new());
    let mut charge = ListBuilder::new(Int8Builder::new());
    let mut tray = ListBuilder::new(Int32Builder::new());

    for event in events {
        ref_mult.append_option(event.ref_mult());
        for track in &event.tracks {
            px.values().append_value(track.g_mom.x);
            py.values().append_value(track.g_mom.y);
            pz.values().append_value(track.g_mom.z);
            n_hits.values().append_value(track.n_hits);
            is_primary.values().append_value(track.is_primary);
            charge.values().append_value(track.charge);
        }
        px.append(true);
        py.append(true);
        pz.append(true);
        n_hits.append(true);
        is_primary.append(true);
        charge.append(true);
        for hit in &event.btof_hits {
            tray.values().append_value(hit.tray);
        }
        tray.append(true);
    }

    let float_type = list_type(match precision {
        FloatPrecision::F64 => DataType::Float64,
        FloatPrecision::F32 => DataType::Float32,
    });
    let columns: Vec<ArrayRef> = vec![
        Arc::new(ref_mult.finish()),
        cast(&px.finish(), &float_type)?,
        cast(&py.finish(), &float_type)?,
        cast(&pz.finish(), &float_type)?,
        Arc::new(n_hits.finish()),
        Arc::new(is_primary.finish()),
        Arc::new(charge.finish()),
        Arc::new(tray.finish()),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Persist a [`Dataset`] to a Parquet file in the layout read by [`PicoReader`].
pub fn write_parquet(
    dataset: &Dataset,
    file_path: &str,
    options: &EventWriteOptions,
) -> PicoFlowResult<()> {
    let path = expand_output_path(file_path)?;
    let batch_size = options.batch_size.max(1);
    let schema = Arc::new(build_event_schema(options.precision));
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
    for chunk in dataset.events().chunks(batch_size) {
        let batch = events_to_record_batch(chunk, schema.clone(), options.precision)?;
        writer.write(&batch)?;
    }
    writer.close()?;
    Ok(())
}
