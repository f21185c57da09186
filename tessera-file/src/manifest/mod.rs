//! The manifest: schema, format version and the physical layout of every column.

mod proto;
mod trailer;

use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use itertools::Itertools;
use prost::Message;
use rustc_hash::{FxHashMap, FxHashSet};
use tessera_error::{TesseraResult, tessera_bail, tessera_err};
pub use trailer::*;

use self::proto::{EncodingProto, FieldProto, ManifestProto, PageProto};
use crate::{Encoding, Field, FieldId, LogicalType, MAGIC_BYTES, Schema, TRAILER_SIZE, VERSION};

/// A contiguous byte range of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn to_range(&self) -> Range<u64> {
        self.offset..self.end()
    }
}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

/// Where one page lives and what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSpec {
    pub range: ByteRange,
    /// Number of values in the page. For columns outside of a list this is the number of rows.
    pub value_count: u64,
    pub null_count: u64,
    /// CRC32 of the page bytes, when the writer recorded one.
    pub checksum: Option<u32>,
}

impl PageSpec {
    /// Check fetched page bytes against the recorded length and checksum.
    pub(crate) fn verify(&self, bytes: &[u8]) -> TesseraResult<()> {
        if bytes.len() as u64 != self.range.length {
            tessera_bail!(
                CorruptFile: "page {} truncated to {} bytes",
                self.range,
                bytes.len()
            );
        }
        if let Some(expected) = self.checksum {
            let actual = crc32fast::hash(bytes);
            if actual != expected {
                tessera_bail!(
                    CorruptFile: "page {} checksum mismatch: expected {:#010x}, got {:#010x}",
                    self.range,
                    expected,
                    actual
                );
            }
        }
        Ok(())
    }

    fn from_proto(page: &PageProto) -> TesseraResult<Self> {
        if page.null_count > page.value_count {
            tessera_bail!(
                CorruptFile: "page at {} has {} nulls but only {} values",
                page.offset,
                page.null_count,
                page.value_count
            );
        }
        if page.offset.checked_add(page.length).is_none() {
            tessera_bail!(CorruptFile: "page at {} has overflowing length", page.offset);
        }
        Ok(Self {
            range: ByteRange::new(page.offset, page.length),
            value_count: page.value_count,
            null_count: page.null_count,
            checksum: page.checksum,
        })
    }

    fn to_proto(&self) -> PageProto {
        PageProto {
            offset: self.range.offset,
            length: self.range.length,
            value_count: self.value_count,
            null_count: self.null_count,
            checksum: self.checksum,
        }
    }
}

/// The physical layout of one (possibly nested) column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    field_id: FieldId,
    encoding: Encoding,
    pages: Vec<PageSpec>,
    dictionary: Option<PageSpec>,
}

impl ColumnLayout {
    pub fn new(
        field_id: FieldId,
        encoding: Encoding,
        pages: Vec<PageSpec>,
        dictionary: Option<PageSpec>,
    ) -> Self {
        Self {
            field_id,
            encoding,
            pages,
            dictionary,
        }
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// One page per page row group, in row order.
    pub fn pages(&self) -> &[PageSpec] {
        &self.pages
    }

    pub fn dictionary(&self) -> Option<&PageSpec> {
        self.dictionary.as_ref()
    }

    pub(crate) fn push_page(&mut self, page: PageSpec) {
        self.pages.push(page);
    }

    pub(crate) fn set_dictionary(&mut self, page: PageSpec) {
        self.dictionary = Some(page);
    }
}

/// The footer of a file.
///
/// Every column shares the same page boundaries: page `i` of every column holds the values of
/// the top-level rows in [`Manifest::page_row_range`]`(i)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    version: u16,
    schema: Arc<Schema>,
    row_count: u64,
    page_rows: Vec<u64>,
    // Prefix sums of `page_rows`, one longer than it.
    page_offsets: Vec<u64>,
    // Columns in the depth-first pre-order of the schema.
    columns: Vec<ColumnLayout>,
    column_index: FxHashMap<FieldId, usize>,
}

impl Manifest {
    /// Assemble a manifest, checking that the layout is consistent with the schema.
    pub fn try_new(
        schema: Arc<Schema>,
        page_rows: Vec<u64>,
        columns: Vec<ColumnLayout>,
    ) -> TesseraResult<Self> {
        let mut page_offsets = Vec::with_capacity(page_rows.len() + 1);
        page_offsets.push(0u64);
        for &rows in &page_rows {
            let Some(next) = page_offsets
                .last()
                .and_then(|offset| offset.checked_add(rows))
            else {
                tessera_bail!(CorruptFile: "page row counts overflow");
            };
            page_offsets.push(next);
        }
        let row_count = page_offsets.last().copied().unwrap_or_default();

        let fields = schema.all_fields();
        if fields.len() != columns.len() {
            tessera_bail!(
                CorruptFile: "schema has {} fields but the layout has {} columns",
                fields.len(),
                columns.len()
            );
        }

        let mut row_addressable = FxHashSet::default();
        for top in schema.fields() {
            collect_row_addressable(top, &mut row_addressable);
        }

        for (field, column) in fields.iter().zip_eq(&columns) {
            if field.id() != column.field_id {
                tessera_bail!(
                    CorruptFile: "column for field {} found where field {} was expected",
                    column.field_id,
                    field.id()
                );
            }

            let expected = Encoding::for_type(field.logical_type());
            if column.encoding != expected {
                tessera_bail!(
                    CorruptFile: "field {} uses {} encoding, expected {}",
                    field,
                    column.encoding,
                    expected
                );
            }

            if column.pages.len() != page_rows.len() {
                tessera_bail!(
                    CorruptFile: "field {} has {} pages, expected {}",
                    field,
                    column.pages.len(),
                    page_rows.len()
                );
            }

            if row_addressable.contains(&field.id()) {
                if let Some((idx, page)) = column
                    .pages
                    .iter()
                    .zip(&page_rows)
                    .find_position(|(page, rows)| page.value_count != **rows)
                    .map(|(idx, (page, _))| (idx, page))
                {
                    tessera_bail!(
                        CorruptFile: "page {} of field {} holds {} values, expected {}",
                        idx,
                        field,
                        page.value_count,
                        page_rows[idx]
                    );
                }
            }

            let is_dictionary = column.encoding == Encoding::Dictionary;
            if is_dictionary != column.dictionary.is_some() {
                tessera_bail!(
                    CorruptFile: "field {} has a dictionary mismatching its {} encoding",
                    field,
                    column.encoding
                );
            }

            let expected_children = match field.logical_type() {
                LogicalType::Struct => None,
                LogicalType::List => Some(1),
                _ => Some(0),
            };
            if let Some(expected_children) = expected_children {
                if field.children().len() != expected_children {
                    tessera_bail!(
                        CorruptFile: "field {} has {} children, expected {}",
                        field,
                        field.children().len(),
                        expected_children
                    );
                }
            }
        }

        let column_index = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.field_id, idx))
            .collect();

        Ok(Self {
            version: VERSION,
            schema,
            row_count,
            page_rows,
            page_offsets,
            columns,
            column_index,
        })
    }

    /// Parse the manifest of a complete file held in memory.
    ///
    /// Fails with `CorruptFile` on bad magic, a bad checksum or truncation, and with
    /// `UnsupportedVersion` when the file was written by a newer format version.
    pub fn load(file: &[u8]) -> TesseraResult<Self> {
        if file.len() < MAGIC_BYTES.len() + TRAILER_SIZE {
            tessera_bail!(
                CorruptFile: "{} bytes is too small to be a file",
                file.len()
            );
        }
        if file[..MAGIC_BYTES.len()] != MAGIC_BYTES {
            tessera_bail!(CorruptFile: "missing leading magic bytes");
        }

        let trailer = Trailer::parse(&file[file.len() - TRAILER_SIZE..], file.len() as u64)?;
        let range = trailer.manifest_range();
        let bytes = file
            .get(range.start as usize..range.end as usize)
            .ok_or_else(|| tessera_err!(CorruptFile: "manifest {}..{} out of bounds", range.start, range.end))?;
        Self::from_trailer(&trailer, bytes)
    }

    /// Decode and validate manifest bytes located by `trailer`.
    pub fn from_trailer(trailer: &Trailer, bytes: &[u8]) -> TesseraResult<Self> {
        trailer.verify_manifest(bytes)?;
        let manifest = Self::decode(bytes)?;
        if manifest.version != trailer.version {
            tessera_bail!(
                CorruptFile: "manifest version {} disagrees with trailer version {}",
                manifest.version,
                trailer.version
            );
        }
        manifest.validate_layout(trailer.manifest_offset)?;
        Ok(manifest)
    }

    /// Decode the serialized manifest alone, without its trailer.
    pub fn decode(bytes: &[u8]) -> TesseraResult<Self> {
        let proto = ManifestProto::decode(bytes)
            .map_err(|e| tessera_err!(CorruptFile: "undecodable manifest: {}", e))?;

        let version = u16::try_from(proto.version)
            .map_err(|_| tessera_err!(CorruptFile: "invalid format version {}", proto.version))?;
        if version == 0 {
            tessera_bail!(CorruptFile: "invalid format version 0");
        }
        if version > VERSION {
            tessera_bail!(UnsupportedVersion: version, VERSION);
        }

        let mut seen = FxHashSet::default();
        if let Some(dup) = proto.fields.iter().find(|f| !seen.insert(f.id)) {
            tessera_bail!(CorruptFile: "duplicate field id {}", dup.id);
        }

        let mut cursor = 0;
        let fields = fields_from_proto(&proto.fields, &mut cursor, -1)?;
        if cursor != proto.fields.len() {
            tessera_bail!(
                CorruptFile: "field {} is not in depth-first order",
                proto.fields[cursor].id
            );
        }
        let schema = Schema::try_new(fields)
            .map_err(|e| tessera_err!(CorruptFile: "invalid schema: {}", e))?
            .with_metadata(proto.metadata);

        let columns = proto
            .fields
            .iter()
            .map(|f| {
                let encoding = EncodingProto::try_from(f.encoding).map_err(|_| {
                    tessera_err!(CorruptFile: "unknown encoding {} for field {}", f.encoding, f.id)
                })?;
                Ok(ColumnLayout {
                    field_id: f.id,
                    encoding: encoding.into(),
                    pages: f
                        .pages
                        .iter()
                        .map(PageSpec::from_proto)
                        .collect::<TesseraResult<_>>()?,
                    dictionary: f.dictionary.as_ref().map(PageSpec::from_proto).transpose()?,
                })
            })
            .collect::<TesseraResult<Vec<_>>>()?;

        let manifest = Self::try_new(Arc::new(schema), proto.page_rows, columns)?;
        if manifest.row_count != proto.row_count {
            tessera_bail!(
                CorruptFile: "manifest records {} rows but its pages hold {}",
                proto.row_count,
                manifest.row_count
            );
        }
        Ok(Self {
            version,
            ..manifest
        })
    }

    /// Serialize the manifest. Decoding and re-serializing an unmodified manifest yields the
    /// same bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_proto().encode_to_vec())
    }

    fn to_proto(&self) -> ManifestProto {
        let mut fields = Vec::with_capacity(self.columns.len());
        for top in self.schema.fields() {
            push_field_protos(top, -1, &self.columns, &self.column_index, &mut fields);
        }
        ManifestProto {
            version: u32::from(self.version),
            row_count: self.row_count,
            page_rows: self.page_rows.clone(),
            fields,
            metadata: self.schema.metadata().clone(),
        }
    }

    /// Check that every page and dictionary lies between the leading magic and `data_end`.
    pub fn validate_layout(&self, data_end: u64) -> TesseraResult<()> {
        let data_start = MAGIC_BYTES.len() as u64;
        for column in &self.columns {
            for page in column.pages.iter().chain(column.dictionary.iter()) {
                if page.range.offset < data_start || page.range.end() > data_end {
                    tessera_bail!(
                        CorruptFile: "page {} of field {} lies outside the data region {}..{}",
                        page.range,
                        column.field_id,
                        data_start,
                        data_end
                    );
                }
            }
        }
        Ok(())
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Top-level rows in each page row group.
    pub fn page_rows(&self) -> &[u64] {
        &self.page_rows
    }

    pub fn num_pages(&self) -> usize {
        self.page_rows.len()
    }

    /// The top-level rows covered by page row group `page`.
    pub fn page_row_range(&self, page: usize) -> Range<u64> {
        self.page_offsets[page]..self.page_offsets[page + 1]
    }

    /// The page row groups that hold any of the rows in `range`.
    pub fn pages_overlapping(&self, range: Range<u64>) -> Range<usize> {
        if range.start >= range.end {
            return 0..0;
        }
        let first = self.page_offsets[1..].partition_point(|&end| end <= range.start);
        let last = self.page_offsets[..self.num_pages()].partition_point(|&start| start < range.end);
        first..last.max(first)
    }

    /// Every column layout in depth-first pre-order of the schema.
    pub fn columns(&self) -> &[ColumnLayout] {
        &self.columns
    }

    /// The page layout of a single column, in row order.
    pub fn column_layout(&self, field_id: FieldId) -> TesseraResult<&ColumnLayout> {
        self.column_index
            .get(&field_id)
            .map(|&idx| &self.columns[idx])
            .ok_or_else(|| tessera_err!(ColumnNotFound: "no field with id {}", field_id))
    }

    /// The byte range of a column's dictionary, present only for dictionary encoded columns.
    pub fn dictionary_range(&self, field_id: FieldId) -> TesseraResult<Option<ByteRange>> {
        Ok(self
            .column_layout(field_id)?
            .dictionary
            .as_ref()
            .map(|page| page.range))
    }

    /// Whether a field's pages line up with top-level rows, i.e. no ancestor is a list.
    pub fn is_row_addressable(&self, field_id: FieldId) -> bool {
        self.schema.path_to(field_id).is_some_and(|path| {
            path.iter()
                .rev()
                .skip(1)
                .all(|ancestor| *ancestor.logical_type() != LogicalType::List)
        })
    }
}

fn collect_row_addressable(field: &Field, out: &mut FxHashSet<FieldId>) {
    out.insert(field.id());
    if *field.logical_type() == LogicalType::Struct {
        for child in field.children() {
            collect_row_addressable(child, out);
        }
    }
}

fn fields_from_proto(
    protos: &[FieldProto],
    cursor: &mut usize,
    parent_id: FieldId,
) -> TesseraResult<Vec<Field>> {
    let mut fields = Vec::new();
    while let Some(proto) = protos.get(*cursor) {
        if proto.parent_id != parent_id {
            break;
        }
        *cursor += 1;
        let logical_type = proto.logical_type.parse::<LogicalType>()?;
        let children = fields_from_proto(protos, cursor, proto.id)?;
        fields.push(
            Field::new(proto.id, proto.name.clone(), logical_type, proto.nullable)
                .with_children(children)
                .with_metadata(proto.metadata.clone()),
        );
    }
    Ok(fields)
}

fn push_field_protos(
    field: &Field,
    parent_id: FieldId,
    columns: &[ColumnLayout],
    column_index: &FxHashMap<FieldId, usize>,
    out: &mut Vec<FieldProto>,
) {
    // try_new guarantees a column for every field
    let column = column_index.get(&field.id()).map(|&idx| &columns[idx]);
    out.push(FieldProto {
        id: field.id(),
        parent_id,
        name: field.name().to_string(),
        logical_type: field.logical_type().to_string(),
        nullable: field.nullable(),
        encoding: EncodingProto::from(Encoding::for_type(field.logical_type())) as i32,
        pages: column
            .map(|c| c.pages.iter().map(PageSpec::to_proto).collect())
            .unwrap_or_default(),
        dictionary: column
            .and_then(|c| c.dictionary.as_ref())
            .map(PageSpec::to_proto),
        metadata: field.metadata().clone(),
    });
    for child in field.children() {
        push_field_protos(child, field.id(), columns, column_index, out);
    }
}

impl From<Encoding> for EncodingProto {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Plain => EncodingProto::Plain,
            Encoding::VarBinary => EncodingProto::VarBinary,
            Encoding::Dictionary => EncodingProto::Dictionary,
            Encoding::Validity => EncodingProto::Validity,
            Encoding::ListOffsets => EncodingProto::ListOffsets,
        }
    }
}

impl From<EncodingProto> for Encoding {
    fn from(value: EncodingProto) -> Self {
        match value {
            EncodingProto::Plain => Encoding::Plain,
            EncodingProto::VarBinary => Encoding::VarBinary,
            EncodingProto::Dictionary => Encoding::Dictionary,
            EncodingProto::Validity => Encoding::Validity,
            EncodingProto::ListOffsets => Encoding::ListOffsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tessera_error::TesseraError;

    use super::*;

    fn page(offset: u64, rows: u64) -> PageSpec {
        PageSpec {
            range: ByteRange::new(offset, rows * 8),
            value_count: rows,
            null_count: 0,
            checksum: Some(7),
        }
    }

    fn manifest() -> Manifest {
        let schema = Schema::try_new(vec![
            Field::new(0, "id", LogicalType::Int64, false),
            Field::new(
                1,
                "name",
                LogicalType::Dictionary {
                    key: Box::new(LogicalType::Int8),
                    value: Box::new(LogicalType::Utf8),
                },
                true,
            )
            .with_metadata(BTreeMap::from([("k".to_string(), "v".to_string())])),
        ])
        .unwrap()
        .with_metadata(BTreeMap::from([("origin".to_string(), "test".to_string())]));

        Manifest::try_new(
            Arc::new(schema),
            vec![2, 2, 1],
            vec![
                ColumnLayout::new(0, Encoding::Plain, vec![page(4, 2), page(30, 2), page(60, 1)], None),
                ColumnLayout::new(
                    1,
                    Encoding::Dictionary,
                    vec![page(20, 2), page(46, 2), page(68, 1)],
                    Some(page(80, 3)),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reencode_is_byte_identical() {
        let bytes = manifest().to_bytes();
        let decoded = Manifest::decode(&bytes).unwrap();
        assert_eq!(decoded, manifest());
        assert_eq!(decoded.to_bytes(), bytes);
        assert_eq!(
            decoded.schema().fields()[1].metadata().get("k"),
            Some(&"v".to_string())
        );
        assert_eq!(
            decoded.schema().metadata().get("origin"),
            Some(&"test".to_string())
        );
    }

    #[test]
    fn page_ranges() {
        let m = manifest();
        assert_eq!(m.row_count(), 5);
        assert_eq!(m.num_pages(), 3);
        assert_eq!(m.page_row_range(2), 4..5);
        assert_eq!(m.pages_overlapping(0..5), 0..3);
        assert_eq!(m.pages_overlapping(1..3), 0..2);
        assert_eq!(m.pages_overlapping(4..5), 2..3);
        assert_eq!(m.pages_overlapping(2..2), 0..0);
    }

    #[test]
    fn layout_lookups() {
        let m = manifest();
        assert_eq!(m.column_layout(0).unwrap().pages().len(), 3);
        assert_eq!(m.dictionary_range(0).unwrap(), None);
        assert_eq!(m.dictionary_range(1).unwrap(), Some(ByteRange::new(80, 24)));
        assert!(matches!(
            m.column_layout(9),
            Err(TesseraError::ColumnNotFound(..))
        ));
    }

    #[test]
    fn layout_must_lie_in_data_region() {
        let m = manifest();
        m.validate_layout(104).unwrap();
        assert!(matches!(
            m.validate_layout(100),
            Err(TesseraError::CorruptFile(..))
        ));
    }

    #[test]
    fn newer_manifest_version() {
        let mut proto = manifest().to_proto();
        proto.version = u32::from(VERSION) + 1;
        assert!(matches!(
            Manifest::decode(&proto.encode_to_vec()),
            Err(TesseraError::UnsupportedVersion(..))
        ));
    }

    #[test]
    fn inconsistent_manifests_are_corrupt() {
        let mut missing_page = manifest().to_proto();
        missing_page.fields[0].pages.pop();
        assert!(matches!(
            Manifest::decode(&missing_page.encode_to_vec()),
            Err(TesseraError::CorruptFile(..))
        ));

        let mut wrong_rows = manifest().to_proto();
        wrong_rows.row_count = 6;
        assert!(matches!(
            Manifest::decode(&wrong_rows.encode_to_vec()),
            Err(TesseraError::CorruptFile(..))
        ));

        let mut orphan = manifest().to_proto();
        orphan.fields[1].parent_id = 42;
        assert!(matches!(
            Manifest::decode(&orphan.encode_to_vec()),
            Err(TesseraError::CorruptFile(..))
        ));

        let mut unknown_encoding = manifest().to_proto();
        unknown_encoding.fields[0].encoding = 99;
        assert!(matches!(
            Manifest::decode(&unknown_encoding.encode_to_vec()),
            Err(TesseraError::CorruptFile(..))
        ));

        assert!(matches!(
            Manifest::decode(b"\xff\xff\xff"),
            Err(TesseraError::CorruptFile(..))
        ));
    }

    #[test]
    fn list_descendants_are_not_row_addressable() {
        let schema = Schema::try_new(vec![
            Field::new(0, "tags", LogicalType::List, true).with_children(vec![
                Field::new(1, "item", LogicalType::Struct, true).with_children(vec![Field::new(
                    2,
                    "v",
                    LogicalType::Int32,
                    true,
                )]),
            ]),
            Field::new(3, "p", LogicalType::Struct, true).with_children(vec![Field::new(
                4,
                "x",
                LogicalType::Int32,
                true,
            )]),
        ])
        .unwrap();
        let m = Manifest::try_new(
            Arc::new(schema),
            vec![],
            vec![
                ColumnLayout::new(0, Encoding::ListOffsets, vec![], None),
                ColumnLayout::new(1, Encoding::Validity, vec![], None),
                ColumnLayout::new(2, Encoding::Plain, vec![], None),
                ColumnLayout::new(3, Encoding::Validity, vec![], None),
                ColumnLayout::new(4, Encoding::Plain, vec![], None),
            ],
        )
        .unwrap();
        assert!(m.is_row_addressable(0));
        assert!(!m.is_row_addressable(1));
        assert!(!m.is_row_addressable(2));
        assert!(m.is_row_addressable(4));
        assert!(!m.is_row_addressable(9));
        assert_eq!(m.row_count(), 0);
    }
}
