//! The logical schema persisted in every file.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use arrow_schema::{DataType, Field as ArrowField, Fields, Schema as ArrowSchema, SchemaRef};
use itertools::Itertools;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};

use crate::{FIELD_ID_METADATA_KEY, LogicalType};

/// The stable identifier of a field within a schema.
pub type FieldId = i32;

/// One (possibly nested) field of a [`Schema`].
#[derive(Debug, Clone)]
pub struct Field {
    id: FieldId,
    name: String,
    logical_type: LogicalType,
    nullable: bool,
    children: Vec<Field>,
    metadata: BTreeMap<String, String>,
}

impl Field {
    pub fn new(
        id: FieldId,
        name: impl Into<String>,
        logical_type: LogicalType,
        nullable: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            logical_type,
            nullable,
            children: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Field>) -> Self {
        self.children = children;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn children(&self) -> &[Field] {
        &self.children
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// This field followed by all of its descendants, depth-first.
    pub fn pre_order(&self) -> Vec<&Field> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.pre_order());
        }
        out
    }

    /// Convert to an Arrow field, carrying the field id in the field metadata.
    pub fn to_arrow(&self) -> TesseraResult<ArrowField> {
        let data_type = match &self.logical_type {
            LogicalType::Struct => DataType::Struct(
                self.children
                    .iter()
                    .map(|c| c.to_arrow())
                    .collect::<TesseraResult<Fields>>()?,
            ),
            LogicalType::List => {
                let [element] = self.children.as_slice() else {
                    tessera_bail!(
                        SchemaMismatch: "list field {} must have exactly one child, has {}",
                        self.name,
                        self.children.len()
                    );
                };
                DataType::List(Arc::new(element.to_arrow()?))
            }
            leaf => leaf.to_arrow_leaf()?,
        };

        let mut metadata: HashMap<String, String> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        metadata.insert(FIELD_ID_METADATA_KEY.to_string(), self.id.to_string());

        Ok(ArrowField::new(&self.name, data_type, self.nullable).with_metadata(metadata))
    }

    fn from_arrow(field: &ArrowField, next_id: &mut FieldId) -> TesseraResult<Self> {
        let mut metadata: BTreeMap<String, String> = field
            .metadata()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let id = match metadata.remove(FIELD_ID_METADATA_KEY) {
            Some(id) => id.parse::<FieldId>().map_err(|e| {
                tessera_err!(SchemaMismatch: "invalid field id '{}' on {}: {}", id, field.name(), e)
            })?,
            None => *next_id,
        };
        *next_id = (*next_id).max(id).saturating_add(1);

        let logical_type = LogicalType::from_arrow(field.data_type())?;
        let children = match field.data_type() {
            DataType::Struct(fields) => fields
                .iter()
                .map(|f| Field::from_arrow(f, next_id))
                .collect::<TesseraResult<Vec<_>>>()?,
            DataType::List(element) => vec![Field::from_arrow(element, next_id)?],
            _ => Vec::new(),
        };

        Ok(Self {
            id,
            name: field.name().clone(),
            logical_type,
            nullable: field.is_nullable(),
            children,
            metadata,
        })
    }
}

/// Fields compare by id, name, type, nullability and children; metadata does not participate.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.logical_type == other.logical_type
            && self.nullable == other.nullable
            && self.children == other.children
    }
}

impl Eq for Field {}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}: {}", self.name, self.id, self.logical_type)?;
        if !self.nullable {
            write!(f, " not null")?;
        }
        if !self.children.is_empty() {
            write!(f, "<{}>", self.children.iter().format(", "))?;
        }
        Ok(())
    }
}

/// An ordered set of fields with unique ids.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    metadata: BTreeMap<String, String>,
}

impl Schema {
    /// Create a schema, checking that every field id is unique.
    pub fn try_new(fields: Vec<Field>) -> TesseraResult<Self> {
        let schema = Self {
            fields,
            metadata: BTreeMap::new(),
        };
        schema.validate_ids()?;
        Ok(schema)
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    fn validate_ids(&self) -> TesseraResult<()> {
        if let Some(dup) = self.all_fields().iter().map(|f| f.id()).duplicates().next() {
            tessera_bail!(SchemaMismatch: "duplicate field id {}", dup);
        }
        Ok(())
    }

    /// The top-level fields in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Every field, top-level and nested, in depth-first pre-order.
    pub fn all_fields(&self) -> Vec<&Field> {
        self.fields.iter().flat_map(|f| f.pre_order()).collect()
    }

    /// Look up a field anywhere in the schema by id.
    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.all_fields().into_iter().find(|f| f.id() == id)
    }

    /// The index of a top-level field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// The chain of fields from a top-level field down to the field with `id`, inclusive.
    pub fn path_to(&self, id: FieldId) -> Option<Vec<&Field>> {
        fn search<'a>(field: &'a Field, id: FieldId, path: &mut Vec<&'a Field>) -> bool {
            path.push(field);
            if field.id() == id || field.children().iter().any(|c| search(c, id, path)) {
                return true;
            }
            path.pop();
            false
        }

        let mut path = Vec::new();
        self.fields
            .iter()
            .any(|f| search(f, id, &mut path))
            .then_some(path)
    }

    /// Convert to an Arrow schema. Field ids travel in each field's metadata.
    pub fn to_arrow(&self) -> TesseraResult<SchemaRef> {
        let fields = self
            .fields
            .iter()
            .map(|f| f.to_arrow())
            .collect::<TesseraResult<Vec<_>>>()?;
        let metadata = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Arc::new(ArrowSchema::new_with_metadata(fields, metadata)))
    }

    /// Convert from an Arrow schema.
    ///
    /// Field ids are taken from field metadata when present; fields without one are numbered in
    /// depth-first pre-order, continuing after the largest id seen so far.
    pub fn from_arrow(schema: &ArrowSchema) -> TesseraResult<Self> {
        let mut next_id = 0;
        let fields = schema
            .fields()
            .iter()
            .map(|f| Field::from_arrow(f, &mut next_id))
            .collect::<TesseraResult<Vec<_>>>()?;
        let metadata = schema
            .metadata()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self::try_new(fields)?.with_metadata(metadata))
    }

    /// A schema with only the given top-level fields, in the given order.
    pub fn project(&self, indices: &[usize]) -> TesseraResult<Self> {
        let fields = indices
            .iter()
            .map(|&i| {
                self.fields.get(i).cloned().ok_or_else(|| {
                    tessera_err!(ColumnNotFound: "no top-level field at index {}", i)
                })
            })
            .collect::<TesseraResult<Vec<_>>>()?;
        Ok(Self {
            fields,
            metadata: self.metadata.clone(),
        })
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Schema {}

impl Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.fields.iter().format(", "))
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::TimeUnit;

    use tessera_error::TesseraError;

    use super::*;

    fn arrow_schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            ArrowField::new("id", DataType::Int64, false),
            ArrowField::new(
                "point",
                DataType::Struct(Fields::from(vec![
                    ArrowField::new("x", DataType::Float64, true),
                    ArrowField::new("y", DataType::Float64, true),
                ])),
                true,
            ),
            ArrowField::new(
                "tags",
                DataType::List(Arc::new(ArrowField::new("item", DataType::Utf8, true))),
                true,
            ),
            ArrowField::new(
                "ts",
                DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
                true,
            ),
        ])
    }

    #[test]
    fn ids_assigned_in_pre_order() {
        let schema = Schema::from_arrow(&arrow_schema()).unwrap();
        let ids = schema
            .all_fields()
            .iter()
            .map(|f| (f.name().to_string(), f.id()))
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                ("id".to_string(), 0),
                ("point".to_string(), 1),
                ("x".to_string(), 2),
                ("y".to_string(), 3),
                ("tags".to_string(), 4),
                ("item".to_string(), 5),
                ("ts".to_string(), 6),
            ]
        );
    }

    #[test]
    fn arrow_round_trip_preserves_ids() {
        let schema = Schema::from_arrow(&arrow_schema()).unwrap();
        let arrow = schema.to_arrow().unwrap();
        assert_eq!(
            arrow.field(1).metadata().get(FIELD_ID_METADATA_KEY),
            Some(&"1".to_string())
        );
        let back = Schema::from_arrow(&arrow).unwrap();
        assert_eq!(back, schema);
        assert_eq!(back.to_arrow().unwrap(), arrow);
    }

    #[test]
    fn explicit_ids_are_kept() {
        let arrow = ArrowSchema::new(vec![
            ArrowField::new("a", DataType::Int32, true).with_metadata(HashMap::from([(
                FIELD_ID_METADATA_KEY.to_string(),
                "10".to_string(),
            )])),
            ArrowField::new("b", DataType::Int32, true),
        ]);
        let schema = Schema::from_arrow(&arrow).unwrap();
        assert_eq!(schema.fields()[0].id(), 10);
        assert_eq!(schema.fields()[1].id(), 11);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let with_id = |name: &str| {
            ArrowField::new(name, DataType::Int32, true).with_metadata(HashMap::from([(
                FIELD_ID_METADATA_KEY.to_string(),
                "3".to_string(),
            )]))
        };
        let arrow = ArrowSchema::new(vec![with_id("a"), with_id("b")]);
        assert!(matches!(
            Schema::from_arrow(&arrow),
            Err(TesseraError::SchemaMismatch(..))
        ));
    }

    #[test]
    fn unsupported_type_is_schema_mismatch() {
        let arrow = ArrowSchema::new(vec![ArrowField::new(
            "m",
            DataType::Duration(TimeUnit::Second),
            true,
        )]);
        assert!(matches!(
            Schema::from_arrow(&arrow),
            Err(TesseraError::SchemaMismatch(..))
        ));
    }

    #[test]
    fn equality_ignores_metadata() {
        let schema = Schema::from_arrow(&arrow_schema()).unwrap();
        let with_meta = schema
            .clone()
            .with_metadata(BTreeMap::from([("k".to_string(), "v".to_string())]));
        assert_eq!(schema, with_meta);

        let renamed = Schema::try_new(vec![Field::new(0, "other", LogicalType::Int64, false)])
            .unwrap();
        assert_ne!(schema.project(&[0]).unwrap(), renamed);
    }

    #[test]
    fn lookup_and_paths() {
        let schema = Schema::from_arrow(&arrow_schema()).unwrap();
        assert_eq!(schema.field(3).map(|f| f.name()), Some("y"));
        assert_eq!(schema.index_of("tags"), Some(2));
        let path = schema.path_to(5).unwrap();
        assert_eq!(
            path.iter().map(|f| f.name()).collect::<Vec<_>>(),
            vec!["tags", "item"]
        );
        assert!(schema.path_to(42).is_none());
        assert_eq!(
            schema.project(&[0]).unwrap().to_string(),
            "{id#0: int64 not null}"
        );
    }
}
