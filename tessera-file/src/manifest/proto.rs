//! Protobuf messages persisted in the manifest region of a file.
//!
//! Field tags are part of the file format. Maps are ordered so that encoding is deterministic.

use std::collections::BTreeMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct ManifestProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(uint64, tag = "2")]
    pub row_count: u64,
    /// Top-level rows in each page row group.
    #[prost(uint64, repeated, tag = "3")]
    pub page_rows: Vec<u64>,
    /// Every field of the schema in depth-first pre-order.
    #[prost(message, repeated, tag = "4")]
    pub fields: Vec<FieldProto>,
    #[prost(btree_map = "string, string", tag = "5")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FieldProto {
    #[prost(int32, tag = "1")]
    pub id: i32,
    /// -1 for top-level fields.
    #[prost(int32, tag = "2")]
    pub parent_id: i32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub logical_type: String,
    #[prost(bool, tag = "5")]
    pub nullable: bool,
    #[prost(enumeration = "EncodingProto", tag = "6")]
    pub encoding: i32,
    #[prost(message, repeated, tag = "7")]
    pub pages: Vec<PageProto>,
    #[prost(message, optional, tag = "8")]
    pub dictionary: Option<PageProto>,
    #[prost(btree_map = "string, string", tag = "9")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PageProto {
    #[prost(uint64, tag = "1")]
    pub offset: u64,
    #[prost(uint64, tag = "2")]
    pub length: u64,
    /// Number of values in the page.
    #[prost(uint64, tag = "3")]
    pub value_count: u64,
    #[prost(uint64, tag = "4")]
    pub null_count: u64,
    #[prost(uint32, optional, tag = "5")]
    pub checksum: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EncodingProto {
    Plain = 0,
    VarBinary = 1,
    Dictionary = 2,
    Validity = 3,
    ListOffsets = 4,
}
