//! Write request and encoded write object types.
//!
//! A [`WriteRequest`] is what upstream code hands to the coordinator: an ordered
//! list of `{ itemID, value, type }` entries. Before a batched write each entry
//! with a known server handle becomes a [`WriteObject`], whose value is encoded
//! according to the entry's [`DeclaredType`].

use crate::error::WriteError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Name of a tag in the server's address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wrap an item identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Locally assigned registration sequence number.
pub type ClientHandle = u32;

/// Handle assigned by the server to a registered item.
pub type ServerHandle = u32;

/// Semantic type of a value, as declared by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    /// 64-bit float.
    Double,
    /// 16-bit signed integer.
    Short,
    /// 32-bit signed integer.
    Integer,
    /// 32-bit float.
    Float,
    /// Unsigned byte.
    Byte,
    /// 64-bit signed integer.
    Long,
    /// Boolean.
    Boolean,
    /// GUID.
    Uuid,
    /// Text, sent as a COM string.
    String,
    /// Single signed byte; `char` is accepted.
    #[serde(alias = "char")]
    Character,
    /// OLE automation date.
    Date,
    /// Fixed-point currency.
    Currency,
    /// Array of values.
    Array,
}

impl DeclaredType {
    /// Transport type tag for this declared type.
    pub fn type_tag(self) -> TypeTag {
        match self {
            Self::Double => TypeTag::Double,
            Self::Short => TypeTag::Short,
            Self::Integer => TypeTag::Integer,
            Self::Float => TypeTag::Float,
            Self::Byte => TypeTag::Byte,
            Self::Long => TypeTag::Long,
            Self::Boolean => TypeTag::Boolean,
            Self::Uuid => TypeTag::Uuid,
            Self::String => TypeTag::ComString,
            Self::Character => TypeTag::Character,
            Self::Date => TypeTag::Date,
            Self::Currency => TypeTag::Currency,
            Self::Array => TypeTag::Array,
        }
    }
}

impl FromStr for DeclaredType {
    type Err = WriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "double" => Ok(Self::Double),
            "short" => Ok(Self::Short),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "byte" => Ok(Self::Byte),
            "long" => Ok(Self::Long),
            "boolean" => Ok(Self::Boolean),
            "uuid" => Ok(Self::Uuid),
            "string" => Ok(Self::String),
            "char" | "character" => Ok(Self::Character),
            "date" => Ok(Self::Date),
            "currency" => Ok(Self::Currency),
            "array" => Ok(Self::Array),
            other => Err(WriteError::UnknownType(other.to_string())),
        }
    }
}

/// Transport-level type tag attached to each write object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeTag {
    /// `VT_R8`.
    Double,
    /// `VT_I2`.
    Short,
    /// `VT_I4`.
    Integer,
    /// `VT_R4`.
    Float,
    /// `VT_UI1`.
    Byte,
    /// `VT_I8`.
    Long,
    /// `VT_BOOL`.
    Boolean,
    /// `VT_CLSID`.
    Uuid,
    /// `VT_BSTR`.
    ComString,
    /// `VT_I1`.
    Character,
    /// `VT_DATE`.
    Date,
    /// `VT_CY`.
    Currency,
    /// `VT_ARRAY`.
    Array,
}

impl TypeTag {
    /// COM `VARTYPE` for this tag.
    pub fn vartype(self) -> u16 {
        match self {
            Self::Short => 2,      // VT_I2
            Self::Integer => 3,    // VT_I4
            Self::Float => 4,      // VT_R4
            Self::Double => 5,     // VT_R8
            Self::Currency => 6,   // VT_CY
            Self::Date => 7,       // VT_DATE
            Self::ComString => 8,  // VT_BSTR
            Self::Boolean => 11,   // VT_BOOL
            Self::Character => 16, // VT_I1
            Self::Byte => 17,      // VT_UI1
            Self::Long => 20,      // VT_I8
            Self::Uuid => 72,      // VT_CLSID
            Self::Array => 0x2000, // VT_ARRAY
        }
    }
}

/// One entry of a write request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteItem {
    /// Target item.
    #[serde(rename = "itemID")]
    pub item_id: ItemId,
    /// Value to write.
    pub value: Value,
    /// Declared type of `value`.
    #[serde(rename = "type")]
    pub declared_type: DeclaredType,
}

impl WriteItem {
    /// Build a request entry.
    pub fn new(
        item_id: impl Into<ItemId>,
        value: impl Into<Value>,
        declared_type: DeclaredType,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            value: value.into(),
            declared_type,
        }
    }

    /// Encode this entry against a server handle.
    pub fn encode(&self, handle: ServerHandle) -> WriteObject {
        let value = match self.declared_type {
            DeclaredType::String => EncodedValue::ComString(ComString::from_value(&self.value)),
            _ => EncodedValue::Raw(self.value.clone()),
        };
        WriteObject {
            value,
            handle,
            type_tag: self.declared_type.type_tag(),
        }
    }
}

/// Ordered sequence of items to write in one batch.
///
/// Deserializes from a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteRequest {
    items: Vec<WriteItem>,
}

impl WriteRequest {
    /// Build a request from its entries.
    pub fn new(items: Vec<WriteItem>) -> Self {
        Self { items }
    }

    /// Parse a request from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, WriteError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Entries in request order.
    pub fn items(&self) -> &[WriteItem] {
        &self.items
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the request has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item identifiers in request order, duplicates included.
    pub fn item_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.iter().map(|item| &item.item_id)
    }
}

impl FromIterator<WriteItem> for WriteRequest {
    fn from_iter<I: IntoIterator<Item = WriteItem>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Protocol-native string wrapper (a `BSTR` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComString(String);

impl ComString {
    /// Wrap a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Stringify a JSON value. Strings are taken verbatim, everything else
    /// uses its JSON rendering.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self(s.clone()),
            other => Self(other.to_string()),
        }
    }

    /// Wrapped string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Value as handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EncodedValue {
    /// Passed through unchanged.
    Raw(Value),
    /// Wrapped as a protocol string.
    ComString(ComString),
}

/// One element of a batched write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteObject {
    /// Encoded value.
    pub value: EncodedValue,
    /// Server handle of the target item.
    pub handle: ServerHandle,
    /// Transport type tag.
    pub type_tag: TypeTag,
}
