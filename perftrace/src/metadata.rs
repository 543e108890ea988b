use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Values accepted in trace and span metadata. Anything richer must be
/// flattened into one of these by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(x) => x.fmt(f),
            Self::Number(x) => x.fmt(f),
            Self::String(x) => x.fmt(f),
        }
    }
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/* From: by-value types */
impl From<()    > for MetadataValue { fn from(_    : ()   ) -> Self { Self::Null } }
impl From<bool  > for MetadataValue { fn from(value: bool ) -> Self { Self::Bool(value) } }
impl From<u8    > for MetadataValue { fn from(value: u8   ) -> Self { Self::Number(value as f64) } }
impl From<u16   > for MetadataValue { fn from(value: u16  ) -> Self { Self::Number(value as f64) } }
impl From<u32   > for MetadataValue { fn from(value: u32  ) -> Self { Self::Number(value as f64) } }
impl From<u64   > for MetadataValue { fn from(value: u64  ) -> Self { Self::Number(value as f64) } }
impl From<usize > for MetadataValue { fn from(value: usize) -> Self { Self::Number(value as f64) } }
impl From<i8    > for MetadataValue { fn from(value: i8   ) -> Self { Self::Number(value as f64) } }
impl From<i16   > for MetadataValue { fn from(value: i16  ) -> Self { Self::Number(value as f64) } }
impl From<i32   > for MetadataValue { fn from(value: i32  ) -> Self { Self::Number(value as f64) } }
impl From<i64   > for MetadataValue { fn from(value: i64  ) -> Self { Self::Number(value as f64) } }
impl From<isize > for MetadataValue { fn from(value: isize) -> Self { Self::Number(value as f64) } }
impl From<f32   > for MetadataValue { fn from(value: f32  ) -> Self { Self::Number(value as f64) } }
impl From<f64   > for MetadataValue { fn from(value: f64  ) -> Self { Self::Number(value) } }
impl From<char  > for MetadataValue { fn from(value: char ) -> Self { Self::String(value.to_string()) } }
impl From<String> for MetadataValue { fn from(value: String) -> Self { Self::String(value) } }

/* From: reference types */
impl<'a> From<&'a str   > for MetadataValue { fn from(value: &'a str   ) -> Self { Self::String(value.to_owned()) } }
impl<'a> From<&'a String> for MetadataValue { fn from(value: &'a String) -> Self { Self::String(value.clone()) } }

impl<T: Into<MetadataValue>> From<Option<T>> for MetadataValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Builds a [`Metadata`] map, converting every value through `Into<MetadataValue>`.
///
/// ```
/// let meta = perftrace::metadata!{ "route" => "/checkout", "retries" => 2, "cached" => false };
/// assert_eq!(meta.len(), 3);
/// ```
#[macro_export]
macro_rules! metadata {
    () => { $crate::Metadata::new() };
    ( $($key:expr => $value:expr),+ $(,)? ) => {
        {
            let mut _meta = $crate::Metadata::new();
            $(
                _meta.insert(::std::string::String::from($key), $crate::MetadataValue::from($value));
            )+
            _meta
        }
    };
}
