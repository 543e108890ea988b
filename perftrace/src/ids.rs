use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::num::{NonZeroU128, NonZeroU64};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("{0}-id string has wrong length")]
    WrongLength(&'static str),
    #[error("{0}-id string contains non-hex letters")]
    NonHex(&'static str),
    #[error("{0}-id string has no non-zero bytes")]
    Zero(&'static str),
}

fn parse_hex<const N: usize>(hex: &str, what: &'static str) -> Result<[u8; N], ParseIdError> {
    let mut bytes = [0; N];
    if hex.len() != N * 2 {
        return Err(ParseIdError::WrongLength(what))
    }
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = hex.get(i * 2..i * 2 + 2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            .ok_or(ParseIdError::NonHex(what))?;
    }
    Ok(bytes)
}

// NOTE uses big-endian to store 16 bytes as u128
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceId(pub NonZeroU128);

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0.get())
    }
}

impl std::str::FromStr for TraceId {
    type Err = ParseIdError;
    fn from_str(hex: &str) -> Result<Self, Self::Err> {
        let int = u128::from_be_bytes(parse_hex::<16>(hex, "trace")?);
        NonZeroU128::new(int).map(Self).ok_or(ParseIdError::Zero("trace"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpanId(pub NonZeroU64);

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0.get())
    }
}

impl std::str::FromStr for SpanId {
    type Err = ParseIdError;
    fn from_str(hex: &str) -> Result<Self, Self::Err> {
        let int = u64::from_be_bytes(parse_hex::<8>(hex, "span")?);
        NonZeroU64::new(int).map(Self).ok_or(ParseIdError::Zero("span"))
    }
}

// ++++++++++++++++++++ serde as hex strings ++++++++++++++++++++

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let hex = String::deserialize(deserializer)?;
                hex.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(TraceId);
hex_serde!(SpanId);
