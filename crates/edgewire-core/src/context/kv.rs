//! Value type of the per-request key/value store.

/// The closed set of kinds a context value can take.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    Str(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl KvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Signed view; unsigned values that fit are converted.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I64(v) => Some(v),
            Self::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Unsigned view; non-negative signed values are converted.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U64(v) => Some(v),
            Self::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$t> for KvValue {
                fn from(v: $t) -> Self {
                    Self::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

impl_from! {
    String => Str,
    i64 => I64,
    i32 => I64 as i64,
    u64 => U64,
    u32 => U64 as u64,
    f64 => F64,
    bool => Bool,
    Vec<u8> => Bytes,
}

impl From<&str> for KvValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(KvValue::from(7u64).as_i64(), Some(7));
        assert_eq!(KvValue::from(-1i64).as_u64(), None);
        assert_eq!(KvValue::from(3i32), KvValue::I64(3));
        assert_eq!(KvValue::from("x").as_i64(), None);
    }
}
