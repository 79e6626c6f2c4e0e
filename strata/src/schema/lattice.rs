//! The partial order of inferable column types.
//!
//! Destination migrations rely on widening being monotone: a column's type can
//! only ever move up the lattice, so no destination column ever needs to be
//! narrowed. The ordering is fixed and must not be changed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type of a column as discovered from document values.
///
/// The scalar types form a total order used by [`widen`]:
/// `Bool < Integer < Float < Decimal < Timestamp < Text`.
///
/// [`DataType::Complex`] sits outside the scalar chain and marks nested
/// structures that were not flattened. It never widens into a scalar type and
/// no scalar type widens into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Integer,
    Float,
    Decimal,
    Timestamp,
    Text,
    Complex,
}

impl DataType {
    /// Position of a scalar type in the lattice, or `None` for [`DataType::Complex`].
    fn rank(&self) -> Option<u8> {
        match self {
            DataType::Bool => Some(0),
            DataType::Integer => Some(1),
            DataType::Float => Some(2),
            DataType::Decimal => Some(3),
            DataType::Timestamp => Some(4),
            DataType::Text => Some(5),
            DataType::Complex => None,
        }
    }

    /// Returns `true` if replacing a column of type `self` with `other` is safe.
    ///
    /// A column update is safe when the type stays the same or strictly widens.
    pub fn widens_to(&self, other: DataType) -> bool {
        widen(*self, other) == Some(other)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Decimal => "decimal",
            DataType::Timestamp => "timestamp",
            DataType::Text => "text",
            DataType::Complex => "complex",
        };
        f.write_str(name)
    }
}

/// Returns the least upper bound of two types, or `None` when the types are
/// structurally incompatible.
///
/// Widening fails only when exactly one side is [`DataType::Complex`]; the
/// caller must then report a schema conflict instead of silently coercing.
pub fn widen(a: DataType, b: DataType) -> Option<DataType> {
    if a == b {
        return Some(a);
    }

    match (a.rank(), b.rank()) {
        (Some(ra), Some(rb)) => Some(if ra >= rb { a } else { b }),
        // One side is complex and the other is not.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALARS: [DataType; 6] = [
        DataType::Bool,
        DataType::Integer,
        DataType::Float,
        DataType::Decimal,
        DataType::Timestamp,
        DataType::Text,
    ];

    #[test]
    fn widen_follows_the_fixed_order() {
        assert_eq!(
            widen(DataType::Bool, DataType::Integer),
            Some(DataType::Integer)
        );
        assert_eq!(
            widen(DataType::Integer, DataType::Float),
            Some(DataType::Float)
        );
        assert_eq!(
            widen(DataType::Float, DataType::Decimal),
            Some(DataType::Decimal)
        );
        assert_eq!(
            widen(DataType::Decimal, DataType::Timestamp),
            Some(DataType::Timestamp)
        );
        assert_eq!(
            widen(DataType::Timestamp, DataType::Text),
            Some(DataType::Text)
        );
    }

    #[test]
    fn widen_is_commutative() {
        for a in SCALARS {
            for b in SCALARS {
                assert_eq!(widen(a, b), widen(b, a));
            }
        }
    }

    #[test]
    fn widen_is_associative() {
        for a in SCALARS {
            for b in SCALARS {
                for c in SCALARS {
                    let left = widen(widen(a, b).unwrap(), c);
                    let right = widen(a, widen(b, c).unwrap());
                    assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn widening_never_narrows() {
        for a in SCALARS {
            for b in SCALARS {
                let w = widen(a, b).unwrap();
                assert!(a.widens_to(w));
                assert!(b.widens_to(w));
            }
        }
    }

    #[test]
    fn complex_never_mixes_with_scalars() {
        for a in SCALARS {
            assert_eq!(widen(a, DataType::Complex), None);
            assert_eq!(widen(DataType::Complex, a), None);
        }
        assert_eq!(
            widen(DataType::Complex, DataType::Complex),
            Some(DataType::Complex)
        );
    }
}
