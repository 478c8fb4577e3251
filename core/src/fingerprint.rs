//! Row fingerprints
//!
//! `hash_value_recon` is a blake3 digest over a row's comparison columns, taken in
//! sorted column-name order so the fingerprint does not depend on the physical column
//! layout of either side. Each value is written with a type tag and a length prefix,
//! which keeps `("ab", "c")` and `("a", "bc")` apart and gives NULL its own encoding.

use crate::dataset::{Column, Dataset};
use crate::error::Result;
use crate::value::{canonical_float_bits, DataType, Value};

/// Name of the fingerprint column
pub const FINGERPRINT_COLUMN: &str = "hash_value_recon";

/// Hex blake3 digest of `values`
pub fn fingerprint_values<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut hasher = blake3::Hasher::new();
    for value in values {
        hasher.update(&[value.discriminant()]);
        let encoded: Vec<u8> = match value {
            Value::Null => Vec::new(),
            Value::Boolean(b) => vec![*b as u8],
            Value::Integer(i) => i.to_le_bytes().to_vec(),
            Value::Float(f) => canonical_float_bits(*f).to_le_bytes().to_vec(),
            Value::Decimal(d) => [d.mantissa().to_le_bytes().as_slice(), &d.scale().to_le_bytes()].concat(),
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Date(d) => d.to_string().into_bytes(),
            Value::Timestamp(ts) => ts.and_utc().timestamp_micros().to_le_bytes().to_vec(),
        };
        hasher.update(&(encoded.len() as u64).to_le_bytes());
        hasher.update(&encoded);
    }
    hasher.finalize().to_hex().to_string()
}

/// Append (or recompute) the fingerprint column
///
/// With `columns = None` every column except an existing fingerprint is hashed.
pub fn with_fingerprint(dataset: &Dataset, columns: Option<&[String]>) -> Result<Dataset> {
    let base = dataset.drop_column(FINGERPRINT_COLUMN);

    let mut hashed: Vec<String> = match columns {
        Some(cols) => cols.to_vec(),
        None => base.column_names(),
    };
    hashed.sort();
    hashed.dedup();

    let indices = hashed
        .iter()
        .map(|c| base.schema().resolve(c, "dataset"))
        .collect::<Result<Vec<_>>>()?;

    log::debug!("Fingerprinting {} rows over columns {:?}", base.num_rows(), hashed);

    base.with_column(Column::new(FINGERPRINT_COLUMN, DataType::Text), |row| {
        Value::Text(fingerprint_values(indices.iter().map(|&i| &row[i])))
    })
}
