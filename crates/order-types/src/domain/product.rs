use serde::{Deserialize, Deserializer, Serialize};

pub type ProductId = i64;

/// Product as reported by the product directory at the moment it is read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub price: i64,
    pub stock: i64,
    #[serde(default)]
    pub images: Vec<String>,
    pub sku: String,
}

impl ProductSnapshot {
    pub fn primary_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Accepts `100000`, `100000.0` and `"100000.00"`. Fractional amounts are
/// rejected: the store currency has no minor unit.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match RawAmount::deserialize(deserializer)? {
        RawAmount::Int(v) => Ok(v),
        RawAmount::Float(v) => {
            if v.fract() != 0.0 || !v.is_finite() || v.abs() > i64::MAX as f64 {
                return Err(D::Error::custom(format!("non-integral amount {v}")));
            }
            Ok(v as i64)
        }
        RawAmount::Text(s) => parse_amount(&s).map_err(D::Error::custom),
    }
}

fn parse_amount(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    let (whole, fraction) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };
    if !fraction.chars().all(|c| c == '0') {
        return Err(format!("non-integral amount {raw}"));
    }
    whole
        .parse::<i64>()
        .map_err(|e| format!("invalid amount {raw}: {e}"))
}
