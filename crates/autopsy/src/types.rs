//! Core value types shared by every analysis stage.

use std::fmt;
use std::str::FromStr;

use ethereum_types::{Address, U256, U512};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Pre-order index of a call node within its trace (0 = root).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct CallId(pub usize);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// First four bytes of call data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    pub fn from_input(input: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = input.get(..4)?.try_into().ok()?;
        Some(Selector(bytes))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = strip_hex_prefix(s.trim());
        if digits.len() != 8 {
            return Err(format!("selector '{s}' must be exactly 4 bytes"));
        }
        let bytes = hex::decode(digits).map_err(|e| format!("selector '{s}': {e}"))?;
        let mut out = [0u8; 4];
        out.copy_from_slice(&bytes);
        Ok(Selector(out))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The unit a value-flow edge moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Asset {
    Native,
    Token(Address),
}

impl Asset {
    pub fn token_address(&self) -> Option<Address> {
        match self {
            Asset::Native => None,
            Asset::Token(address) => Some(*address),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Token(address) => write!(f, "{address:#x}"),
        }
    }
}

impl Serialize for Asset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Signed, arbitrary-precision balance change.
///
/// Magnitudes are kept in `U512` so that summing any realistic number of
/// `U256` transfers cannot overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignedAmount {
    negative: bool,
    magnitude: U512,
}

impl SignedAmount {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, amount: U256) {
        self.apply(U512::from(amount), false);
    }

    pub fn debit(&mut self, amount: U256) {
        self.apply(U512::from(amount), true);
    }

    fn apply(&mut self, amount: U512, negative: bool) {
        if self.negative == negative || self.magnitude.is_zero() {
            self.magnitude = self.magnitude.saturating_add(amount);
            self.negative = negative;
        } else if amount > self.magnitude {
            self.magnitude = amount - self.magnitude;
            self.negative = negative;
        } else {
            self.magnitude -= amount;
        }
        if self.magnitude.is_zero() {
            self.negative = false;
        }
    }

    pub fn is_positive(&self) -> bool {
        !self.negative && !self.magnitude.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    pub fn magnitude(&self) -> U512 {
        self.magnitude
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

impl Serialize for SignedAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// --- Parsing helpers shared by the trace, finding and config readers ---

pub(crate) fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Decode a `0x`-prefixed (or bare) hex string. Odd-length input is left-padded.
pub(crate) fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits = strip_hex_prefix(s.trim());
    if digits.len() % 2 == 1 {
        return hex::decode(format!("0{digits}")).map_err(|e| format!("invalid hex '{s}': {e}"));
    }
    hex::decode(digits).map_err(|e| format!("invalid hex '{s}': {e}"))
}

pub(crate) fn parse_address(s: &str) -> Result<Address, String> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 20 {
        return Err(format!(
            "address '{s}' must be 20 bytes, got {}",
            bytes.len()
        ));
    }
    Ok(Address::from_slice(&bytes))
}

/// Accepts `0x` hex strings, decimal strings and JSON integers.
pub(crate) fn parse_quantity(value: &Value) -> Result<U256, String> {
    match value {
        Value::Null => Ok(U256::zero()),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("quantity {n} is not an unsigned integer")),
        Value::String(s) => {
            let s = s.trim();
            if s.starts_with("0x") || s.starts_with("0X") {
                let digits = strip_hex_prefix(s);
                if digits.is_empty() {
                    return Ok(U256::zero());
                }
                U256::from_str_radix(digits, 16).map_err(|e| format!("quantity '{s}': {e:?}"))
            } else if s.is_empty() {
                Ok(U256::zero())
            } else {
                U256::from_dec_str(s).map_err(|e| format!("quantity '{s}': {e:?}"))
            }
        }
        other => Err(format!("unsupported quantity {other}")),
    }
}

/// Decode JSON without serde_json's nesting limit of 128.
pub(crate) fn parse_json_unbounded<T: serde::de::DeserializeOwned>(
    json: &str,
) -> Result<T, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(json);
    de.disable_recursion_limit();
    let value = T::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

pub(crate) fn parse_u64_quantity(value: &Value) -> Result<u64, String> {
    let wide = parse_quantity(value)?;
    if wide > U256::from(u64::MAX) {
        return Err(format!("quantity {wide} does not fit in 64 bits"));
    }
    Ok(wide.low_u64())
}
