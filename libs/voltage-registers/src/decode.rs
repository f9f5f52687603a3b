//! Register value decoding
//!
//! Pure functions turning words from any [`WordSource`] into integers,
//! scaled decimals, floats, strings and flag sets. A field whose words are not
//! all known, or which holds its kind's "not implemented" sentinel, decodes to
//! `None`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::range::AddressRange;
use crate::store::WordSource;

/// Data type of a register field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Boolean,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float16,
    Float32,
    Float64,
    Ascii,
    Utf8,
    Bytes,
    Bitmask,
}

impl DataKind {
    /// Natural word count; variable-length kinds default to one word
    pub const fn default_length(&self) -> u16 {
        match self {
            Self::Int32 | Self::UInt32 | Self::Float32 => 2,
            Self::Int64 | Self::UInt64 | Self::Float64 => 4,
            _ => 1,
        }
    }

    /// Whether the word count comes from the reference rather than the kind
    pub const fn is_variable_length(&self) -> bool {
        matches!(self, Self::Ascii | Self::Utf8 | Self::Bytes | Self::Bitmask)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Integer or float kinds that accept a scale factor
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
                | Self::Float16
                | Self::Float32
                | Self::Float64
        )
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Ascii | Self::Utf8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Ascii => "ascii",
            Self::Utf8 => "utf8",
            Self::Bytes => "bytes",
            Self::Bitmask => "bitmask",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order of the words making up a multi-word value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// Most significant word at the lowest address (ABCD)
    #[default]
    #[serde(alias = "abcd")]
    MostToLeastSignificant,
    /// Least significant word at the lowest address (CDAB)
    #[serde(alias = "cdab")]
    LeastToMostSignificant,
}

fn default_sentinel() -> bool {
    true
}

/// Location and type of one register field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterReference {
    pub address: u16,
    pub kind: DataKind,
    /// Word count for variable-length kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u16>,
    #[serde(default)]
    pub word_order: WordOrder,
    /// Map "not implemented" raw values to unavailable
    #[serde(default = "default_sentinel")]
    pub sentinel: bool,
}

impl RegisterReference {
    pub const fn new(address: u16, kind: DataKind) -> Self {
        Self {
            address,
            kind,
            length: None,
            word_order: WordOrder::MostToLeastSignificant,
            sentinel: true,
        }
    }

    pub const fn with_length(mut self, length: u16) -> Self {
        self.length = Some(length);
        self
    }

    pub const fn with_word_order(mut self, word_order: WordOrder) -> Self {
        self.word_order = word_order;
        self
    }

    pub const fn without_sentinel(mut self) -> Self {
        self.sentinel = false;
        self
    }

    /// Same field `words` registers further on, for repeating register blocks
    ///
    /// `None` if the shifted address passes 65535.
    pub fn offset(self, words: u16) -> Option<Self> {
        let address = self.address.checked_add(words)?;
        Some(Self { address, ..self })
    }

    /// Number of registers the field occupies
    pub fn word_length(&self) -> u16 {
        match self.length {
            Some(length) if self.kind.is_variable_length() => length,
            _ => self.kind.default_length(),
        }
    }

    /// Address range the field occupies
    pub fn range(&self) -> Result<AddressRange> {
        AddressRange::with_count(self.address, self.word_length() as usize)
    }
}

/// Decoded field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Boolean(bool),
    Integer(i128),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => {
                f.write_str("0x")?;
                for b in v {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            },
        }
    }
}

/// Exact decimal `mantissa * 10^exponent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: i128,
    exponent: i32,
}

impl Decimal {
    pub const fn new(mantissa: i128, exponent: i32) -> Self {
        Self { mantissa, exponent }
    }

    pub const fn from_integer(value: i128) -> Self {
        Self::new(value, 0)
    }

    /// Shortest decimal that round-trips to `value`
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Self::parse_shortest(ryu::Buffer::new().format_finite(value))
    }

    /// Shortest decimal that round-trips to `value` as an `f32`
    pub fn from_f32(value: f32) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Self::parse_shortest(ryu::Buffer::new().format_finite(value))
    }

    /// Parse ryu output such as `12.5`, `-0.001` or `1.5e-7`
    fn parse_shortest(text: &str) -> Option<Self> {
        let (digits, exp) = match text.split_once(['e', 'E']) {
            Some((digits, exp)) => (digits, exp.parse::<i32>().ok()?),
            None => (text, 0),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        let mut joined = String::with_capacity(int_part.len() + frac_part.len());
        joined.push_str(int_part);
        joined.push_str(frac_part);
        let mantissa = joined.parse::<i128>().ok()?;
        Some(Self::new(mantissa, exp - frac_part.len() as i32).normalized())
    }

    pub const fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub const fn exponent(&self) -> i32 {
        self.exponent
    }

    /// Multiply by `10^power`, `None` if the exponent overflows
    pub const fn scaled(self, power: i32) -> Option<Self> {
        match self.exponent.checked_add(power) {
            Some(exponent) => Some(Self::new(self.mantissa, exponent)),
            None => None,
        }
    }

    /// Same value with trailing zeros moved into the exponent
    pub fn normalized(self) -> Self {
        let mut out = self;
        if out.mantissa == 0 {
            return Self::new(0, 0);
        }
        while out.mantissa % 10 == 0 && out.exponent < i32::MAX {
            out.mantissa /= 10;
            out.exponent += 1;
        }
        out
    }

    /// Nearest `f64`, rounded once
    pub fn to_f64(&self) -> f64 {
        let mut digits = itoa::Buffer::new();
        let mut exp = itoa::Buffer::new();
        let text = format!(
            "{}e{}",
            digits.format(self.mantissa),
            exp.format(self.exponent)
        );
        text.parse::<f64>().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = itoa::Buffer::new();
        let digits = buf.format(self.mantissa.unsigned_abs());
        if self.mantissa < 0 {
            f.write_str("-")?;
        }
        if self.exponent >= 0 {
            f.write_str(digits)?;
            if self.mantissa != 0 {
                for _ in 0..self.exponent {
                    f.write_str("0")?;
                }
            }
            return Ok(());
        }

        let frac_len = self.exponent.unsigned_abs() as usize;
        if digits.len() > frac_len {
            let (int_part, frac_part) = digits.split_at(digits.len() - frac_len);
            write!(f, "{int_part}.{frac_part}")
        } else {
            f.write_str("0.")?;
            for _ in 0..frac_len - digits.len() {
                f.write_str("0")?;
            }
            f.write_str(digits)
        }
    }
}

/// One flag inside a bitmask register bank
pub trait BitFlag {
    /// Bit within its word, 0 = least significant
    fn bit_offset(&self) -> u8;

    /// Word within the bank, counted from the reference address
    fn group_index(&self) -> u16 {
        0
    }
}

impl BitFlag for u8 {
    fn bit_offset(&self) -> u8 {
        *self
    }
}

/// `(group_index, bit_offset)`
impl BitFlag for (u16, u8) {
    fn bit_offset(&self) -> u8 {
        self.1
    }

    fn group_index(&self) -> u16 {
        self.0
    }
}

// ============================================================================
// Raw word access
// ============================================================================

/// Read `width` (1..=4) words and combine them into one unsigned value
fn read_raw<W>(source: &W, reference: &RegisterReference, width: usize) -> Option<u64>
where
    W: WordSource + ?Sized,
{
    let mut buf = [0u16; 4];
    let words = &mut buf[..width];
    if !source.read_words(reference.address, words) {
        return None;
    }
    if reference.word_order == WordOrder::LeastToMostSignificant {
        words.reverse();
    }
    Some(words.iter().fold(0u64, |acc, &w| (acc << 16) | u64::from(w)))
}

fn read_byte_run<W>(source: &W, reference: &RegisterReference) -> Option<Vec<u8>>
where
    W: WordSource + ?Sized,
{
    let mut words = vec![0u16; reference.word_length() as usize];
    if !source.read_words(reference.address, &mut words) {
        return None;
    }
    if reference.word_order == WordOrder::LeastToMostSignificant {
        words.reverse();
    }
    Some(words.iter().flat_map(|w| w.to_be_bytes()).collect())
}

fn is_integer_sentinel(kind: DataKind, raw: u64, width: usize) -> bool {
    match kind {
        DataKind::UInt16 => raw == 0xFFFF,
        DataKind::Int16 => raw == 0x8000,
        DataKind::UInt32 => raw == 0xFFFF_FFFF,
        DataKind::Int32 => raw == 0x8000_0000,
        DataKind::UInt64 => raw == u64::MAX,
        DataKind::Int64 => raw == 0x8000_0000_0000_0000,
        DataKind::Bitmask => raw == u64::MAX >> (64 - 16 * width),
        _ => false,
    }
}

/// Convert IEEE 754 half precision bits
fn f16_to_f32(bits: u16) -> f32 {
    let exponent = i32::from((bits >> 10) & 0x1F);
    let fraction = f32::from(bits & 0x3FF);
    let magnitude = match exponent {
        0 => fraction * 2f32.powi(-24),
        0x1F if fraction == 0.0 => f32::INFINITY,
        0x1F => f32::NAN,
        _ => (1.0 + fraction / 1024.0) * 2f32.powi(exponent - 15),
    };
    if bits & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

// ============================================================================
// Decoders
// ============================================================================

/// Decode an integer field (16/32/64-bit, boolean, or up to four bitmask words)
///
/// Float, string and byte kinds are not integers and return `None`.
pub fn decode_integer<W>(source: &W, reference: &RegisterReference) -> Option<i128>
where
    W: WordSource + ?Sized,
{
    let kind = reference.kind;
    let width = match kind {
        DataKind::Boolean | DataKind::Int16 | DataKind::UInt16 => 1,
        DataKind::Int32 | DataKind::UInt32 => 2,
        DataKind::Int64 | DataKind::UInt64 => 4,
        DataKind::Bitmask => match reference.word_length() {
            n @ (1 | 2 | 4) => n as usize,
            n => {
                trace!("Bitmask at {} is {} words, not an integer", reference.address, n);
                return None;
            },
        },
        _ => return None,
    };

    let raw = read_raw(source, reference, width)?;
    if reference.sentinel && is_integer_sentinel(kind, raw, width) {
        trace!("{} at {} holds not-implemented value 0x{:X}", kind, reference.address, raw);
        return None;
    }

    Some(match kind {
        DataKind::Boolean => i128::from(raw != 0),
        DataKind::Int16 => i128::from(raw as u16 as i16),
        DataKind::Int32 => i128::from(raw as u32 as i32),
        DataKind::Int64 => i128::from(raw as i64),
        _ => i128::from(raw),
    })
}

/// Decode a float field; integer kinds are widened
pub fn decode_float<W>(source: &W, reference: &RegisterReference) -> Option<f64>
where
    W: WordSource + ?Sized,
{
    let value = match reference.kind {
        DataKind::Float16 => f64::from(f16_to_f32(read_raw(source, reference, 1)? as u16)),
        DataKind::Float32 => f64::from(f32::from_bits(read_raw(source, reference, 2)? as u32)),
        DataKind::Float64 => f64::from_bits(read_raw(source, reference, 4)?),
        _ => return decode_integer(source, reference).map(|v| v as f64),
    };
    if value.is_nan() && reference.sentinel {
        trace!("{} at {} is NaN", reference.kind, reference.address);
        return None;
    }
    Some(value)
}

/// Decode a numeric field as an exact decimal multiplied by `10^scale`
pub fn decode_decimal<W>(source: &W, reference: &RegisterReference, scale: i32) -> Option<Decimal>
where
    W: WordSource + ?Sized,
{
    let decimal = match reference.kind {
        DataKind::Float16 | DataKind::Float32 => {
            let value = decode_float(source, reference)?;
            Decimal::from_f32(value as f32)?
        },
        DataKind::Float64 => Decimal::from_f64(decode_float(source, reference)?)?,
        _ => Decimal::from_integer(decode_integer(source, reference)?),
    };
    let scaled = decimal.scaled(scale);
    if scaled.is_none() {
        trace!("Scale {} overflows decimal at {}", scale, reference.address);
    }
    scaled
}

/// Decode a numeric field scaled by `10^scale`, narrowing to `f64` last
pub fn decode_scaled<W>(source: &W, reference: &RegisterReference, scale: i32) -> Option<f64>
where
    W: WordSource + ?Sized,
{
    decode_decimal(source, reference, scale).map(|d| d.to_f64())
}

/// Raw field bytes, two per word with the high byte first
pub fn decode_bytes<W>(source: &W, reference: &RegisterReference) -> Option<Vec<u8>>
where
    W: WordSource + ?Sized,
{
    read_byte_run(source, reference)
}

fn text_bytes<W>(source: &W, reference: &RegisterReference) -> Option<Vec<u8>>
where
    W: WordSource + ?Sized,
{
    let bytes = read_byte_run(source, reference)?;
    if reference.sentinel && bytes.iter().all(|&b| b == 0) {
        trace!("String at {} is all NUL", reference.address);
        return None;
    }
    Some(bytes)
}

fn finish_text(text: String, trim: bool) -> String {
    if trim {
        text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string()
    } else {
        text
    }
}

/// Decode packed ASCII, two characters per word
///
/// Non-ASCII bytes become U+FFFD. With `trim`, trailing NUL and whitespace
/// padding is removed.
pub fn decode_ascii<W>(source: &W, reference: &RegisterReference, trim: bool) -> Option<String>
where
    W: WordSource + ?Sized,
{
    let bytes = text_bytes(source, reference)?;
    let text = bytes
        .iter()
        .map(|&b| {
            if b.is_ascii() {
                char::from(b)
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect();
    Some(finish_text(text, trim))
}

/// Decode packed ISO-8859-1, every byte one character
pub fn decode_latin1<W>(source: &W, reference: &RegisterReference, trim: bool) -> Option<String>
where
    W: WordSource + ?Sized,
{
    let bytes = text_bytes(source, reference)?;
    Some(finish_text(bytes.iter().map(|&b| char::from(b)).collect(), trim))
}

/// Decode packed UTF-8, invalid sequences replaced
pub fn decode_utf8<W>(source: &W, reference: &RegisterReference, trim: bool) -> Option<String>
where
    W: WordSource + ?Sized,
{
    let bytes = text_bytes(source, reference)?;
    Some(finish_text(
        String::from_utf8_lossy(&bytes).into_owned(),
        trim,
    ))
}

/// Flags from `flags` that are set
///
/// A flag is absent when its word is unknown, holds the all-ones sentinel,
/// lies outside the reference's length, or its bit offset is above 15.
pub fn decode_bitmask<W, F>(source: &W, reference: &RegisterReference, flags: &[F]) -> Vec<F>
where
    W: WordSource + ?Sized,
    F: BitFlag + Clone,
{
    let mut words = vec![None; reference.word_length() as usize];
    source.read_word_run(reference.address, &mut words);

    flags
        .iter()
        .filter(|flag| {
            let bit = flag.bit_offset();
            if bit > 15 {
                return false;
            }
            match words.get(flag.group_index() as usize).copied().flatten() {
                Some(0xFFFF) if reference.sentinel => false,
                Some(word) => (word >> bit) & 1 == 1,
                None => false,
            }
        })
        .cloned()
        .collect()
}

/// Decode any field according to its kind
pub fn decode_value<W>(source: &W, reference: &RegisterReference) -> Option<DecodedValue>
where
    W: WordSource + ?Sized,
{
    match reference.kind {
        DataKind::Boolean => decode_integer(source, reference).map(|v| DecodedValue::Boolean(v != 0)),
        DataKind::Float16 | DataKind::Float32 | DataKind::Float64 => {
            decode_float(source, reference).map(DecodedValue::Float)
        },
        DataKind::Ascii => decode_ascii(source, reference, true).map(DecodedValue::Text),
        DataKind::Utf8 => decode_utf8(source, reference, true).map(DecodedValue::Text),
        DataKind::Bytes => decode_bytes(source, reference).map(DecodedValue::Bytes),
        DataKind::Bitmask if reference.word_length() > 4 || reference.word_length() == 3 => {
            decode_bytes(source, reference).map(DecodedValue::Bytes)
        },
        _ => decode_integer(source, reference).map(DecodedValue::Integer),
    }
}
