//! Clarity Value Codec & c32check Addresses
//!
//! Consensus serialization of Clarity values (what the Stacks node's
//! `call-read` endpoint takes as arguments and returns as `result`), plus
//! c32check encoding of principals.
//!
//! Type prefixes:
//! 0x00 int, 0x01 uint, 0x02 buffer, 0x03 true, 0x04 false,
//! 0x05 standard principal, 0x06 contract principal, 0x07 ok, 0x08 err,
//! 0x09 none, 0x0a some, 0x0b list, 0x0c tuple, 0x0d string-ascii,
//! 0x0e string-utf8

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{AppError, AppResult, ContractIdentity};
use crate::utils::constants::is_known_c32_version;

/// Nesting limit when decoding untrusted bytes
const MAX_DEPTH: usize = 32;

// ============================================
// c32check
// ============================================

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

fn c32_index(c: u8) -> Option<u8> {
    let c = match c.to_ascii_uppercase() {
        b'O' => b'0',
        b'L' | b'I' => b'1',
        other => other,
    };
    C32_ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

fn c32_encode(data: &[u8]) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(data.len() * 8 / 5 + 1);
    let mut carry: u16 = 0;
    let mut carry_bits: u16 = 0;

    for &byte in data.iter().rev() {
        let take = 5 - carry_bits;
        let low = (byte as u16) & ((1 << take) - 1);
        out.push(C32_ALPHABET[((low << carry_bits) + carry) as usize]);
        carry_bits = 8 + carry_bits - 5;
        carry = (byte as u16) >> (8 - carry_bits);
        if carry_bits >= 5 {
            out.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry_bits -= 5;
            carry >>= 5;
        }
    }
    if carry_bits > 0 {
        out.push(C32_ALPHABET[carry as usize]);
    }

    // Strip encoding zeros, then restore one per leading zero byte
    while out.last() == Some(&C32_ALPHABET[0]) {
        out.pop();
    }
    for _ in data.iter().take_while(|&&b| b == 0) {
        out.push(C32_ALPHABET[0]);
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

fn c32_decode(input: &str) -> AppResult<Vec<u8>> {
    let digits = input
        .bytes()
        .map(|c| c32_index(c).ok_or_else(|| AppError::invalid_identity(format!("Invalid c32 character '{}'", c as char))))
        .collect::<AppResult<Vec<u8>>>()?;

    let mut out = Vec::with_capacity(input.len() * 5 / 8 + 1);
    let mut carry: u16 = 0;
    let mut carry_bits: u16 = 0;
    for &digit in digits.iter().rev() {
        carry += (digit as u16) << carry_bits;
        carry_bits += 5;
        if carry_bits >= 8 {
            out.push((carry & 0xff) as u8);
            carry_bits -= 8;
            carry >>= 8;
        }
    }
    if carry_bits > 0 {
        out.push(carry as u8);
    }

    while out.last() == Some(&0) {
        out.pop();
    }
    for _ in digits.iter().take_while(|&&d| d == 0) {
        out.push(0);
    }
    out.reverse();
    Ok(out)
}

fn checksum(version: u8, payload: &[u8]) -> [u8; 4] {
    let mut hasher = Sha256::new();
    hasher.update([version]);
    hasher.update(payload);
    let first = hasher.finalize();
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

/// Encode a Stacks address (`S` + version + c32(hash160 ++ checksum))
pub fn c32_address(version: u8, hash160: &[u8; 20]) -> AppResult<String> {
    if version >= 32 {
        return Err(AppError::codec(format!("c32 version {} out of range", version)));
    }
    let mut data = hash160.to_vec();
    data.extend_from_slice(&checksum(version, hash160));
    Ok(format!(
        "S{}{}",
        C32_ALPHABET[version as usize] as char,
        c32_encode(&data)
    ))
}

/// Decode a Stacks address into `(version, hash160)`
pub fn c32_address_decode(address: &str) -> AppResult<(u8, [u8; 20])> {
    let bytes = address.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'S' {
        return Err(AppError::invalid_identity(format!(
            "Not a Stacks address: '{}'",
            address
        )));
    }
    let version = c32_index(bytes[1])
        .ok_or_else(|| AppError::invalid_identity(format!("Bad version in '{}'", address)))?;
    let data = c32_decode(&address[2..])?;
    if data.len() != 24 {
        return Err(AppError::invalid_identity(format!(
            "Address '{}' decodes to {} bytes (expected 24)",
            address,
            data.len()
        )));
    }

    let (payload, check) = data.split_at(20);
    if checksum(version, payload) != check {
        return Err(AppError::invalid_identity(format!(
            "Checksum mismatch for '{}'",
            address
        )));
    }
    let mut hash160 = [0u8; 20];
    hash160.copy_from_slice(payload);
    Ok((version, hash160))
}

// ============================================
// Values
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalData {
    Standard {
        version: u8,
        hash160: [u8; 20],
    },
    Contract {
        version: u8,
        hash160: [u8; 20],
        name: String,
    },
}

impl PrincipalData {
    /// Principal for a contract identity (c32-decodes the address)
    pub fn from_identity(identity: &ContractIdentity) -> AppResult<Self> {
        let (version, hash160) = c32_address_decode(identity.address())?;
        if !is_known_c32_version(version) {
            return Err(AppError::invalid_identity(format!(
                "Unknown address version {} in '{}'",
                version,
                identity.address()
            )));
        }
        Ok(match identity.name() {
            Some(name) => Self::Contract {
                version,
                hash160,
                name: name.to_string(),
            },
            None => Self::Standard { version, hash160 },
        })
    }

    pub fn address(&self) -> AppResult<String> {
        match self {
            Self::Standard { version, hash160 } | Self::Contract { version, hash160, .. } => {
                c32_address(*version, hash160)
            }
        }
    }
}

impl fmt::Display for PrincipalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.address().map_err(|_| fmt::Error)?;
        match self {
            Self::Standard { .. } => write!(f, "{}", address),
            Self::Contract { name, .. } => write!(f, "{}.{}", address, name),
        }
    }
}

/// A Clarity value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarityValue {
    Int(i128),
    UInt(u128),
    Buffer(Vec<u8>),
    Bool(bool),
    Principal(PrincipalData),
    ResponseOk(Box<ClarityValue>),
    ResponseErr(Box<ClarityValue>),
    OptionalNone,
    OptionalSome(Box<ClarityValue>),
    List(Vec<ClarityValue>),
    Tuple(BTreeMap<String, ClarityValue>),
    StringAscii(String),
    StringUtf8(String),
}

impl ClarityValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Buffer(_) => "buff",
            Self::Bool(_) => "bool",
            Self::Principal(_) => "principal",
            Self::ResponseOk(_) => "ok",
            Self::ResponseErr(_) => "err",
            Self::OptionalNone => "none",
            Self::OptionalSome(_) => "some",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::StringAscii(_) => "string-ascii",
            Self::StringUtf8(_) => "string-utf8",
        }
    }

    // ---------- encoding ----------

    pub fn serialize(&self) -> AppResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// `0x`-prefixed hex, as the `call-read` endpoint expects
    pub fn to_hex(&self) -> AppResult<String> {
        Ok(format!("0x{}", hex::encode(self.serialize()?)))
    }

    fn write_to(&self, out: &mut Vec<u8>) -> AppResult<()> {
        match self {
            Self::Int(v) => {
                out.push(0x00);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::UInt(v) => {
                out.push(0x01);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Buffer(bytes) => {
                out.push(0x02);
                write_len(out, bytes.len())?;
                out.extend_from_slice(bytes);
            }
            Self::Bool(true) => out.push(0x03),
            Self::Bool(false) => out.push(0x04),
            Self::Principal(PrincipalData::Standard { version, hash160 }) => {
                out.push(0x05);
                out.push(*version);
                out.extend_from_slice(hash160);
            }
            Self::Principal(PrincipalData::Contract {
                version,
                hash160,
                name,
            }) => {
                out.push(0x06);
                out.push(*version);
                out.extend_from_slice(hash160);
                write_name(out, name)?;
            }
            Self::ResponseOk(inner) => {
                out.push(0x07);
                inner.write_to(out)?;
            }
            Self::ResponseErr(inner) => {
                out.push(0x08);
                inner.write_to(out)?;
            }
            Self::OptionalNone => out.push(0x09),
            Self::OptionalSome(inner) => {
                out.push(0x0a);
                inner.write_to(out)?;
            }
            Self::List(items) => {
                out.push(0x0b);
                write_len(out, items.len())?;
                for item in items {
                    item.write_to(out)?;
                }
            }
            Self::Tuple(fields) => {
                out.push(0x0c);
                write_len(out, fields.len())?;
                for (name, value) in fields {
                    write_name(out, name)?;
                    value.write_to(out)?;
                }
            }
            Self::StringAscii(s) => {
                if !s.is_ascii() {
                    return Err(AppError::codec("string-ascii contains non-ASCII bytes"));
                }
                out.push(0x0d);
                write_len(out, s.len())?;
                out.extend_from_slice(s.as_bytes());
            }
            Self::StringUtf8(s) => {
                out.push(0x0e);
                write_len(out, s.len())?;
                out.extend_from_slice(s.as_bytes());
            }
        }
        Ok(())
    }

    // ---------- decoding ----------

    pub fn deserialize(bytes: &[u8]) -> AppResult<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        let value = reader.value(0)?;
        if reader.pos != bytes.len() {
            return Err(AppError::codec(format!(
                "{} trailing bytes after value",
                bytes.len() - reader.pos
            )));
        }
        Ok(value)
    }

    /// Decode `0x`-prefixed (or bare) hex
    pub fn from_hex(text: &str) -> AppResult<Self> {
        let text = text.strip_prefix("0x").unwrap_or(text);
        let bytes = hex::decode(text).map_err(|e| AppError::codec(format!("Invalid hex: {}", e)))?;
        Self::deserialize(&bytes)
    }

    // ---------- accessors ----------

    /// Unwrap `(ok v)`, turning `(err e)` into an error
    pub fn expect_ok(self) -> AppResult<ClarityValue> {
        match self {
            Self::ResponseOk(inner) => Ok(*inner),
            Self::ResponseErr(inner) => Err(AppError::ledger_invalid(format!(
                "Contract returned (err {})",
                inner.type_name()
            ))),
            other => Ok(other),
        }
    }

    pub fn as_uint(&self) -> AppResult<u128> {
        match self {
            Self::UInt(v) => Ok(*v),
            other => Err(mismatch("uint", other)),
        }
    }

    pub fn as_bool(&self) -> AppResult<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_list(&self) -> AppResult<&[ClarityValue]> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(mismatch("list", other)),
        }
    }

    pub fn field(&self, name: &str) -> AppResult<&ClarityValue> {
        match self {
            Self::Tuple(fields) => fields
                .get(name)
                .ok_or_else(|| AppError::ledger_invalid(format!("Tuple has no field '{}'", name))),
            other => Err(mismatch("tuple", other)),
        }
    }

    /// Text of a string or principal value
    pub fn as_text(&self) -> AppResult<String> {
        match self {
            Self::StringAscii(s) | Self::StringUtf8(s) => Ok(s.clone()),
            Self::Principal(p) => p.address().map(|a| match p {
                PrincipalData::Contract { name, .. } => format!("{}.{}", a, name),
                PrincipalData::Standard { .. } => a,
            }),
            other => Err(mismatch("string", other)),
        }
    }

    /// `(some v)` -> Some(v), `none` -> None, anything else passes through
    pub fn into_optional(self) -> Option<ClarityValue> {
        match self {
            Self::OptionalNone => None,
            Self::OptionalSome(inner) => Some(*inner),
            other => Some(other),
        }
    }
}

fn mismatch(expected: &str, got: &ClarityValue) -> AppError {
    AppError::ledger_invalid(format!("Expected {}, got {}", expected, got.type_name()))
}

fn write_len(out: &mut Vec<u8>, len: usize) -> AppResult<()> {
    let len = u32::try_from(len).map_err(|_| AppError::codec("Length exceeds u32"))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn write_name(out: &mut Vec<u8>, name: &str) -> AppResult<()> {
    let len = u8::try_from(name.len()).map_err(|_| AppError::codec(format!("Name too long: '{}'", name)))?;
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> AppResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| AppError::codec(format!("Unexpected end of input at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> AppResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> AppResult<usize> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf) as usize)
    }

    fn u128(&mut self) -> AppResult<[u8; 16]> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(self.take(16)?);
        Ok(buf)
    }

    fn hash160(&mut self) -> AppResult<[u8; 20]> {
        let mut buf = [0u8; 20];
        buf.copy_from_slice(self.take(20)?);
        Ok(buf)
    }

    fn name(&mut self) -> AppResult<String> {
        let len = self.byte()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| AppError::codec("Name is not UTF-8"))
    }

    fn value(&mut self, depth: usize) -> AppResult<ClarityValue> {
        if depth > MAX_DEPTH {
            return Err(AppError::codec("Value nested too deeply"));
        }
        let prefix = self.byte()?;
        Ok(match prefix {
            0x00 => ClarityValue::Int(i128::from_be_bytes(self.u128()?)),
            0x01 => ClarityValue::UInt(u128::from_be_bytes(self.u128()?)),
            0x02 => {
                let len = self.u32()?;
                ClarityValue::Buffer(self.take(len)?.to_vec())
            }
            0x03 => ClarityValue::Bool(true),
            0x04 => ClarityValue::Bool(false),
            0x05 => {
                let version = self.byte()?;
                let hash160 = self.hash160()?;
                ClarityValue::Principal(PrincipalData::Standard { version, hash160 })
            }
            0x06 => {
                let version = self.byte()?;
                let hash160 = self.hash160()?;
                let name = self.name()?;
                ClarityValue::Principal(PrincipalData::Contract {
                    version,
                    hash160,
                    name,
                })
            }
            0x07 => ClarityValue::ResponseOk(Box::new(self.value(depth + 1)?)),
            0x08 => ClarityValue::ResponseErr(Box::new(self.value(depth + 1)?)),
            0x09 => ClarityValue::OptionalNone,
            0x0a => ClarityValue::OptionalSome(Box::new(self.value(depth + 1)?)),
            0x0b => {
                let len = self.u32()?;
                // Each element is at least one byte
                if len > self.bytes.len() - self.pos {
                    return Err(AppError::codec(format!("List length {} exceeds input", len)));
                }
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.value(depth + 1)?);
                }
                ClarityValue::List(items)
            }
            0x0c => {
                let len = self.u32()?;
                let mut fields = BTreeMap::new();
                for _ in 0..len {
                    let name = self.name()?;
                    let value = self.value(depth + 1)?;
                    fields.insert(name, value);
                }
                ClarityValue::Tuple(fields)
            }
            0x0d => {
                let len = self.u32()?;
                let raw = self.take(len)?;
                if !raw.is_ascii() {
                    return Err(AppError::codec("string-ascii contains non-ASCII bytes"));
                }
                ClarityValue::StringAscii(String::from_utf8_lossy(raw).into_owned())
            }
            0x0e => {
                let len = self.u32()?;
                let raw = self.take(len)?;
                ClarityValue::StringUtf8(
                    String::from_utf8(raw.to_vec()).map_err(|_| AppError::codec("Invalid UTF-8 string"))?,
                )
            }
            other => return Err(AppError::codec(format!("Unknown type prefix 0x{:02x}", other))),
        })
    }
}
