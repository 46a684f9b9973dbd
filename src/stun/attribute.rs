// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};

use super::message::{TransactionId, MAGIC_COOKIE};
use super::StunError;

// RFC 5389
pub const MAPPED_ADDRESS: AttributeType = AttributeType(0x0001);
pub const USERNAME: AttributeType = AttributeType(0x0006);
pub const MESSAGE_INTEGRITY: AttributeType = AttributeType(0x0008);
pub const ERROR_CODE: AttributeType = AttributeType(0x0009);
pub const UNKNOWN_ATTRIBUTES: AttributeType = AttributeType(0x000A);
pub const XOR_MAPPED_ADDRESS: AttributeType = AttributeType(0x0020);
pub const FINGERPRINT: AttributeType = AttributeType(0x8028);

// RFC 8445
pub const PRIORITY: AttributeType = AttributeType(0x0024);
pub const USE_CANDIDATE: AttributeType = AttributeType(0x0025);
pub const ICE_CONTROLLED: AttributeType = AttributeType(0x8029);
pub const ICE_CONTROLLING: AttributeType = AttributeType(0x802A);

pub const BAD_REQUEST: u16 = 400;
pub const UNAUTHORIZED: u16 = 401;
pub const UNKNOWN_ATTRIBUTE: u16 = 420;

const MAX_USERNAME_LENGTH: usize = 512;
const MAX_REASON_LENGTH: usize = 763;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeType(u16);

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#x}: {})", self.0, self.0, self.name())
    }
}

impl AttributeType {
    pub fn new(val: u16) -> Self {
        Self(val)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn name(self) -> &'static str {
        match self {
            MAPPED_ADDRESS => "MAPPED-ADDRESS",
            USERNAME => "USERNAME",
            MESSAGE_INTEGRITY => "MESSAGE-INTEGRITY",
            ERROR_CODE => "ERROR-CODE",
            UNKNOWN_ATTRIBUTES => "UNKNOWN-ATTRIBUTES",
            XOR_MAPPED_ADDRESS => "XOR-MAPPED-ADDRESS",
            FINGERPRINT => "FINGERPRINT",
            PRIORITY => "PRIORITY",
            USE_CANDIDATE => "USE-CANDIDATE",
            ICE_CONTROLLED => "ICE-CONTROLLED",
            ICE_CONTROLLING => "ICE-CONTROLLING",
            _ => "unknown",
        }
    }

    /// Attribute types below 0x8000 must be understood by the receiver
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::attribute::*;
    /// assert!(USERNAME.comprehension_required());
    /// assert!(!ICE_CONTROLLING.comprehension_required());
    /// ```
    pub fn comprehension_required(self) -> bool {
        self.0 < 0x8000
    }
}

impl From<u16> for AttributeType {
    fn from(f: u16) -> Self {
        Self::new(f)
    }
}

impl From<AttributeType> for u16 {
    fn from(f: AttributeType) -> Self {
        f.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AttributeHeader {
    pub atype: AttributeType,
    pub length: u16,
}

impl AttributeHeader {
    fn parse(data: &[u8]) -> Result<Self, StunError> {
        if data.len() < 4 {
            return Err(StunError::NotEnoughData);
        }
        Ok(Self {
            atype: BigEndian::read_u16(&data[0..2]).into(),
            length: BigEndian::read_u16(&data[2..4]),
        })
    }

    fn to_bytes(self) -> [u8; 4] {
        let mut ret = [0; 4];
        BigEndian::write_u16(&mut ret[0..2], self.atype.into());
        BigEndian::write_u16(&mut ret[2..4], self.length);
        ret
    }
}

pub trait Attribute: std::fmt::Debug {
    /// Retrieve the `AttributeType` of an `Attribute`
    fn get_type(&self) -> AttributeType;

    /// Convert an `Attribute` to a `RawAttribute`
    fn to_raw(&self) -> RawAttribute;

    /// Convert an `Attribute` from a `RawAttribute`
    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError>
    where
        Self: Sized;
}

/// An attribute as it appears on the wire, without padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub header: AttributeHeader,
    pub value: Vec<u8>,
}

impl RawAttribute {
    pub fn new(atype: AttributeType, data: &[u8]) -> Self {
        Self {
            header: AttributeHeader {
                atype,
                length: data.len() as u16,
            },
            value: data.to_vec(),
        }
    }

    pub fn get_type(&self) -> AttributeType {
        self.header.atype
    }

    /// Length of the attribute value.  This is not the padded length as stored in a `Message`
    pub fn get_length(&self) -> u16 {
        self.header.length
    }

    /// Size of the attribute in a `Message` including header and padding
    pub fn padded_len(&self) -> usize {
        4 + (self.header.length as usize + 3) / 4 * 4
    }

    /// Deserialize a `RawAttribute` from bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::attribute::{RawAttribute, AttributeType};
    /// let data = &[0, 1, 0, 2, 5, 6, 0, 0];
    /// let attr = RawAttribute::from_bytes(data).unwrap();
    /// assert_eq!(attr.get_type(), AttributeType::new(1));
    /// assert_eq!(attr.get_length(), 2);
    /// ```
    pub fn from_bytes(data: &[u8]) -> Result<Self, StunError> {
        let header = AttributeHeader::parse(data)?;
        if header.length as usize > data.len() - 4 {
            return Err(StunError::NotEnoughData);
        }
        Ok(Self {
            header,
            value: data[4..4 + header.length as usize].to_vec(),
        })
    }

    /// Serialize a `RawAttribute` to bytes, zero padded to a multiple of 4.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::attribute::{RawAttribute, AttributeType};
    /// let attr = RawAttribute::new(AttributeType::new(1), &[5, 6]);
    /// assert_eq!(attr.to_bytes(), &[0, 1, 0, 2, 5, 6, 0, 0]);
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(self.padded_len());
        ret.extend(self.header.to_bytes());
        ret.extend(&self.value);
        ret.resize(self.padded_len(), 0);
        ret
    }
}

impl std::fmt::Display for RawAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} len: {}", self.get_type(), self.get_length())
    }
}

fn check_type(raw: &RawAttribute, atype: AttributeType) -> Result<(), StunError> {
    if raw.header.atype != atype {
        return Err(StunError::WrongImplementation);
    }
    Ok(())
}

fn check_fixed_length(raw: &RawAttribute, len: usize) -> Result<(), StunError> {
    if raw.value.len() < len {
        return Err(StunError::NotEnoughData);
    }
    if raw.value.len() > len {
        return Err(StunError::TooBig);
    }
    Ok(())
}

// address family 0x01 is IPv4 and 0x02 is IPv6
fn address_to_bytes(addr: SocketAddr) -> Vec<u8> {
    match addr {
        SocketAddr::V4(addr) => {
            let mut buf = vec![0; 8];
            buf[1] = 0x1;
            BigEndian::write_u16(&mut buf[2..4], addr.port());
            buf[4..8].copy_from_slice(&addr.ip().octets());
            buf
        }
        SocketAddr::V6(addr) => {
            let mut buf = vec![0; 20];
            buf[1] = 0x2;
            BigEndian::write_u16(&mut buf[2..4], addr.port());
            buf[4..20].copy_from_slice(&addr.ip().octets());
            buf
        }
    }
}

fn address_from_bytes(data: &[u8]) -> Result<SocketAddr, StunError> {
    if data.len() < 4 {
        return Err(StunError::NotEnoughData);
    }
    let port = BigEndian::read_u16(&data[2..4]);
    let ip = match data[1] {
        0x1 => {
            if data.len() != 8 {
                return Err(StunError::InvalidLength);
            }
            IpAddr::V4(Ipv4Addr::new(data[4], data[5], data[6], data[7]))
        }
        0x2 => {
            if data.len() != 20 {
                return Err(StunError::InvalidLength);
            }
            let mut octets = [0; 16];
            octets.copy_from_slice(&data[4..20]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(StunError::Malformed),
    };
    Ok(SocketAddr::new(ip, port))
}

macro_rules! raw_conversions {
    ($CamelType:ty) => {
        impl TryFrom<&RawAttribute> for $CamelType {
            type Error = StunError;

            fn try_from(value: &RawAttribute) -> Result<Self, Self::Error> {
                <$CamelType>::from_raw(value)
            }
        }

        impl From<$CamelType> for RawAttribute {
            fn from(f: $CamelType) -> Self {
                f.to_raw()
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedAddress {
    addr: SocketAddr,
}

impl Attribute for MappedAddress {
    fn get_type(&self) -> AttributeType {
        MAPPED_ADDRESS
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(self.get_type(), &address_to_bytes(self.addr))
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
        check_type(raw, MAPPED_ADDRESS)?;
        Ok(Self {
            addr: address_from_bytes(&raw.value)?,
        })
    }
}

impl MappedAddress {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

raw_conversions!(MappedAddress);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorMappedAddress {
    // stored XOR-ed as we need the transaction id to get the original value
    addr: SocketAddr,
}

impl Attribute for XorMappedAddress {
    fn get_type(&self) -> AttributeType {
        XOR_MAPPED_ADDRESS
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(self.get_type(), &address_to_bytes(self.addr))
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
        check_type(raw, XOR_MAPPED_ADDRESS)?;
        Ok(Self {
            addr: address_from_bytes(&raw.value)?,
        })
    }
}

impl XorMappedAddress {
    /// Create a new XOR-MAPPED-ADDRESS for `addr` as seen in the transaction `transaction`
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::attribute::XorMappedAddress;
    /// # use rtps_ice::stun::message::TransactionId;
    /// let addr = "192.168.1.2:4000".parse().unwrap();
    /// let transaction = TransactionId::generate();
    /// let xor = XorMappedAddress::new(addr, transaction);
    /// assert_eq!(xor.addr(transaction), addr);
    /// ```
    pub fn new(addr: SocketAddr, transaction: TransactionId) -> Self {
        Self {
            addr: XorMappedAddress::xor_addr(addr, transaction),
        }
    }

    fn xor_addr(addr: SocketAddr, transaction: TransactionId) -> SocketAddr {
        let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
        match addr {
            SocketAddr::V4(addr) => {
                let ip = u32::from(*addr.ip()) ^ MAGIC_COOKIE;
                SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port)
            }
            SocketAddr::V6(addr) => {
                let mask = (MAGIC_COOKIE as u128) << 96 | transaction.value();
                let ip = u128::from(*addr.ip()) ^ mask;
                SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port)
            }
        }
    }

    pub fn addr(&self, transaction: TransactionId) -> SocketAddr {
        XorMappedAddress::xor_addr(self.addr, transaction)
    }
}

raw_conversions!(XorMappedAddress);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Username {
    user: String,
}

impl Attribute for Username {
    fn get_type(&self) -> AttributeType {
        USERNAME
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(self.get_type(), self.user.as_bytes())
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
        check_type(raw, USERNAME)?;
        if raw.value.len() > MAX_USERNAME_LENGTH {
            return Err(StunError::TooBig);
        }
        Ok(Self {
            user: std::str::from_utf8(&raw.value)
                .map_err(|_| StunError::Malformed)?
                .to_owned(),
        })
    }
}

impl Username {
    pub fn new(user: &str) -> Result<Self, StunError> {
        if user.len() > MAX_USERNAME_LENGTH {
            return Err(StunError::TooBig);
        }
        Ok(Self {
            user: user.to_owned(),
        })
    }

    pub fn username(&self) -> &str {
        &self.user
    }
}

raw_conversions!(Username);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    code: u16,
    reason: String,
}

impl Attribute for ErrorCode {
    fn get_type(&self) -> AttributeType {
        ERROR_CODE
    }

    fn to_raw(&self) -> RawAttribute {
        let mut data = Vec::with_capacity(4 + self.reason.len());
        data.extend([0, 0, (self.code / 100) as u8, (self.code % 100) as u8]);
        data.extend(self.reason.as_bytes());
        RawAttribute::new(self.get_type(), &data)
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
        check_type(raw, ERROR_CODE)?;
        if raw.value.len() < 4 {
            return Err(StunError::NotEnoughData);
        }
        if raw.value.len() > MAX_REASON_LENGTH + 4 {
            return Err(StunError::TooBig);
        }
        let class = (raw.value[2] & 0x7) as u16;
        let number = raw.value[3] as u16;
        if !(3..=6).contains(&class) || number > 99 {
            return Err(StunError::Malformed);
        }
        Ok(Self {
            code: class * 100 + number,
            reason: std::str::from_utf8(&raw.value[4..])
                .map_err(|_| StunError::Malformed)?
                .to_owned(),
        })
    }
}

impl ErrorCode {
    pub fn new(code: u16, reason: &str) -> Result<Self, StunError> {
        if !(300..700).contains(&code) {
            return Err(StunError::Malformed);
        }
        if reason.len() > MAX_REASON_LENGTH {
            return Err(StunError::TooBig);
        }
        Ok(Self {
            code,
            reason: reason.to_owned(),
        })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.code, self.reason)
    }
}

raw_conversions!(ErrorCode);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAttributes {
    attributes: Vec<AttributeType>,
}

impl Attribute for UnknownAttributes {
    fn get_type(&self) -> AttributeType {
        UNKNOWN_ATTRIBUTES
    }

    fn to_raw(&self) -> RawAttribute {
        let mut data = vec![0; self.attributes.len() * 2];
        for (chunk, attr) in data.chunks_exact_mut(2).zip(self.attributes.iter()) {
            BigEndian::write_u16(chunk, (*attr).into());
        }
        RawAttribute::new(self.get_type(), &data)
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
        check_type(raw, UNKNOWN_ATTRIBUTES)?;
        if raw.value.len() % 2 != 0 {
            return Err(StunError::InvalidLength);
        }
        Ok(Self {
            attributes: raw
                .value
                .chunks_exact(2)
                .map(|c| BigEndian::read_u16(c).into())
                .collect(),
        })
    }
}

impl UnknownAttributes {
    pub fn new(attrs: &[AttributeType]) -> Self {
        Self {
            attributes: attrs.to_vec(),
        }
    }

    pub fn attributes(&self) -> &[AttributeType] {
        &self.attributes
    }

    pub fn has_attribute(&self, attr: AttributeType) -> bool {
        self.attributes.iter().any(|&a| a == attr)
    }
}

raw_conversions!(UnknownAttributes);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIntegrity {
    hmac: [u8; 20],
}

impl Attribute for MessageIntegrity {
    fn get_type(&self) -> AttributeType {
        MESSAGE_INTEGRITY
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(self.get_type(), &self.hmac)
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
        check_type(raw, MESSAGE_INTEGRITY)?;
        check_fixed_length(raw, 20)?;
        let mut hmac = [0; 20];
        hmac.copy_from_slice(&raw.value);
        Ok(Self { hmac })
    }
}

impl MessageIntegrity {
    pub fn new(hmac: [u8; 20]) -> Self {
        Self { hmac }
    }

    pub fn hmac(&self) -> &[u8; 20] {
        &self.hmac
    }
}

raw_conversions!(MessageIntegrity);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseCandidate {}

impl Attribute for UseCandidate {
    fn get_type(&self) -> AttributeType {
        USE_CANDIDATE
    }

    fn to_raw(&self) -> RawAttribute {
        RawAttribute::new(self.get_type(), &[])
    }

    fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
        check_type(raw, USE_CANDIDATE)?;
        check_fixed_length(raw, 0)?;
        Ok(Self {})
    }
}

impl Default for UseCandidate {
    fn default() -> Self {
        UseCandidate::new()
    }
}

impl UseCandidate {
    pub fn new() -> Self {
        Self {}
    }
}

raw_conversions!(UseCandidate);

// attributes holding a single big endian integer
macro_rules! integer_attribute {
    ($CamelType:ident, $atype:ident, $field:ident, $int:ty, $read:path, $write:path) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $CamelType {
            $field: $int,
        }

        impl Attribute for $CamelType {
            fn get_type(&self) -> AttributeType {
                $atype
            }

            fn to_raw(&self) -> RawAttribute {
                let mut buf = [0; std::mem::size_of::<$int>()];
                $write(&mut buf, self.$field);
                RawAttribute::new(self.get_type(), &buf)
            }

            fn from_raw(raw: &RawAttribute) -> Result<Self, StunError> {
                check_type(raw, $atype)?;
                check_fixed_length(raw, std::mem::size_of::<$int>())?;
                Ok(Self {
                    $field: $read(&raw.value),
                })
            }
        }

        impl $CamelType {
            pub fn new($field: $int) -> Self {
                Self { $field }
            }

            pub fn $field(&self) -> $int {
                self.$field
            }
        }

        raw_conversions!($CamelType);
    };
}

integer_attribute!(
    Priority,
    PRIORITY,
    priority,
    u32,
    BigEndian::read_u32,
    BigEndian::write_u32
);
integer_attribute!(
    Fingerprint,
    FINGERPRINT,
    fingerprint,
    u32,
    BigEndian::read_u32,
    BigEndian::write_u32
);
integer_attribute!(
    IceControlled,
    ICE_CONTROLLED,
    tie_breaker,
    u64,
    BigEndian::read_u64,
    BigEndian::write_u64
);
integer_attribute!(
    IceControlling,
    ICE_CONTROLLING,
    tie_breaker,
    u64,
    BigEndian::read_u64,
    BigEndian::write_u64
);

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        crate::tests::test_init_log();
    }

    #[test]
    fn xor_mapped_address_ipv4() {
        init();
        let transaction = TransactionId::generate();
        let addr: SocketAddr = "10.0.0.7:7400".parse().unwrap();
        let raw = XorMappedAddress::new(addr, transaction).to_raw();
        // port ^ 0x2112, address ^ 0x2112a442
        assert_eq!(&raw.value[..4], &[0, 1, (7400u16 >> 8) as u8 ^ 0x21, (7400u16 & 0xff) as u8 ^ 0x12]);
        assert_eq!(&raw.value[4..], &[10 ^ 0x21, 0x12, 0xa4, 7 ^ 0x42]);
        let parsed = XorMappedAddress::from_raw(&raw).unwrap();
        assert_eq!(parsed.addr(transaction), addr);
    }

    #[test]
    fn xor_mapped_address_ipv6() {
        init();
        let transaction = TransactionId::generate();
        let addr: SocketAddr = "[fd12:3456::1]:7410".parse().unwrap();
        let raw = XorMappedAddress::new(addr, transaction).to_raw();
        assert_eq!(raw.get_length(), 20);
        let parsed = XorMappedAddress::from_raw(&raw).unwrap();
        assert_eq!(parsed.addr(transaction), addr);
    }

    #[test]
    fn mapped_address_rejects_bad_family() {
        init();
        let raw = RawAttribute::new(MAPPED_ADDRESS, &[0, 3, 0, 1, 1, 2, 3, 4]);
        assert_eq!(MappedAddress::from_raw(&raw), Err(StunError::Malformed));
        let raw = RawAttribute::new(MAPPED_ADDRESS, &[0, 1, 0, 1, 1, 2]);
        assert_eq!(MappedAddress::from_raw(&raw), Err(StunError::InvalidLength));
    }

    #[test]
    fn error_code() {
        init();
        let code = ErrorCode::new(420, "Unknown Attributes").unwrap();
        let raw = code.to_raw();
        assert_eq!(&raw.value[..4], &[0, 0, 4, 20]);
        assert_eq!(ErrorCode::from_raw(&raw).unwrap(), code);
        assert!(ErrorCode::new(200, "OK").is_err());
        let raw = RawAttribute::new(ERROR_CODE, &[0, 0, 4, 100]);
        assert!(ErrorCode::from_raw(&raw).is_err());
    }

    #[test]
    fn unknown_attributes() {
        init();
        let attr = UnknownAttributes::new(&[AttributeType::new(0x7777), PRIORITY]);
        let parsed = UnknownAttributes::from_raw(&attr.to_raw()).unwrap();
        assert!(parsed.has_attribute(PRIORITY));
        assert!(parsed.has_attribute(AttributeType::new(0x7777)));
        assert!(!parsed.has_attribute(USERNAME));
    }

    #[test]
    fn integer_attributes() {
        init();
        let raw = IceControlling::new(0x0102_0304_0506_0708).to_raw();
        assert_eq!(raw.get_type(), ICE_CONTROLLING);
        assert_eq!(raw.value, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            IceControlling::from_raw(&raw).unwrap().tie_breaker(),
            0x0102_0304_0506_0708
        );
        assert_eq!(
            IceControlled::from_raw(&raw),
            Err(StunError::WrongImplementation)
        );
        let raw = RawAttribute::new(PRIORITY, &[0, 1]);
        assert_eq!(Priority::from_raw(&raw), Err(StunError::NotEnoughData));
    }

    #[test]
    fn username_too_long() {
        init();
        let long = "a".repeat(MAX_USERNAME_LENGTH + 1);
        assert_eq!(Username::new(&long), Err(StunError::TooBig));
        assert!(Username::new("abc:def").is_ok());
    }
}
