// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::SocketAddr;

use byteorder::{BigEndian, ByteOrder};
use hmac::{Hmac, Mac};

use super::attribute::*;
use super::StunError;

pub const MAGIC_COOKIE: u32 = 0x2112A442;

pub const BINDING: u16 = 0x0001;

const FINGERPRINT_XOR: u32 = 0x5354_554e;
const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

type HmacSha1 = Hmac<sha1::Sha1>;

/// The 96-bit identifier shared by a request and its response
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u128);

impl TransactionId {
    const MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

    pub fn generate() -> Self {
        use rand::{thread_rng, Rng};
        Self(thread_rng().gen::<u128>() & Self::MASK)
    }

    pub fn value(self) -> u128 {
        self.0
    }
}

impl From<u128> for TransactionId {
    fn from(f: u128) -> Self {
        Self(f & Self::MASK)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#026x}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageClass {
    Request,
    Indication,
    Success,
    Error,
}

impl MessageClass {
    pub fn is_response(self) -> bool {
        matches!(self, MessageClass::Success | MessageClass::Error)
    }

    fn to_bits(self) -> u16 {
        match self {
            MessageClass::Request => 0x000,
            MessageClass::Indication => 0x010,
            MessageClass::Success => 0x100,
            MessageClass::Error => 0x110,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageType(u16);

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MessageType(class: {:?}, method: {:#x})",
            self.class(),
            self.method()
        )
    }
}

impl MessageType {
    pub fn class(self) -> MessageClass {
        match (self.0 & 0x10) >> 4 | (self.0 & 0x100) >> 7 {
            0x0 => MessageClass::Request,
            0x1 => MessageClass::Indication,
            0x2 => MessageClass::Success,
            _ => MessageClass::Error,
        }
    }

    pub fn method(self) -> u16 {
        self.0 & 0xf | (self.0 & 0xe0) >> 1 | (self.0 & 0x3e00) >> 2
    }

    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::message::*;
    /// let mtype = MessageType::from_class_method(MessageClass::Success, BINDING);
    /// assert_eq!(mtype.class(), MessageClass::Success);
    /// assert_eq!(mtype.method(), BINDING);
    /// assert_eq!(mtype.value(), 0x0101);
    /// ```
    pub fn from_class_method(class: MessageClass, method: u16) -> Self {
        let method_bits = method & 0xf | (method & 0x70) << 1 | (method & 0xf80) << 2;
        Self(class.to_bits() | method_bits)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    fn from_bytes(data: &[u8]) -> Result<Self, StunError> {
        let data = BigEndian::read_u16(data);
        if data & 0xc000 != 0x0 {
            return Err(StunError::NotStun);
        }
        Ok(Self(data))
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    msg_type: MessageType,
    transaction: TransactionId,
    attributes: Vec<RawAttribute>,
    // received bytes preceding MESSAGE-INTEGRITY, padding included
    integrity_data: Option<Vec<u8>>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.msg_type == other.msg_type
            && self.transaction == other.transaction
            && self.attributes == other.attributes
    }
}

impl Eq for Message {}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message(class: {:?}, method: {:#x}, transaction: {}, attributes: [",
            self.class(),
            self.method(),
            self.transaction
        )?;
        for (i, a) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a.get_type().name())?;
        }
        write!(f, "])")
    }
}

impl Message {
    pub fn new(mtype: MessageType, transaction: TransactionId) -> Self {
        Self {
            msg_type: mtype,
            transaction,
            attributes: vec![],
            integrity_data: None,
        }
    }

    pub fn new_request(method: u16) -> Self {
        Message::new(
            MessageType::from_class_method(MessageClass::Request, method),
            TransactionId::generate(),
        )
    }

    pub fn new_indication(method: u16) -> Self {
        Message::new(
            MessageType::from_class_method(MessageClass::Indication, method),
            TransactionId::generate(),
        )
    }

    pub fn new_success(orig: &Message) -> Self {
        Message::new(
            MessageType::from_class_method(MessageClass::Success, orig.method()),
            orig.transaction_id(),
        )
    }

    pub fn new_error(orig: &Message) -> Self {
        Message::new(
            MessageType::from_class_method(MessageClass::Error, orig.method()),
            orig.transaction_id(),
        )
    }

    pub fn get_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn class(&self) -> MessageClass {
        self.msg_type.class()
    }

    pub fn method(&self) -> u16 {
        self.msg_type.method()
    }

    pub fn has_method(&self, method: u16) -> bool {
        self.method() == method
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }

    fn attributes_len(&self) -> usize {
        self.attributes.iter().map(|a| a.padded_len()).sum()
    }

    /// Serialize a `Message` to network bytes
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::attribute::{RawAttribute, AttributeType};
    /// # use rtps_ice::stun::message::*;
    /// let mtype = MessageType::from_class_method(MessageClass::Request, BINDING);
    /// let mut message = Message::new(mtype, TransactionId::from(1000));
    /// message.add_attribute(RawAttribute::new(AttributeType::new(1), &[3])).unwrap();
    /// assert_eq!(
    ///     message.to_bytes(),
    ///     vec![0, 1, 0, 8, 33, 18, 164, 66, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 232, 0, 1, 0, 1, 3, 0, 0, 0]
    /// );
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let attr_size = self.attributes_len();
        let mut ret = vec![0; 20];
        ret.reserve(attr_size);
        BigEndian::write_u16(&mut ret[0..2], self.msg_type.0);
        BigEndian::write_u16(&mut ret[2..4], attr_size as u16);
        BigEndian::write_u128(
            &mut ret[4..20],
            (MAGIC_COOKIE as u128) << 96 | self.transaction.0,
        );
        for attr in &self.attributes {
            ret.extend(attr.to_bytes());
        }
        ret
    }

    /// Deserialize a `Message`, checking the FINGERPRINT when present.  Data following the
    /// advertised message length is ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, StunError> {
        if data.len() < 20 {
            return Err(StunError::NotEnoughData);
        }
        let mtype = MessageType::from_bytes(data)?;
        let mlength = BigEndian::read_u16(&data[2..4]) as usize;
        if mlength % 4 != 0 {
            warn!("malformed advertised size {} is not a multiple of 4", mlength);
            return Err(StunError::Malformed);
        }
        if mlength + 20 > data.len() {
            warn!(
                "advertised size {} larger than data size {}",
                mlength + 20,
                data.len()
            );
            return Err(StunError::NotEnoughData);
        }
        let tid = BigEndian::read_u128(&data[4..20]);
        let cookie = (tid >> 96) as u32;
        if cookie != MAGIC_COOKIE {
            return Err(StunError::NotStun);
        }
        let orig_data = &data[..20 + mlength];
        let mut ret = Self::new(mtype, TransactionId::from(tid));

        let mut data_offset = 20;
        let mut seen_message_integrity = false;
        let mut seen_fingerprint = false;
        while data_offset < orig_data.len() {
            let attr = RawAttribute::from_bytes(&orig_data[data_offset..])?;
            let padded_len = attr.padded_len();
            if data_offset + padded_len > orig_data.len() {
                return Err(StunError::Malformed);
            }

            if seen_fingerprint {
                warn!("unexpected attribute {} after FINGERPRINT", attr.get_type());
                return Err(StunError::Malformed);
            }
            if seen_message_integrity && attr.get_type() != FINGERPRINT {
                warn!(
                    "unexpected attribute {} after MESSAGE-INTEGRITY",
                    attr.get_type()
                );
                return Err(StunError::Malformed);
            }

            if attr.get_type() == MESSAGE_INTEGRITY {
                seen_message_integrity = true;
                ret.integrity_data = Some(orig_data[..data_offset].to_vec());
            } else if attr.get_type() == FINGERPRINT {
                seen_fingerprint = true;
                let msg_fingerprint = Fingerprint::from_raw(&attr)?.fingerprint();
                let calculated = Message::calculate_fingerprint(
                    &orig_data[..data_offset],
                    data_offset + padded_len - 20,
                );
                if calculated != msg_fingerprint {
                    warn!(
                        "fingerprint mismatch {:#x} != {:#x}",
                        calculated, msg_fingerprint
                    );
                    return Err(StunError::FingerprintMismatch);
                }
            }
            ret.attributes.push(attr);
            data_offset += padded_len;
        }
        Ok(ret)
    }

    fn calculate_fingerprint(data: &[u8], length: usize) -> u32 {
        let mut fingerprint_data = data.to_vec();
        BigEndian::write_u16(&mut fingerprint_data[2..4], length as u16);
        CRC32.checksum(&fingerprint_data) ^ FINGERPRINT_XOR
    }

    fn calculate_integrity(data: &[u8], length: usize, password: &str) -> Result<HmacSha1, StunError> {
        let mut hmac_data = data.to_vec();
        BigEndian::write_u16(&mut hmac_data[2..4], length as u16);
        let mut hmac = HmacSha1::new_from_slice(password.as_bytes())
            .map_err(|_| StunError::IntegrityCheckFailed)?;
        hmac.update(&hmac_data);
        Ok(hmac)
    }

    /// Add a `MESSAGE-INTEGRITY` attribute keyed by the short-term `password`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::message::*;
    /// let mut message = Message::new_request(BINDING);
    /// message.add_message_integrity("secret").unwrap();
    /// assert!(message.validate_integrity("secret").is_ok());
    /// assert!(message.validate_integrity("wrong").is_err());
    /// ```
    pub fn add_message_integrity(&mut self, password: &str) -> Result<(), StunError> {
        if self.has_attribute(MESSAGE_INTEGRITY) || self.has_attribute(FINGERPRINT) {
            return Err(StunError::AlreadyExists);
        }
        // computed over everything before the attribute with a length that includes it
        let bytes = self.to_bytes();
        let hmac = Message::calculate_integrity(&bytes, self.attributes_len() + 24, password)?;
        let mut integrity = [0; 20];
        integrity.copy_from_slice(&hmac.finalize().into_bytes());
        self.attributes.push(MessageIntegrity::new(integrity).into());
        Ok(())
    }

    /// Add a `FINGERPRINT` attribute.  No other attribute can be added afterwards.
    pub fn add_fingerprint(&mut self) -> Result<(), StunError> {
        if self.has_attribute(FINGERPRINT) {
            return Err(StunError::AlreadyExists);
        }
        let bytes = self.to_bytes();
        let fingerprint = Message::calculate_fingerprint(&bytes, self.attributes_len() + 8);
        self.attributes.push(Fingerprint::new(fingerprint).into());
        Ok(())
    }

    /// Verify the last `MESSAGE-INTEGRITY` attribute against `password`
    pub fn validate_integrity(&self, password: &str) -> Result<(), StunError> {
        let mut offset = 20;
        let mut found = None;
        for attr in &self.attributes {
            if attr.get_type() == MESSAGE_INTEGRITY {
                found = Some((offset, MessageIntegrity::from_raw(attr)?));
            }
            offset += attr.padded_len();
        }
        let (offset, integrity) = found.ok_or(StunError::IntegrityCheckFailed)?;
        let hmac = match &self.integrity_data {
            Some(data) => Message::calculate_integrity(data, data.len() - 20 + 24, password)?,
            None => {
                let bytes = self.to_bytes();
                Message::calculate_integrity(&bytes[..offset], offset - 20 + 24, password)?
            }
        };
        hmac.verify_slice(integrity.hmac())
            .map_err(|_| StunError::IntegrityCheckFailed)
    }

    /// Add an `Attribute` to this `Message`.  `MESSAGE-INTEGRITY` and `FINGERPRINT` have their
    /// own functions and nothing can be added after them.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::stun::attribute::{RawAttribute, AttributeType};
    /// # use rtps_ice::stun::message::*;
    /// let mut message = Message::new_request(BINDING);
    /// let attr = RawAttribute::new(AttributeType::new(1), &[3]);
    /// assert!(message.add_attribute(attr.clone()).is_ok());
    /// assert!(message.add_attribute(attr).is_err());
    /// ```
    pub fn add_attribute(&mut self, attr: RawAttribute) -> Result<(), StunError> {
        if attr.get_type() == MESSAGE_INTEGRITY || attr.get_type() == FINGERPRINT {
            return Err(StunError::WrongImplementation);
        }
        if self.has_attribute(attr.get_type())
            || self.has_attribute(MESSAGE_INTEGRITY)
            || self.has_attribute(FINGERPRINT)
        {
            return Err(StunError::AlreadyExists);
        }
        self.attributes.push(attr);
        Ok(())
    }

    pub fn get_attribute(&self, atype: AttributeType) -> Option<&RawAttribute> {
        self.attributes.iter().find(|attr| attr.get_type() == atype)
    }

    pub fn iter_attributes(&self) -> impl Iterator<Item = &RawAttribute> {
        self.attributes.iter()
    }

    pub fn has_attribute(&self, atype: AttributeType) -> bool {
        self.get_attribute(atype).is_some()
    }

    fn typed_attribute<T: Attribute>(&self, atype: AttributeType) -> Option<T> {
        self.get_attribute(atype).and_then(|raw| T::from_raw(raw).ok())
    }

    pub fn username(&self) -> Option<String> {
        self.typed_attribute::<Username>(USERNAME)
            .map(|u| u.username().to_owned())
    }

    pub fn priority(&self) -> Option<u32> {
        self.typed_attribute::<Priority>(PRIORITY)
            .map(|p| p.priority())
    }

    pub fn use_candidate(&self) -> bool {
        self.has_attribute(USE_CANDIDATE)
    }

    pub fn ice_controlling(&self) -> Option<u64> {
        self.typed_attribute::<IceControlling>(ICE_CONTROLLING)
            .map(|c| c.tie_breaker())
    }

    pub fn ice_controlled(&self) -> Option<u64> {
        self.typed_attribute::<IceControlled>(ICE_CONTROLLED)
            .map(|c| c.tie_breaker())
    }

    pub fn has_message_integrity(&self) -> bool {
        self.has_attribute(MESSAGE_INTEGRITY)
    }

    pub fn has_fingerprint(&self) -> bool {
        self.has_attribute(FINGERPRINT)
    }

    /// The reflexive address reported by a response, XOR-MAPPED-ADDRESS taking precedence over
    /// MAPPED-ADDRESS
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        self.typed_attribute::<XorMappedAddress>(XOR_MAPPED_ADDRESS)
            .map(|x| x.addr(self.transaction))
            .or_else(|| {
                self.typed_attribute::<MappedAddress>(MAPPED_ADDRESS)
                    .map(|m| m.addr())
            })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.typed_attribute(ERROR_CODE)
    }

    pub fn unknown_attributes(&self) -> Vec<AttributeType> {
        self.typed_attribute::<UnknownAttributes>(UNKNOWN_ATTRIBUTES)
            .map(|u| u.attributes().to_vec())
            .unwrap_or_default()
    }

    /// Comprehension required attributes that ICE does not understand
    pub fn unknown_comprehension_required_attributes(&self) -> Vec<AttributeType> {
        self.attributes
            .iter()
            .map(|a| a.get_type())
            .filter(|&atype| {
                atype.comprehension_required()
                    && !matches!(
                        atype,
                        MAPPED_ADDRESS
                            | USERNAME
                            | MESSAGE_INTEGRITY
                            | ERROR_CODE
                            | UNKNOWN_ATTRIBUTES
                            | XOR_MAPPED_ADDRESS
                            | PRIORITY
                            | USE_CANDIDATE
                    )
            })
            .collect()
    }
}

impl From<Message> for Vec<u8> {
    fn from(f: Message) -> Self {
        f.to_bytes()
    }
}

impl TryFrom<&[u8]> for Message {
    type Error = StunError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Message::from_bytes(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        crate::tests::test_init_log();
    }

    fn binding_request() -> Message {
        let mut msg = Message::new_request(BINDING);
        msg.add_attribute(Priority::new(0x6eff_ffff).into()).unwrap();
        msg.add_attribute(IceControlling::new(42).into()).unwrap();
        msg.add_attribute(UseCandidate::new().into()).unwrap();
        msg.add_attribute(Username::new("remote:local").unwrap().into())
            .unwrap();
        msg.add_message_integrity("password").unwrap();
        msg.add_fingerprint().unwrap();
        msg
    }

    #[test]
    fn msg_type_bits() {
        init();
        for class in [
            MessageClass::Request,
            MessageClass::Indication,
            MessageClass::Success,
            MessageClass::Error,
        ] {
            for method in [BINDING, 0x0003, 0x0abc] {
                let mtype = MessageType::from_class_method(class, method);
                assert_eq!(mtype.class(), class);
                assert_eq!(mtype.method(), method);
            }
        }
        assert_eq!(
            MessageType::from_class_method(MessageClass::Indication, BINDING).value(),
            0x0011
        );
        assert_eq!(
            MessageType::from_class_method(MessageClass::Error, BINDING).value(),
            0x0111
        );
    }

    #[test]
    fn ice_request() {
        init();
        let msg = binding_request();
        let data = msg.to_bytes();
        let parsed = Message::from_bytes(&data).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.username().as_deref(), Some("remote:local"));
        assert_eq!(parsed.priority(), Some(0x6eff_ffff));
        assert_eq!(parsed.ice_controlling(), Some(42));
        assert_eq!(parsed.ice_controlled(), None);
        assert!(parsed.use_candidate());
        assert!(parsed.has_fingerprint());
        assert!(parsed.validate_integrity("password").is_ok());
        assert_eq!(
            parsed.validate_integrity("other"),
            Err(StunError::IntegrityCheckFailed)
        );
        assert!(parsed.unknown_comprehension_required_attributes().is_empty());
    }

    #[test]
    fn fingerprint_mismatch() {
        init();
        let mut data = binding_request().to_bytes();
        // flip a bit in the PRIORITY value
        data[24] ^= 0x1;
        assert_eq!(
            Message::from_bytes(&data),
            Err(StunError::FingerprintMismatch)
        );
    }

    #[test]
    fn fingerprint_value() {
        init();
        let mut msg = Message::new(
            MessageType::from_class_method(MessageClass::Request, BINDING),
            TransactionId::from(0),
        );
        msg.add_fingerprint().unwrap();
        let data = msg.to_bytes();
        let mut header = data[..20].to_vec();
        assert_eq!(BigEndian::read_u16(&header[2..4]), 8);
        BigEndian::write_u16(&mut header[2..4], 8);
        let expected = CRC32.checksum(&header) ^ 0x5354_554e;
        assert_eq!(BigEndian::read_u32(&data[24..28]), expected);
    }

    #[test]
    fn integrity_over_received_padding() {
        init();
        let mut msg = Message::new_request(BINDING);
        msg.add_attribute(Username::new("abc").unwrap().into())
            .unwrap();
        let mut data = msg.to_bytes();
        // the USERNAME value is followed by one byte of padding
        data[27] = 0xff;
        let len = data.len() - 20 + 24;
        let hmac = Message::calculate_integrity(&data, len, "password").unwrap();
        BigEndian::write_u16(&mut data[2..4], len as u16);
        data.extend_from_slice(&[0x00, 0x08, 0x00, 0x14]);
        data.extend_from_slice(&hmac.finalize().into_bytes());

        let received = Message::from_bytes(&data).unwrap();
        assert_eq!(received.username().as_deref(), Some("abc"));
        assert!(received.validate_integrity("password").is_ok());
        assert!(received.validate_integrity("wrong").is_err());
        // re-encoding zeroes the padding
        let mut resent = msg.clone();
        resent.add_message_integrity("password").unwrap();
        assert_ne!(resent.to_bytes(), data);
        assert_eq!(received.get_attribute(USERNAME), resent.get_attribute(USERNAME));
    }

    #[test]
    fn attribute_after_integrity() {
        init();
        let mut msg = Message::new_request(BINDING);
        msg.add_message_integrity("pass").unwrap();
        let mut data = msg.to_bytes();
        data.extend(Priority::new(1).to_raw().to_bytes());
        let len = data.len() - 20;
        BigEndian::write_u16(&mut data[2..4], len as u16);
        assert_eq!(Message::from_bytes(&data), Err(StunError::Malformed));
        assert_eq!(
            msg.add_attribute(Priority::new(1).into()),
            Err(StunError::AlreadyExists)
        );
    }

    #[test]
    fn header_validation() {
        init();
        let data = binding_request().to_bytes();
        assert_eq!(Message::from_bytes(&data[..19]), Err(StunError::NotEnoughData));
        let mut bad = data.clone();
        bad[0] |= 0x80;
        assert_eq!(Message::from_bytes(&bad), Err(StunError::NotStun));
        let mut bad = data.clone();
        bad[4] = 0;
        assert_eq!(Message::from_bytes(&bad), Err(StunError::NotStun));
        let mut bad = data.clone();
        bad[3] = bad[3].wrapping_add(2);
        assert!(Message::from_bytes(&bad).is_err());
        // trailing bytes after the advertised length are ignored
        let mut padded = data.clone();
        padded.resize(1500, 0);
        assert_eq!(Message::from_bytes(&padded).unwrap(), binding_request_from(&data));
    }

    fn binding_request_from(data: &[u8]) -> Message {
        Message::from_bytes(data).unwrap()
    }

    #[test]
    fn unknown_comprehension_required() {
        init();
        let mut msg = Message::new_request(BINDING);
        msg.add_attribute(RawAttribute::new(AttributeType::new(0x0030), &[1, 2]))
            .unwrap();
        msg.add_attribute(RawAttribute::new(AttributeType::new(0x8030), &[1, 2]))
            .unwrap();
        msg.add_attribute(IceControlled::new(1).into()).unwrap();
        assert_eq!(
            msg.unknown_comprehension_required_attributes(),
            vec![AttributeType::new(0x0030)]
        );
    }

    #[test]
    fn mapped_address_preference() {
        init();
        let request = Message::new_request(BINDING);
        let mut response = Message::new_success(&request);
        let mapped: SocketAddr = "1.2.3.4:5".parse().unwrap();
        let xor_mapped: SocketAddr = "6.7.8.9:10".parse().unwrap();
        response.add_attribute(MappedAddress::new(mapped).into()).unwrap();
        assert_eq!(response.mapped_address(), Some(mapped));
        response
            .add_attribute(XorMappedAddress::new(xor_mapped, request.transaction_id()).into())
            .unwrap();
        assert_eq!(response.mapped_address(), Some(xor_mapped));
        assert_eq!(response.transaction_id(), request.transaction_id());
        assert_eq!(response.class(), MessageClass::Success);
    }
}
