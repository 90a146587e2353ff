use bincode::{DefaultOptions, Options};

use super::{
    Header, ProtocolError, Status, ADDQ_OPCODE, ADD_OPCODE, DECR_OPCODE, DELETEQ_OPCODE,
    DELETE_OPCODE, FLUSH_OPCODE, GETKQ_OPCODE, GETK_OPCODE, GETQ_OPCODE, GET_OPCODE, INCR_OPCODE,
    NOOP_OPCODE, REPLACEQ_OPCODE, REPLACE_OPCODE, SASL_AUTH_OPCODE, SASL_LIST_OPCODE, SETQ_OPCODE,
    SET_OPCODE, STAT_OPCODE, VERSION_OPCODE,
};

fn extras_codec() -> impl Options {
    DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Extras for `set`/`add`/`replace` and their quiet variants.
#[derive(Debug, Default, Clone, Copy, PartialEq, ::serde_derive::Serialize, ::serde_derive::Deserialize)]
pub struct SetExtras {
    pub flags: u32,
    pub expire: u32,
}

impl SetExtras {
    pub fn new(flags: u32, expire: u32) -> Self {
        Self { flags, expire }
    }

    fn encode(self) -> Vec<u8> {
        extras_codec().serialize(&self).expect("fixed size extras")
    }
}

/// Extras for `incr`/`decr`.
#[derive(Debug, Default, Clone, Copy, PartialEq, ::serde_derive::Serialize, ::serde_derive::Deserialize)]
pub struct IncrDecrExtras {
    pub delta: u64,
    pub initial: u64,
    pub expire: u32,
}

impl IncrDecrExtras {
    pub fn new(delta: u64, initial: u64, expire: u32) -> Self {
        Self {
            delta,
            initial,
            expire,
        }
    }

    fn encode(self) -> Vec<u8> {
        extras_codec().serialize(&self).expect("fixed size extras")
    }
}

/// A fully materialized packet, ready to serialize onto the wire or freshly
/// parsed off of it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Packet {
    fn new_request(opcode: u8, key: &[u8], extras: Vec<u8>, value: Vec<u8>, cas: u64) -> Self {
        let body_len = (extras.len() + key.len() + value.len()) as u32;
        Packet {
            header: Header::request(opcode, key.len() as u16, extras.len() as u8, body_len, cas),
            extras,
            key: key.to_vec(),
            value,
        }
    }

    pub fn get(key: &[u8]) -> Self {
        Packet::new_request(GET_OPCODE, key, vec![], vec![], 0)
    }

    pub fn getk(key: &[u8]) -> Self {
        Packet::new_request(GETK_OPCODE, key, vec![], vec![], 0)
    }

    pub fn getq(key: &[u8]) -> Self {
        Packet::new_request(GETQ_OPCODE, key, vec![], vec![], 0)
    }

    pub fn getkq(key: &[u8]) -> Self {
        Packet::new_request(GETKQ_OPCODE, key, vec![], vec![], 0)
    }

    pub fn set(key: &[u8], value: Vec<u8>, extras: SetExtras, cas: u64) -> Self {
        Packet::new_request(SET_OPCODE, key, extras.encode(), value, cas)
    }

    pub fn setq(key: &[u8], value: Vec<u8>, extras: SetExtras, cas: u64) -> Self {
        Packet::new_request(SETQ_OPCODE, key, extras.encode(), value, cas)
    }

    pub fn add(key: &[u8], value: Vec<u8>, extras: SetExtras) -> Self {
        Packet::new_request(ADD_OPCODE, key, extras.encode(), value, 0)
    }

    pub fn addq(key: &[u8], value: Vec<u8>, extras: SetExtras) -> Self {
        Packet::new_request(ADDQ_OPCODE, key, extras.encode(), value, 0)
    }

    pub fn replace(key: &[u8], value: Vec<u8>, extras: SetExtras, cas: u64) -> Self {
        Packet::new_request(REPLACE_OPCODE, key, extras.encode(), value, cas)
    }

    pub fn replaceq(key: &[u8], value: Vec<u8>, extras: SetExtras, cas: u64) -> Self {
        Packet::new_request(REPLACEQ_OPCODE, key, extras.encode(), value, cas)
    }

    pub fn delete(key: &[u8], cas: u64) -> Self {
        Packet::new_request(DELETE_OPCODE, key, vec![], vec![], cas)
    }

    pub fn deleteq(key: &[u8], cas: u64) -> Self {
        Packet::new_request(DELETEQ_OPCODE, key, vec![], vec![], cas)
    }

    pub fn incr(key: &[u8], extras: IncrDecrExtras) -> Self {
        Packet::new_request(INCR_OPCODE, key, extras.encode(), vec![], 0)
    }

    pub fn decr(key: &[u8], extras: IncrDecrExtras) -> Self {
        Packet::new_request(DECR_OPCODE, key, extras.encode(), vec![], 0)
    }

    pub fn flush(delay: u32) -> Self {
        Packet::new_request(FLUSH_OPCODE, b"", delay.to_be_bytes().to_vec(), vec![], 0)
    }

    pub fn noop() -> Self {
        Packet::new_request(NOOP_OPCODE, b"", vec![], vec![], 0)
    }

    pub fn version() -> Self {
        Packet::new_request(VERSION_OPCODE, b"", vec![], vec![], 0)
    }

    pub fn stat(key: Option<&[u8]>) -> Self {
        Packet::new_request(STAT_OPCODE, key.unwrap_or(b""), vec![], vec![], 0)
    }

    pub fn sasl_list() -> Self {
        Packet::new_request(SASL_LIST_OPCODE, b"", vec![], vec![], 0)
    }

    pub fn sasl_auth(mechanism: &[u8], payload: Vec<u8>) -> Self {
        Packet::new_request(SASL_AUTH_OPCODE, mechanism, vec![], payload, 0)
    }

    /// Decode a packet body given its already-decoded header.
    pub fn from_header(header: Header, body: Vec<u8>) -> Result<Self, ProtocolError> {
        if body.len() != header.body_len as usize {
            return Err(ProtocolError::BodySizeMismatch);
        }
        let (extras, rest) = body.split_at(header.extras_len as usize);
        let (key, value) = rest.split_at(header.key_len as usize);
        Ok(Packet {
            header,
            extras: extras.to_vec(),
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    /// Serialize the whole packet (header, extras, key, value) to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.extras.len() + self.key.len() + self.value.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.extras);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.value);
        out
    }

    pub fn status(&self) -> Status {
        Status::from(self.header.status_or_vbucket)
    }

    pub fn error_for_status(&self) -> Result<(), Status> {
        match self.status() {
            Status::Success => Ok(()),
            other => Err(other),
        }
    }

    /// Storage ops (`set`/`add`/`replace`) carry `flags` in the first four
    /// bytes of the response extras on a `get`. For storage responses the
    /// extras are empty and only the header's `cas` field matters.
    pub fn get_flags(&self) -> u32 {
        if self.extras.len() < 4 {
            return 0;
        }
        u32::from_be_bytes([self.extras[0], self.extras[1], self.extras[2], self.extras[3]])
    }

    /// The counter value returned by `incr`/`decr`.
    pub fn counter_value(&self) -> Option<u64> {
        if self.value.len() < 8 {
            return None;
        }
        let mut buf = [0_u8; 8];
        buf.copy_from_slice(&self.value[..8]);
        Some(u64::from_be_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_encode() {
        let packet = Packet::get(b"Hello");
        let bytes = packet.encode();
        let expect = vec![
            0x80, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x48, 0x65, 0x6c, 0x6c,
            0x6f,
        ];
        assert_eq!(expect, bytes);
    }

    #[test]
    fn test_add_github_example() {
        let packet = Packet::add(b"Hello", b"World".to_vec(), SetExtras::new(0xdeadbeef, 0x1c20));
        let bytes = packet.encode();
        let expect = vec![
            0x80, 0x02, 0x00, 0x05, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef,
            0x00, 0x00, 0x1c, 0x20, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x57, 0x6f, 0x72, 0x6c, 0x64,
        ];
        assert_eq!(expect, bytes);

        let header = packet.header;
        let body = bytes[24..].to_vec();
        let decoded = Packet::from_header(header, body).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_cas_in_header() {
        let packet = Packet::set(b"key", b"value".to_vec(), SetExtras::new(0, 300), 0xABCD);
        assert_eq!(packet.header.cas, 0xABCD);
    }

    #[test]
    fn test_incr_extras() {
        let packet = Packet::incr(b"counter", IncrDecrExtras::new(1, 0, 0xFFFFFFFF));
        assert_eq!(packet.extras.len(), 20);
        assert_eq!(&packet.extras[0..8], &1_u64.to_be_bytes());
        assert_eq!(&packet.extras[16..20], &0xFFFFFFFF_u32.to_be_bytes());
    }

    #[test]
    fn test_counter_value() {
        let header = Header::request(0, 0, 0, 8, 0);
        let packet = Packet::from_header(header, 42_u64.to_be_bytes().to_vec()).unwrap();
        assert_eq!(packet.counter_value(), Some(42));
    }
}
