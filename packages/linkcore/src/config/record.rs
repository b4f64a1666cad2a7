//! Fixed-size flash encoding of an [`EndpointConfig`].
//!
//! Layout: magic (u32 LE), version, fixed-width fields in declaration order,
//! checksum byte last. Strings are stored as a length byte followed by a
//! zero-padded slot of their maximum size.

use core::net::Ipv4Addr;

use embassy_time::Duration;
use heapless::{String, Vec};

use super::{
    AccessPointSettings, AuthMode, Credentials, EndpointConfig, Role, CONFIG_PAYLOAD_MAX_LEN,
    PASSWORD_MAX_LEN, SSID_MAX_LEN,
};
use crate::link::ReconnectPolicy;
use crate::session::{GateDiscipline, SessionTimeouts};

pub const RECORD_MAGIC: u32 = u32::from_le_bytes(*b"LRLK");
pub const RECORD_VERSION: u8 = 2;
pub const RECORD_LEN: usize = 320;

const RECONNECT_IMMEDIATE: u8 = 0;
const RECONNECT_CAPPED: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordError {
    Erased,
    BadMagic,
    BadVersion,
    BadChecksum,
    BadField,
}

impl RecordError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Erased => "erased",
            Self::BadMagic => "bad_magic",
            Self::BadVersion => "bad_version",
            Self::BadChecksum => "bad_checksum",
            Self::BadField => "bad_field",
        }
    }
}

pub fn encode(config: &EndpointConfig) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    let mut writer = Writer {
        bytes: &mut record[..RECORD_LEN - 1],
        pos: 0,
    };

    writer.put_u32(RECORD_MAGIC);
    writer.put_u8(RECORD_VERSION);
    writer.put_u8(config.role.to_persisted());
    writer.put_u8(config.gate.to_persisted());
    writer.put_u16(config.port);
    writer.put_slice(&config.peer.octets());
    writer.put_u32(duration_ms(config.send_interval));
    writer.put_u32(duration_ms(config.poll_delay));
    for limit in [
        config.timeouts.accept,
        config.timeouts.connect,
        config.timeouts.receive,
        config.timeouts.send,
    ] {
        writer.put_u32(limit.map(duration_ms).unwrap_or(0));
    }
    match config.reconnect {
        ReconnectPolicy::Immediate => {
            writer.put_u8(RECONNECT_IMMEDIATE);
            writer.put_u32(0);
            writer.put_u32(0);
        }
        ReconnectPolicy::CappedExponential { initial, max } => {
            writer.put_u8(RECONNECT_CAPPED);
            writer.put_u32(duration_ms(initial));
            writer.put_u32(duration_ms(max));
        }
    }
    writer.put_credentials(&config.station);
    match &config.access_point {
        Some(ap) => {
            writer.put_u8(1);
            writer.put_credentials(&ap.credentials);
            writer.put_u8(ap.max_connections);
            writer.put_u8(u8::from(ap.long_range));
        }
        None => {
            writer.put_u8(0);
            writer.skip(1 + SSID_MAX_LEN + 1 + PASSWORD_MAX_LEN + 1 + 1 + 1);
        }
    }
    writer.put_text(&config.payload, CONFIG_PAYLOAD_MAX_LEN);

    record[RECORD_LEN - 1] = checksum8(&record[..RECORD_LEN - 1]);
    record
}

pub fn decode(record: &[u8; RECORD_LEN]) -> Result<EndpointConfig, RecordError> {
    if record.iter().all(|&byte| byte == 0xFF) {
        return Err(RecordError::Erased);
    }
    let mut reader = Reader {
        bytes: &record[..RECORD_LEN - 1],
        pos: 0,
    };
    if reader.u32()? != RECORD_MAGIC {
        return Err(RecordError::BadMagic);
    }
    if reader.u8()? != RECORD_VERSION {
        return Err(RecordError::BadVersion);
    }
    if record[RECORD_LEN - 1] != checksum8(&record[..RECORD_LEN - 1]) {
        return Err(RecordError::BadChecksum);
    }

    let role = Role::from_persisted(reader.u8()?).ok_or(RecordError::BadField)?;
    let gate = GateDiscipline::from_persisted(reader.u8()?).ok_or(RecordError::BadField)?;
    let port = reader.u16()?;
    let peer = Ipv4Addr::new(reader.u8()?, reader.u8()?, reader.u8()?, reader.u8()?);
    let send_interval = Duration::from_millis(u64::from(reader.u32()?));
    let poll_delay = Duration::from_millis(u64::from(reader.u32()?));
    let timeouts = SessionTimeouts {
        accept: reader.optional_ms()?,
        connect: reader.optional_ms()?,
        receive: reader.optional_ms()?,
        send: reader.optional_ms()?,
    };
    let reconnect_kind = reader.u8()?;
    let initial = Duration::from_millis(u64::from(reader.u32()?));
    let max = Duration::from_millis(u64::from(reader.u32()?));
    let reconnect = match reconnect_kind {
        RECONNECT_IMMEDIATE => ReconnectPolicy::Immediate,
        RECONNECT_CAPPED => ReconnectPolicy::CappedExponential { initial, max },
        _ => return Err(RecordError::BadField),
    };
    let station = reader.credentials()?;
    let access_point = match reader.u8()? {
        0 => None,
        1 => {
            let credentials = reader.credentials()?;
            let max_connections = reader.u8()?;
            let long_range = match reader.u8()? {
                0 => false,
                1 => true,
                _ => return Err(RecordError::BadField),
            };
            Some(AccessPointSettings {
                credentials,
                max_connections,
                long_range,
            })
        }
        _ => return Err(RecordError::BadField),
    };
    let payload = Vec::from_slice(reader.text(CONFIG_PAYLOAD_MAX_LEN)?)
        .map_err(|_| RecordError::BadField)?;

    Ok(EndpointConfig {
        role,
        station,
        access_point,
        port,
        peer,
        payload,
        send_interval,
        poll_delay,
        timeouts,
        reconnect,
        gate,
    })
}

pub fn checksum8(bytes: &[u8]) -> u8 {
    let mut acc = 0x5Au8;
    for &byte in bytes {
        acc ^= byte.rotate_left(1);
    }
    acc
}

fn duration_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

struct Writer<'b> {
    bytes: &'b mut [u8],
    pos: usize,
}

// Field widths are fixed and sum to less than RECORD_LEN, so slicing here
// cannot go out of bounds.
impl Writer<'_> {
    fn put_slice(&mut self, data: &[u8]) {
        self.bytes[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    fn skip(&mut self, len: usize) {
        self.pos += len;
    }

    fn put_u8(&mut self, value: u8) {
        self.put_slice(&[value]);
    }

    fn put_u16(&mut self, value: u16) {
        self.put_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.put_slice(&value.to_le_bytes());
    }

    fn put_text(&mut self, text: &[u8], slot: usize) {
        let len = text.len().min(slot);
        self.put_u8(len as u8);
        self.put_slice(&text[..len]);
        self.skip(slot - len);
    }

    fn put_credentials(&mut self, credentials: &Credentials) {
        self.put_text(credentials.ssid.as_bytes(), SSID_MAX_LEN);
        self.put_text(credentials.password.as_bytes(), PASSWORD_MAX_LEN);
        self.put_u8(credentials.auth.to_persisted());
    }
}

struct Reader<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> Reader<'b> {
    fn take(&mut self, len: usize) -> Result<&'b [u8], RecordError> {
        let bytes = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(RecordError::BadField)?;
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, RecordError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, RecordError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, RecordError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn optional_ms(&mut self) -> Result<Option<Duration>, RecordError> {
        Ok(match self.u32()? {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        })
    }

    fn text(&mut self, slot: usize) -> Result<&'b [u8], RecordError> {
        let len = usize::from(self.u8()?);
        if len > slot {
            return Err(RecordError::BadField);
        }
        let stored = self.take(slot)?;
        Ok(&stored[..len])
    }

    fn string<const N: usize>(&mut self) -> Result<String<N>, RecordError> {
        let text = core::str::from_utf8(self.text(N)?).map_err(|_| RecordError::BadField)?;
        String::try_from(text).map_err(|_| RecordError::BadField)
    }

    fn credentials(&mut self) -> Result<Credentials, RecordError> {
        let ssid = self.string::<SSID_MAX_LEN>()?;
        let password = self.string::<PASSWORD_MAX_LEN>()?;
        let auth = AuthMode::from_persisted(self.u8()?).ok_or(RecordError::BadField)?;
        Ok(Credentials {
            ssid,
            password,
            auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hybrid_config() -> EndpointConfig {
        let station = Credentials::new("upstream", "upstream-pass", AuthMode::Wpa2Personal).unwrap();
        let mut config = EndpointConfig::for_role(Role::HybridTcpClient, station);
        config.access_point = Some(AccessPointSettings {
            credentials: Credentials::new("ESP32", "11112222", AuthMode::WpaWpa2Personal)
                .unwrap(),
            max_connections: 4,
            long_range: true,
        });
        config.timeouts.connect = Some(Duration::from_secs(10));
        config
    }

    #[test]
    fn decodes_what_it_encodes() {
        let hybrid = hybrid_config();
        assert_eq!(decode(&encode(&hybrid)), Ok(hybrid));

        let station = Credentials::new("open-net", "", AuthMode::Wpa2Personal).unwrap();
        let mut receiver = EndpointConfig::for_role(Role::StationUdpReceiver, station);
        receiver.reconnect = ReconnectPolicy::Immediate;
        assert_eq!(decode(&encode(&receiver)), Ok(receiver));
    }

    #[test]
    fn access_point_long_range_flag_persists() {
        let mut config = hybrid_config();
        if let Some(ap) = config.access_point.as_mut() {
            ap.long_range = false;
        }
        let decoded = decode(&encode(&config)).unwrap();
        assert_eq!(decoded.access_point.map(|ap| ap.long_range), Some(false));
    }

    #[test]
    fn erased_flash_is_not_a_record() {
        assert_eq!(decode(&[0xFF; RECORD_LEN]), Err(RecordError::Erased));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut record = encode(&hybrid_config());
        record[0] ^= 0x01;
        assert_eq!(decode(&record), Err(RecordError::BadMagic));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut record = encode(&hybrid_config());
        record[4] = RECORD_VERSION + 1;
        assert_eq!(decode(&record), Err(RecordError::BadVersion));
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let mut record = encode(&hybrid_config());
        record[40] ^= 0x10;
        assert_eq!(decode(&record), Err(RecordError::BadChecksum));
    }

    #[test]
    fn unknown_role_byte_is_a_bad_field() {
        let mut record = encode(&hybrid_config());
        record[5] = 9;
        record[RECORD_LEN - 1] = checksum8(&record[..RECORD_LEN - 1]);
        assert_eq!(decode(&record), Err(RecordError::BadField));
    }
}
