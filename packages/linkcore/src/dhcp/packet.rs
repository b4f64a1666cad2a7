//! BOOTP/DHCP wire format, limited to what a single-subnet server needs.

use core::net::Ipv4Addr;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;
/// Largest message a client must accept without negotiating.
pub const MAX_MESSAGE_LEN: usize = 576;
/// BOOTP replies are padded to at least this size.
pub const MIN_REPLY_LEN: usize = 300;

const OP_REQUEST: u8 = 1;
const OP_REPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;
const FIXED_LEN: usize = 236;
const OPTIONS_START: usize = FIXED_LEN + 4;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const FLAG_BROADCAST: u16 = 0x8000;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_END: u8 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageKind {
    pub const fn code(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Offer => "offer",
            Self::Request => "request",
            Self::Decline => "decline",
            Self::Ack => "ack",
            Self::Nak => "nak",
            Self::Release => "release",
            Self::Inform => "inform",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketError {
    Truncated,
    NotARequest,
    NotEthernet,
    BadCookie,
    NoMessageType,
    BufferTooSmall,
}

impl PacketError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::NotARequest => "not_a_request",
            Self::NotEthernet => "not_ethernet",
            Self::BadCookie => "bad_cookie",
            Self::NoMessageType => "no_message_type",
            Self::BufferTooSmall => "buffer_too_small",
        }
    }
}

/// The fields of a client message the server acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientMessage {
    pub kind: MessageKind,
    pub xid: u32,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub requested: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
}

impl ClientMessage {
    pub fn mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        mac
    }

    pub fn wants_broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }
}

pub fn parse(bytes: &[u8]) -> Result<ClientMessage, PacketError> {
    if bytes.len() < OPTIONS_START {
        return Err(PacketError::Truncated);
    }
    if bytes[0] != OP_REQUEST {
        return Err(PacketError::NotARequest);
    }
    if bytes[1] != HTYPE_ETHERNET || bytes[2] != HLEN_ETHERNET {
        return Err(PacketError::NotEthernet);
    }
    if bytes[FIXED_LEN..OPTIONS_START] != MAGIC_COOKIE {
        return Err(PacketError::BadCookie);
    }

    let mut chaddr = [0u8; 16];
    chaddr.copy_from_slice(&bytes[28..44]);
    let mut kind = None;
    let mut requested = None;
    let mut server_id = None;

    let mut pos = OPTIONS_START;
    while pos < bytes.len() {
        let code = bytes[pos];
        if code == OPT_END {
            break;
        }
        if code == OPT_PAD {
            pos += 1;
            continue;
        }
        let len = usize::from(*bytes.get(pos + 1).ok_or(PacketError::Truncated)?);
        let value = bytes
            .get(pos + 2..pos + 2 + len)
            .ok_or(PacketError::Truncated)?;
        match (code, value) {
            (OPT_MESSAGE_TYPE, [code]) => kind = MessageKind::from_code(*code),
            (OPT_REQUESTED_IP, &[a, b, c, d]) => requested = Some(Ipv4Addr::new(a, b, c, d)),
            (OPT_SERVER_ID, &[a, b, c, d]) => server_id = Some(Ipv4Addr::new(a, b, c, d)),
            _ => {}
        }
        pos += 2 + len;
    }

    Ok(ClientMessage {
        kind: kind.ok_or(PacketError::NoMessageType)?,
        xid: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        flags: u16::from_be_bytes([bytes[10], bytes[11]]),
        ciaddr: ipv4_at(bytes, 12),
        chaddr,
        requested,
        server_id,
    })
}

/// Server-side values stamped into every reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerIdentity {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub lease_secs: u32,
}

/// Writes a reply to `request` into `out` and returns its length.
/// `yiaddr` is the address being offered or acknowledged.
pub fn encode_reply(
    request: &ClientMessage,
    kind: MessageKind,
    yiaddr: Ipv4Addr,
    server: &ServerIdentity,
    out: &mut [u8],
) -> Result<usize, PacketError> {
    if out.len() < MIN_REPLY_LEN {
        return Err(PacketError::BufferTooSmall);
    }
    out.fill(0);
    out[0] = OP_REPLY;
    out[1] = HTYPE_ETHERNET;
    out[2] = HLEN_ETHERNET;
    out[4..8].copy_from_slice(&request.xid.to_be_bytes());
    out[10..12].copy_from_slice(&request.flags.to_be_bytes());
    if kind != MessageKind::Nak {
        out[12..16].copy_from_slice(&request.ciaddr.octets());
        out[16..20].copy_from_slice(&yiaddr.octets());
        out[20..24].copy_from_slice(&server.address.octets());
    }
    out[28..44].copy_from_slice(&request.chaddr);
    out[FIXED_LEN..OPTIONS_START].copy_from_slice(&MAGIC_COOKIE);

    let mut pos = OPTIONS_START;
    let mut put = |code: u8, value: &[u8]| {
        out[pos] = code;
        out[pos + 1] = value.len() as u8;
        out[pos + 2..pos + 2 + value.len()].copy_from_slice(value);
        pos += 2 + value.len();
    };
    put(OPT_MESSAGE_TYPE, &[kind.code()]);
    put(OPT_SERVER_ID, &server.address.octets());
    if kind != MessageKind::Nak {
        put(OPT_LEASE_TIME, &server.lease_secs.to_be_bytes());
        put(OPT_SUBNET_MASK, &server.netmask.octets());
        put(OPT_ROUTER, &server.address.octets());
    }
    out[pos] = OPT_END;

    Ok((pos + 1).max(MIN_REPLY_LEN))
}

fn ipv4_at(bytes: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3])
}
