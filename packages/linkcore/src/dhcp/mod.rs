//! Address assignment for clients of the hybrid roles' access point.
//!
//! A fixed pool starting at [`DhcpConfig::pool_start`], one slot per
//! address, bound to the client's hardware address. Leases are never expired
//! by time; a client keeps its slot until it releases or declines it, and
//! offers that were never requested are reclaimed when the pool runs out.

use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, error, info, warn};

use crate::session::transport::{DatagramSocket, SocketError};

pub mod packet;

use packet::{ClientMessage, MessageKind, ServerIdentity, CLIENT_PORT, MAX_MESSAGE_LEN, SERVER_PORT};

pub const POOL_CAPACITY: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DhcpConfig {
    pub server: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub lease_secs: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Lease {
    mac: [u8; 6],
    bound: bool,
}

#[derive(Clone, Debug)]
pub struct LeasePool {
    start: u32,
    slots: [Option<Lease>; POOL_CAPACITY],
}

impl LeasePool {
    pub const fn new(start: Ipv4Addr) -> Self {
        Self {
            start: start.to_bits(),
            slots: [None; POOL_CAPACITY],
        }
    }

    /// Address `mac` holds, offered or bound.
    pub fn address_of(&self, mac: [u8; 6]) -> Option<Ipv4Addr> {
        self.slot_of(mac).map(|index| self.address(index))
    }

    /// Picks an address for `mac`: its current slot, a free one, or an
    /// unrequested offer made to someone else.
    pub fn offer(&mut self, mac: [u8; 6]) -> Option<Ipv4Addr> {
        if let Some(index) = self.slot_of(mac) {
            return Some(self.address(index));
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|slot| matches!(slot, Some(lease) if !lease.bound))
            })?;
        self.slots[index] = Some(Lease { mac, bound: false });
        Some(self.address(index))
    }

    /// Binds `requested` to `mac` if it is in the pool and not held by
    /// another client.
    pub fn bind(&mut self, mac: [u8; 6], requested: Ipv4Addr) -> bool {
        let Some(index) = self.index_of(requested) else {
            return false;
        };
        match self.slots[index] {
            Some(lease) if lease.mac != mac => false,
            _ => {
                self.release(mac);
                self.slots[index] = Some(Lease { mac, bound: true });
                true
            }
        }
    }

    pub fn release(&mut self, mac: [u8; 6]) {
        for slot in &mut self.slots {
            if matches!(slot, Some(lease) if lease.mac == mac) {
                *slot = None;
            }
        }
    }

    /// Drops an offer the client turned down by picking another server.
    pub fn withdraw(&mut self, mac: [u8; 6]) {
        for slot in &mut self.slots {
            if matches!(slot, Some(lease) if lease.mac == mac && !lease.bound) {
                *slot = None;
            }
        }
    }

    fn slot_of(&self, mac: [u8; 6]) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(lease) if lease.mac == mac))
    }

    fn index_of(&self, address: Ipv4Addr) -> Option<usize> {
        let offset = address.to_bits().checked_sub(self.start)?;
        let index = usize::try_from(offset).ok()?;
        (index < POOL_CAPACITY).then_some(index)
    }

    fn address(&self, index: usize) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.start + index as u32)
    }
}

/// A reply ready to go out: its length in the output buffer and where to
/// send it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    pub len: usize,
    pub destination: SocketAddrV4,
}

pub struct DhcpServer {
    identity: ServerIdentity,
    pool: LeasePool,
}

impl DhcpServer {
    pub const fn new(config: DhcpConfig) -> Self {
        Self {
            identity: ServerIdentity {
                address: config.server,
                netmask: config.netmask,
                lease_secs: config.lease_secs,
            },
            pool: LeasePool::new(config.pool_start),
        }
    }

    pub fn pool(&self) -> &LeasePool {
        &self.pool
    }

    /// Answers one client message. `None` when the message needs no reply
    /// or cannot be parsed.
    pub fn handle(&mut self, request: &[u8], out: &mut [u8]) -> Option<Reply> {
        let message = match packet::parse(request) {
            Ok(message) => message,
            Err(err) => {
                debug!("dhcp: dropped len={} err={}", request.len(), err.as_str());
                return None;
            }
        };
        let mac = message.mac();

        let (kind, address) = match message.kind {
            MessageKind::Discover => match self.pool.offer(mac) {
                Some(address) => (MessageKind::Offer, address),
                None => {
                    warn!("dhcp: pool exhausted mac={}", MacLabel(mac));
                    return None;
                }
            },
            MessageKind::Request => {
                if message
                    .server_id
                    .is_some_and(|id| id != self.identity.address)
                {
                    self.pool.withdraw(mac);
                    return None;
                }
                let requested = message
                    .requested
                    .or_else(|| (!message.ciaddr.is_unspecified()).then_some(message.ciaddr))
                    .or_else(|| self.pool.address_of(mac));
                match requested {
                    Some(address) if self.pool.bind(mac, address) => (MessageKind::Ack, address),
                    _ => (MessageKind::Nak, Ipv4Addr::UNSPECIFIED),
                }
            }
            MessageKind::Release | MessageKind::Decline => {
                self.pool.release(mac);
                info!(
                    "dhcp: {} mac={}",
                    message.kind.as_str(),
                    MacLabel(mac)
                );
                return None;
            }
            _ => return None,
        };

        let len = match packet::encode_reply(&message, kind, address, &self.identity, out) {
            Ok(len) => len,
            Err(err) => {
                error!("dhcp: encode err={}", err.as_str());
                return None;
            }
        };
        info!(
            "dhcp: {} mac={} ip={} xid={:08x}",
            kind.as_str(),
            MacLabel(mac),
            address,
            message.xid
        );
        Some(Reply {
            len,
            destination: reply_destination(&message, kind),
        })
    }

    /// Serves the pool until the socket fails in a way that cannot be
    /// retried, returning that error.
    pub async fn serve<D: DatagramSocket>(&mut self, socket: &mut D) -> SocketError {
        if let Err(err) = socket.bind(SERVER_PORT).await {
            error!("dhcp: bind failed port={} err={}", SERVER_PORT, err);
            return err;
        }
        info!(
            "dhcp: serving server={} pool_start={} pool_len={}",
            self.identity.address,
            self.pool.address(0),
            POOL_CAPACITY
        );

        let mut request = [0u8; MAX_MESSAGE_LEN];
        let mut reply = [0u8; MAX_MESSAGE_LEN];
        loop {
            let len = match socket.receive_from(&mut request).await {
                Ok((len, _)) => len,
                Err(err) if err.is_setup() => return err,
                Err(err) => {
                    warn!("dhcp: receive err={}", err);
                    continue;
                }
            };
            let Some(answer) = self.handle(&request[..len], &mut reply) else {
                continue;
            };
            if let Err(err) = socket
                .send_to(answer.destination, &reply[..answer.len])
                .await
            {
                warn!("dhcp: send err={} to={}", err, answer.destination);
            }
        }
    }
}

/// Clients that already own an address get unicast; everyone else, and
/// every NAK, goes to the broadcast address.
fn reply_destination(message: &ClientMessage, kind: MessageKind) -> SocketAddrV4 {
    let address = if kind == MessageKind::Nak
        || message.wants_broadcast()
        || message.ciaddr.is_unspecified()
    {
        Ipv4Addr::BROADCAST
    } else {
        message.ciaddr
    };
    SocketAddrV4::new(address, CLIENT_PORT)
}

struct MacLabel([u8; 6]);

impl fmt::Display for MacLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
