//! Endpoint configuration: role, credentials, peer and timing.
//!
//! Fixed at boot. Built from compile-time overrides or decoded from the flash
//! record in [`record`].

use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::str::FromStr;

use embassy_time::Duration;
use heapless::{String, Vec};

use crate::link::ReconnectPolicy;
use crate::session::{GateDiscipline, SessionTimeouts, MAX_PAYLOAD_LEN};

pub mod record;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const CONFIG_PAYLOAD_MAX_LEN: usize = 64;
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_AP_MAX_CONNECTIONS: u8 = 4;
pub const AP_MAX_CONNECTIONS_LIMIT: u8 = 10;

pub const TCP_CLIENT_PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 2);
pub const UDP_SENDER_PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 255);
pub const TCP_CLIENT_PAYLOAD: &[u8] = b"Hello from TCP client!";
pub const UDP_SENDER_PAYLOAD: &[u8] = b"Hi there! Got the message :-)";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    StationTcpServer,
    HybridTcpClient,
    StationUdpReceiver,
    HybridUdpSender,
}

impl Role {
    pub const ALL: [Self; 4] = [
        Self::StationTcpServer,
        Self::HybridTcpClient,
        Self::StationUdpReceiver,
        Self::HybridUdpSender,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StationTcpServer => "station-tcp-server",
            Self::HybridTcpClient => "hybrid-tcp-client",
            Self::StationUdpReceiver => "station-udp-receiver",
            Self::HybridUdpSender => "hybrid-udp-sender",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == name)
    }

    /// Hybrid roles also host an access point for their peer.
    pub const fn is_hybrid(self) -> bool {
        matches!(self, Self::HybridTcpClient | Self::HybridUdpSender)
    }

    pub const fn default_gate(self) -> GateDiscipline {
        if self.is_hybrid() {
            GateDiscipline::StartupOnly
        } else {
            GateDiscipline::EveryCycle
        }
    }

    pub const fn to_persisted(self) -> u8 {
        match self {
            Self::StationTcpServer => 1,
            Self::HybridTcpClient => 2,
            Self::StationUdpReceiver => 3,
            Self::HybridUdpSender => 4,
        }
    }

    pub const fn from_persisted(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::StationTcpServer),
            2 => Some(Self::HybridTcpClient),
            3 => Some(Self::StationUdpReceiver),
            4 => Some(Self::HybridUdpSender),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Open,
    Wpa2Personal,
    WpaWpa2Personal,
}

impl AuthMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Wpa2Personal => "wpa2_personal",
            Self::WpaWpa2Personal => "wpa_wpa2_personal",
        }
    }

    pub const fn to_persisted(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Wpa2Personal => 1,
            Self::WpaWpa2Personal => 2,
        }
    }

    pub const fn from_persisted(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Open),
            1 => Some(Self::Wpa2Personal),
            2 => Some(Self::WpaWpa2Personal),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String<SSID_MAX_LEN>,
    pub password: String<PASSWORD_MAX_LEN>,
    pub auth: AuthMode,
}

impl Credentials {
    /// An empty password selects open authentication, otherwise `secured`.
    pub fn new(ssid: &str, password: &str, secured: AuthMode) -> Result<Self, ConfigError> {
        if ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        let ssid = String::try_from(ssid).map_err(|_| ConfigError::SsidTooLong)?;
        let password_text =
            String::try_from(password).map_err(|_| ConfigError::PasswordTooLong)?;
        let auth = if password.is_empty() {
            AuthMode::Open
        } else {
            secured
        };
        Ok(Self {
            ssid,
            password: password_text,
            auth,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        if self.auth != AuthMode::Open && self.password.len() < PASSWORD_MIN_LEN {
            return Err(ConfigError::PasswordTooShort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub credentials: Credentials,
    pub max_connections: u8,
    /// Restricts the access point to the Espressif long-range PHY.
    pub long_range: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub role: Role,
    pub station: Credentials,
    pub access_point: Option<AccessPointSettings>,
    pub port: u16,
    /// Destination for the sending roles. Unused by the receiving ones.
    pub peer: Ipv4Addr,
    pub payload: Vec<u8, CONFIG_PAYLOAD_MAX_LEN>,
    pub send_interval: Duration,
    pub poll_delay: Duration,
    pub timeouts: SessionTimeouts,
    pub reconnect: ReconnectPolicy,
    pub gate: GateDiscipline,
}

impl EndpointConfig {
    /// Default settings for `role` on top of the given station credentials.
    pub fn for_role(role: Role, station: Credentials) -> Self {
        let (peer, payload) = match role {
            Role::HybridTcpClient => (TCP_CLIENT_PEER, TCP_CLIENT_PAYLOAD),
            Role::HybridUdpSender => (UDP_SENDER_PEER, UDP_SENDER_PAYLOAD),
            Role::StationTcpServer | Role::StationUdpReceiver => (Ipv4Addr::UNSPECIFIED, &[][..]),
        };
        let send_interval = match role {
            Role::HybridTcpClient => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        };

        Self {
            role,
            station,
            access_point: None,
            port: DEFAULT_PORT,
            peer,
            payload: Vec::from_slice(payload).unwrap_or_default(),
            send_interval,
            poll_delay: Duration::from_millis(100),
            timeouts: SessionTimeouts::default(),
            reconnect: ReconnectPolicy::default(),
            gate: role.default_gate(),
        }
    }

    pub fn remote(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.peer, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.station.validate()?;
        if self.port == 0 {
            return Err(ConfigError::BadPort);
        }

        match (self.role.is_hybrid(), &self.access_point) {
            (true, None) => return Err(ConfigError::MissingAccessPoint),
            (_, Some(ap)) => {
                ap.credentials.validate()?;
                if ap.max_connections == 0 || ap.max_connections > AP_MAX_CONNECTIONS_LIMIT {
                    return Err(ConfigError::BadMaxConnections);
                }
            }
            (false, None) => {}
        }

        if matches!(self.role, Role::HybridTcpClient | Role::HybridUdpSender) {
            if self.peer.is_unspecified() {
                return Err(ConfigError::BadPeer);
            }
            if self.payload.is_empty() {
                return Err(ConfigError::EmptyPayload);
            }
            if self.payload.len() > MAX_PAYLOAD_LEN {
                return Err(ConfigError::PayloadTooLong);
            }
        }

        if let ReconnectPolicy::CappedExponential { initial, max } = self.reconnect {
            if initial > max {
                return Err(ConfigError::BadReconnect);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    MissingSsid,
    SsidTooLong,
    PasswordTooLong,
    PasswordTooShort,
    UnknownRole,
    BadPeer,
    BadPort,
    MissingAccessPoint,
    BadMaxConnections,
    EmptyPayload,
    PayloadTooLong,
    BadReconnect,
    BadLongRange,
}

impl ConfigError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingSsid => "missing_ssid",
            Self::SsidTooLong => "ssid_too_long",
            Self::PasswordTooLong => "password_too_long",
            Self::PasswordTooShort => "password_too_short",
            Self::UnknownRole => "unknown_role",
            Self::BadPeer => "bad_peer",
            Self::BadPort => "bad_port",
            Self::MissingAccessPoint => "missing_access_point",
            Self::BadMaxConnections => "bad_max_connections",
            Self::EmptyPayload => "empty_payload",
            Self::PayloadTooLong => "payload_too_long",
            Self::BadReconnect => "bad_reconnect",
            Self::BadLongRange => "bad_long_range",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw text settings, usually from `option_env!` at build time.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigOverrides<'a> {
    pub role: Option<&'a str>,
    pub sta_ssid: Option<&'a str>,
    pub sta_password: Option<&'a str>,
    pub ap_ssid: Option<&'a str>,
    pub ap_password: Option<&'a str>,
    /// `on` or `off`; long range is on when unset.
    pub ap_long_range: Option<&'a str>,
    pub peer: Option<&'a str>,
    pub port: Option<&'a str>,
    pub payload: Option<&'a str>,
    /// `immediate` or `backoff`.
    pub reconnect: Option<&'a str>,
}

impl ConfigOverrides<'_> {
    /// `Ok(None)` when no station SSID was supplied, meaning the caller should
    /// fall back to the persisted record.
    pub fn build(&self) -> Result<Option<EndpointConfig>, ConfigError> {
        let Some(sta_ssid) = self.sta_ssid else {
            return Ok(None);
        };

        let role = match self.role {
            Some(name) => Role::from_name(name).ok_or(ConfigError::UnknownRole)?,
            None => Role::StationTcpServer,
        };
        let station = Credentials::new(
            sta_ssid,
            self.sta_password.unwrap_or(""),
            AuthMode::Wpa2Personal,
        )?;
        let mut config = EndpointConfig::for_role(role, station);

        if let Some(ap_ssid) = self.ap_ssid {
            config.access_point = Some(AccessPointSettings {
                credentials: Credentials::new(
                    ap_ssid,
                    self.ap_password.unwrap_or(""),
                    AuthMode::WpaWpa2Personal,
                )?,
                max_connections: DEFAULT_AP_MAX_CONNECTIONS,
                long_range: match self.ap_long_range {
                    None | Some("on") => true,
                    Some("off") => false,
                    Some(_) => return Err(ConfigError::BadLongRange),
                },
            });
        }
        if let Some(peer) = self.peer {
            config.peer = Ipv4Addr::from_str(peer).map_err(|_| ConfigError::BadPeer)?;
        }
        if let Some(port) = self.port {
            config.port = port.parse().map_err(|_| ConfigError::BadPort)?;
        }
        if let Some(payload) = self.payload {
            config.payload =
                Vec::from_slice(payload.as_bytes()).map_err(|_| ConfigError::PayloadTooLong)?;
        }
        match self.reconnect {
            None | Some("backoff") => {}
            Some("immediate") => config.reconnect = ReconnectPolicy::Immediate,
            Some(_) => return Err(ConfigError::BadReconnect),
        }

        config.validate()?;
        Ok(Some(config))
    }
}
