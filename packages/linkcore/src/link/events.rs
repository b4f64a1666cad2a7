use core::net::Ipv4Addr;

use embassy_time::Duration;

/// Observations fed to the supervisor by the radio event pump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Radio is up in station (or station + access point) mode.
    StationStarted,
    /// DHCP handed the station an address.
    AddressAcquired(Ipv4Addr),
    /// Association dropped or an association attempt failed. `reason` is the
    /// raw 802.11 / vendor disconnect code, `0` when unknown.
    LinkLost { reason: u8 },
    /// A backoff delay requested through [`LinkDirective::RetryAfter`] elapsed.
    RetryDue,
}

impl LinkEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StationStarted => "station_started",
            Self::AddressAcquired(_) => "address_acquired",
            Self::LinkLost { .. } => "link_lost",
            Self::RetryDue => "retry_due",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected(Ipv4Addr),
    Disconnected,
}

impl LinkState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected(_) => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub const fn address(self) -> Option<Ipv4Addr> {
        match self {
            Self::Connected(address) => Some(address),
            _ => None,
        }
    }
}

/// What the event pump has to do after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkDirective {
    None,
    /// Issue an association request now.
    Connect,
    /// Sleep for the delay, then feed [`LinkEvent::RetryDue`].
    RetryAfter(Duration),
}

impl LinkDirective {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Connect => "connect",
            Self::RetryAfter(_) => "retry_after",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Applied,
    /// The event has no meaning in the current state.
    Ignored,
}

impl StepStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Ignored => "ignored",
        }
    }
}

pub fn disconnect_reason_label(reason: u8) -> &'static str {
    match reason {
        0 => "unknown",
        2 => "auth_expire",
        3 => "auth_leave",
        4 => "assoc_expire",
        8 => "assoc_leave",
        15 => "4way_handshake_timeout",
        200 => "beacon_timeout",
        201 => "no_ap_found",
        202 => "auth_fail",
        203 => "assoc_fail",
        204 => "handshake_timeout",
        205 => "connection_fail",
        210 => "no_ap_found_compatible_security",
        211 => "no_ap_found_authmode_threshold",
        212 => "no_ap_found_rssi_threshold",
        _ => "other",
    }
}
