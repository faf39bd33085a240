//! Host network classification.
//!
//! The classifier reads a snapshot of the host's interfaces through an
//! [`InterfaceSource`] and maps the interface carrying the default route to a
//! [`NetworkClass`]. It never touches engine state.

mod sysfs;

pub use sysfs::SysfsSource;

use serde::Serialize;
use std::fmt;

/// Access technology of the active network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NetworkClass {
    #[serde(rename = "WIFI")]
    Wifi,
    #[serde(rename = "ETHERNET")]
    Ethernet,
    #[serde(rename = "2G")]
    Cellular2g,
    #[serde(rename = "3G")]
    Cellular3g,
    /// Reported as `LTE`, matching what the bridge sends.
    #[serde(rename = "LTE")]
    Cellular4g,
    #[serde(rename = "5G")]
    Cellular5g,
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl NetworkClass {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkClass::Wifi => "WIFI",
            NetworkClass::Ethernet => "ETHERNET",
            NetworkClass::Cellular2g => "2G",
            NetworkClass::Cellular3g => "3G",
            NetworkClass::Cellular4g => "LTE",
            NetworkClass::Cellular5g => "5G",
            NetworkClass::None => "NONE",
            NetworkClass::Unknown => "UNKNOWN",
        }
    }

    pub fn is_connected(self) -> bool {
        self != NetworkClass::None
    }

    pub fn is_cellular(self) -> bool {
        matches!(
            self,
            NetworkClass::Cellular2g
                | NetworkClass::Cellular3g
                | NetworkClass::Cellular4g
                | NetworkClass::Cellular5g
        )
    }
}

impl fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link layer of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Loopback,
    Ethernet,
    Wifi,
    Cellular,
    Tunnel,
    Other,
}

/// Radio access technology reported by a cellular modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioTech {
    Gprs,
    Edge,
    Cdma,
    OneXRtt,
    Iden,
    Umts,
    Evdo0,
    EvdoA,
    EvdoB,
    Hsdpa,
    Hsupa,
    Hspa,
    Ehrpd,
    HspaPlus,
    Lte,
    Nr,
}

impl RadioTech {
    pub fn class(self) -> NetworkClass {
        use RadioTech::*;
        match self {
            Gprs | Edge | Cdma | OneXRtt | Iden => NetworkClass::Cellular2g,
            Umts | Evdo0 | EvdoA | EvdoB | Hsdpa | Hsupa | Hspa | Ehrpd | HspaPlus => {
                NetworkClass::Cellular3g
            }
            Lte => NetworkClass::Cellular4g,
            Nr => NetworkClass::Cellular5g,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub kind: LinkKind,
    pub is_up: bool,
    pub radio: Option<RadioTech>,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>, kind: LinkKind, is_up: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            is_up,
            radio: None,
        }
    }

    pub fn with_radio(mut self, radio: RadioTech) -> Self {
        self.radio = Some(radio);
        self
    }

    fn is_active(&self) -> bool {
        self.is_up && self.kind != LinkKind::Loopback
    }

    fn class(&self) -> NetworkClass {
        match self.kind {
            LinkKind::Wifi => NetworkClass::Wifi,
            LinkKind::Ethernet => NetworkClass::Ethernet,
            LinkKind::Cellular => self.radio.map_or(NetworkClass::Unknown, RadioTech::class),
            LinkKind::Loopback | LinkKind::Tunnel | LinkKind::Other => NetworkClass::Unknown,
        }
    }
}

/// Interfaces as seen at one instant.
#[derive(Debug, Clone, Default)]
pub struct InterfaceSnapshot {
    pub interfaces: Vec<InterfaceInfo>,
    /// Name of the interface carrying the default route, if known.
    pub default_route: Option<String>,
}

pub trait InterfaceSource: Send + Sync {
    /// `None` when this host cannot be inspected.
    fn snapshot(&self) -> Option<InterfaceSnapshot>;
}

/// Fixed snapshot, for hosts where interface data comes from elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticSource(pub Option<InterfaceSnapshot>);

impl InterfaceSource for StaticSource {
    fn snapshot(&self) -> Option<InterfaceSnapshot> {
        self.0.clone()
    }
}

/// Source for the current host.
pub fn host_source() -> Box<dyn InterfaceSource> {
    Box::new(SysfsSource::default())
}

pub fn classify_snapshot(snapshot: &InterfaceSnapshot) -> NetworkClass {
    let active: Vec<&InterfaceInfo> = snapshot
        .interfaces
        .iter()
        .filter(|i| i.is_active())
        .collect();

    let chosen = snapshot
        .default_route
        .as_deref()
        .and_then(|name| active.iter().find(|i| i.name == name))
        .or_else(|| active.first());

    match chosen {
        Some(iface) => iface.class(),
        None => NetworkClass::None,
    }
}

pub fn classify_with(source: &dyn InterfaceSource) -> NetworkClass {
    source
        .snapshot()
        .map_or(NetworkClass::Unknown, |snapshot| classify_snapshot(&snapshot))
}

/// Classifies the host's active network.
pub fn classify() -> NetworkClass {
    classify_with(host_source().as_ref())
}

/// Guess link kind from the interface name.
pub fn guess_link_kind(name: &str) -> LinkKind {
    let name = name.to_lowercase();

    if name == "lo" || name.starts_with("lo0") {
        LinkKind::Loopback
    } else if name.starts_with("wl") || name.starts_with("wifi") || name.starts_with("ath") {
        LinkKind::Wifi
    } else if name.starts_with("eth") || name.starts_with("en") || name.starts_with("em") {
        LinkKind::Ethernet
    } else if name.starts_with("wwan")
        || name.starts_with("rmnet")
        || name.starts_with("ccmni")
        || name.starts_with("pdp")
        || name.starts_with("cell")
    {
        LinkKind::Cellular
    } else if name.starts_with("tun")
        || name.starts_with("tap")
        || name.starts_with("utun")
        || name.starts_with("wg")
        || name.starts_with("ppp")
    {
        LinkKind::Tunnel
    } else {
        LinkKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(interfaces: Vec<InterfaceInfo>, default_route: Option<&str>) -> InterfaceSnapshot {
        InterfaceSnapshot {
            interfaces,
            default_route: default_route.map(str::to_string),
        }
    }

    #[test]
    fn no_active_interface_is_none() {
        let snap = snapshot(
            vec![
                InterfaceInfo::new("lo", LinkKind::Loopback, true),
                InterfaceInfo::new("wlan0", LinkKind::Wifi, false),
            ],
            None,
        );
        assert_eq!(classify_snapshot(&snap), NetworkClass::None);
        assert!(!NetworkClass::None.is_connected());
    }

    #[test]
    fn default_route_wins() {
        let snap = snapshot(
            vec![
                InterfaceInfo::new("eth0", LinkKind::Ethernet, true),
                InterfaceInfo::new("wlan0", LinkKind::Wifi, true),
            ],
            Some("wlan0"),
        );
        assert_eq!(classify_snapshot(&snap), NetworkClass::Wifi);
    }

    #[test]
    fn falls_back_to_first_active() {
        let snap = snapshot(
            vec![
                InterfaceInfo::new("lo", LinkKind::Loopback, true),
                InterfaceInfo::new("eth0", LinkKind::Ethernet, true),
            ],
            Some("wlan0"),
        );
        assert_eq!(classify_snapshot(&snap), NetworkClass::Ethernet);
    }

    #[test]
    fn cellular_generations() {
        let cell = |radio| {
            classify_snapshot(&snapshot(
                vec![InterfaceInfo::new("rmnet0", LinkKind::Cellular, true).with_radio(radio)],
                None,
            ))
        };
        assert_eq!(cell(RadioTech::Edge), NetworkClass::Cellular2g);
        assert_eq!(cell(RadioTech::HspaPlus), NetworkClass::Cellular3g);
        assert_eq!(cell(RadioTech::Lte), NetworkClass::Cellular4g);
        assert_eq!(cell(RadioTech::Nr), NetworkClass::Cellular5g);
        assert!(NetworkClass::Cellular4g.is_cellular());
    }

    #[test]
    fn unrecognized_links_are_unknown() {
        let snap = snapshot(
            vec![
                InterfaceInfo::new("rmnet0", LinkKind::Cellular, true),
                InterfaceInfo::new("tun0", LinkKind::Tunnel, true),
            ],
            Some("tun0"),
        );
        assert_eq!(classify_snapshot(&snap), NetworkClass::Unknown);
        assert_eq!(
            classify_snapshot(&snapshot(
                vec![InterfaceInfo::new("rmnet0", LinkKind::Cellular, true)],
                None
            )),
            NetworkClass::Unknown
        );
    }

    #[test]
    fn uninspectable_host_is_unknown() {
        assert_eq!(classify_with(&StaticSource(None)), NetworkClass::Unknown);
        assert_eq!(
            classify_with(&StaticSource(Some(InterfaceSnapshot::default()))),
            NetworkClass::None
        );
    }

    #[test]
    fn link_kind_from_name() {
        assert_eq!(guess_link_kind("lo"), LinkKind::Loopback);
        assert_eq!(guess_link_kind("wlp3s0"), LinkKind::Wifi);
        assert_eq!(guess_link_kind("enp0s31f6"), LinkKind::Ethernet);
        assert_eq!(guess_link_kind("wwan0"), LinkKind::Cellular);
        assert_eq!(guess_link_kind("wg0"), LinkKind::Tunnel);
        assert_eq!(guess_link_kind("docker0"), LinkKind::Other);
    }

    #[test]
    fn labels_serialize_like_bridge() {
        let label = |class: NetworkClass| serde_json::to_string(&class).unwrap();
        assert_eq!(label(NetworkClass::Cellular4g), "\"LTE\"");
        assert_eq!(label(NetworkClass::Cellular5g), "\"5G\"");
        assert_eq!(label(NetworkClass::None), "\"NONE\"");
        assert_eq!(NetworkClass::Cellular4g.as_str(), "LTE");
        assert_eq!(RadioTech::Lte.class().to_string(), "LTE");
        assert_eq!(NetworkClass::Wifi.to_string(), "WIFI");
    }
}
