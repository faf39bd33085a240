//! Linux interface discovery via `/sys/class/net` and `/proc/net/route`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::{guess_link_kind, InterfaceInfo, InterfaceSnapshot, InterfaceSource, LinkKind};

const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;
const IFF_RUNNING: u32 = 0x40;

const ARPHRD_LOOPBACK: u32 = 772;
const ARPHRD_RAWIP: u32 = 519;
const ARPHRD_NONE: u32 = 65534;

const RTF_UP: u32 = 0x1;

#[derive(Debug, Clone)]
pub struct SysfsSource {
    sys_net: PathBuf,
    proc_route: PathBuf,
}

impl Default for SysfsSource {
    fn default() -> Self {
        Self::new("/sys/class/net", "/proc/net/route")
    }
}

impl SysfsSource {
    pub fn new(sys_net: impl Into<PathBuf>, proc_route: impl Into<PathBuf>) -> Self {
        Self {
            sys_net: sys_net.into(),
            proc_route: proc_route.into(),
        }
    }
}

impl InterfaceSource for SysfsSource {
    fn snapshot(&self) -> Option<InterfaceSnapshot> {
        let entries = fs::read_dir(&self.sys_net).ok()?;

        let mut interfaces: Vec<InterfaceInfo> = entries
            .flatten()
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                read_interface(&entry.path(), name)
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));

        let default_route = fs::read_to_string(&self.proc_route)
            .ok()
            .and_then(|table| default_route(&table));
        trace!(count = interfaces.len(), ?default_route, "read interfaces");

        Some(InterfaceSnapshot {
            interfaces,
            default_route,
        })
    }
}

fn read_interface(path: &Path, name: String) -> InterfaceInfo {
    let read = |file: &str| fs::read_to_string(path.join(file)).ok();

    let flags = read("flags")
        .and_then(|s| u32::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok())
        .unwrap_or(0);
    let operstate = read("operstate").map(|s| s.trim().to_string()).unwrap_or_default();
    let arp_type = read("type").and_then(|s| s.trim().parse::<u32>().ok());
    let devtype = read("uevent").and_then(|uevent| {
        uevent
            .lines()
            .find_map(|line| line.strip_prefix("DEVTYPE=").map(str::to_string))
    });

    let kind = if flags & IFF_LOOPBACK != 0 || arp_type == Some(ARPHRD_LOOPBACK) {
        LinkKind::Loopback
    } else if path.join("wireless").exists()
        || path.join("phy80211").exists()
        || devtype.as_deref() == Some("wlan")
    {
        LinkKind::Wifi
    } else if devtype.as_deref() == Some("wwan") || arp_type == Some(ARPHRD_RAWIP) {
        LinkKind::Cellular
    } else {
        match (guess_link_kind(&name), arp_type) {
            (LinkKind::Cellular, _) => LinkKind::Cellular,
            (_, Some(ARPHRD_NONE)) => LinkKind::Tunnel,
            (guess, _) => guess,
        }
    };

    let is_up = flags & IFF_UP != 0
        && (operstate == "up" || (operstate == "unknown" && flags & IFF_RUNNING != 0));

    InterfaceInfo::new(name, kind, is_up)
}

/// Interface of the first `0.0.0.0/0` route that is up.
fn default_route(table: &str) -> Option<String> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 {
            return None;
        }
        let flags = u32::from_str_radix(cols[3], 16).unwrap_or(0);
        (cols[1] == "00000000" && flags & RTF_UP != 0).then(|| cols[0].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{classify_with, NetworkClass};
    use tempfile::TempDir;

    struct FakeSys {
        root: TempDir,
    }

    impl FakeSys {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            fs::create_dir_all(root.path().join("net")).unwrap();
            Self { root }
        }

        fn iface(&self, name: &str, flags: &str, operstate: &str, arp_type: u32) -> PathBuf {
            let dir = self.root.path().join("net").join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("flags"), format!("{flags}\n")).unwrap();
            fs::write(dir.join("operstate"), format!("{operstate}\n")).unwrap();
            fs::write(dir.join("type"), format!("{arp_type}\n")).unwrap();
            dir
        }

        fn routes(&self, table: &str) {
            fs::write(self.root.path().join("route"), table).unwrap();
        }

        fn source(&self) -> SysfsSource {
            SysfsSource::new(self.root.path().join("net"), self.root.path().join("route"))
        }
    }

    const HEADER: &str =
        "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT\n";

    #[test]
    fn parses_default_route() {
        let table = format!(
            "{HEADER}eth0\t0000A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0\n\
             wlan0\t00000000\t0100A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0\n"
        );
        assert_eq!(default_route(&table), Some("wlan0".to_string()));
        assert_eq!(default_route(HEADER), None);
    }

    #[test]
    fn wireless_default_route_is_wifi() {
        let sys = FakeSys::new();
        sys.iface("lo", "0x9", "unknown", 772);
        sys.iface("eth0", "0x1003", "down", 1);
        let wlan = sys.iface("wlan0", "0x1003", "up", 1);
        fs::create_dir_all(wlan.join("wireless")).unwrap();
        sys.routes(&format!(
            "{HEADER}wlan0\t00000000\t0100A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0\n"
        ));

        assert_eq!(classify_with(&sys.source()), NetworkClass::Wifi);
    }

    #[test]
    fn only_loopback_is_none() {
        let sys = FakeSys::new();
        sys.iface("lo", "0x49", "unknown", 772);
        sys.routes(HEADER);
        assert_eq!(classify_with(&sys.source()), NetworkClass::None);
    }

    #[test]
    fn wired_without_route_table() {
        let sys = FakeSys::new();
        sys.iface("enp3s0", "0x1003", "up", 1);
        assert_eq!(classify_with(&sys.source()), NetworkClass::Ethernet);
    }

    #[test]
    fn rawip_modem_is_cellular_unknown_generation() {
        let sys = FakeSys::new();
        sys.iface("rmnet_data0", "0x41", "unknown", 519);
        let snapshot = sys.source().snapshot().unwrap();
        assert_eq!(snapshot.interfaces[0].kind, LinkKind::Cellular);
        assert!(snapshot.interfaces[0].is_up);
        assert_eq!(classify_with(&sys.source()), NetworkClass::Unknown);
    }

    #[test]
    fn missing_sysfs_is_uninspectable() {
        let source = SysfsSource::new("/definitely/not/here", "/nope");
        assert!(source.snapshot().is_none());
        assert_eq!(classify_with(&source), NetworkClass::Unknown);
    }
}
