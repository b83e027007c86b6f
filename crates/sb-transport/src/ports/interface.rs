//! Local interface discovery port (Go parity: control.InterfaceFinder +
//! the platform network monitor).

use sb_types::InterfaceType;
use std::net::IpAddr;

/// A local network interface usable for binding outbound sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub index: u32,
    pub interface_type: InterfaceType,
    pub addresses: Vec<IpAddr>,
}

impl NetworkInterface {
    /// First address of the same family as `destination`.
    pub fn address_for(&self, destination: IpAddr) -> Option<IpAddr> {
        self.addresses
            .iter()
            .copied()
            .find(|a| a.is_ipv4() == destination.is_ipv4())
    }
}

/// Snapshot of the interfaces currently up, in preference order.
pub trait InterfaceFinder: Send + Sync {
    fn interfaces(&self) -> Vec<NetworkInterface>;
}

impl InterfaceFinder for Vec<NetworkInterface> {
    fn interfaces(&self) -> Vec<NetworkInterface> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_matches_family() {
        let iface = NetworkInterface {
            name: "wlan0".into(),
            index: 3,
            interface_type: InterfaceType::Wifi,
            addresses: vec!["fe80::1".parse().unwrap(), "192.168.1.5".parse().unwrap()],
        };
        assert_eq!(
            iface.address_for("1.1.1.1".parse().unwrap()),
            Some("192.168.1.5".parse().unwrap())
        );
        assert_eq!(
            iface.address_for("2606:4700::1111".parse().unwrap()),
            Some("fe80::1".parse().unwrap())
        );
    }
}
