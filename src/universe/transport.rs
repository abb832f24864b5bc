use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use super::error::TransportError;
use super::frame::ARTNET_UDP_PORT;
use crate::dmx::UniverseAddress;

/// Where a universe's ArtDMX packets are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum TransportMode {
    Broadcast,
    Unicast(Ipv4Addr),
}

/// Thin wrapper over a UDP socket bound for one universe's ArtDMX traffic.
#[derive(Debug)]
pub struct ArtnetTransport {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl ArtnetTransport {
    pub fn new(address: UniverseAddress, mode: TransportMode) -> Result<ArtnetTransport, TransportError> {
        let socket =
            UdpSocket::bind("0.0.0.0:0").map_err(|_| TransportError::BindFailed(address))?;

        let destination = match mode {
            TransportMode::Broadcast => {
                socket
                    .set_broadcast(true)
                    .map_err(|_| TransportError::BindFailed(address))?;
                SocketAddrV4::new(Ipv4Addr::BROADCAST, ARTNET_UDP_PORT)
            }
            TransportMode::Unicast(ip) => SocketAddrV4::new(ip, ARTNET_UDP_PORT),
        };

        Ok(ArtnetTransport { socket, destination })
    }

    pub fn send(&self, packet: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(packet, self.destination)?;
        Ok(())
    }
}
