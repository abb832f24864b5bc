use std::collections::HashMap;

use crate::dmx::{channel_index, ChannelId, ChannelValue, UniverseAddress, CHANNEL_COUNT};

const ARTNET_HEADER: &[u8; 8] = b"Art-Net\0";
const ARTNET_OPCODE_OUTPUT: u16 = 0x5000;
const ARTNET_PROTOCOL_VERSION: u16 = 14;
pub(crate) const DMX_DATA_OFFSET: usize = 18;
const DMX_SEQ_OFFSET: usize = 12;
pub const ARTNET_UDP_PORT: u16 = 6454;

/// The 512-byte channel buffer for one DMX universe, plus the
/// ArtDMX packet it is framed into on the wire.
///
/// Invariant: after every `build_packet`, `packet[DMX_DATA_OFFSET + i]
/// == values[i]` for all `i`.
#[derive(Debug, Clone)]
pub struct UniverseFrame {
    values: [ChannelValue; CHANNEL_COUNT],
    packet: Vec<u8>,
    sequence: u8,
}

impl UniverseFrame {
    pub fn new(address: UniverseAddress) -> UniverseFrame {
        let mut packet = Vec::with_capacity(DMX_DATA_OFFSET + CHANNEL_COUNT);
        packet.extend_from_slice(ARTNET_HEADER);
        packet.push((ARTNET_OPCODE_OUTPUT & 0xff) as u8);
        packet.push((ARTNET_OPCODE_OUTPUT >> 8) as u8);
        packet.push((ARTNET_PROTOCOL_VERSION >> 8) as u8);
        packet.push((ARTNET_PROTOCOL_VERSION & 0xff) as u8);
        packet.push(0); // sequence; bumped on each send, 0 disables ordering enforcement downstream
        packet.push(0); // physical port
        packet.push(address.subuniverse_byte());
        packet.push(0); // net
        packet.push((CHANNEL_COUNT >> 8) as u8);
        packet.push((CHANNEL_COUNT & 0xff) as u8);
        debug_assert_eq!(packet.len(), DMX_DATA_OFFSET);
        packet.extend(std::iter::repeat(0u8).take(CHANNEL_COUNT));

        UniverseFrame {
            values: [0; CHANNEL_COUNT],
            packet,
            sequence: 0,
        }
    }

    /// Authoritative value for `channel` (1..=512). Out-of-range
    /// channels read as 0 without raising.
    pub fn value(&self, channel: ChannelId) -> ChannelValue {
        channel_index(channel).map_or(0, |i| self.values[i])
    }

    /// Writes `value` into the authoritative map and the outgoing packet.
    /// Returns the previous value, or `None` for out-of-range channels.
    pub fn set(&mut self, channel: ChannelId, value: ChannelValue) -> Option<ChannelValue> {
        let i = channel_index(channel)?;
        let previous = self.values[i];
        self.values[i] = value;
        self.packet[DMX_DATA_OFFSET + i] = value;
        Some(previous)
    }

    /// Bytes to hand to the transport. Bumps the sequence counter.
    pub fn take_packet(&mut self) -> &[u8] {
        self.packet[DMX_SEQ_OFFSET] = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.sequence = 1; // 0 is reserved to mean "ordering disabled"
        }
        &self.packet
    }

    pub fn snapshot(&self) -> HashMap<ChannelId, ChannelValue> {
        (1..=CHANNEL_COUNT as ChannelId)
            .map(|ch| (ch, self.value(ch)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_header_matches_artnet_dmx_layout() {
        let addr = UniverseAddress::new(1, 2).unwrap();
        let mut frame = UniverseFrame::new(addr);
        assert_eq!(&frame.packet[0..8], b"Art-Net\0");
        assert_eq!(frame.packet[8], 0x00);
        assert_eq!(frame.packet[9], 0x50);
        assert_eq!(frame.packet[10], 0x00);
        assert_eq!(frame.packet[11], 14);
        assert_eq!(frame.packet[14], 0x12);
        assert_eq!(frame.packet[16], 0x02);
        assert_eq!(frame.packet[17], 0x00);
        assert_eq!(frame.packet.len(), DMX_DATA_OFFSET + 512);

        let packet = frame.take_packet();
        assert_eq!(packet.len(), DMX_DATA_OFFSET + 512);
    }

    #[test]
    fn set_and_value_round_trip_and_stay_in_sync_with_packet() {
        let mut frame = UniverseFrame::new(UniverseAddress::new(0, 0).unwrap());
        frame.set(10, 200);
        assert_eq!(frame.value(10), 200);
        let packet = frame.take_packet();
        assert_eq!(packet[DMX_DATA_OFFSET + 9], 200);
    }

    #[test]
    fn out_of_range_channel_reads_zero_and_write_is_noop() {
        let mut frame = UniverseFrame::new(UniverseAddress::new(0, 0).unwrap());
        assert_eq!(frame.value(0), 0);
        assert_eq!(frame.value(513), 0);
        assert!(frame.set(0, 5).is_none());
        assert!(frame.set(513, 5).is_none());
    }

    #[test]
    fn sequence_wraps_and_skips_zero() {
        let mut frame = UniverseFrame::new(UniverseAddress::new(0, 0).unwrap());
        for _ in 0..257 {
            frame.take_packet();
        }
        assert_ne!(frame.packet[DMX_SEQ_OFFSET], 0);
    }
}
