//! Art-Net light strip (WLED in Art-Net receive mode).
//!
//! The strip state is kept locally as one RGB triple per pixel and pushed
//! as ArtDMX frames after every change. Strips longer than one universe
//! (170 RGB pixels) continue on consecutive universes.

use bytes::{BufMut, Bytes, BytesMut};
use stockbox_core::LightConfig;
use stockbox_core::constants::DMX_UNIVERSE_SIZE;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::error::{HardwareError, Result};
use crate::traits::{Device, LightStrip};
use crate::types::{Animation, LedColor};

const ARTNET_ID: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;
const PROTOCOL_VERSION: u16 = 14;

/// RGB pixels carried by one universe.
pub const PIXELS_PER_UNIVERSE: usize = DMX_UNIVERSE_SIZE / 3;

/// Build an ArtDMX packet.
///
/// DMX payloads must have an even length between 2 and 512 bytes; odd
/// payloads are padded with a zero byte.
pub fn artdmx_packet(sequence: u8, universe: u16, data: &[u8]) -> Bytes {
    let mut length = data.len().clamp(2, DMX_UNIVERSE_SIZE);
    if length % 2 == 1 {
        length += 1;
    }

    let mut packet = BytesMut::with_capacity(18 + length);
    packet.put_slice(ARTNET_ID);
    packet.put_u16_le(OP_DMX);
    packet.put_u16(PROTOCOL_VERSION);
    packet.put_u8(sequence);
    packet.put_u8(0); // physical port
    packet.put_u16_le(universe);
    packet.put_u16(length as u16);

    let copied = data.len().min(length);
    packet.put_slice(&data[..copied]);
    packet.put_bytes(0, length - copied);
    packet.freeze()
}

/// Light strip driven over Art-Net/UDP.
#[derive(Debug)]
pub struct ArtNetLightStrip {
    name: String,
    config: LightConfig,
    socket: Option<UdpSocket>,
    sequence: u8,
    pixels: Vec<(u8, u8, u8)>,
}

impl ArtNetLightStrip {
    pub fn new(config: LightConfig) -> Self {
        Self {
            name: format!("Art-Net strip {}", config.address),
            pixels: vec![(0, 0, 0); usize::from(config.pixel_count)],
            config,
            socket: None,
            sequence: 0,
        }
    }

    /// Next ArtDMX sequence number (1..=255, 0 disables reordering).
    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.checked_add(1).unwrap_or(1);
        self.sequence
    }

    async fn render(&mut self) -> Result<()> {
        if self.socket.is_none() {
            return Err(HardwareError::disconnected(self.name.clone()));
        }

        let frames: Vec<Vec<u8>> = self
            .pixels
            .chunks(PIXELS_PER_UNIVERSE)
            .map(|chunk| chunk.iter().flat_map(|&(r, g, b)| [r, g, b]).collect())
            .collect();

        for (offset, data) in frames.iter().enumerate() {
            let sequence = self.next_sequence();
            let universe = self.config.universe + offset as u16;
            let packet = artdmx_packet(sequence, universe, data);
            if let Some(socket) = &self.socket {
                socket.send(&packet).await?;
            }
        }
        Ok(())
    }
}

impl Device for ArtNetLightStrip {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect((self.config.address.as_str(), self.config.port))
            .await?;
        info!(
            "Art-Net strip targeting {}:{} universe {}",
            self.config.address, self.config.port, self.config.universe
        );
        self.socket = Some(socket);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.socket.is_some() {
            self.pixels.fill((0, 0, 0));
            let result = self.render().await;
            self.socket = None;
            return result;
        }
        Ok(())
    }

    async fn health_check(&mut self) -> Result<()> {
        match &self.socket {
            Some(socket) => {
                socket.peer_addr()?;
                Ok(())
            }
            None => Err(HardwareError::disconnected(self.name.clone())),
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

impl LightStrip for ArtNetLightStrip {
    async fn set_animation(&mut self, animation: Animation, brightness: u8) -> Result<()> {
        debug!("Light strip animation {} at {}", animation, brightness);
        let color = animation.base_color().scaled(brightness);
        self.pixels.fill(color);
        self.render().await
    }

    async fn highlight_zone(&mut self, start: u16, end: u16, color: LedColor) -> Result<()> {
        if start > end || end >= self.config.pixel_count {
            return Err(HardwareError::invalid_data(format!(
                "zone {}..={} outside strip of {} pixels",
                start, end, self.config.pixel_count
            )));
        }

        let rgb = color.scaled(self.config.brightness);
        self.pixels[usize::from(start)..=usize::from(end)].fill(rgb);
        self.render().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artdmx_header() {
        let packet = artdmx_packet(7, 3, &[1, 2, 3, 4]);
        assert_eq!(&packet[..8], b"Art-Net\0");
        assert_eq!(&packet[8..10], &[0x00, 0x50]);
        assert_eq!(&packet[10..12], &[0x00, 14]);
        assert_eq!(packet[12], 7);
        assert_eq!(&packet[14..16], &[3, 0]);
        assert_eq!(&packet[16..18], &[0, 4]);
        assert_eq!(&packet[18..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_artdmx_pads_odd_payload() {
        let packet = artdmx_packet(1, 0, &[9, 9, 9]);
        assert_eq!(&packet[16..18], &[0, 4]);
        assert_eq!(&packet[18..], &[9, 9, 9, 0]);
    }

    #[tokio::test]
    async fn test_animation_sends_frames_per_universe() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let config = LightConfig {
            address: "127.0.0.1".to_string(),
            port,
            universe: 2,
            pixel_count: 200,
            brightness: 255,
            zones: vec![[0, 99], [100, 199]],
        };
        let mut strip = ArtNetLightStrip::new(config);
        strip.connect().await.unwrap();
        strip
            .set_animation(Animation::ValidPurchase, 255)
            .await
            .unwrap();

        let mut buf = [0u8; 600];
        let len = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(len, 18 + PIXELS_PER_UNIVERSE * 3);
        assert_eq!(&buf[14..16], &[2, 0]);
        assert_eq!(&buf[18..21], &[0, 255, 0]);

        let len = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(len, 18 + 30 * 3);
        assert_eq!(&buf[14..16], &[3, 0]);
    }

    #[tokio::test]
    async fn test_render_requires_connection() {
        let mut strip = ArtNetLightStrip::new(LightConfig::default());
        assert!(strip.set_animation(Animation::Idle, 100).await.is_err());
        assert!(strip.health_check().await.is_err());
    }
}
