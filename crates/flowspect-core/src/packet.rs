//! Frame decoding: Ethernet II -> IPv4 -> TCP into the per-packet view the
//! analyzer works on. Non-IPv4 and non-TCP traffic decodes to `None` and is
//! ignored; truncated TCP frames are errors the caller reports and drops.

use crate::error::DecodeError;
use bytes::{Buf, Bytes};
use flowspect_binary::BinaryReader;
use log::debug;
use std::net::Ipv4Addr;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_TCP: u8 = 6;

const TCP_OPT_EOL: u8 = 0;
const TCP_OPT_NOP: u8 = 1;
const TCP_OPT_WSCALE: u8 = 3;
const TCP_OPT_SACK: u8 = 5;
const TCP_OPT_TIMESTAMPS: u8 = 8;

/// TCP header flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

impl TcpFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            urg: bits & 0x20 != 0,
            ack: bits & 0x10 != 0,
            psh: bits & 0x08 != 0,
            rst: bits & 0x04 != 0,
            syn: bits & 0x02 != 0,
            fin: bits & 0x01 != 0,
        }
    }
}

/// Parsed TCP options. `wscale` is -1 when absent (it is only read from SYN
/// segments). `sack_blocks` is a flat list of [left, right) edge pairs in
/// wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOptions {
    pub wscale: i8,
    pub tsval: u32,
    pub tsecr: u32,
    pub sack_blocks: Vec<u32>,
    pub sack: bool,
    pub dsack: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            wscale: -1,
            tsval: 0,
            tsecr: 0,
            sack_blocks: Vec::new(),
            sack: false,
            dsack: false,
        }
    }
}

impl TcpOptions {
    /// Parses the TCP options field. A malformed option (bad length) stops
    /// parsing; everything read so far is kept.
    fn parse(mut raw: Bytes, syn: bool, ack: u32) -> Self {
        let mut opts = Self::default();

        while let Ok(kind) = raw.read_u8() {
            match kind {
                TCP_OPT_EOL => break,
                TCP_OPT_NOP => continue,
                _ => {}
            }

            let Ok(len) = raw.read_u8() else { break };
            if len < 2 || raw.remaining() < (len - 2) as usize {
                debug!("stopping option parse at malformed option (kind {kind}, len {len})");
                break;
            }
            let mut payload = raw.split_to((len - 2) as usize);

            match kind {
                TCP_OPT_WSCALE => {
                    if syn && payload.len() == 1 {
                        opts.wscale = payload[0] as i8;
                    }
                }
                TCP_OPT_SACK => {
                    if payload.len() % 4 == 0 && !payload.is_empty() {
                        while let Ok(edge) = payload.read_u32_be() {
                            opts.sack_blocks.push(edge);
                        }
                        opts.sack = true;
                    }
                }
                TCP_OPT_TIMESTAMPS => {
                    if payload.len() == 8 {
                        opts.tsval = payload.read_u32_be().unwrap_or(0);
                        opts.tsecr = payload.read_u32_be().unwrap_or(0);
                    }
                }
                _ => {}
            }
        }

        opts.detect_dsack(ack);
        opts
    }

    /// DSACK is inferred from the first SACK block: either its right edge is
    /// at or below the cumulative ACK, or its range is contained within a
    /// later block of the same option.
    fn detect_dsack(&mut self, ack: u32) {
        if !self.sack || self.sack_blocks.len() < 2 {
            return;
        }
        if ack >= self.sack_blocks[1] {
            self.dsack = true;
        }
        for pair in self.sack_blocks[2..].chunks_exact(2) {
            if self.sack_blocks[0] >= pair[0] && self.sack_blocks[1] <= pair[1] {
                self.dsack = true;
            }
        }
    }
}

/// Immutable per-packet view produced by the frame decoder.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Capture timestamp in seconds.
    pub ts: f64,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
    pub seq: u32,
    pub ack: u32,
    pub win: u16,
    /// TCP payload length taken from the IP total length, not the frame.
    pub tcp_data_len: u32,
    pub carries_data: bool,
    pub flags: TcpFlags,
    pub opts: TcpOptions,
}

impl Packet {
    /// Decodes an Ethernet frame. Returns `Ok(None)` for traffic the
    /// analyzer ignores (non-IPv4, non-TCP), `Err` for a frame that claims
    /// to be TCP but cannot be decoded.
    pub fn decode(ts: f64, frame: &[u8]) -> Result<Option<Packet>, DecodeError> {
        let mut buf = Bytes::copy_from_slice(frame);

        // Ethernet II: dst(6) + src(6) + ethertype(2)
        buf.skip(12)?;
        let ethertype = buf.read_u16_be()?;
        if ethertype != ETHERTYPE_IPV4 {
            return Ok(None);
        }

        // IPv4 header
        let ver_ihl = buf.read_u8()?;
        if ver_ihl >> 4 != 4 {
            return Err(DecodeError::Malformed(format!(
                "IP version {} under IPv4 ethertype",
                ver_ihl >> 4
            )));
        }
        let ihl = (ver_ihl & 0x0f) as u32 * 4;
        if ihl < 20 {
            return Err(DecodeError::Malformed(format!("IPv4 IHL too small: {ihl}")));
        }
        buf.skip(1)?; // tos
        let total_len = buf.read_u16_be()? as u32;
        buf.skip(5)?; // id, flags/fragment offset, ttl
        let proto = buf.read_u8()?;
        buf.skip(2)?; // checksum
        let src = Ipv4Addr::from(buf.read_u32_be()?);
        let dst = Ipv4Addr::from(buf.read_u32_be()?);
        buf.skip((ihl - 20) as usize)?; // IP options

        if proto != IP_PROTO_TCP {
            return Ok(None);
        }
        let ip_data_len = total_len
            .checked_sub(ihl)
            .ok_or_else(|| DecodeError::Malformed(format!("IP total length {total_len} < IHL {ihl}")))?;

        // TCP header
        let sport = buf.read_u16_be()?;
        let dport = buf.read_u16_be()?;
        let seq = buf.read_u32_be()?;
        let ack = buf.read_u32_be()?;
        let doff = (buf.read_u8()? >> 4) as u32 * 4;
        let flags = TcpFlags::from_bits(buf.read_u8()?);
        let win = buf.read_u16_be()?;
        buf.skip(4)?; // checksum, urgent pointer
        if doff < 20 || ip_data_len < doff {
            return Err(DecodeError::Malformed(format!(
                "TCP data offset {doff} out of range for IP payload {ip_data_len}"
            )));
        }
        let raw_opts = buf.read_bytes((doff - 20) as usize)?;
        let opts = TcpOptions::parse(raw_opts, flags.syn, ack);

        let tcp_data_len = ip_data_len - doff;

        Ok(Some(Packet {
            ts,
            src,
            dst,
            sport,
            dport,
            seq,
            ack,
            win,
            tcp_data_len,
            carries_data: tcp_data_len > 0,
            flags,
            opts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use flowspect_binary::BinaryWriter;

    /// Builds an Ethernet+IPv4+TCP frame for decoder tests.
    fn build_frame(
        seq: u32,
        ack: u32,
        flag_bits: u8,
        payload_len: u16,
        tcp_opts: &[u8],
    ) -> Vec<u8> {
        let mut buf = BytesMut::new();
        // Ethernet
        buf.write_bytes(&[0x02; 6]).unwrap();
        buf.write_bytes(&[0x04; 6]).unwrap();
        buf.write_u16_be(ETHERTYPE_IPV4).unwrap();
        // IPv4, no options
        let doff = 20 + tcp_opts.len() as u16;
        buf.write_u8(0x45).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u16_be(20 + doff + payload_len).unwrap();
        buf.write_u16_be(0).unwrap(); // id
        buf.write_u16_be(0).unwrap(); // flags/frag
        buf.write_u8(64).unwrap(); // ttl
        buf.write_u8(IP_PROTO_TCP).unwrap();
        buf.write_u16_be(0).unwrap(); // checksum
        buf.write_u32_be(u32::from(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        buf.write_u32_be(u32::from(Ipv4Addr::new(10, 0, 0, 2))).unwrap();
        // TCP
        buf.write_u16_be(40000).unwrap();
        buf.write_u16_be(6007).unwrap();
        buf.write_u32_be(seq).unwrap();
        buf.write_u32_be(ack).unwrap();
        buf.write_u8(((doff / 4) as u8) << 4).unwrap();
        buf.write_u8(flag_bits).unwrap();
        buf.write_u16_be(0xFFFF).unwrap();
        buf.write_u16_be(0).unwrap(); // checksum
        buf.write_u16_be(0).unwrap(); // urgent pointer
        buf.write_bytes(tcp_opts).unwrap();
        buf.write_bytes(&vec![0xAA; payload_len as usize]).unwrap();
        buf.to_vec()
    }

    fn sack_option(blocks: &[(u32, u32)]) -> Vec<u8> {
        let mut opt = vec![TCP_OPT_SACK, 2 + 8 * blocks.len() as u8];
        for &(l, r) in blocks {
            opt.extend_from_slice(&l.to_be_bytes());
            opt.extend_from_slice(&r.to_be_bytes());
        }
        opt
    }

    #[test]
    fn test_decode_plain_data_segment() {
        let frame = build_frame(1000, 500, 0x18, 100, &[]);
        let pkt = Packet::decode(1.5, &frame).unwrap().unwrap();

        assert_eq!(pkt.ts, 1.5);
        assert_eq!(pkt.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(pkt.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(pkt.sport, 40000);
        assert_eq!(pkt.dport, 6007);
        assert_eq!(pkt.seq, 1000);
        assert_eq!(pkt.ack, 500);
        assert_eq!(pkt.tcp_data_len, 100);
        assert!(pkt.carries_data);
        assert!(pkt.flags.ack && pkt.flags.psh);
        assert!(!pkt.flags.syn && !pkt.flags.fin);
        assert_eq!(pkt.opts.wscale, -1);
        assert!(!pkt.opts.sack);
    }

    #[test]
    fn test_decode_frame_with_trailing_padding() {
        // Ethernet padding beyond the IP total length must not count as data.
        let mut frame = build_frame(0, 0, 0x10, 0, &[]);
        frame.extend_from_slice(&[0u8; 6]);
        let pkt = Packet::decode(0.0, &frame).unwrap().unwrap();
        assert_eq!(pkt.tcp_data_len, 0);
        assert!(!pkt.carries_data);
    }

    #[test]
    fn test_decode_wscale_only_on_syn() {
        let opt = [TCP_OPT_WSCALE, 3, 7, TCP_OPT_NOP];
        let syn = build_frame(0, 0, 0x02, 0, &opt);
        let pkt = Packet::decode(0.0, &syn).unwrap().unwrap();
        assert_eq!(pkt.opts.wscale, 7);

        let plain = build_frame(0, 0, 0x10, 0, &opt);
        let pkt = Packet::decode(0.0, &plain).unwrap().unwrap();
        assert_eq!(pkt.opts.wscale, -1);
    }

    #[test]
    fn test_decode_timestamps_and_sack() {
        let mut opts = vec![TCP_OPT_NOP, TCP_OPT_NOP, TCP_OPT_TIMESTAMPS, 10];
        opts.extend_from_slice(&123456u32.to_be_bytes());
        opts.extend_from_slice(&654321u32.to_be_bytes());
        opts.extend(sack_option(&[(200, 300), (500, 600)]));

        let frame = build_frame(0, 100, 0x10, 0, &opts);
        let pkt = Packet::decode(0.0, &frame).unwrap().unwrap();
        assert_eq!(pkt.opts.tsval, 123456);
        assert_eq!(pkt.opts.tsecr, 654321);
        assert!(pkt.opts.sack);
        assert!(!pkt.opts.dsack);
        assert_eq!(pkt.opts.sack_blocks, vec![200, 300, 500, 600]);
    }

    #[test]
    fn test_dsack_below_cumulative_ack() {
        let frame = build_frame(0, 400, 0x10, 0, &sack_option(&[(100, 200)]));
        let pkt = Packet::decode(0.0, &frame).unwrap().unwrap();
        assert!(pkt.opts.dsack);
    }

    #[test]
    fn test_dsack_contained_in_later_block() {
        let frame = build_frame(0, 100, 0x10, 0, &sack_option(&[(300, 400), (200, 600)]));
        let pkt = Packet::decode(0.0, &frame).unwrap().unwrap();
        assert!(pkt.opts.dsack);

        let frame = build_frame(0, 100, 0x10, 0, &sack_option(&[(300, 400), (450, 600)]));
        let pkt = Packet::decode(0.0, &frame).unwrap().unwrap();
        assert!(!pkt.opts.dsack);
    }

    #[test]
    fn test_malformed_option_stops_parse() {
        // Timestamp option claims 10 bytes but the header ends early.
        let mut opts = sack_option(&[(200, 300)]);
        // Pad to a 4-byte boundary so the data offset is representable.
        opts.extend_from_slice(&[TCP_OPT_TIMESTAMPS, 10, 0x01, TCP_OPT_EOL, 0, 0]);
        let frame = build_frame(0, 100, 0x10, 0, &opts);
        let pkt = Packet::decode(0.0, &frame).unwrap().unwrap();
        // The SACK option before the malformed one is kept.
        assert!(pkt.opts.sack);
        assert_eq!(pkt.opts.tsval, 0);
    }

    #[test]
    fn test_non_ip_and_non_tcp_ignored() {
        let mut arp = build_frame(0, 0, 0x10, 0, &[]);
        arp[12] = 0x08;
        arp[13] = 0x06;
        assert!(Packet::decode(0.0, &arp).unwrap().is_none());

        let mut udp = build_frame(0, 0, 0x10, 0, &[]);
        udp[14 + 9] = 17;
        assert!(Packet::decode(0.0, &udp).unwrap().is_none());
    }

    #[test]
    fn test_truncated_tcp_frame_errors() {
        let frame = build_frame(0, 0, 0x10, 0, &[]);
        let truncated = &frame[..frame.len() - 12];
        assert!(Packet::decode(0.0, truncated).is_err());
    }
}
