//! Connection interruption detection. Every pure ACK closes a candidate
//! interval reaching back to the previously processed segment; the reporter
//! filters out the ordinary inter-ACK gaps by minimum duration. RTOs that
//! fired during the gap are charged to the interval, and a TSecr predating
//! the first RTO's TSval marks the whole interval spurious.

use crate::connection::{Connection, Interruption};
use crate::packet::Packet;

/// Records the gap ending at this ACK and resets the RTO bookkeeping.
/// Skipped once a RST or FIN has been seen in either the connection history
/// or this packet.
pub fn detect(con: &mut Connection, pkt: &Packet) {
    if con.rst || con.fin || pkt.flags.rst || pkt.flags.fin {
        return;
    }

    let spurious = con.interr_rto_tsval != 0 && pkt.opts.tsecr < con.interr_rto_tsval;
    con.interruptions.push(Interruption {
        start: con.last_ts,
        end: pkt.ts,
        rtos: con.interr_rexmits,
        spurious,
    });
    con.interr_rexmits = 0;
    con.interr_rto_tsval = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{TcpFlags, TcpOptions};
    use std::net::Ipv4Addr;

    fn ack(ts: f64, tsecr: u32) -> Packet {
        Packet {
            ts,
            src: Ipv4Addr::new(10, 0, 0, 2),
            dst: Ipv4Addr::new(10, 0, 0, 1),
            sport: 6007,
            dport: 1000,
            seq: 0,
            ack: 100,
            win: 0,
            tcp_data_len: 0,
            carries_data: false,
            flags: TcpFlags { ack: true, ..Default::default() },
            opts: TcpOptions { tsecr, ..Default::default() },
        }
    }

    fn connection() -> Connection {
        Connection::new(&ack(0.0, 0), 0.05)
    }

    #[test]
    fn test_candidate_recorded_and_counters_reset() {
        let mut con = connection();
        con.last_ts = 2.0;
        con.interr_rexmits = 3;
        con.interr_rto_tsval = 900;

        detect(&mut con, &ack(3.5, 1000));

        assert_eq!(con.interruptions.len(), 1);
        let i = con.interruptions[0];
        assert_eq!(i.start, 2.0);
        assert_eq!(i.end, 3.5);
        assert_eq!(i.rtos, 3);
        assert!(!i.spurious);
        assert_eq!(con.interr_rexmits, 0);
        assert_eq!(con.interr_rto_tsval, 0);
    }

    #[test]
    fn test_spurious_when_tsecr_predates_first_rto() {
        let mut con = connection();
        con.interr_rto_tsval = 900;

        detect(&mut con, &ack(1.0, 850));
        assert!(con.interruptions[0].spurious);
    }

    #[test]
    fn test_skipped_after_fin_or_rst() {
        let mut con = connection();
        con.fin = true;
        detect(&mut con, &ack(1.0, 0));
        assert!(con.interruptions.is_empty());

        let mut con = connection();
        let mut pkt = ack(1.0, 0);
        pkt.flags.rst = true;
        detect(&mut con, &pkt);
        assert!(con.interruptions.is_empty());
    }
}
