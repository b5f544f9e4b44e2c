//! The realtime bus engine: phase decoding, the packet receive state machine,
//! and pulse-timed transmit. Generic over [`crate::pins::BusInputs`] /
//! [`crate::pins::BusOutputs`] so it runs against mocked pins in tests and
//! real GPIO when wired to hardware.

use crate::consts::{pkt_offset, timing, END_OF_PACKET_MARKER, PBEGIN, RECEIVE_INTERVAL_TABLE, RECEIVE_MAX_TICKS};
use crate::mailbox::{BusStatus, EngineView, ErrorCode, Handoff};
use crate::packet::{self, INIT_TEMPLATE_COUNT};
use crate::pins::{BusInputs, BusOutputs};
use crate::timing::busy_wait_ns;

/// Phases [`Engine::get_bus_state`] distinguishes; a strict subset of
/// [`BusStatus`] — the engine only ever *decides* among these three from the
/// phase lines, the richer statuses are states it reports after deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reset,
    Enabled,
}

/// Accumulates decoded bits into completed bytes, written to the caller's
/// buffer as they complete. Mirrors the original firmware's static
/// `bitCnt`/`byteInProcess`/`memoryPtr` triple, minus the first byte's leading
/// 1 bit which is pre-loaded since every SmartPort byte starts with one.
pub struct BitInserter {
    bit_cnt: u8,
    byte_in_process: u8,
    pos: usize,
}

impl BitInserter {
    pub fn new() -> Self {
        BitInserter {
            bit_cnt: 1,
            byte_in_process: 0x02,
            pos: 0,
        }
    }

    pub fn insert(&mut self, bit: u8, buf: &mut [u8]) {
        if bit == 0 {
            self.byte_in_process &= 0xFE;
        } else {
            self.byte_in_process |= 0x01;
        }

        if self.bit_cnt == 7 {
            if self.pos < buf.len() {
                buf[self.pos] = self.byte_in_process;
            }
            self.pos += 1;
            self.bit_cnt = 0;
        } else {
            self.byte_in_process <<= 1;
            self.bit_cnt += 1;
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.pos
    }
}

impl Default for BitInserter {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert one measured WDAT transition interval (in 0.5 us ticks) into its
/// bits and feed them to `inserter`. Returns `false` once the interval exceeds
/// the window, meaning the packet is done.
pub fn insert_interval(ticks: u32, inserter: &mut BitInserter, buf: &mut [u8]) -> bool {
    if ticks > RECEIVE_MAX_TICKS {
        return false;
    }
    for &(threshold, zero_bits) in RECEIVE_INTERVAL_TABLE.iter() {
        if ticks < threshold {
            for _ in 0..zero_bits {
                inserter.insert(0, buf);
            }
            inserter.insert(1, buf);
            return true;
        }
    }
    false
}

/// Pure, hardware-free version of the receive decoder: given a sequence of
/// already-measured transition intervals, produce the decoded buffer. Used
/// both by tests and by [`Engine::receive_packet`] once it has sampled the
/// real WDAT line.
pub fn decode_intervals(intervals: &[u32], buf: &mut [u8]) -> usize {
    let mut inserter = BitInserter::new();
    for &ticks in intervals {
        if !insert_interval(ticks, &mut inserter, buf) {
            break;
        }
    }
    inserter.bytes_written()
}

/// The bus engine. Owns the GPIO bundle and its half of the shared mailbox.
pub struct Engine<B> {
    bus: B,
    mailbox: EngineView,
    init_templates: [[u8; crate::consts::INIT_BUF_LEN]; INIT_TEMPLATE_COUNT],
    init_cnt: u8,
    id1: u8,
    id2: u8,
}

impl<B> Engine<B>
where
    B: BusInputs + BusOutputs,
{
    pub fn new(bus: B, mailbox: EngineView) -> Self {
        Engine {
            bus,
            mailbox,
            init_templates: [
                packet::build_init_template(false),
                packet::build_init_template(true),
            ],
            init_cnt: 0,
            id1: 0xFF,
            id2: 0xFF,
        }
    }

    fn get_bus_state(&mut self) -> Phase {
        let req = self.bus.req().unwrap_or(false) as u8;
        let p1 = self.bus.p1().unwrap_or(false) as u8;
        let p2 = self.bus.p2().unwrap_or(false) as u8;
        let p3 = self.bus.p3().unwrap_or(false) as u8;
        let code = req | (p1 << 1) | (p2 << 2) | (p3 << 3);
        match code {
            0x0A | 0x0B | 0x0E | 0x0F => Phase::Enabled,
            0x05 => Phase::Reset,
            _ => Phase::Idle,
        }
    }

    fn handle_reset(&mut self) {
        let _ = self.bus.set_test(false);
        let _ = self.bus.set_ack(false);
        let _ = self.bus.set_outen(false); // float RDAT
        let _ = self.bus.set_led(false);

        self.init_cnt = 0;
        self.id1 = 0xFF;
        self.id2 = 0xFF;
        self.mailbox.set_id1(0xFF);
        self.mailbox.set_id2(0xFF);
        self.mailbox.set_error(ErrorCode::None);
        self.mailbox.request_dispatch();

        #[cfg(feature = "log")]
        log::trace!("bus reset observed; init slots and cached IDs cleared");
    }

    fn wait_for_req(&mut self) -> bool {
        loop {
            if self.get_bus_state() != Phase::Enabled {
                return false;
            }
            if self.bus.req().unwrap_or(false) {
                return true;
            }
        }
    }

    fn receive_packet(&mut self) {
        while self.bus.wdat().unwrap_or(true) {
            // wait for WDAT to go low: the start of the first bit cell
        }

        let mut inserter = BitInserter::new();
        loop {
            let last = self.bus.wdat().unwrap_or(false);
            let mut ticks = 0u32;
            loop {
                let cur = self.bus.wdat().unwrap_or(false);
                if cur != last {
                    break;
                }
                ticks += 1;
                if ticks > RECEIVE_MAX_TICKS {
                    return;
                }
                busy_wait_ns(crate::consts::RECEIVE_TICK_NS);
            }
            let buf = self.mailbox.received_buf_mut();
            if !insert_interval(ticks, &mut inserter, buf) {
                return;
            }
        }
    }

    fn send_packet(&mut self, buf: &[u8], init_flag: bool) {
        self.mailbox.set_status(BusStatus::Sending);

        while self.bus.req().unwrap_or(true) {
            // wait for the peer to finish its own send cycle
        }

        let _ = self.bus.set_ack(true);
        let _ = self.bus.set_rdat(true);
        let _ = self.bus.set_outen(true);

        while !self.bus.req().unwrap_or(false) {
            // wait for the peer to signal it's ready to receive
        }

        let mut idx = 0usize;
        let mut bit_mask = 0x80u8;
        loop {
            let byte = buf[idx];
            if byte == END_OF_PACKET_MARKER {
                break;
            }
            let is_one = byte & bit_mask == bit_mask;
            let _ = self.bus.set_rdat(!is_one);
            busy_wait_ns(timing::BIT_LOW_NS);
            let _ = self.bus.set_rdat(true);

            if bit_mask == 1 {
                idx += 1;
                bit_mask = 0x80;
            } else {
                bit_mask >>= 1;
            }
            busy_wait_ns(timing::INTER_BIT_NS);
        }

        let _ = self.bus.set_ack(false);
        let _ = self.bus.set_outen(false);

        if init_flag {
            busy_wait_ns(timing::INIT_PAD_NS);
        } else {
            while self.bus.req().unwrap_or(true) {
                // wait for REQ low before returning to the main loop
            }
        }
    }

    fn send_init(&mut self, dest: u8) {
        let _ = self.bus.set_ack(false);
        match self.init_cnt {
            0 => {
                packet::finalize_init_reply(&mut self.init_templates[0], dest);
                self.init_cnt = 1;
                let buf = self.init_templates[0];
                self.send_packet(&buf, true);
                self.id1 = dest;
                self.mailbox.set_id1(dest);
                #[cfg(feature = "log")]
                log::debug!("INIT reply sent, device 1 assigned ID 0x{dest:X}");
            }
            1 => {
                packet::finalize_init_reply(&mut self.init_templates[1], dest);
                self.init_cnt = 2;
                let buf = self.init_templates[1];
                self.send_packet(&buf, true);
                self.id2 = dest;
                self.mailbox.set_id2(dest);
                #[cfg(feature = "log")]
                log::debug!("INIT reply sent, device 2 assigned ID 0x{dest:X}");
            }
            _ => {
                #[cfg(feature = "log")]
                log::warn!("extra INIT received after both devices already assigned");
                self.mailbox.set_error(ErrorCode::ExtraInit);
            }
        }
    }

    fn process_packet(&mut self) {
        let (cmd_num, dest, pbegin_ok) = {
            let buf = self.mailbox.received_buf_mut();
            (
                buf[pkt_offset::CMD],
                buf[pkt_offset::DEST],
                buf[pkt_offset::PBEGIN] == PBEGIN,
            )
        };

        if packet::is_init(cmd_num) {
            self.send_init(dest);
            return;
        }

        if !pbegin_ok {
            self.mailbox.set_error(ErrorCode::BadPacketBegin);
            self.mailbox.set_status(BusStatus::Unknown);
            return;
        }

        let both_assigned = self.id1 != 0xFF && self.id2 != 0xFF;
        if both_assigned && dest != self.id1 && dest != self.id2 {
            self.mailbox.set_error(ErrorCode::DestMismatch);
        }

        self.mailbox.set_status(BusStatus::RcvdPack);
        #[cfg(feature = "log")]
        log::trace!("RCVDPACK observed, dest 0x{dest:X}, cmd 0x{cmd_num:X}");
        let _ = self.bus.set_ack(false);
        self.mailbox.request_dispatch();

        if self.mailbox.wait_for_handoff() == Handoff::Go {
            let resp = *self.mailbox.response_buf();
            self.send_packet(&resp, false);
        }
    }

    /// Drive the bus forever: sample phase lines, transition state, receive
    /// and process packets. Never returns — intended to run on its own
    /// thread, one per emulated bus.
    pub fn run(&mut self) -> ! {
        self.handle_reset();
        loop {
            match self.get_bus_state() {
                Phase::Idle => {
                    self.mailbox.set_status(BusStatus::Idle);
                    let _ = self.bus.set_led(false);
                    let _ = self.bus.set_ack(true);
                }
                Phase::Reset => {
                    self.mailbox.set_status(BusStatus::Reset);
                    self.handle_reset();
                }
                Phase::Enabled => {
                    self.mailbox.set_status(BusStatus::Enabled);
                    let _ = self.bus.set_led(true);
                    let _ = self.bus.set_ack(true);
                    if self.wait_for_req() {
                        self.receive_packet();
                        self.process_packet();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::PACKET_BUF_LEN;

    #[test]
    fn decode_intervals_reproduces_leading_one_and_terminator() {
        // A single short interval (< 10 ticks) encodes just a `1` bit; eight of
        // them complete one byte of all-ones, but the inserter pre-loads the
        // first byte's leading 1, so the first output byte is 0xFF only after
        // 7 more one-bits (bitCnt starts at 1).
        let intervals = [5u32; 7];
        let mut buf = [0u8; PACKET_BUF_LEN];
        let written = decode_intervals(&intervals, &mut buf);
        assert_eq!(written, 1);
        assert_eq!(buf[0], 0xFF);
    }

    #[test]
    fn decode_intervals_stops_past_max_ticks() {
        let intervals = [5u32, 5, 5, 5, 5, 5, 5, 200];
        let mut buf = [0u8; PACKET_BUF_LEN];
        let written = decode_intervals(&intervals, &mut buf);
        assert_eq!(written, 1);
    }

    #[test]
    fn multi_zero_interval_decodes_expected_bit_run() {
        // A 20-tick interval falls in the 17..24 bucket: `001`.
        let mut inserter = BitInserter::new();
        let mut buf = [0u8; 4];
        assert!(insert_interval(20, &mut inserter, &mut buf));
    }
}
