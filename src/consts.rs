//! Protocol-wide constants for the SmartPort bus and the shared mailbox.
//!
//! These values mirror the fixed layout the bus engine and the supervisor
//! agree on: packet framing bytes, per-command byte offsets, and the
//! byte offsets of every field in the shared mailbox page.

/// Literal sync bytes that precede every non-handshake packet on the wire.
pub const SYNC: [u8; 6] = [0xFF, 0x3F, 0xCF, 0xF3, 0xFC, 0xFF];

/// Marks the start of packet content, immediately after the sync bytes.
pub const PBEGIN: u8 = 0xC3;

/// Marks the end of packet content, immediately before the in-memory terminator.
pub const PEND: u8 = 0xC8;

/// In-memory sentinel the transmit routine stops on; never appears mid-packet.
pub const END_OF_PACKET_MARKER: u8 = 0x00;

/// Number of groups-of-seven needed to carry one 512-byte block, plus one odd byte.
pub const DATA_GROUP_COUNT: usize = 73;

/// Standard (non-extended) SmartPort command numbers, as received at the command offset.
pub mod cmd {
    pub const STATUS: u8 = 0x80;
    pub const READBLOCK: u8 = 0x81;
    pub const WRITEBLOCK: u8 = 0x82;
    pub const FORMAT: u8 = 0x83;
    pub const CONTROL: u8 = 0x84;
    pub const INIT: u8 = 0x85;
    pub const OPEN: u8 = 0x86;
    pub const CLOSE: u8 = 0x87;
    pub const READ: u8 = 0x88;
    pub const WRITE: u8 = 0x89;

    /// Extended command numbers carry the same semantics with 0xC0 in place of 0x80.
    pub const EXT_BIT: u8 = 0x40;

    /// Observed alternate INIT command byte; cause unknown, replicated as seen in the wild.
    pub const INIT_ALIAS: u8 = 0xF0;

    pub const EXT_STATUS: u8 = STATUS | EXT_BIT;
    pub const EXT_READBLOCK: u8 = READBLOCK | EXT_BIT;
    pub const EXT_WRITEBLOCK: u8 = WRITEBLOCK | EXT_BIT;
    pub const EXT_CONTROL: u8 = CONTROL | EXT_BIT;
}

/// Offsets within a command packet's raw buffer (indices into the 604-byte buffer).
pub mod pkt_offset {
    pub const PBEGIN: usize = 6;
    pub const DEST: usize = 7;
    pub const SRC: usize = 8;
    pub const TYPE: usize = 9;
    pub const AUX: usize = 10;
    pub const STAT: usize = 11;
    pub const ODD_CNT: usize = 12;
    pub const G7_CNT: usize = 13;
    pub const CMD: usize = 15;
    pub const STATCODE: usize = 20;
    /// Length of the checksummed packet header (dest..g7Cnt inclusive).
    pub const HEADER_LEN: usize = 7;
}

/// Packet type byte values (offset `pkt_offset::TYPE`).
pub mod pkt_type {
    pub const STATUS: u8 = 0x81;
    pub const DATA: u8 = 0x82;
}

/// Device-status / sub-status codes used in status replies.
pub mod status_code {
    pub const OK: u8 = 0x00;
    pub const DIB: u8 = 0x03;
    pub const BUS_ERROR: u8 = 0x06;
    pub const UNSUPPORTED: u8 = 0x21;
}

/// Size in bytes of the receive/response packet buffers (1 odd byte + 73 groups of 8 + framing).
pub const PACKET_BUF_LEN: usize = 604;
/// Size in bytes of each INIT reply template.
pub const INIT_BUF_LEN: usize = 23;
/// Size in bytes of a DIB status reply.
pub const DIB_BUF_LEN: usize = 47;
/// Size in bytes of a standard status reply.
pub const STD_STATUS_BUF_LEN: usize = 23;
/// Number of addressable 512-byte blocks per 32 MB image.
pub const NUM_BLOCKS: usize = 65536;
/// Bytes per block.
pub const BLOCK_LEN: usize = 512;

/// Byte offsets of every field within the shared mailbox page (see the external
/// interfaces table both agents are built against).
pub mod mailbox_offset {
    pub const STATUS: usize = 0x300;
    pub const BUS_ID_1: usize = 0x301;
    pub const BUS_ID_2: usize = 0x302;
    pub const WAIT: usize = 0x303;
    pub const ERROR: usize = 0x304;
    pub const RCVD_PACKET: usize = 0x400;
    pub const RESP_PACKET: usize = 0x800;
    pub const INIT_RESP_1: usize = 0xC00;
    pub const INIT_RESP_2: usize = 0xE00;
}

/// Supervisor poll interval between mailbox checks.
pub const SUPERVISOR_POLL_INTERVAL_US: u64 = 40;

/// Receive bit-interval table: the interval (in 0.5 us ticks) below each threshold maps
/// to that many leading zero bits before the terminating one bit.
pub const RECEIVE_INTERVAL_TABLE: [(u32, u32); 8] = [
    (10, 0),
    (17, 1),
    (24, 2),
    (31, 3),
    (38, 4),
    (45, 5),
    (52, 6),
    (66, 7),
];

/// Upper bound, in ticks, past which the WDAT line is considered stalled and the
/// packet is terminated.
pub const RECEIVE_MAX_TICKS: u32 = 65;

/// Duration, in nanoseconds, of one receive sampling tick.
pub const RECEIVE_TICK_NS: u64 = 500;

/// Transmit timing, expressed as nominal pulse widths in nanoseconds.
pub mod timing {
    /// Duration a RDAT low pulse is held to signal a 1 bit.
    pub const BIT_LOW_NS: u64 = 1_750;
    /// Inter-bit hold duration before the next bit starts.
    pub const INTER_BIT_NS: u64 = 2_050;
    /// Extra pad after an INIT reply completes, before returning to the main loop.
    pub const INIT_PAD_NS: u64 = 25_000;
}
