//! SmartPort wire-format primitives: the split XOR checksum, the
//! groups-of-seven payload encoding, and block-number extraction.
//!
//! Every byte from PBEGIN through PEND carries bit 7 set; group-of-seven
//! encoding exists to smuggle a full 7-bit byte through that constraint by
//! pulling bit 6 of each of seven consecutive bytes out into a shared header
//! byte ("MSBs") that precedes them.

use crate::consts::{pkt_offset, BLOCK_LEN, DATA_GROUP_COUNT};

/// Split an 8-bit XOR checksum into its two on-wire bytes.
pub fn split_checksum(checksum: u8) -> (u8, u8) {
    (checksum | 0xAA, (checksum >> 1) | 0xAA)
}

/// Recover an 8-bit XOR checksum from its two on-wire bytes.
pub fn reconstruct_checksum(a: u8, b: u8) -> u8 {
    (a & 0x55) | ((b & 0x55) << 1)
}

/// Encode one 512-byte block as the odd byte + 73 groups-of-seven payload
/// section of a data packet, writing into `out` starting at `out[0]`.
/// `out` must be at least `1 + DATA_GROUP_COUNT * 8` bytes.
pub fn encode_data_groups(block: &[u8; BLOCK_LEN], out: &mut [u8]) {
    out[0] = ((block[0] >> 1) & 0x40) | 0x80;
    out[1] = block[0] | 0x80;

    for group in 0..DATA_GROUP_COUNT {
        let mut msbs = 0u8;
        for byte in 0..7 {
            let src = block[1 + group * 7 + byte];
            msbs |= (src >> (byte + 1)) & (0x80 >> (byte + 1));
        }
        let base = 2 + group * 8;
        out[base] = msbs | 0x80;
        for byte in 0..7 {
            out[base + 1 + byte] = block[1 + group * 7 + byte] | 0x80;
        }
    }
}

/// Decode the odd byte + 73 groups-of-seven section of a received data packet
/// back into a 512-byte block. `encoded` must start at the odd-byte MSB byte
/// (i.e. the same offset `encode_data_groups` writes `out[0]` to).
pub fn decode_data_groups(encoded: &[u8]) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    block[0] = ((encoded[0] << 1) & 0x80) | (encoded[1] & 0x7F);

    for group in 0..DATA_GROUP_COUNT {
        let base = 2 + group * 8;
        let msbs = encoded[base];
        for byte in 0..7 {
            let bit7 = (msbs << (byte + 1)) & 0x80;
            let bit0_6 = encoded[base + 1 + byte] & 0x7F;
            block[1 + group * 7 + byte] = bit7 | bit0_6;
        }
    }
    block
}

/// XOR checksum over a plain (not bit-7-set) byte slice.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Which byte-offset variant a command uses for its 24-bit block number. The
/// extended command forms (0xC0-range) start their MSBs/block fields one byte
/// earlier than the standard forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockNumberForm {
    Standard,
    Extended,
}

/// Extract the little-endian 24-bit block number from a READBLOCK/WRITEBLOCK
/// command packet, given which offset variant the command number selects.
pub fn extract_block_number(pkt: &[u8], form: BlockNumberForm) -> u32 {
    let msbs = pkt[17];
    let (low_off, mid_off, hi_off, low_sh, mid_sh, hi_sh) = match form {
        BlockNumberForm::Standard => (20, 21, 22, 3, 4, 5),
        BlockNumberForm::Extended => (19, 20, 21, 2, 3, 4),
    };
    let low = (pkt[low_off] & 0x7F) | ((msbs << low_sh) & 0x80);
    let mid = (pkt[mid_off] & 0x7F) | ((msbs << mid_sh) & 0x80);
    let hi = (pkt[hi_off] & 0x7F) | ((msbs << hi_sh) & 0x80);
    low as u32 + 256 * mid as u32 + 65536 * hi as u32
}

/// Recompute the checksum embedded in a command packet and compare it against
/// the trailing checksum byte.
///
/// The trailing comparison uses `&` rather than the `|`/shift reconstruction
/// every other checksum field uses — that is how the original computes it, and
/// the dispatcher never actually gates on the result (see
/// [`crate::supervisor::Supervisor`]), so this is replicated exactly rather than
/// "fixed".
pub fn command_checksum_matches(pkt: &[u8]) -> bool {
    let mut checksum = 0u8;
    for i in pkt_offset::DEST..=pkt_offset::G7_CNT {
        checksum ^= pkt[i];
    }

    let msbs_a = pkt[14];
    checksum ^= (pkt[15] & 0x7F) | ((msbs_a << 1) & 0x80);
    checksum ^= (pkt[16] & 0x7F) | ((msbs_a << 2) & 0x80);

    let msbs_b = pkt[17];
    checksum ^= (pkt[18] & 0x7F) | ((msbs_b << 1) & 0x80);
    checksum ^= (pkt[19] & 0x7F) | ((msbs_b << 2) & 0x80);
    checksum ^= (pkt[20] & 0x7F) | ((msbs_b << 3) & 0x80);
    checksum ^= (pkt[21] & 0x7F) | ((msbs_b << 4) & 0x80);
    checksum ^= (pkt[22] & 0x7F) | ((msbs_b << 5) & 0x80);
    checksum ^= (pkt[23] & 0x7F) | ((msbs_b << 6) & 0x80);
    checksum ^= (pkt[24] & 0x7F) | ((msbs_b << 7) & 0x80);

    let packet_cs = pkt[25] & ((pkt[26] << 1) | 0x01);
    checksum == packet_cs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_split_round_trips() {
        for cs in 0u16..=255 {
            let cs = cs as u8;
            let (a, b) = split_checksum(cs);
            assert_eq!(reconstruct_checksum(a, b), cs);
        }
    }

    #[test]
    fn group_of_seven_round_trips_random_blocks() {
        let mut state: u32 = 0x2463_A1B7;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        for _ in 0..64 {
            let mut block = [0u8; BLOCK_LEN];
            for b in block.iter_mut() {
                *b = (next() & 0xFF) as u8;
            }
            let mut encoded = [0u8; 2 + DATA_GROUP_COUNT * 8];
            encode_data_groups(&block, &mut encoded);
            assert!(encoded.iter().all(|b| b & 0x80 != 0));
            let decoded = decode_data_groups(&encoded);
            assert_eq!(block, decoded);
        }
    }

    #[test]
    fn group_of_seven_all_zero_and_all_one_blocks() {
        for fill in [0x00u8, 0xFF] {
            let block = [fill; BLOCK_LEN];
            let mut encoded = [0u8; 2 + DATA_GROUP_COUNT * 8];
            encode_data_groups(&block, &mut encoded);
            let decoded = decode_data_groups(&encoded);
            assert_eq!(block, decoded);
        }
    }

    #[test]
    fn block_number_standard_and_extended_agree_on_shifts() {
        let mut pkt = [0u8; 30];
        pkt[17] = 0b1110_0000 | 0x80; // msbs with bits 5,6,7 set
        pkt[19] = 0x01 | 0x80;
        pkt[20] = 0x02 | 0x80;
        pkt[21] = 0x03 | 0x80;
        pkt[22] = 0x04 | 0x80;
        let ext = extract_block_number(&pkt, BlockNumberForm::Extended);
        let std = extract_block_number(&pkt, BlockNumberForm::Standard);
        // Different offsets/shifts, so the two forms need not agree numerically,
        // only that each is internally consistent and doesn't panic on any byte.
        let _ = (ext, std);
    }
}
