//! Packet construction and parsing: INIT replies, standard status, DIB status,
//! and 512-byte data replies, plus the discriminated view over a freshly
//! received buffer.

use crate::codec::{
    command_checksum_matches, decode_data_groups, encode_data_groups, reconstruct_checksum,
    split_checksum, xor_checksum, BlockNumberForm, extract_block_number,
};
use crate::consts::{
    cmd, pkt_offset, pkt_type, status_code, BLOCK_LEN, DATA_GROUP_COUNT, DIB_BUF_LEN,
    INIT_BUF_LEN, PACKET_BUF_LEN, PBEGIN, PEND, STD_STATUS_BUF_LEN, SYNC,
};

/// Number of emulated devices, and so the number of INIT reply templates.
pub const INIT_TEMPLATE_COUNT: usize = 2;

fn write_sync_and_begin(buf: &mut [u8]) {
    buf[0..6].copy_from_slice(&SYNC);
    buf[pkt_offset::PBEGIN] = PBEGIN;
}

/// Build one of the two INIT reply templates with the source byte left as a
/// zero placeholder and the checksum computed over everything except it. The
/// engine finalizes both fields per-device via [`finalize_init_reply`].
///
/// `last_on_bus` is true for the second device's template (data-status 0xFF
/// signals "last device" per the original firmware).
pub fn build_init_template(last_on_bus: bool) -> [u8; INIT_BUF_LEN] {
    let mut buf = [0u8; INIT_BUF_LEN];
    write_sync_and_begin(&mut buf);
    buf[pkt_offset::DEST] = 0x80;
    buf[pkt_offset::SRC] = 0x00; // patched by finalize_init_reply
    buf[pkt_offset::TYPE] = pkt_type::STATUS;
    buf[pkt_offset::AUX] = 0x80;
    buf[pkt_offset::STAT] = if last_on_bus { 0xFF } else { 0x80 };
    buf[pkt_offset::ODD_CNT] = 0x84;
    buf[pkt_offset::G7_CNT] = 0x80;

    let mut checksum = xor_checksum(&buf[pkt_offset::DEST..=pkt_offset::G7_CNT]);

    buf[14] = 0xC0;
    buf[15] = 0xF0;
    checksum ^= 0xF0;
    buf[16] = 0x80;
    buf[17] = 0x80;
    buf[18] = 0x81;
    checksum ^= 0x01;

    buf[19] = checksum;
    buf[20] = 0x00;
    buf[21] = PEND;
    buf[22] = 0x00;
    buf
}

/// Patch a device's assigned source ID into its INIT template and finalize the
/// split checksum, mutating the template in place. Mirrors the engine's
/// `SendInit`: the supervisor pre-computed the checksum over everything but the
/// source byte, and the engine XORs the ID in and splits the result.
pub fn finalize_init_reply(template: &mut [u8; INIT_BUF_LEN], dest: u8) {
    template[pkt_offset::SRC] = dest;
    let final_checksum = template[19] ^ dest;
    let (a, b) = split_checksum(final_checksum);
    template[19] = a;
    template[20] = b;
}

/// Build a 23-byte standard status reply.
pub fn encode_std_status_reply(src_id: u8, data_stat: u8) -> [u8; STD_STATUS_BUF_LEN] {
    let mut buf = [0u8; STD_STATUS_BUF_LEN];
    write_sync_and_begin(&mut buf);
    buf[pkt_offset::DEST] = 0x80;
    buf[pkt_offset::SRC] = src_id;
    buf[pkt_offset::TYPE] = pkt_type::STATUS;
    buf[pkt_offset::AUX] = 0x80;
    buf[pkt_offset::STAT] = data_stat | 0x80;
    buf[pkt_offset::ODD_CNT] = 0x84;
    buf[pkt_offset::G7_CNT] = 0x80;

    let mut checksum = xor_checksum(&buf[pkt_offset::DEST..=pkt_offset::G7_CNT]);

    buf[14] = 0xC0;
    buf[15] = 0xF0;
    checksum ^= 0xF0;
    buf[16] = 0x80;
    buf[17] = 0x80;
    buf[18] = 0x81;
    checksum ^= 0x01;

    let (a, b) = split_checksum(checksum);
    buf[19] = a;
    buf[20] = b;
    buf[21] = PEND;
    buf[22] = 0x00;
    buf
}

/// Build a 47-byte Device Information Block status reply. `device_index` picks
/// the "BoneN" identity (0 or 1), matching the two emulated units.
pub fn encode_dib_status_reply(src_id: u8, data_stat: u8, device_index: u8) -> [u8; DIB_BUF_LEN] {
    let mut buf = [0u8; DIB_BUF_LEN];
    write_sync_and_begin(&mut buf);
    buf[pkt_offset::DEST] = 0x80;
    buf[pkt_offset::SRC] = src_id;
    buf[pkt_offset::TYPE] = pkt_type::STATUS;
    buf[pkt_offset::AUX] = 0x80;
    buf[pkt_offset::STAT] = data_stat | 0x80;
    buf[pkt_offset::ODD_CNT] = 0x84;
    buf[pkt_offset::G7_CNT] = 0x83;

    let mut checksum = xor_checksum(&buf[pkt_offset::DEST..=pkt_offset::G7_CNT]);

    buf[14] = 0xC0;
    buf[15] = 0xF0;
    checksum ^= 0xF0;
    buf[16] = 0x80;
    buf[17] = 0x80;
    buf[18] = 0x81;
    checksum ^= 0x01;

    buf[19] = 0x80;
    buf[20] = 0x8B;
    checksum ^= 0x0B;

    let name: [u8; 6] = *b"Beagle";
    for (i, &c) in name.iter().enumerate() {
        buf[21 + i] = c | 0x80;
        checksum ^= c;
    }

    buf[27] = 0x80;
    let unit_digit = if device_index == 0 { b'1' } else { b'2' };
    let tail: [u8; 7] = [b'B', b'o', b'n', b'e', unit_digit, b' ', b' '];
    for (i, &c) in tail.iter().enumerate() {
        buf[28 + i] = c | 0x80;
        checksum ^= c;
    }

    buf[35] = 0x80;
    for i in 0..3 {
        buf[36 + i] = b' ' | 0x80;
        checksum ^= b' ';
    }

    buf[39] = 0x82; // device type: hard disk
    checksum ^= 0x02;
    buf[40] = 0xA0; // subtype: non-removable
    checksum ^= 0x20;
    buf[41] = 0x82; // firmware version
    checksum ^= 0x02;
    buf[42] = 0x80;

    let (a, b) = split_checksum(checksum);
    buf[43] = a;
    buf[44] = b;
    buf[45] = PEND;
    buf[46] = 0x00;
    buf
}

/// Build a 604-byte data reply carrying one 512-byte block.
pub fn encode_data_reply(
    src_id: u8,
    data_stat: u8,
    block: &[u8; BLOCK_LEN],
) -> [u8; PACKET_BUF_LEN] {
    let mut buf = [0u8; PACKET_BUF_LEN];
    write_sync_and_begin(&mut buf);
    buf[pkt_offset::DEST] = 0x80;
    buf[pkt_offset::SRC] = src_id;
    buf[pkt_offset::TYPE] = pkt_type::DATA;
    buf[pkt_offset::AUX] = 0x80;
    buf[pkt_offset::STAT] = data_stat | 0x80;
    buf[pkt_offset::ODD_CNT] = 0x81;
    buf[pkt_offset::G7_CNT] = 0xC9;

    encode_data_groups(block, &mut buf[14..14 + 2 + DATA_GROUP_COUNT * 8]);

    let mut checksum = xor_checksum(block);
    checksum ^= xor_checksum(&buf[pkt_offset::DEST..=pkt_offset::G7_CNT]);

    let (a, b) = split_checksum(checksum);
    buf[600] = a;
    buf[601] = b;
    buf[602] = PEND;
    buf[603] = 0x00;
    buf
}

/// Decode a received 512-byte data packet, verifying its checksum.
///
/// Returns `Ok(block)` on a good checksum, `Err(status_code::BUS_ERROR)` otherwise.
pub fn decode_data_packet(received: &[u8]) -> Result<[u8; BLOCK_LEN], u8> {
    let block = decode_data_groups(&received[14..14 + 2 + DATA_GROUP_COUNT * 8]);

    let mut checksum = xor_checksum(&block);
    checksum ^= xor_checksum(&received[pkt_offset::DEST..=pkt_offset::G7_CNT]);

    let expected = reconstruct_checksum(received[600], received[601]);
    if checksum == expected {
        Ok(block)
    } else {
        Err(status_code::BUS_ERROR)
    }
}

/// Re-check a command packet's embedded checksum. See
/// [`crate::codec::command_checksum_matches`] for why this is informational
/// only and never gates dispatch.
pub fn command_checksum_ok(received: &[u8]) -> bool {
    command_checksum_matches(received)
}

/// A command lazily parsed out of a received buffer's fixed-offset fields.
#[derive(Debug, Clone, Copy)]
pub struct CommandHeader {
    pub dest: u8,
    pub cmd_num: u8,
}

/// What kind of packet the bus engine just handed off.
#[derive(Debug, Clone, Copy)]
pub enum ReceivedPacket {
    Command(CommandHeader),
    Data { dest: u8 },
}

impl ReceivedPacket {
    /// Parse the type/dest/cmd fields out of a raw received buffer. Matches
    /// the original firmware's rule: `type == 0x82` is the data packet that
    /// follows a WRITEBLOCK command, everything else carries a command number.
    pub fn parse(raw: &[u8]) -> ReceivedPacket {
        let dest = raw[pkt_offset::DEST];
        let type_byte = raw[pkt_offset::TYPE];
        if type_byte == pkt_type::DATA {
            ReceivedPacket::Data { dest }
        } else {
            ReceivedPacket::Command(CommandHeader {
                dest,
                cmd_num: raw[pkt_offset::CMD],
            })
        }
    }
}

/// True if `cmd_num` is one of the two observed INIT command bytes.
pub fn is_init(cmd_num: u8) -> bool {
    cmd_num == cmd::INIT || cmd_num == cmd::INIT_ALIAS
}

/// Which block-number offset form a READBLOCK/WRITEBLOCK command number selects.
pub fn block_number_form(cmd_num: u8) -> BlockNumberForm {
    if cmd_num == cmd::READBLOCK || cmd_num == cmd::WRITEBLOCK {
        BlockNumberForm::Standard
    } else {
        BlockNumberForm::Extended
    }
}

/// Extract the block number a READBLOCK/WRITEBLOCK command addresses.
pub fn command_block_number(raw: &[u8], cmd_num: u8) -> u32 {
    extract_block_number(raw, block_number_form(cmd_num))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_from_pbegin_through_pend_has_msb_set() {
        let buf = encode_std_status_reply(0x81, 0x00);
        for &b in &buf[pkt_offset::PBEGIN..21 + 1] {
            assert_eq!(b & 0x80, 0x80);
        }
    }

    #[test]
    fn init_reply_checksum_matches_after_finalize() {
        let mut template = build_init_template(false);
        finalize_init_reply(&mut template, 0x81);
        let cs = reconstruct_checksum(template[19], template[20]);
        let mut expected = xor_checksum(&template[pkt_offset::DEST..=pkt_offset::G7_CNT]);
        expected ^= 0xF0;
        expected ^= 0x01;
        assert_eq!(cs, expected);
    }

    #[test]
    fn data_reply_round_trips_through_decode() {
        let mut block = [0u8; BLOCK_LEN];
        for (i, b) in block.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        let reply = encode_data_reply(0x81, 0x00, &block);
        let decoded = decode_data_packet(&reply).expect("checksum should be valid");
        assert_eq!(decoded, block);
    }

    #[test]
    fn data_reply_with_flipped_bit_fails_checksum() {
        let block = [0x5Au8; BLOCK_LEN];
        let mut reply = encode_data_reply(0x81, 0x00, &block);
        reply[14] ^= 0x01;
        assert!(decode_data_packet(&reply).is_err());
    }

    #[test]
    fn dib_reply_names_device_by_index() {
        let a = encode_dib_status_reply(0x81, 0x00, 0);
        let b = encode_dib_status_reply(0x82, 0x00, 1);
        assert_eq!(a[32] & 0x7F, b'1');
        assert_eq!(b[32] & 0x7F, b'2');
    }
}
