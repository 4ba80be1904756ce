//! Packet-level bitstream reader. Not on the assembler's critical path;
//! round-trip tests use it to replay an encoded bitstream back into frames.

use crate::packet::{Command, Opcode, PacketType, Reg};
use crate::part::Part;
use crate::{bit_field_get, Crc, FrameAddress, FrameWords, FRAME_WORD_COUNT};
use arrayref::array_ref;
use log::warn;
use std::collections::BTreeMap;

/// A decoded configuration packet. Type 2 packets carry the register
/// address inherited from the preceding Type 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub opcode: Opcode,
    pub reg_address: u32,
    pub data: Vec<u32>,
}

/// Iterates packets of a raw word stream, starting in the desynced state:
/// dummy words and the width-detect pattern are consumed until the sync
/// word arrives. Malformed streams panic; this is test machinery.
pub struct PacketParser<'a> {
    data: &'a [u8],
    pos: usize,
    sync: bool,
    last_reg: Option<u32>,
    crc: Crc,
}

impl<'a> PacketParser<'a> {
    pub fn new(data: &'a [u8]) -> PacketParser<'a> {
        PacketParser {
            data,
            pos: 0,
            sync: false,
            last_reg: None,
            crc: Crc::new(),
        }
    }

    fn word_at(&self, pos: usize) -> u32 {
        u32::from_be_bytes(*array_ref!(self.data, pos, 4))
    }

    fn read_words(&mut self, count: usize) -> Vec<u32> {
        let mut words = Vec::with_capacity(count);
        for _ in 0..count {
            words.push(self.word_at(self.pos));
            self.pos += 4;
        }
        words
    }

    fn track_write(&mut self, reg: u32, data: &[u32]) {
        if reg == Reg::Lout as u32 {
            return;
        }
        for &word in data {
            self.crc.update(reg, word);
        }
        if reg == Reg::Cmd as u32 && data.first() == Some(&(Command::Rcrc as u32)) {
            self.crc.reset();
        }
        if reg == Reg::Crc as u32 {
            if let Some(&value) = data.first() {
                if value != self.crc.get() {
                    warn!("crc mismatch: {value:08x} != {:08x}", self.crc.get());
                }
            }
        }
    }
}

fn opcode_from_bits(value: u32) -> Opcode {
    match value {
        0 => Opcode::Nop,
        1 => Opcode::Read,
        2 => Opcode::Write,
        _ => panic!("reserved opcode {value}"),
    }
}

impl Iterator for PacketParser<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        loop {
            if self.pos + 4 > self.data.len() {
                return None;
            }
            let header = self.word_at(self.pos);
            self.pos += 4;

            if !self.sync {
                match header {
                    0xFFFF_FFFF => continue,
                    0x0000_00BB => {
                        assert_eq!(self.word_at(self.pos), 0x1122_0044);
                        self.pos += 4;
                        continue;
                    }
                    0xAA99_5566 => {
                        self.sync = true;
                        self.crc.reset();
                        continue;
                    }
                    _ => panic!("unexpected word while desynced: {header:08x}"),
                }
            }

            break match header >> 29 {
                // Zero padding between packets.
                0 if header == 0 => continue,
                1 => {
                    let opcode = opcode_from_bits(bit_field_get(header, 28, 27));
                    let reg_address = bit_field_get(header, 26, 13);
                    let count = bit_field_get(header, 10, 0) as usize;
                    self.last_reg = Some(reg_address);
                    let data = self.read_words(count);
                    if opcode == Opcode::Write {
                        self.track_write(reg_address, &data);
                    }
                    Some(Packet {
                        packet_type: PacketType::Type1,
                        opcode,
                        reg_address,
                        data,
                    })
                }
                2 => {
                    let opcode = opcode_from_bits(bit_field_get(header, 28, 27));
                    let count = bit_field_get(header, 26, 0) as usize;
                    let reg_address = self
                        .last_reg
                        .expect("type 2 packet without a preceding type 1");
                    let data = self.read_words(count);
                    if opcode == Opcode::Write {
                        self.track_write(reg_address, &data);
                    }
                    Some(Packet {
                        packet_type: PacketType::Type2,
                        opcode,
                        reg_address,
                        data,
                    })
                }
                kind => panic!("unknown packet type {kind} in {header:08x}"),
            };
        }
    }
}

/// Frames and register writes recovered from a packet stream.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub frames: BTreeMap<FrameAddress, FrameWords>,
    pub regs: BTreeMap<Reg, u32>,
}

impl Configuration {
    /// Replays write packets into frame data. FDRI block writes walk the
    /// part geometry; the two padding frames between row, half, or
    /// block-type transitions are skipped over. Returns `None` when the
    /// stream's IDCODE does not match the part.
    pub fn from_packets(
        part: &Part,
        packets: impl Iterator<Item = Packet>,
    ) -> Option<Configuration> {
        let mut command_register: u32 = 0;
        let mut frame_address_register: u32 = 0;
        let mut mask_register: u32 = 0;
        let mut ctl1_register: u32 = 0;
        let mut start_new_write = false;
        let mut current = FrameAddress::from(0);

        let mut config = Configuration::default();
        for packet in packets {
            if packet.opcode != Opcode::Write {
                continue;
            }
            let Some(reg) = Reg::from_address(packet.reg_address) else {
                continue;
            };
            if packet.data.len() == 1 {
                config.regs.insert(reg, packet.data[0]);
            }
            let first = packet.data.first().copied();
            match reg {
                Reg::Mask => {
                    let Some(value) = first else { continue };
                    mask_register = value;
                }
                Reg::Ctl1 => {
                    let Some(value) = first else { continue };
                    ctl1_register = value & mask_register;
                }
                Reg::Cmd => {
                    let Some(value) = first else { continue };
                    command_register = value;
                    // WCFG arms the next FDRI write.
                    if command_register == Command::Wcfg as u32 {
                        start_new_write = true;
                    }
                }
                Reg::Idcode => {
                    // A mismatched IDCODE makes the bitstream invalid.
                    if first != Some(part.idcode()) {
                        return None;
                    }
                }
                Reg::Far => {
                    let Some(value) = first else { continue };
                    frame_address_register = value;
                    // The CMD register re-executes on each FAR load unless
                    // CTL1 bit 21 (per-frame CRC progress markers) is set.
                    if bit_field_get(ctl1_register, 21, 21) == 0
                        && command_register == Command::Wcfg as u32
                    {
                        start_new_write = true;
                    }
                }
                Reg::Fdri => {
                    if start_new_write {
                        current = FrameAddress::from(frame_address_register);
                        start_new_write = false;
                    }
                    let mut ii = 0;
                    while ii + FRAME_WORD_COUNT <= packet.data.len() {
                        let mut words = [0u32; FRAME_WORD_COUNT];
                        words.copy_from_slice(&packet.data[ii..ii + FRAME_WORD_COUNT]);
                        config.frames.insert(current, words);

                        let Some(next) = part.next_frame_address(current) else {
                            break;
                        };
                        // Two padding frames sit between rows.
                        if next.block_type() != current.block_type()
                            || next.is_bottom_half_rows() != current.is_bottom_half_rows()
                            || next.row() != current.row()
                        {
                            ii += 2 * FRAME_WORD_COUNT;
                        }
                        current = next;
                        ii += FRAME_WORD_COUNT;
                    }
                }
                _ => {}
            }
        }
        Some(config)
    }
}
