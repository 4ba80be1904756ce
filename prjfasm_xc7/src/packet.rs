//! Configuration packets and the fixed 7-series programming sequence.
//!
//! Register addresses and commands follow UG470; the packet header formats
//! are Table 5-20 (Type 1) and Table 5-22 (Type 2).

use crate::{bit_field_set, update_ecc, Frames, FRAME_WORD_COUNT};

/// Configuration register addresses (UG470, pg. 109).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Reg {
    Crc = 0x00,
    Far = 0x01,
    Fdri = 0x02,
    Fdro = 0x03,
    Cmd = 0x04,
    Ctl0 = 0x05,
    Mask = 0x06,
    Stat = 0x07,
    Lout = 0x08,
    Cor0 = 0x09,
    Mfwr = 0x0a,
    Cbc = 0x0b,
    Idcode = 0x0c,
    Axss = 0x0d,
    Cor1 = 0x0e,
    WbStar = 0x10,
    Timer = 0x11,
    Unknown = 0x13,
    BootSts = 0x16,
    Ctl1 = 0x18,
    Bspi = 0x1f,
}

impl Reg {
    pub fn from_address(address: u32) -> Option<Reg> {
        Some(match address {
            0x00 => Reg::Crc,
            0x01 => Reg::Far,
            0x02 => Reg::Fdri,
            0x03 => Reg::Fdro,
            0x04 => Reg::Cmd,
            0x05 => Reg::Ctl0,
            0x06 => Reg::Mask,
            0x07 => Reg::Stat,
            0x08 => Reg::Lout,
            0x09 => Reg::Cor0,
            0x0a => Reg::Mfwr,
            0x0b => Reg::Cbc,
            0x0c => Reg::Idcode,
            0x0d => Reg::Axss,
            0x0e => Reg::Cor1,
            0x10 => Reg::WbStar,
            0x11 => Reg::Timer,
            0x13 => Reg::Unknown,
            0x16 => Reg::BootSts,
            0x18 => Reg::Ctl1,
            0x1f => Reg::Bspi,
            _ => return None,
        })
    }
}

/// CMD register command codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Command {
    Nop = 0x0,
    Wcfg = 0x1,
    Mfw = 0x2,
    Lfrm = 0x3,
    Rcfg = 0x4,
    Start = 0x5,
    Rcap = 0x6,
    Rcrc = 0x7,
    AgHigh = 0x8,
    Switch = 0x9,
    GRestore = 0xa,
    Shutdown = 0xb,
    GCapture = 0xc,
    Desync = 0xd,
    IProg = 0xf,
    Crcc = 0x10,
    LTimer = 0x11,
    BspiRead = 0x12,
    FallEdge = 0x13,
}

/// Packet opcodes (UG470, pg. 108).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Nop = 0,
    Read = 1,
    Write = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    // Zero padding masquerading as a packet.
    None = 0,
    Type1 = 1,
    Type2 = 2,
}

/// One configuration packet: a header word plus its payload words. A Type 2
/// packet inherits the register address of the preceding Type 1 packet on
/// the wire; it still records the register here for bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigurationPacket {
    pub packet_type: PacketType,
    pub opcode: Opcode,
    pub reg: Reg,
    pub data: Vec<u32>,
}

impl ConfigurationPacket {
    pub fn nop() -> ConfigurationPacket {
        ConfigurationPacket {
            packet_type: PacketType::Type1,
            opcode: Opcode::Nop,
            reg: Reg::Crc,
            data: vec![],
        }
    }

    pub fn write(reg: Reg, value: u32) -> ConfigurationPacket {
        ConfigurationPacket {
            packet_type: PacketType::Type1,
            opcode: Opcode::Write,
            reg,
            data: vec![value],
        }
    }

    pub fn cmd(command: Command) -> ConfigurationPacket {
        ConfigurationPacket::write(Reg::Cmd, command as u32)
    }

    pub fn type1_write(reg: Reg, data: Vec<u32>) -> ConfigurationPacket {
        ConfigurationPacket {
            packet_type: PacketType::Type1,
            opcode: Opcode::Write,
            reg,
            data,
        }
    }

    pub fn type2_write(reg: Reg, data: Vec<u32>) -> ConfigurationPacket {
        ConfigurationPacket {
            packet_type: PacketType::Type2,
            opcode: Opcode::Write,
            reg,
            data,
        }
    }

    /// Encodes the packet header word.
    pub fn header_word(&self) -> u32 {
        let mut word = bit_field_set(0, 31, 29, self.packet_type as u32);
        match self.packet_type {
            PacketType::None => {}
            PacketType::Type1 => {
                word = bit_field_set(word, 28, 27, self.opcode as u32);
                word = bit_field_set(word, 26, 13, self.reg as u32);
                word = bit_field_set(word, 10, 0, self.data.len() as u32);
            }
            PacketType::Type2 => {
                word = bit_field_set(word, 28, 27, self.opcode as u32);
                word = bit_field_set(word, 26, 0, self.data.len() as u32);
            }
        }
        word
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalReleaseCycle {
    Phase1 = 0x0,
    Phase2 = 0x1,
    Phase3 = 0x2,
    Phase4 = 0x3,
    Phase5 = 0x4,
    Phase6 = 0x5,
    TrackDone = 0x6,
    Keep = 0x7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum StallCycle {
    Phase0 = 0x0,
    Phase1 = 0x1,
    Phase2 = 0x2,
    Phase3 = 0x3,
    Phase4 = 0x4,
    Phase5 = 0x5,
    Phase6 = 0x6,
    NoWait = 0x7,
}

/// Builder for the COR0 options word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cor0(u32);

impl Cor0 {
    pub fn new() -> Cor0 {
        Cor0::default()
    }

    pub fn add_pipeline_stage_for_done_in(self, enabled: bool) -> Cor0 {
        Cor0(bit_field_set(self.0, 25, 25, enabled as u32))
    }

    pub fn release_done_pin_at_startup_cycle(self, cycle: SignalReleaseCycle) -> Cor0 {
        Cor0(bit_field_set(self.0, 14, 12, cycle as u32))
    }

    pub fn stall_at_startup_cycle_until_dci_match(self, cycle: StallCycle) -> Cor0 {
        Cor0(bit_field_set(self.0, 11, 9, cycle as u32))
    }

    pub fn stall_at_startup_cycle_until_mmcm_lock(self, cycle: StallCycle) -> Cor0 {
        Cor0(bit_field_set(self.0, 8, 6, cycle as u32))
    }

    pub fn release_gts_signal_at_startup_cycle(self, cycle: SignalReleaseCycle) -> Cor0 {
        Cor0(bit_field_set(self.0, 5, 3, cycle as u32))
    }

    pub fn release_gwe_signal_at_startup_cycle(self, cycle: SignalReleaseCycle) -> Cor0 {
        Cor0(bit_field_set(self.0, 2, 0, cycle as u32))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// Builds the Type-2 FDRI payload: every frame of the map in ascending
/// address order with its ECC stamped, two zero frames between adjacent
/// frames whose (half, row, block type) tuple differs, and two zero frames
/// appended at the end.
pub fn type2_packet_data(frames: &Frames) -> Vec<u32> {
    const SEPARATOR_WORDS: usize = 2 * FRAME_WORD_COUNT;
    let mut data = Vec::with_capacity((frames.len() + 2) * FRAME_WORD_COUNT);
    let mut iter = frames.iter().peekable();
    while let Some((address, words)) = iter.next() {
        let mut words = *words;
        update_ecc(&mut words);
        data.extend_from_slice(&words);
        if let Some(&(next, _)) = iter.peek() {
            if next.block_type() != address.block_type()
                || next.is_bottom_half_rows() != address.is_bottom_half_rows()
                || next.row() != address.row()
            {
                data.resize(data.len() + SEPARATOR_WORDS, 0);
            }
        }
    }
    data.resize(data.len() + SEPARATOR_WORDS, 0);
    data
}

/// The complete programming sequence: initialization, the FDRI frame write
/// (a Type 1 with no inline words announcing a Type 2 carrying everything),
/// and finalization. The sequence for Series-7 is taken from
/// <https://www.kc8apf.net/2018/05/unpacking-xilinx-7-series-bitstreams-part-2/>.
pub fn build_configuration_package(idcode: u32, packet_data: Vec<u32>) -> Vec<ConfigurationPacket> {
    use ConfigurationPacket as P;
    let mut packets = vec![
        P::nop(),
        P::write(Reg::Timer, 0x0),
        P::write(Reg::WbStar, 0x0),
        P::cmd(Command::Nop),
        P::nop(),
        P::cmd(Command::Rcrc),
        P::nop(),
        P::nop(),
        P::write(Reg::Unknown, 0x0),
        P::write(
            Reg::Cor0,
            Cor0::new()
                .add_pipeline_stage_for_done_in(true)
                .release_done_pin_at_startup_cycle(SignalReleaseCycle::Phase4)
                .stall_at_startup_cycle_until_dci_match(StallCycle::NoWait)
                .stall_at_startup_cycle_until_mmcm_lock(StallCycle::NoWait)
                .release_gts_signal_at_startup_cycle(SignalReleaseCycle::Phase5)
                .release_gwe_signal_at_startup_cycle(SignalReleaseCycle::Phase6)
                .value(),
        ),
        P::write(Reg::Cor1, 0x0),
        P::write(Reg::Idcode, idcode),
        P::cmd(Command::Switch),
        P::nop(),
        P::write(Reg::Mask, 0x401),
        P::write(Reg::Ctl0, 0x501),
        P::write(Reg::Mask, 0x0),
        P::write(Reg::Ctl1, 0x0),
    ];
    packets.extend(std::iter::repeat_with(P::nop).take(8));
    packets.extend([
        P::write(Reg::Far, 0x0),
        P::cmd(Command::Wcfg),
        P::nop(),
        // The Type 1 write announces FDRI with no inline words; its 11-bit
        // length field could not hold the payload, the 27-bit Type 2 can.
        P::type1_write(Reg::Fdri, vec![]),
        P::type2_write(Reg::Fdri, packet_data),
        P::cmd(Command::Rcrc),
        P::nop(),
        P::nop(),
        P::cmd(Command::GRestore),
        P::nop(),
        P::cmd(Command::Lfrm),
    ]);
    packets.extend(std::iter::repeat_with(P::nop).take(100));
    packets.extend([
        P::cmd(Command::Start),
        P::nop(),
        P::write(Reg::Far, 0x3be0000),
        P::write(Reg::Mask, 0x501),
        P::write(Reg::Ctl0, 0x501),
        P::cmd(Command::Rcrc),
        P::nop(),
        P::nop(),
        P::cmd(Command::Desync),
    ]);
    packets.extend(std::iter::repeat_with(P::nop).take(400));
    packets
}
