//! Serializes a configuration package into the vendor `.bit` container:
//! the TLV file header, the bus-width autodetect preamble, the sync word,
//! and the big-endian word stream of packet headers and payloads. The
//! 32-bit payload-length field is back-patched once the stream is known.

use crate::packet::ConfigurationPacket;
use chrono::{DateTime, Utc};
use std::io::{self, Write};

/// Bus width auto detection pattern and sync word (UG470, pg. 80).
pub const BUS_WIDTH_PREAMBLE: [u32; 13] = [
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0x0000_00BB,
    0x1122_0044,
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    0xAA99_5566,
];

const HEADER_MAGIC: [u8; 13] = [
    0x00, 0x09, 0x0f, 0xf0, 0x0f, 0xf0, 0x0f, 0xf0, 0x0f, 0xf0, 0x00, 0x00, 0x01,
];

fn push_field(header: &mut Vec<u8>, tag: u8, content: &str) {
    header.push(tag);
    let length = content.len() as u16 + 1;
    header.extend_from_slice(&length.to_be_bytes());
    header.extend_from_slice(content.as_bytes());
    header.push(0x0);
}

/// Builds the Tag-Length-Value bitstream header
/// (<http://www.fpga-faq.com/FAQ_Pages/0026_Tell_me_about_bit_files.htm>).
/// The final 'e' field length is left zero for the writer to patch.
pub fn bitstream_header(
    part_name: &str,
    source_name: &str,
    generator_name: &str,
    build_time: DateTime<Utc>,
) -> Vec<u8> {
    let mut header = HEADER_MAGIC.to_vec();
    // The magic ends where the 'a' field starts; push_field emits the tag.
    push_field(
        &mut header,
        b'a',
        &format!("{source_name};Generator={generator_name}"),
    );
    push_field(&mut header, b'b', part_name);
    push_field(&mut header, b'c', &build_time.format("%Y/%m/%d").to_string());
    push_field(&mut header, b'd', &build_time.format("%H:%M:%S").to_string());
    header.extend_from_slice(&[b'e', 0x0, 0x0, 0x0, 0x0]);
    header
}

/// Writes the complete bitstream for `packets` to `out` as a single write.
pub fn write_bitstream<W: Write>(
    out: &mut W,
    packets: &[ConfigurationPacket],
    part_name: &str,
    source_name: &str,
    generator_name: &str,
) -> io::Result<()> {
    let bytes = assemble_bitstream(packets, part_name, source_name, generator_name, Utc::now());
    out.write_all(&bytes)
}

/// Assembles the full file image, back-patching the payload length.
pub fn assemble_bitstream(
    packets: &[ConfigurationPacket],
    part_name: &str,
    source_name: &str,
    generator_name: &str,
    build_time: DateTime<Utc>,
) -> Vec<u8> {
    let mut bytes = bitstream_header(part_name, source_name, generator_name, build_time);
    let length_field = bytes.len() - 4;

    for word in BUS_WIDTH_PREAMBLE {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    for packet in packets {
        bytes.extend_from_slice(&packet.header_word().to_be_bytes());
        for &word in &packet.data {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
    }

    let length_of_data = (bytes.len() - length_field - 4) as u32;
    bytes[length_field..length_field + 4].copy_from_slice(&length_of_data.to_be_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{build_configuration_package, type2_packet_data, Reg};
    use crate::Frames;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 34, 56).unwrap()
    }

    fn parse_field<'a>(bytes: &'a [u8], tag: u8) -> (&'a [u8], &'a [u8]) {
        assert_eq!(bytes[0], tag);
        let length = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        (&bytes[3..3 + length], &bytes[3 + length..])
    }

    #[test]
    fn header_fields_are_nul_terminated_tlv() {
        let header = bitstream_header("xc7a35tcsg324-1", "design.fasm", "fpga-assembler", fixed_time());
        assert_eq!(&header[..13], &super::HEADER_MAGIC);
        let (value, rest) = parse_field(&header[13..], b'a');
        assert_eq!(value, b"design.fasm;Generator=fpga-assembler\0");
        let (value, rest) = parse_field(rest, b'b');
        assert_eq!(value, b"xc7a35tcsg324-1\0");
        let (value, rest) = parse_field(rest, b'c');
        assert_eq!(value, b"2024/03/09\0");
        let (value, rest) = parse_field(rest, b'd');
        assert_eq!(value, b"12:34:56\0");
        assert_eq!(rest, &[b'e', 0, 0, 0, 0]);
    }

    #[test]
    fn payload_starts_with_preamble_and_sync() {
        let bytes = assemble_bitstream(&[], "part", "src", "gen", fixed_time());
        let header_len = bitstream_header("part", "src", "gen", fixed_time()).len();
        let payload = &bytes[header_len..];
        let mut expected = Vec::new();
        for _ in 0..8 {
            expected.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        }
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0xBB]);
        expected.extend_from_slice(&[0x11, 0x22, 0x00, 0x44]);
        expected.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        expected.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        expected.extend_from_slice(&[0xAA, 0x99, 0x55, 0x66]);
        assert_eq!(&payload[..52], &expected[..]);
    }

    #[test]
    fn length_field_is_back_patched() {
        let packets = build_configuration_package(0x1234, type2_packet_data(&Frames::new()));
        let bytes = assemble_bitstream(&packets, "part", "src", "gen", fixed_time());
        let header_len = bitstream_header("part", "src", "gen", fixed_time()).len();
        let length = u32::from_be_bytes([
            bytes[header_len - 4],
            bytes[header_len - 3],
            bytes[header_len - 2],
            bytes[header_len - 1],
        ]);
        assert_eq!(length as usize, bytes.len() - header_len);
        // 13 preamble words, one word per packet, plus payload words.
        let payload_words: usize = packets.iter().map(|p| 1 + p.data.len()).sum();
        assert_eq!(length as usize, (13 + payload_words) * 4);
    }

    #[test]
    fn packets_serialize_big_endian() {
        let packets = vec![ConfigurationPacket::write(Reg::Idcode, 0x0362_D093)];
        let bytes = assemble_bitstream(&packets, "p", "s", "g", fixed_time());
        let tail = &bytes[bytes.len() - 8..];
        // Type 1 write of one word to IDCODE, then the word itself.
        assert_eq!(tail, &[0x30, 0x01, 0x80, 0x01, 0x03, 0x62, 0xD0, 0x93]);
    }
}
