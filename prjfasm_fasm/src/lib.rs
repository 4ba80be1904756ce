//! Parser for the FASM file format.
//!
//! Each line names a feature with an optional `[hi:lo]` bit range and an
//! optional value assignment; `{key = "value"}` annotations and `#` comments
//! may follow. The parser works in a single pass over the input buffer and
//! hands out `&str` views into it, so callers get zero-copy feature names
//! valid for the lifetime of the buffer.
//!
//! Spec: <https://fasm.readthedocs.io/en/latest/specification/syntax.html>

use log::{error, info, warn};

/// Outcome of a parse run, in increasing order of severity. The parser keeps
/// going on recoverable problems and returns the worst severity it saw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseResult {
    Success,
    Info,
    NonCritical,
    Skipped,
    UserAbort,
    Error,
}

/// Parse FASM from `content`, reporting each feature to `parse_callback` as
/// `(line, feature, start_bit, width, bits)`. The callback returns `false`
/// to abort parsing. The buffer must end with a newline.
pub fn parse<F>(content: &str, mut parse_callback: F) -> ParseResult
where
    F: FnMut(u32, &str, u32, u32, u64) -> bool,
{
    parse_impl(content, &mut parse_callback, None)
}

/// Like [`parse`], but additionally reports `{name = "value"}` annotations.
/// Surrounding quotes are stripped from the value; escapes are kept as
/// written.
pub fn parse_with_annotations<F, A>(
    content: &str,
    mut parse_callback: F,
    mut annotation_callback: A,
) -> ParseResult
where
    F: FnMut(u32, &str, u32, u32, u64) -> bool,
    A: FnMut(u32, &str, &str, &str),
{
    parse_impl(content, &mut parse_callback, Some(&mut annotation_callback))
}

const DIGIT_SEPARATOR: i8 = -1;

// Maps a byte to its digit value for bases up to 16. '_' is a readability
// separator inside numbers ("32'h_dead_beef") and compares below every base.
fn digit_value(c: u8) -> i8 {
    match c {
        b'0'..=b'9' => (c - b'0') as i8,
        b'a'..=b'f' => (c - b'a') as i8 + 10,
        b'A'..=b'F' => (c - b'A') as i8 + 10,
        b'_' => DIGIT_SEPARATOR,
        _ => 99,
    }
}

fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn cur(&self) -> u8 {
        self.buf[self.pos]
    }

    // EOL '\n' is not considered blank; every skip loop stops on it.
    fn skip_blank(&mut self) {
        while self.cur() == b' ' || self.cur() == b'\t' {
            self.pos += 1;
        }
    }

    fn skip_to_eol(&mut self) {
        while self.cur() != b'\n' {
            self.pos += 1;
        }
    }

    fn take_ident(&mut self) -> (usize, usize) {
        let start = self.pos;
        while is_ident(self.cur()) {
            self.pos += 1;
        }
        (start, self.pos)
    }

    fn parse_number(&mut self, base: i8) -> u64 {
        self.skip_blank();
        let mut value: u64 = 0;
        loop {
            let d = digit_value(self.cur());
            if d >= base {
                break;
            }
            if d != DIGIT_SEPARATOR {
                value = value.wrapping_mul(base as u64).wrapping_add(d as u64);
            }
            self.pos += 1;
        }
        value
    }
}

fn parse_impl(
    content: &str,
    parse_callback: &mut dyn FnMut(u32, &str, u32, u32, u64) -> bool,
    mut annotation_callback: Option<&mut dyn FnMut(u32, &str, &str, &str)>,
) -> ParseResult {
    if content.is_empty() {
        return ParseResult::Success;
    }
    if !content.ends_with('\n') {
        // The '\n' doubles as the scan sentinel; without it we would run
        // past the buffer.
        error!("fasm content does not end with a newline");
        return ParseResult::Error;
    }

    let mut result = ParseResult::Success;
    let mut s = Scanner {
        buf: content.as_bytes(),
        pos: 0,
    };
    let mut line_number: u32 = 0;
    'lines: while s.pos < s.buf.len() {
        line_number += 1;
        s.skip_blank();
        // Lenient about what starts a feature name (dot, digit, underscore);
        // the receiver will notice semantic issues.
        let (fstart, fend) = s.take_ident();
        let feature = &content[fstart..fend];
        s.skip_blank();

        if !feature.is_empty() {
            // Optional address range: feature[<max>:<min>].
            let mut max_bit: u32 = 0;
            let mut min_bit: u32 = 0;
            if s.cur() == b'[' {
                s.pos += 1;
                max_bit = s.parse_number(10) as u16 as u32;
                s.skip_blank();
                if s.cur() == b':' {
                    s.pos += 1;
                    min_bit = s.parse_number(10) as u16 as u32;
                    s.skip_blank();
                } else {
                    min_bit = max_bit;
                }
                if s.cur() != b']' {
                    error!("{line_number}: expected ']' after range of {feature}");
                    result = ParseResult::Error;
                    s.skip_to_eol();
                    s.pos += 1;
                    continue 'lines;
                }
                s.pos += 1;
                if max_bit < min_bit {
                    warn!("{line_number}: skipping inverted range {feature}[{max_bit}:{min_bit}]");
                    result = result.max(ParseResult::Skipped);
                    s.skip_to_eol();
                    s.pos += 1;
                    continue 'lines;
                }
            }
            s.skip_blank();

            let mut width = max_bit - min_bit + 1;
            if width > 64 {
                error!(
                    "{line_number}: can only deal with ranges <= 64 bit \
                     {feature}[{max_bit}:{min_bit}]; trimming width {width} to 64"
                );
                result = ParseResult::Error;
                // Keep going, best-effort parsing of the lower 64 bits.
                width = 64;
            }

            let mut bitset: u64;
            if s.cur() == b'=' {
                s.pos += 1;
                s.skip_blank();
                bitset = 0;
                if digit_value(s.cur()) <= 9 {
                    // Width prefix or plain decimal value.
                    bitset = s.parse_number(10);
                }
                s.skip_blank();
                if s.cur() == b'\'' {
                    s.pos += 1;
                    s.skip_blank();
                    // The number we read was a precision hint; plausibility
                    // check only.
                    if bitset > width as u64 {
                        warn!(
                            "{line_number}: attempt to assign more bits ({bitset}') for \
                             {feature}[{max_bit}:{min_bit}] with supported bit width of {width}"
                        );
                        result = result.max(ParseResult::NonCritical);
                    }
                    bitset = 0;
                    let format_type = s.cur();
                    s.pos += 1;
                    match format_type {
                        b'h' => bitset = s.parse_number(16),
                        b'b' => bitset = s.parse_number(2),
                        b'o' => bitset = s.parse_number(8),
                        b'd' => bitset = s.parse_number(10),
                        _ => {
                            error!(
                                "{line_number}: unknown base signifier '{}'; expected \
                                 one of b, d, h, o",
                                format_type as char
                            );
                            result = ParseResult::Error;
                            s.skip_to_eol();
                            // In error state now, but report the feature as set.
                            bitset = 0x1;
                        }
                    }
                    s.skip_blank();
                }
            } else {
                // No assignment: default assumption 1 bit set.
                bitset = 0x1;
                if min_bit != max_bit {
                    info!("{line_number}: range of bits {feature}[{max_bit}:{min_bit}], but no assignment");
                    result = result.max(ParseResult::Info);
                }
            }

            bitset &= u64::MAX >> (64 - width);
            if !parse_callback(line_number, feature, min_bit, width, bitset) {
                result = result.max(ParseResult::UserAbort);
                break 'lines;
            }
        }

        // Annotations might follow.
        if s.cur() == b'{' {
            if let Some(ref mut annot) = annotation_callback {
                loop {
                    s.pos += 1; // skip '{' or ','
                    s.skip_blank();
                    let (nstart, nend) = s.take_ident();
                    let name = &content[nstart..nend];

                    s.skip_blank();
                    if s.cur() != b'=' {
                        error!("{line_number}: annotation {name}: expected '='");
                        result = ParseResult::Error;
                        break;
                    }
                    s.pos += 1;

                    s.skip_blank();
                    if s.cur() != b'"' {
                        error!("{line_number}: {feature}: annotation '{name}': value not quoted");
                        result = ParseResult::Error;
                        break;
                    }

                    let vstart = s.pos + 1;
                    loop {
                        s.pos += 1;
                        while s.cur() != b'"' && s.cur() != b'\n' {
                            s.pos += 1;
                        }
                        // A quote preceded by a backslash was escaped.
                        if s.buf[s.pos - 1] != b'\\' || s.cur() == b'\n' {
                            break;
                        }
                    }
                    let value = &content[vstart..s.pos];

                    if s.cur() == b'\n' {
                        error!("{line_number}: annotation not finished before end of line");
                        result = ParseResult::Error;
                        break;
                    }
                    annot(line_number, feature, name, value);
                    s.pos += 1; // skip '"'

                    s.skip_blank();
                    if s.cur() != b',' {
                        break;
                    }
                }

                if s.cur() != b'}' {
                    error!(
                        "{line_number}: annotations: expected ',' or '}}'; got '{}'",
                        s.cur() as char
                    );
                    result = ParseResult::Error;
                }
            }
            s.skip_to_eol();
        }

        if s.cur() == b'#' || s.cur() == b'\r' {
            s.skip_to_eol();
        }

        if s.cur() != b'\n' {
            error!(
                "{line_number}: expected newline, got '{}'",
                s.cur() as char
            );
            result = ParseResult::Error;
            s.skip_to_eol();
        }
        s.pos += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // Collects everything the parser reports for easy comparison.
    fn collect(content: &str) -> (ParseResult, Vec<(u32, String, u32, u32, u64)>) {
        let mut got = vec![];
        let result = parse(content, |line, feature, start, width, bits| {
            got.push((line, feature.to_string(), start, width, bits));
            true
        });
        (result, got)
    }

    #[test]
    fn bare_feature_is_one_bit_set() {
        let (result, got) = collect("CLBLM_R_X33Y38.SLICEM_X0.AFF.ZINI\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(
            got,
            vec![(1, "CLBLM_R_X33Y38.SLICEM_X0.AFF.ZINI".to_string(), 0, 1, 1)]
        );
    }

    #[test]
    fn empty_input_is_success() {
        let (result, got) = collect("");
        assert_eq!(result, ParseResult::Success);
        assert!(got.is_empty());
    }

    #[test]
    fn missing_final_newline_is_error() {
        let (result, got) = collect("FEATURE");
        assert_eq!(result, ParseResult::Error);
        assert!(got.is_empty());
    }

    #[test]
    fn single_bit_address() {
        let (result, got) = collect("BAR[2]\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(got, vec![(1, "BAR".to_string(), 2, 1, 1)]);
    }

    #[test]
    fn range_with_binary_value() {
        let (result, got) = collect("F[5:2] = 4'b1010\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(got, vec![(1, "F".to_string(), 2, 4, 0b1010)]);
    }

    #[test]
    fn hex_value_with_separators() {
        let (result, got) = collect("LUT.INIT[31:0] = 32'h_dead_beef\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(got, vec![(1, "LUT.INIT".to_string(), 0, 32, 0xdead_beef)]);
    }

    #[test]
    fn octal_and_decimal_bases() {
        let (result, got) = collect("A[8:0] = 9'o777\nB[7:0] = 8'd255\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(
            got,
            vec![
                (1, "A".to_string(), 0, 9, 0o777),
                (2, "B".to_string(), 0, 8, 255),
            ]
        );
    }

    #[test]
    fn plain_decimal_assignment_masked_to_width() {
        // No range means width 1; the value is clamped to the width.
        let (result, got) = collect("F = 5\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(got, vec![(1, "F".to_string(), 0, 1, 1)]);
    }

    #[test]
    fn value_masked_to_declared_range() {
        let (result, got) = collect("F[3:0] = 8'hFF\n");
        // The precision hint exceeds the range width.
        assert_eq!(result, ParseResult::NonCritical);
        assert_eq!(got, vec![(1, "F".to_string(), 0, 4, 0xF)]);
    }

    #[test]
    fn range_without_assignment_is_info() {
        let (result, got) = collect("F[3:0]\n");
        assert_eq!(result, ParseResult::Info);
        assert_eq!(got, vec![(1, "F".to_string(), 0, 4, 1)]);
    }

    #[test]
    fn inverted_range_is_skipped() {
        let (result, got) = collect("F[0:5]\nG\n");
        assert_eq!(result, ParseResult::Skipped);
        assert_eq!(got, vec![(2, "G".to_string(), 0, 1, 1)]);
    }

    #[test]
    fn overwide_range_is_clamped_to_64() {
        let (result, got) = collect("F[64:0] = 65'h1_ffff_ffff_ffff_ffff\n");
        assert_eq!(result, ParseResult::Error);
        assert_eq!(got, vec![(1, "F".to_string(), 0, 64, u64::MAX)]);
    }

    #[test]
    fn unknown_base_reports_feature_as_set() {
        let (result, got) = collect("F[3:0] = 4'x1010\n");
        assert_eq!(result, ParseResult::Error);
        assert_eq!(got, vec![(1, "F".to_string(), 0, 4, 1)]);
    }

    #[test]
    fn comments_and_blank_lines() {
        let (result, got) = collect("# a comment\n\n  \t\nF # trailing\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(got, vec![(4, "F".to_string(), 0, 1, 1)]);
    }

    #[test]
    fn missing_closing_bracket_is_error() {
        let (result, got) = collect("F[3:0 = 1\nG\n");
        assert_eq!(result, ParseResult::Error);
        assert_eq!(got, vec![(2, "G".to_string(), 0, 1, 1)]);
    }

    #[test]
    fn callback_false_aborts() {
        let mut seen = 0;
        let result = parse("A\nB\nC\n", |_, _, _, _, _| {
            seen += 1;
            seen < 2
        });
        assert_eq!(result, ParseResult::UserAbort);
        assert_eq!(seen, 2);
    }

    #[test]
    fn severity_is_monotonic() {
        assert!(ParseResult::Success < ParseResult::Info);
        assert!(ParseResult::Info < ParseResult::NonCritical);
        assert!(ParseResult::NonCritical < ParseResult::Skipped);
        assert!(ParseResult::Skipped < ParseResult::UserAbort);
        assert!(ParseResult::UserAbort < ParseResult::Error);
    }

    #[test]
    fn annotations_are_reported() {
        let mut annots = vec![];
        let result = parse_with_annotations(
            "F { .generated = \"yes\", source = \"top.v\" }\n",
            |_, _, _, _, _| true,
            |line, feature, name, value| {
                annots.push((line, feature.to_string(), name.to_string(), value.to_string()));
            },
        );
        assert_eq!(result, ParseResult::Success);
        assert_eq!(
            annots,
            vec![
                (1, "F".to_string(), ".generated".to_string(), "yes".to_string()),
                (1, "F".to_string(), "source".to_string(), "top.v".to_string()),
            ]
        );
    }

    #[test]
    fn annotation_escaped_quote_is_preserved() {
        let mut annots = vec![];
        let result = parse_with_annotations(
            "F {k = \"a\\\"b\"}\n",
            |_, _, _, _, _| true,
            |_, _, name, value| annots.push((name.to_string(), value.to_string())),
        );
        assert_eq!(result, ParseResult::Success);
        assert_eq!(annots, vec![("k".to_string(), "a\\\"b".to_string())]);
    }

    #[test]
    fn annotation_only_line_has_empty_feature() {
        let mut annots = vec![];
        let result = parse_with_annotations(
            "{ top = \"t\" }\n",
            |_, _, _, _, _| panic!("no feature on this line"),
            |_, feature, name, _| annots.push((feature.to_string(), name.to_string())),
        );
        assert_eq!(result, ParseResult::Success);
        assert_eq!(annots, vec![("".to_string(), "top".to_string())]);
    }

    #[test]
    fn annotations_skipped_without_callback() {
        let (result, got) = collect("F { k = \"v\" }\n");
        assert_eq!(result, ParseResult::Success);
        assert_eq!(got, vec![(1, "F".to_string(), 0, 1, 1)]);
    }

    #[test]
    fn unterminated_annotation_is_error() {
        let result = parse_with_annotations(
            "F { k = \"unterminated\n",
            |_, _, _, _, _| true,
            |_, _, _, _| panic!("must not be reported"),
        );
        assert_eq!(result, ParseResult::Error);
    }

    #[test]
    fn assignment_round_trip_masks_value() {
        // Property: parsing `F[hi:lo] = <width>'<base><digits>` reports the
        // value masked to the range width.
        for (line, lo, width, expect) in [
            ("F[63:0] = 64'hffff_ffff_ffff_ffff\n", 0, 64, u64::MAX),
            ("F[15:8] = 8'hab\n", 8, 8, 0xab),
            ("F[0:0] = 1'b1\n", 0, 1, 1),
            ("F[6:4] = 3'd7\n", 4, 3, 7),
        ] {
            let (result, got) = collect(line);
            assert_eq!(result, ParseResult::Success, "{line}");
            assert_eq!(got, vec![(1, "F".to_string(), lo, width, expect)], "{line}");
        }
    }
}
