//! Parsers for the line-oriented prjxray database sidecars and the two-level
//! mapping YAML files, plus serde helpers for the JSON descriptors.

use crate::{
    PackagePin, PartInfo, PseudoPipKind, PseudoPips, SegmentBit, SegmentsBits, TileFeature,
};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// A malformed line in one of the text databases.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{line}: {message}")]
pub struct LineError {
    pub line: u32,
    pub message: String,
}

fn bad_line(line: u32, message: impl Into<String>) -> LineError {
    LineError {
        line,
        message: message.into(),
    }
}

/// Deserializes the `baseaddr` field, which the database stores as a hex
/// string like `"0x00020800"`.
pub fn base_address<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| de::Error::custom(format!("could not parse {s:?} to bits address")))
}

// The JSON descriptors index rows and columns as objects keyed "0", "1", ...
// Flatten such an object to a vector, insisting the keys form a sequence.
fn indexed_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let map = BTreeMap::<u32, T>::deserialize(deserializer)?;
    for (expected, &key) in map.keys().enumerate() {
        if key != expected as u32 {
            return Err(de::Error::custom(format!("json key not in sequence: {key}")));
        }
    }
    Ok(map.into_values().collect())
}

pub fn indexed_rows<'de, D>(deserializer: D) -> Result<Vec<crate::ClockRegionRow>, D::Error>
where
    D: Deserializer<'de>,
{
    indexed_seq(deserializer)
}

pub fn column_frame_counts<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Column {
        frame_count: u32,
    }
    let columns: Vec<Column> = indexed_seq(deserializer)?;
    Ok(columns.into_iter().map(|c| c.frame_count).collect())
}

/// Parses a `ppips_<tile_type>.db` file: lines of `NAME (always|default|hint)`.
pub fn parse_pseudo_pips(content: &str) -> Result<PseudoPips, LineError> {
    let mut pips = PseudoPips::new();
    for (idx, line) in content.lines().enumerate() {
        let line_number = idx as u32 + 1;
        let mut fields = line.split_ascii_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let kind = match fields.next() {
            Some("always") => PseudoPipKind::Always,
            Some("default") => PseudoPipKind::Default,
            Some("hint") => PseudoPipKind::Hint,
            Some(other) => {
                return Err(bad_line(
                    line_number,
                    format!("invalid pseudo pip state {other:?}"),
                ))
            }
            None => return Err(bad_line(line_number, format!("invalid line {line:?}"))),
        };
        if fields.next().is_some() {
            return Err(bad_line(line_number, format!("invalid line {line:?}")));
        }
        pips.insert(name.to_string(), kind);
    }
    Ok(pips)
}

// Splits a trailing "[N]" address off a segbits feature name. Without one
// (or when the bracket content is not a number) the address defaults to 0.
fn tile_feature_name_and_address(value: &str) -> TileFeature {
    if let Some(stripped) = value.strip_suffix(']') {
        if let Some(open) = stripped.rfind('[') {
            if let Ok(address) = stripped[open + 1..].parse() {
                return TileFeature {
                    tile_feature: value[..open].to_string(),
                    address,
                };
            }
        }
    }
    TileFeature {
        tile_feature: value.to_string(),
        address: 0,
    }
}

/// Parses a `segbits_<tile_type>.db` file: lines of `NAME[ADDR] coord+` where
/// each coord is `[!]column_bit`.
pub fn parse_segments_bits(content: &str) -> Result<SegmentsBits, LineError> {
    let mut segbits = SegmentsBits::new();
    for (idx, line) in content.lines().enumerate() {
        let line_number = idx as u32 + 1;
        let mut fields = line.split_ascii_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let mut bits = vec![];
        for field in fields {
            let is_set = !field.starts_with('!');
            let coord = if is_set { field } else { &field[1..] };
            let Some((column, bit)) = coord.split_once('_') else {
                return Err(bad_line(line_number, format!("invalid line {line:?}")));
            };
            let (Ok(word_column), Ok(word_bit)) = (column.parse(), bit.parse()) else {
                return Err(bad_line(
                    line_number,
                    format!("could not parse coordinate {coord:?}"),
                ));
            };
            bits.push(SegmentBit {
                word_column,
                word_bit,
                is_set,
            });
        }
        if bits.is_empty() {
            return Err(bad_line(line_number, format!("invalid line {line:?}")));
        }
        segbits.insert(tile_feature_name_and_address(name), bits);
    }
    Ok(segbits)
}

const PACKAGE_PINS_HEADER: [&str; 5] = ["pin", "bank", "site", "tile", "pin_function"];

/// Parses `package_pins.csv`. The first line must be the canonical header.
pub fn parse_package_pins(content: &str) -> Result<Vec<PackagePin>, LineError> {
    let mut pins = vec![];
    for (idx, line) in content.lines().enumerate() {
        let line_number = idx as u32 + 1;
        let fields: Vec<&str> = line
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if line_number == 1 {
            if fields != PACKAGE_PINS_HEADER {
                return Err(bad_line(line_number, "missing header"));
            }
            continue;
        }
        if fields.is_empty() {
            continue;
        }
        if fields.len() != 5 {
            return Err(bad_line(line_number, format!("invalid line {line:?}")));
        }
        let Ok(bank) = fields[1].parse() else {
            return Err(bad_line(
                line_number,
                format!("could not parse bank (second column) {line:?}"),
            ));
        };
        pins.push(PackagePin {
            pin: fields[0].to_string(),
            bank,
            site: fields[2].to_string(),
            tile: fields[3].to_string(),
            pin_function: fields[4].to_string(),
        });
    }
    Ok(pins)
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 {
        let stripped = s
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
        if let Some(stripped) = stripped {
            return stripped;
        }
    }
    s
}

// Parses the restricted two-level YAML mapping used by parts.yaml and
// devices.yaml: unindented `key:` lines each followed by indented
// `prop: value` lines. Invokes the sink per top-level key.
fn parse_mapping_yaml(
    content: &str,
    sink: &mut dyn FnMut(&str, &HashMap<String, String>) -> Result<(), LineError>,
) -> Result<(), LineError> {
    let mut current_key = String::new();
    let mut properties = HashMap::new();
    for (idx, line) in content.lines().enumerate() {
        let line_number = idx as u32 + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indented = line.starts_with([' ', '\t']);
        if !indented {
            if !current_key.is_empty() {
                sink(&current_key, &properties)?;
            }
            let Some(key) = trimmed.strip_suffix(':') else {
                return Err(bad_line(line_number, "top-level key missing trailing colon"));
            };
            current_key = strip_quotes(key).to_string();
            properties.clear();
        } else {
            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(bad_line(line_number, "nested key-value pair missing colon"));
            };
            properties.insert(
                key.trim().to_string(),
                strip_quotes(value.trim()).to_string(),
            );
        }
    }
    if !current_key.is_empty() {
        sink(&current_key, &properties)?;
    }
    Ok(())
}

/// Builds the part name → [`PartInfo`] map from `mapping/parts.yaml` and
/// `mapping/devices.yaml`.
pub fn parse_parts_infos(
    parts_yaml: &str,
    devices_yaml: &str,
) -> Result<HashMap<String, PartInfo>, LineError> {
    // First map each device to its fabric.
    let mut fabrics = HashMap::new();
    parse_mapping_yaml(devices_yaml, &mut |device, props| {
        let Some(fabric) = props.get("fabric") else {
            return Err(bad_line(0, "devices yaml doesn't contain fabric"));
        };
        fabrics.insert(device.to_string(), fabric.clone());
        Ok(())
    })?;

    let mut parts_infos = HashMap::new();
    parse_mapping_yaml(parts_yaml, &mut |part, props| {
        let get = |key: &str| {
            props
                .get(key)
                .cloned()
                .ok_or_else(|| bad_line(0, format!("key {key:?} not found")))
        };
        let device = get("device")?;
        let Some(fabric) = fabrics.get(&device) else {
            return Err(bad_line(
                0,
                format!("could not find fabric for device: {device:?}"),
            ));
        };
        parts_infos.insert(
            part.to_string(),
            PartInfo {
                fabric: fabric.clone(),
                package: get("package")?,
                speedgrade: get("speedgrade")?,
                device,
            },
        );
        Ok(())
    })?;
    Ok(parts_infos)
}
