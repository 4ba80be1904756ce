//! In-memory model of the prjxray device database: tile grid, per-tile-type
//! segment bits, pseudo PIPs, package pins, part metadata, and the
//! bank↔tile registry. [`PartDatabase`] ties them together and resolves a
//! single tile feature to the frame bits that configure it.

use log::warn;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod parsers;

pub use parsers::LineError;

/// One configuration bus of the fabric. Tiles declare bit blocks per bus and
/// segbit databases are split the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum ConfigBus {
    #[serde(rename = "CLB_IO_CLK")]
    ClbIoClk,
    #[serde(rename = "BLOCK_RAM")]
    BlockRam,
    #[serde(rename = "CFG_CLB")]
    CfgClb,
}

/// Redirects a tile to another tile type's segbit table, rewriting site
/// names and shifting the word offset.
#[derive(Clone, Debug, Deserialize)]
pub struct BitsBlockAlias {
    pub sites: HashMap<String, String>,
    pub start_offset: u32,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A contiguous block of configuration frames claimed by one tile on one
/// bus: `frames` frames starting at `base_address`, with the tile's words
/// starting `offset` words into each frame.
#[derive(Clone, Debug, Deserialize)]
pub struct BitsBlock {
    #[serde(default)]
    pub alias: Option<BitsBlockAlias>,
    #[serde(rename = "baseaddr", deserialize_with = "parsers::base_address")]
    pub base_address: u32,
    pub frames: u32,
    pub offset: u32,
    pub words: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tile {
    /// Tile type; may repeat across the grid.
    #[serde(rename = "type")]
    pub kind: String,
    /// Grid column, increasing right.
    pub grid_x: u32,
    /// Grid row, increasing down.
    pub grid_y: u32,
    #[serde(default)]
    pub clock_region: Option<String>,
    pub bits: BTreeMap<ConfigBus, BitsBlock>,
    /// Special functions of the tile pins (e.g. PUDC_B on IOB blocks).
    pub pin_functions: BTreeMap<String, String>,
    /// Site name → site type.
    pub sites: BTreeMap<String, String>,
    pub prohibited_sites: Vec<String>,
}

pub type TileGrid = HashMap<String, Tile>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PseudoPipKind {
    Always,
    Default,
    Hint,
}

/// Routing names that need no physical bits.
pub type PseudoPips = HashMap<String, PseudoPipKind>;

/// One physical bit contribution of a feature. `is_set == false` means the
/// database marks the bit with '!': it must stay cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentBit {
    pub word_column: u32,
    pub word_bit: u32,
    pub is_set: bool,
}

/// Lookup key into a per-tile-type segbit table: the `TYPE.FEATURE` string
/// plus the `[N]` bit address (0 when absent in the database).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileFeature {
    pub tile_feature: String,
    pub address: u32,
}

pub type SegmentsBits = HashMap<TileFeature, Vec<SegmentBit>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackagePin {
    pub pin: String,
    pub bank: u32,
    pub site: String,
    pub tile: String,
    pub pin_function: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClockRegionRow {
    #[serde(rename = "configuration_buses")]
    pub buses: BTreeMap<ConfigBus, BusColumns>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BusColumns {
    /// Frame count of each configuration column, indexed by column.
    #[serde(
        rename = "configuration_columns",
        deserialize_with = "parsers::column_frame_counts"
    )]
    pub frame_counts: Vec<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClockRegionHalf {
    #[serde(deserialize_with = "parsers::indexed_rows", default)]
    pub rows: Vec<ClockRegionRow>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalClockRegions {
    pub top: ClockRegionHalf,
    pub bottom: ClockRegionHalf,
}

/// Per-part metadata from `part.json`. The clock-region descriptor drives
/// the frame-address geometry.
#[derive(Clone, Debug, Deserialize)]
pub struct Part {
    pub idcode: u32,
    #[serde(default)]
    pub iobanks: BTreeMap<u32, String>,
    pub global_clock_regions: GlobalClockRegions,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartInfo {
    pub device: String,
    pub fabric: String,
    pub package: String,
    pub speedgrade: String,
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{}: {source}", .file.display())]
    Json {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: {source}", .file.display())]
    Malformed {
        file: PathBuf,
        #[source]
        source: LineError,
    },
    #[error("invalid or unknown part {0:?}")]
    UnknownPart(String),
}

/// Many-to-many relation between IO banks and tiles, derived from the part's
/// `iobanks` table and the package pin rows.
#[derive(Clone, Debug, Default)]
pub struct BanksTilesRegistry {
    tile_to_banks: HashMap<String, Vec<u32>>,
    banks_to_tiles: BTreeMap<u32, Vec<String>>,
}

impl BanksTilesRegistry {
    pub fn create(part: &Part, package_pins: &[PackagePin]) -> Self {
        let mut tile_to_banks: HashMap<String, Vec<u32>> = HashMap::new();
        let mut banks_to_tiles: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        let mut add = |bank: u32, tile: String| {
            let banks = tile_to_banks.entry(tile.clone()).or_default();
            if !banks.contains(&bank) {
                banks.push(bank);
            }
            banks_to_tiles.entry(bank).or_default().insert(tile);
        };
        for (&bank, location) in &part.iobanks {
            add(bank, format!("HCLK_IOI3_{location}"));
        }
        for pin in package_pins {
            add(pin.bank, pin.tile.clone());
        }
        BanksTilesRegistry {
            tile_to_banks,
            banks_to_tiles: banks_to_tiles
                .into_iter()
                .map(|(bank, tiles)| (bank, tiles.into_iter().collect()))
                .collect(),
        }
    }

    /// Tiles of an IO bank, sorted by name.
    pub fn tiles(&self, bank: u32) -> Option<&[String]> {
        self.banks_to_tiles.get(&bank).map(Vec::as_slice)
    }

    /// IO banks of a tile, in the order they were recorded.
    pub fn tile_banks(&self, tile: &str) -> &[u32] {
        self.tile_to_banks
            .get(tile)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Segbit tables and pseudo PIPs of one tile type.
#[derive(Clone, Debug, Default)]
pub struct TileTypeBits {
    pub pips: PseudoPips,
    pub segment_bits: BTreeMap<ConfigBus, SegmentsBits>,
}

/// Produces the segbit tables for a tile type on demand; `None` when the
/// database carries no tables for the type.
pub type TileTypeBitsGetter = Box<dyn Fn(&str) -> Option<TileTypeBits>>;

/// Position of a configuration bit within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameBit {
    pub word: u32,
    pub index: u32,
}

pub const WORD_SIZE_BITS: u32 = 32;

// Paths of the sidecar files for one tile type.
struct TileTypePaths {
    segbits: Option<PathBuf>,
    segbits_block_ram: Option<PathBuf>,
    ppips: Option<PathBuf>,
}

/// Centralizes access to everything known about one part. The segbit tables
/// are materialized lazily, once per tile type encountered.
pub struct PartDatabase {
    grid: TileGrid,
    part: Part,
    banks: BanksTilesRegistry,
    bits_getter: TileTypeBitsGetter,
    segment_bits_cache: HashMap<String, TileTypeBits>,
}

impl PartDatabase {
    pub fn new(
        grid: TileGrid,
        part: Part,
        banks: BanksTilesRegistry,
        bits_getter: TileTypeBitsGetter,
    ) -> Self {
        PartDatabase {
            grid,
            part,
            banks,
            bits_getter,
            segment_bits_cache: HashMap::new(),
        }
    }

    /// Loads the database rooted at `database_path` for `part_name`:
    /// `mapping/*.yaml` to find the fabric, the fabric's `tilegrid.json`,
    /// the part's `part.json` and `package_pins.csv`, and an index of
    /// `tile_type_*.json` sidecars for lazy segbit loading.
    pub fn open(database_path: &Path, part_name: &str) -> Result<Self, DatabaseError> {
        let part_info = parse_part_info(database_path, part_name)?;

        let tilegrid_path = database_path.join(&part_info.fabric).join("tilegrid.json");
        let grid: TileGrid = read_json(&tilegrid_path)?;

        let mut tile_type_paths = HashMap::new();
        index_tile_types(database_path, &mut tile_type_paths)?;
        let bits_getter = Box::new(move |tile_type: &str| {
            let paths = tile_type_paths.get(tile_type)?;
            match load_tile_type_bits(paths) {
                Ok(bits) => Some(bits),
                Err(err) => {
                    warn!("could not load segment bits for {tile_type}: {err}");
                    None
                }
            }
        });

        let part_dir = database_path.join(part_name);
        let part: Part = read_json(&part_dir.join("part.json"))?;
        let pins_path = part_dir.join("package_pins.csv");
        let package_pins = parsers::parse_package_pins(&fs::read_to_string(&pins_path)?)
            .map_err(|source| DatabaseError::Malformed {
                file: pins_path,
                source,
            })?;
        let banks = BanksTilesRegistry::create(&part, &package_pins);

        Ok(PartDatabase::new(grid, part, banks, bits_getter))
    }

    pub fn tile_grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn part(&self) -> &Part {
        &self.part
    }

    pub fn banks(&self) -> &BanksTilesRegistry {
        &self.banks
    }

    // Returns the cached tables for the type, loading them on first use.
    fn segment_bits(&mut self, tile_type: &str) -> Option<&TileTypeBits> {
        if !self.segment_bits_cache.contains_key(tile_type) {
            let bits = (self.bits_getter)(tile_type)?;
            self.segment_bits_cache.insert(tile_type.to_string(), bits);
        }
        self.segment_bits_cache.get(tile_type)
    }

    /// Resolves one feature bit of one tile to its frame bits and hands each
    /// to `bit_setter` as `(bus, frame_address, bit, value)`.
    ///
    /// A feature naming a pseudo PIP resolves to nothing; that is correct
    /// behavior, not an error. A feature with no entry in any bus of the
    /// tile indicates a database/FASM mismatch and aborts.
    ///
    /// `feature` is the part after the tile name, e.g. `SLICEM_X0.ALUT.INIT`
    /// for the FASM line `CLBLM_R_X33Y38.SLICEM_X0.ALUT.INIT`.
    pub fn config_bits(
        &mut self,
        tile_name: &str,
        feature: &str,
        address: u32,
        bit_setter: &mut dyn FnMut(ConfigBus, u32, FrameBit, bool),
    ) {
        let tile = self
            .grid
            .get(tile_name)
            .unwrap_or_else(|| panic!("unknown tile {tile_name}"));

        // Resolve aliasing: the effective tile type, the site-rewritten
        // feature, and per-bus blocks with the alias offset applied.
        let mut tile_type = tile.kind.clone();
        let mut aliased_feature = feature.to_string();
        let mut aliased_blocks: Vec<(ConfigBus, u32, u32)> = vec![];
        for (&bus, block) in &tile.bits {
            match &block.alias {
                Some(alias) => {
                    tile_type = alias.kind.clone();
                    if let Some((site, rest)) = feature.split_once('.') {
                        let site = alias.sites.get(site).map(String::as_str).unwrap_or(site);
                        aliased_feature = format!("{site}.{rest}");
                    }
                    aliased_blocks.push((bus, block.base_address, block.offset - alias.start_offset));
                }
                None => aliased_blocks.push((bus, block.base_address, block.offset)),
            }
        }
        if aliased_blocks.is_empty() {
            return;
        }

        let Some(type_bits) = self.segment_bits(&tile_type) else {
            panic!("no segment bits database for tile type {tile_type}");
        };

        // Two pseudo-PIP forms suppress emission: keyed by the tile name and
        // keyed by the effective tile type.
        if type_bits
            .pips
            .contains_key(&format!("{tile_name}.{aliased_feature}"))
        {
            return;
        }
        let tile_feature = TileFeature {
            tile_feature: format!("{tile_type}.{aliased_feature}"),
            address,
        };
        if type_bits.pips.contains_key(&tile_feature.tile_feature) {
            return;
        }

        let mut found = false;
        for (bus, base_address, offset) in aliased_blocks {
            let Some(segbits) = type_bits.segment_bits.get(&bus) else {
                continue;
            };
            let Some(bits) = segbits.get(&tile_feature) else {
                continue;
            };
            found = true;
            for bit in bits {
                let frame_address = base_address + bit.word_column;
                let bit_pos = offset * WORD_SIZE_BITS + bit.word_bit;
                bit_setter(
                    bus,
                    frame_address,
                    FrameBit {
                        word: bit_pos / WORD_SIZE_BITS,
                        index: bit_pos % WORD_SIZE_BITS,
                    },
                    bit.is_set,
                );
            }
        }
        assert!(
            found,
            "no segment bits entry for {}[{}] in any bus of tile {tile_name}",
            tile_feature.tile_feature, tile_feature.address,
        );
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DatabaseError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| DatabaseError::Json {
        file: path.to_path_buf(),
        source,
    })
}

fn parse_part_info(database_path: &Path, part_name: &str) -> Result<PartInfo, DatabaseError> {
    let mapping = database_path.join("mapping");
    let parts_path = mapping.join("parts.yaml");
    let devices_path = mapping.join("devices.yaml");
    let parts_yaml = fs::read_to_string(&parts_path)?;
    let devices_yaml = fs::read_to_string(&devices_path)?;
    let mut infos =
        parsers::parse_parts_infos(&parts_yaml, &devices_yaml).map_err(|source| {
            DatabaseError::Malformed {
                file: parts_path,
                source,
            }
        })?;
    infos
        .remove(part_name)
        .ok_or_else(|| DatabaseError::UnknownPart(part_name.to_string()))
}

const TILE_TYPE_JSON_PREFIX: &str = "tile_type_";
const TILE_TYPE_JSON_SUFFIX: &str = ".json";

// Recursively indexes tile_type_<TYPE>.json files and their segbits/ppips
// sidecars, keyed by tile type.
fn index_tile_types(
    dir: &Path,
    out: &mut HashMap<String, TileTypePaths>,
) -> Result<(), DatabaseError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            index_tile_types(&path, out)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(tile_type) = name
            .strip_prefix(TILE_TYPE_JSON_PREFIX)
            .and_then(|n| n.strip_suffix(TILE_TYPE_JSON_SUFFIX))
        else {
            continue;
        };
        let base = path.parent().unwrap_or(dir);
        let lower = tile_type.to_lowercase();
        let sidecar = |name: String| {
            let path = base.join(name);
            path.exists().then_some(path)
        };
        out.insert(
            tile_type.to_string(),
            TileTypePaths {
                segbits: sidecar(format!("segbits_{lower}.db")),
                segbits_block_ram: sidecar(format!("segbits_{lower}.block_ram.db")),
                ppips: sidecar(format!("ppips_{lower}.db")),
            },
        );
    }
    Ok(())
}

fn load_tile_type_bits(paths: &TileTypePaths) -> Result<TileTypeBits, DatabaseError> {
    let mut out = TileTypeBits::default();
    let parse = |path: &PathBuf| -> Result<SegmentsBits, DatabaseError> {
        parsers::parse_segments_bits(&fs::read_to_string(path)?).map_err(|source| {
            DatabaseError::Malformed {
                file: path.clone(),
                source,
            }
        })
    };
    if let Some(path) = &paths.ppips {
        out.pips = parsers::parse_pseudo_pips(&fs::read_to_string(path)?).map_err(|source| {
            DatabaseError::Malformed {
                file: path.clone(),
                source,
            }
        })?;
    }
    if let Some(path) = &paths.segbits {
        out.segment_bits.insert(ConfigBus::ClbIoClk, parse(path)?);
    }
    if let Some(path) = &paths.segbits_block_ram {
        out.segment_bits.insert(ConfigBus::BlockRam, parse(path)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_part(iobanks: &[(u32, &str)]) -> Part {
        Part {
            idcode: 0x1234,
            iobanks: iobanks
                .iter()
                .map(|&(bank, loc)| (bank, loc.to_string()))
                .collect(),
            global_clock_regions: GlobalClockRegions {
                top: ClockRegionHalf::default(),
                bottom: ClockRegionHalf::default(),
            },
        }
    }

    fn pin(bank: u32, tile: &str) -> PackagePin {
        PackagePin {
            pin: "A1".to_string(),
            bank,
            site: "IOB_X0Y0".to_string(),
            tile: tile.to_string(),
            pin_function: String::new(),
        }
    }

    #[test]
    fn banks_registry_joins_iobanks_and_pins() {
        let part = test_part(&[(14, "X1Y26")]);
        let pins = [pin(14, "LIOB33_X0Y0"), pin(14, "LIOB33_X0Y2"), pin(34, "RIOB33_X43Y9")];
        let registry = BanksTilesRegistry::create(&part, &pins);

        let tiles14 = registry.tiles(14).unwrap();
        assert_eq!(tiles14, ["HCLK_IOI3_X1Y26", "LIOB33_X0Y0", "LIOB33_X0Y2"]);
        assert_eq!(registry.tiles(34).unwrap(), ["RIOB33_X43Y9"]);
        assert!(registry.tiles(99).is_none());

        assert_eq!(registry.tile_banks("HCLK_IOI3_X1Y26"), [14]);
        assert_eq!(registry.tile_banks("LIOB33_X0Y0"), [14]);
        assert_eq!(registry.tile_banks("NOT_A_TILE"), [0u32; 0]);
    }

    #[test]
    fn banks_registry_deduplicates() {
        let part = test_part(&[]);
        let pins = [pin(14, "LIOB33_X0Y0"), pin(14, "LIOB33_X0Y0"), pin(15, "LIOB33_X0Y0")];
        let registry = BanksTilesRegistry::create(&part, &pins);
        assert_eq!(registry.tiles(14).unwrap(), ["LIOB33_X0Y0"]);
        // First recorded bank stays first.
        assert_eq!(registry.tile_banks("LIOB33_X0Y0"), [14, 15]);
    }

    fn clb_tile(kind: &str, base_address: u32, frames: u32, offset: u32) -> Tile {
        Tile {
            kind: kind.to_string(),
            grid_x: 0,
            grid_y: 0,
            clock_region: None,
            bits: BTreeMap::from([(
                ConfigBus::ClbIoClk,
                BitsBlock {
                    alias: None,
                    base_address,
                    frames,
                    offset,
                    words: 2,
                },
            )]),
            pin_functions: BTreeMap::new(),
            sites: BTreeMap::new(),
            prohibited_sites: vec![],
        }
    }

    fn single_type_db(tile_name: &str, tile: Tile, bits: TileTypeBits) -> PartDatabase {
        let kind = tile.kind.clone();
        let grid = TileGrid::from([(tile_name.to_string(), tile)]);
        let getter =
            Box::new(move |tile_type: &str| (tile_type == kind).then(|| bits.clone()));
        PartDatabase::new(grid, test_part(&[]), BanksTilesRegistry::default(), getter)
    }

    fn segbits_for(
        entries: &[(&str, u32, &[(u32, u32, bool)])],
    ) -> SegmentsBits {
        entries
            .iter()
            .map(|&(name, address, bits)| {
                (
                    TileFeature {
                        tile_feature: name.to_string(),
                        address,
                    },
                    bits.iter()
                        .map(|&(word_column, word_bit, is_set)| SegmentBit {
                            word_column,
                            word_bit,
                            is_set,
                        })
                        .collect(),
                )
            })
            .collect()
    }

    // Mirrors the single-LUT-bit scenario: base 0x400, segbit 28_519.
    #[test]
    fn config_bits_resolves_lut_init_bit() {
        let bits = TileTypeBits {
            pips: PseudoPips::new(),
            segment_bits: BTreeMap::from([(
                ConfigBus::ClbIoClk,
                segbits_for(&[("CLBLM_R.SLICEM_X0.ALUT.INIT", 0, &[(28, 519, true)])]),
            )]),
        };
        let mut db = single_type_db(
            "CLBLM_R_X33Y38",
            clb_tile("CLBLM_R", 0x400, 36, 0),
            bits,
        );
        let mut got = vec![];
        db.config_bits(
            "CLBLM_R_X33Y38",
            "SLICEM_X0.ALUT.INIT",
            0,
            &mut |bus, address, bit, value| got.push((bus, address, bit, value)),
        );
        assert_eq!(
            got,
            vec![(
                ConfigBus::ClbIoClk,
                0x41C,
                FrameBit { word: 16, index: 7 },
                true,
            )]
        );
    }

    #[test]
    fn config_bits_applies_word_offset() {
        let bits = TileTypeBits {
            pips: PseudoPips::new(),
            segment_bits: BTreeMap::from([(
                ConfigBus::ClbIoClk,
                segbits_for(&[("T.SITE.FEATURE", 3, &[(1, 5, true), (1, 37, false)])]),
            )]),
        };
        let mut db = single_type_db("T_X0Y0", clb_tile("T", 0x100, 4, 10), bits);
        let mut got = vec![];
        db.config_bits("T_X0Y0", "SITE.FEATURE", 3, &mut |bus, address, bit, value| {
            got.push((bus, address, bit, value))
        });
        // offset 10 words shifts every bit by 320.
        assert_eq!(
            got,
            vec![
                (ConfigBus::ClbIoClk, 0x101, FrameBit { word: 10, index: 5 }, true),
                (ConfigBus::ClbIoClk, 0x101, FrameBit { word: 11, index: 5 }, false),
            ]
        );
    }

    #[test]
    fn pseudo_pip_by_tile_type_emits_nothing() {
        let bits = TileTypeBits {
            pips: PseudoPips::from([("INT.FAKE.PIP".to_string(), PseudoPipKind::Always)]),
            segment_bits: BTreeMap::from([(ConfigBus::ClbIoClk, SegmentsBits::new())]),
        };
        let mut db = single_type_db("INT_X0Y0", clb_tile("INT", 0, 1, 0), bits);
        let mut called = false;
        db.config_bits("INT_X0Y0", "FAKE.PIP", 0, &mut |_, _, _, _| called = true);
        assert!(!called);
    }

    #[test]
    fn pseudo_pip_by_tile_name_emits_nothing() {
        let bits = TileTypeBits {
            pips: PseudoPips::from([("INT_X0Y0.FAKE.PIP".to_string(), PseudoPipKind::Hint)]),
            segment_bits: BTreeMap::from([(ConfigBus::ClbIoClk, SegmentsBits::new())]),
        };
        let mut db = single_type_db("INT_X0Y0", clb_tile("INT", 0, 1, 0), bits);
        let mut called = false;
        db.config_bits("INT_X0Y0", "FAKE.PIP", 0, &mut |_, _, _, _| called = true);
        assert!(!called);
    }

    #[test]
    fn alias_rewrites_type_site_and_offset() {
        let mut tile = clb_tile("RIOB33", 0x800, 42, 4);
        tile.bits.get_mut(&ConfigBus::ClbIoClk).unwrap().alias = Some(BitsBlockAlias {
            sites: HashMap::from([("IOB_Y0".to_string(), "IOB_Y1".to_string())]),
            start_offset: 2,
            kind: "LIOB33".to_string(),
        });
        let bits = TileTypeBits {
            pips: PseudoPips::new(),
            segment_bits: BTreeMap::from([(
                ConfigBus::ClbIoClk,
                segbits_for(&[("LIOB33.IOB_Y1.PULLTYPE.PULLUP", 0, &[(38, 10, true)])]),
            )]),
        };
        let mut db = single_type_db("RIOB33_X43Y43", tile, bits);
        let mut got = vec![];
        db.config_bits(
            "RIOB33_X43Y43",
            "IOB_Y0.PULLTYPE.PULLUP",
            0,
            &mut |bus, address, bit, value| got.push((bus, address, bit, value)),
        );
        // Effective offset is 4 - 2 = 2 words.
        assert_eq!(
            got,
            vec![(
                ConfigBus::ClbIoClk,
                0x800 + 38,
                FrameBit { word: 2, index: 10 },
                true,
            )]
        );
    }

    #[test]
    #[should_panic(expected = "no segment bits entry")]
    fn missing_entry_is_fatal() {
        let bits = TileTypeBits {
            pips: PseudoPips::new(),
            segment_bits: BTreeMap::from([(ConfigBus::ClbIoClk, SegmentsBits::new())]),
        };
        let mut db = single_type_db("T_X0Y0", clb_tile("T", 0, 1, 0), bits);
        db.config_bits("T_X0Y0", "NOT.THERE", 0, &mut |_, _, _, _| {});
    }

    #[test]
    fn segbits_cache_loads_once() {
        use std::cell::Cell;
        use std::rc::Rc;
        let calls = Rc::new(Cell::new(0));
        let calls_in_getter = calls.clone();
        let getter = Box::new(move |tile_type: &str| {
            calls_in_getter.set(calls_in_getter.get() + 1);
            (tile_type == "T").then(|| TileTypeBits {
                pips: PseudoPips::new(),
                segment_bits: BTreeMap::from([(
                    ConfigBus::ClbIoClk,
                    segbits_for(&[("T.A", 0, &[(0, 0, true)])]),
                )]),
            })
        });
        let grid = TileGrid::from([("T_X0Y0".to_string(), clb_tile("T", 0, 1, 0))]);
        let mut db = PartDatabase::new(grid, test_part(&[]), BanksTilesRegistry::default(), getter);
        for _ in 0..3 {
            db.config_bits("T_X0Y0", "A", 0, &mut |_, _, _, _| {});
        }
        assert_eq!(calls.get(), 1);
    }
}
