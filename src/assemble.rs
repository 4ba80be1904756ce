//! Turns parsed FASM features into configuration frames: splits each
//! feature into tile and tile feature, resolves it against the database,
//! synthesizes the implicit PUDC_B pull-up and STEPDOWN features, and
//! materializes every frame of the bit blocks a feature touched.

use prjfasm_db::{BanksTilesRegistry, PartDatabase, TileGrid};
use prjfasm_fasm as fasm;
use prjfasm_xc7::{FrameAddress, Frames};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::BufRead;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{line}: cannot split feature name {name:?}")]
    UnsplittableFeature { line: i64, name: String },
    #[error("fasm parsing failed")]
    FasmSyntax,
}

/// One FASM feature record. Synthesized features carry line -1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FasmFeature {
    pub line: i64,
    pub name: String,
    pub start_bit: u32,
    pub width: u32,
    pub bits: u64,
}

impl FasmFeature {
    fn synthesized(name: String) -> FasmFeature {
        FasmFeature {
            line: -1,
            name,
            start_bit: 0,
            width: 1,
            bits: 1,
        }
    }
}

// Pulled up on the PUDC_B site to keep unused inputs defined; see
// https://github.com/chipsalliance/f4pga-xc-fasm fasm2frames.
const PUDC_B_PULL_UP_FEATURES: [&str; 3] = [
    "LVCMOS12_LVCMOS15_LVCMOS18_LVCMOS25_LVCMOS33_LVDS_25_LVTTL_SSTL135_SSTL15_TMDS_33.IN_ONLY",
    "LVCMOS25_LVCMOS33_LVTTL.IN",
    "PULLTYPE.PULLUP",
];

// Finds the tile whose pin functions mention PUDC_B and derives the IOB
// site from the pin site's trailing Y coordinate.
fn find_pudc_b_tile_site(grid: &TileGrid) -> Option<(String, String)> {
    for (tile_name, tile) in grid {
        for (site, pin_function) in &tile.pin_functions {
            if pin_function.contains("PUDC_B") {
                let y = site.chars().last()?.to_digit(10)?;
                return Some((tile_name.clone(), format!("IOB_Y{}", y % 2)));
            }
        }
    }
    None
}

/// Prepends the implicit pull-up features for the PUDC_B site, if the grid
/// has one. Runs before normal processing so explicit FASM can override.
pub fn add_pudc_b_features(grid: &TileGrid, features: &mut Vec<FasmFeature>) -> bool {
    let Some((tile, site)) = find_pudc_b_tile_site(grid) else {
        return false;
    };
    for feature in PUDC_B_PULL_UP_FEATURES {
        features.push(FasmFeature::synthesized(format!("{tile}.{site}.{feature}")));
    }
    true
}

fn iob_sites(grid: &TileGrid, tile_name: &str) -> Vec<String> {
    let tile = &grid[tile_name];
    tile.sites
        .keys()
        .map(|site| {
            let y = site
                .chars()
                .last()
                .and_then(|c| c.to_digit(10))
                .unwrap_or_else(|| panic!("site {site} does not end with a digit"));
            format!("IOB_Y{}", y % 2)
        })
        .collect()
}

/// Propagates STEPDOWN across IO banks: every unused IOB33 site of a bank
/// with a STEPDOWN feature receives the bank's STEPDOWN tags, and the
/// bank's HCLK_IOI3 tile gets its own STEPDOWN feature. Runs after parsing,
/// before resolution.
pub fn add_stepdown_features(
    banks: &BanksTilesRegistry,
    grid: &TileGrid,
    features: &mut Vec<FasmFeature>,
) {
    let mut used_iob_sites: HashSet<String> = HashSet::new();
    let mut stepdown_banks_tags: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
    for feature in features.iter() {
        if feature.bits == 0 {
            continue;
        }
        let mut segments = feature.name.splitn(4, '.');
        let (Some(tile), Some(site), Some(tag)) =
            (segments.next(), segments.next(), segments.next())
        else {
            continue;
        };
        if tile.contains("IOB33") {
            used_iob_sites.insert(format!("{tile}.{site}"));
        }
        if tag.contains("STEPDOWN") {
            let bank_values = banks.tile_banks(tile);
            assert!(!bank_values.is_empty(), "no bank registered for tile {tile}");
            stepdown_banks_tags
                .entry(bank_values[0])
                .or_default()
                .insert(tag.to_string());
        }
    }

    for (&bank, tags) in &stepdown_banks_tags {
        let tiles = banks
            .tiles(bank)
            .unwrap_or_else(|| panic!("unknown bank {bank}"));
        for tile in tiles {
            if tile.contains("IOB33") {
                for site in iob_sites(grid, tile) {
                    let tile_site = format!("{tile}.{site}");
                    if used_iob_sites.contains(&tile_site) {
                        continue;
                    }
                    for tag in tags {
                        features.push(FasmFeature::synthesized(format!("{tile_site}.{tag}")));
                    }
                }
            }
            if tile.contains("HCLK_IOI3") {
                features.push(FasmFeature::synthesized(format!("{tile}.STEPDOWN")));
            }
        }
    }
}

/// Resolves every feature to its frame bits. Each set value bit is looked
/// up at `start_bit + bit`; afterwards every frame of each bit block that
/// contributed is materialized, so untouched frames inside the influence
/// zone still reach the bitstream zero-filled.
pub fn process_features(
    features: &[FasmFeature],
    db: &mut PartDatabase,
    frames: &mut Frames,
) -> Result<(), AssembleError> {
    for feature in features {
        // The first segment of the feature name is the tile name, the rest
        // addresses a feature of that tile:
        //  [tile name   ] [feature          ][e, s] [value ]
        //  CLBLM_R_X33Y38.SLICEM_X0.ALUT.INIT[31:0]=32'b1111(...)
        let Some((tile_name, tile_feature)) = feature.name.split_once('.') else {
            return Err(AssembleError::UnsplittableFeature {
                line: feature.line,
                name: feature.name.clone(),
            });
        };
        let mut used_buses = BTreeSet::new();
        for bit in 0..feature.width {
            if feature.bits >> bit & 1 == 0 {
                continue;
            }
            let address = bit + feature.start_bit;
            db.config_bits(tile_name, tile_feature, address, &mut |bus,
                                                                  frame_address,
                                                                  frame_bit,
                                                                  value| {
                used_buses.insert(bus);
                let frame_address = FrameAddress::from(frame_address);
                frames.touch(frame_address);
                // A cleared segbit still materializes its frame; it just
                // never flips the bit.
                if value {
                    frames.set_bit(frame_address, frame_bit.word, frame_bit.index);
                }
            });
        }
        if used_buses.is_empty() {
            continue;
        }
        let tile = &db.tile_grid()[tile_name];
        for bus in used_buses {
            let block = &tile.bits[&bus];
            for i in 0..block.frames {
                frames.touch(FrameAddress::from(block.base_address + i));
            }
        }
    }
    Ok(())
}

/// Streams FASM from `input` line by line, synthesizes the implicit
/// features, and resolves everything into `frames`.
pub fn assemble<R: BufRead>(
    mut input: R,
    db: &mut PartDatabase,
    frames: &mut Frames,
) -> Result<(), AssembleError> {
    let mut features = vec![];
    add_pudc_b_features(db.tile_grid(), &mut features);

    let mut line = String::new();
    let mut line_number: i64 = 0;
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        line_number += 1;
        let result = fasm::parse_with_annotations(
            &line,
            |_, name, start_bit, width, bits| {
                features.push(FasmFeature {
                    line: line_number,
                    name: name.to_string(),
                    start_bit,
                    width,
                    bits,
                });
                true
            },
            |_, _, _, _| {},
        );
        if result >= fasm::ParseResult::UserAbort {
            return Err(AssembleError::FasmSyntax);
        }
    }

    add_stepdown_features(db.banks(), db.tile_grid(), &mut features);
    process_features(&features, db, frames)
}
