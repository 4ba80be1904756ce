//! Frame-address geometry of a 7-series part, mirroring the configuration
//! address space: two global clock region halves, each holding rows of
//! per-block-type buses whose columns carry a fixed number of minor frames.
//!
//! The device consumes frames in exactly the order [`Part::next_frame_address`]
//! walks them: all of a block type is drained (top half, then bottom) before
//! the next block type starts.

use crate::{BlockType, FrameAddress};
use prjfasm_db::ConfigBus;
use std::collections::BTreeMap;

impl From<ConfigBus> for BlockType {
    fn from(bus: ConfigBus) -> BlockType {
        match bus {
            ConfigBus::ClbIoClk => BlockType::ClbIoClk,
            ConfigBus::BlockRam => BlockType::BlockRam,
            // The CFG_CLB columns configure through the CLB/IO/CLK bus.
            ConfigBus::CfgClb => BlockType::ClbIoClk,
        }
    }
}

/// One endpoint of a configuration bus: a column with a fixed frame count.
#[derive(Clone, Debug)]
struct ConfigurationColumn {
    frame_count: u32,
}

impl ConfigurationColumn {
    fn is_valid_frame_address(&self, address: FrameAddress) -> bool {
        address.minor() < self.frame_count
    }

    fn next_frame_address(&self, address: FrameAddress) -> Option<FrameAddress> {
        if !self.is_valid_frame_address(address) {
            return None;
        }
        if address.minor() + 1 < self.frame_count {
            return Some(FrameAddress::from(u32::from(address) + 1));
        }
        // Next address is not in this column.
        None
    }
}

#[derive(Clone, Debug, Default)]
struct ConfigurationBus {
    columns: BTreeMap<u32, ConfigurationColumn>,
}

impl ConfigurationBus {
    fn is_valid_frame_address(&self, address: FrameAddress) -> bool {
        self.columns
            .get(&address.column())
            .is_some_and(|column| column.is_valid_frame_address(address))
    }

    fn next_frame_address(&self, address: FrameAddress) -> Option<FrameAddress> {
        let column = self.columns.get(&address.column())?;
        if let Some(next) = column.next_frame_address(address) {
            return Some(next);
        }
        // Current column is exhausted; the next valid address starts the
        // following column.
        let (&next_column, column) = self
            .columns
            .range(address.column() + 1..)
            .next()?;
        let next = FrameAddress::new(
            address.block_type(),
            address.is_bottom_half_rows(),
            address.row(),
            next_column,
            0,
        );
        column.is_valid_frame_address(next).then_some(next)
    }
}

#[derive(Clone, Debug, Default)]
struct Row {
    buses: BTreeMap<BlockType, ConfigurationBus>,
}

impl Row {
    fn is_valid_frame_address(&self, address: FrameAddress) -> bool {
        self.buses
            .get(&address.block_type())
            .is_some_and(|bus| bus.is_valid_frame_address(address))
    }

    // Does not cross to a different bus: rows of the same block type come
    // before other block types numerically, so the caller handles that.
    fn next_frame_address(&self, address: FrameAddress) -> Option<FrameAddress> {
        self.buses
            .get(&address.block_type())?
            .next_frame_address(address)
    }
}

#[derive(Clone, Debug, Default)]
struct GlobalClockRegion {
    rows: BTreeMap<u32, Row>,
}

impl GlobalClockRegion {
    fn is_valid_frame_address(&self, address: FrameAddress) -> bool {
        self.rows
            .get(&address.row())
            .is_some_and(|row| row.is_valid_frame_address(address))
    }

    fn next_frame_address(&self, address: FrameAddress) -> Option<FrameAddress> {
        let row = self.rows.get(&address.row())?;
        if let Some(next) = row.next_frame_address(address) {
            return Some(next);
        }
        // Current row is exhausted; continue with the same block type at
        // the start of the next row in this half.
        let (&next_row, row) = self.rows.range(address.row() + 1..).next()?;
        let next = FrameAddress::new(
            address.block_type(),
            address.is_bottom_half_rows(),
            next_row,
            0,
            0,
        );
        row.is_valid_frame_address(next).then_some(next)
    }
}

/// Frame-address authority for one part: validity checks and the canonical
/// hardware traversal order.
#[derive(Clone, Debug)]
pub struct Part {
    idcode: u32,
    top: GlobalClockRegion,
    bottom: GlobalClockRegion,
}

impl Part {
    /// Builds the geometry from the part descriptor's clock-region rows.
    pub fn from_db(part: &prjfasm_db::Part) -> Part {
        Part {
            idcode: part.idcode,
            top: region_from_rows(&part.global_clock_regions.top.rows),
            bottom: region_from_rows(&part.global_clock_regions.bottom.rows),
        }
    }

    /// Builds a part covering exactly the given frame addresses; column
    /// frame counts are derived from the highest minor seen. Test helper.
    pub fn from_frame_addresses(idcode: u32, addresses: &[FrameAddress]) -> Part {
        let mut top = GlobalClockRegion::default();
        let mut bottom = GlobalClockRegion::default();
        for &address in addresses {
            let region = if address.is_bottom_half_rows() {
                &mut bottom
            } else {
                &mut top
            };
            let column = region
                .rows
                .entry(address.row())
                .or_default()
                .buses
                .entry(address.block_type())
                .or_default()
                .columns
                .entry(address.column())
                .or_insert(ConfigurationColumn { frame_count: 0 });
            column.frame_count = column.frame_count.max(address.minor() + 1);
        }
        Part {
            idcode,
            top,
            bottom,
        }
    }

    pub fn idcode(&self) -> u32 {
        self.idcode
    }

    pub fn is_valid_frame_address(&self, address: FrameAddress) -> bool {
        if address.is_bottom_half_rows() {
            self.bottom.is_valid_frame_address(address)
        } else {
            self.top.is_valid_frame_address(address)
        }
    }

    /// The successor of `address` in the canonical traversal order, or
    /// `None` past the last frame of the part.
    pub fn next_frame_address(&self, address: FrameAddress) -> Option<FrameAddress> {
        let region = if address.is_bottom_half_rows() {
            &self.bottom
        } else {
            &self.top
        };
        if let Some(next) = region.next_frame_address(address) {
            return Some(next);
        }

        // The top half drains into the bottom half of the same block type.
        if !address.is_bottom_half_rows() {
            let next = FrameAddress::new(address.block_type(), true, 0, 0, 0);
            if self.bottom.is_valid_frame_address(next) {
                return Some(next);
            }
        }

        // Block types are next numerically.
        if address.block_type() < BlockType::BlockRam {
            let next = FrameAddress::new(BlockType::BlockRam, false, 0, 0, 0);
            if self.is_valid_frame_address(next) {
                return Some(next);
            }
        }
        if address.block_type() < BlockType::CfgClb {
            let next = FrameAddress::new(BlockType::CfgClb, false, 0, 0, 0);
            if self.is_valid_frame_address(next) {
                return Some(next);
            }
        }
        None
    }
}

fn region_from_rows(rows: &[prjfasm_db::ClockRegionRow]) -> GlobalClockRegion {
    let mut region = GlobalClockRegion::default();
    for (row_index, row) in rows.iter().enumerate() {
        let mut out_row = Row::default();
        for (&bus, columns) in &row.buses {
            if columns.frame_counts.is_empty() {
                continue;
            }
            let bus_columns = columns
                .frame_counts
                .iter()
                .enumerate()
                .map(|(column, &frame_count)| {
                    (column as u32, ConfigurationColumn { frame_count })
                })
                .collect();
            // CFG_CLB maps onto the CLB/IO/CLK block type; the first bus to
            // claim a block type wins.
            out_row
                .buses
                .entry(BlockType::from(bus))
                .or_insert(ConfigurationBus {
                    columns: bus_columns,
                });
        }
        region.rows.insert(row_index as u32, out_row);
    }
    region
}
