use crate::alloc::State;
use crate::data;
use crate::dir::DirectoryTable;
use crate::fs::{DiskFs, Result};
use crate::io::{BlockNumber, BlockStorage};

use log::{info, warn};

/// Disagreements between the bitmap and the blocks the tables actually reference.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Marked used but owned by nothing. Harmless apart from the lost space; this is
    /// what an interrupted allocation leaves behind.
    pub leaked: Vec<BlockNumber>,
    /// Owned by a table or chain but marked free, so the allocator could hand them out
    /// again.
    pub dangling: Vec<BlockNumber>,
    /// Owned more than once.
    pub shared: Vec<BlockNumber>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty() && self.dangling.is_empty() && self.shared.is_empty()
    }
}

impl<T: BlockStorage> DiskFs<T> {
    /// Walks every directory table and file chain and compares what they reference with
    /// the bitmap. Fails with `Corrupt` if a table or chain cannot be walked at all.
    pub fn check(&mut self) -> Result<CheckReport> {
        let (dev, root, alloc) = self.parts();
        let mut owners = vec![0u32; dev.block_count()];
        for (blocknr, owned) in owners.iter_mut().enumerate() {
            if alloc.is_reserved(blocknr) {
                *owned = 1;
            }
        }

        for (dir, location) in root.locations() {
            owners[location] += 1;
            let table = DirectoryTable::load(dev, location)?;
            for entry in table.entries() {
                let blocks = data::chain(dev, alloc, entry.start_block, data::blocks_for(entry.size))
                    .map_err(|e| {
                        warn!("cannot walk /{}/{}: {}", dir, entry.display_name(), e);
                        e
                    })?;
                for blocknr in blocks {
                    owners[blocknr] += 1;
                }
            }
        }

        let mut report = CheckReport::default();
        for (blocknr, &count) in owners.iter().enumerate() {
            match (count, alloc.state(blocknr)) {
                (0, State::Used) => report.leaked.push(blocknr),
                (0, State::Free) => (),
                (_, State::Free) => report.dangling.push(blocknr),
                (_, State::Used) => (),
            }
            if count > 1 {
                report.shared.push(blocknr);
            }
        }
        if !report.is_clean() {
            warn!("consistency check found problems: {:?}", report);
        }
        Ok(report)
    }

    /// Returns leaked blocks to the free pool and reports how many there were.
    pub fn reclaim_leaked(&mut self) -> Result<usize> {
        let leaked = self.check()?.leaked;
        let (dev, _, alloc) = self.parts();
        for &blocknr in &leaked {
            alloc.release_block(dev, blocknr)?;
        }
        if !leaked.is_empty() {
            info!("reclaimed {} leaked blocks", leaked.len());
        }
        Ok(leaked.len())
    }
}
