//! Tagline directory: the logical-to-physical map.
//!
//! Each tagline is an append-only vector of placements indexed by
//! logical block number, so `next_logical_index` is always the vector
//! length. All taglines exist from init; nothing is ever removed.

use raidline_error::{RaidlineError, Result};
use raidline_types::{Placement, TaglineId};

/// Largest tagline population the 16-bit tagline id can address.
const MAX_TAGLINES: u32 = 1 << 16;

#[derive(Debug, Default)]
struct Tagline {
    placements: Vec<Placement>,
}

#[derive(Debug)]
pub(crate) struct TaglineDirectory {
    lines: Vec<Tagline>,
    max_blocks_per_line: u32,
}

impl TaglineDirectory {
    pub(crate) fn new(maxlines: u32, max_blocks_per_line: u32) -> Result<Self> {
        if maxlines == 0 {
            return Err(RaidlineError::InvalidArgument(
                "maxlines must be non-zero".to_owned(),
            ));
        }
        if maxlines > MAX_TAGLINES {
            return Err(RaidlineError::InvalidArgument(format!(
                "maxlines {maxlines} exceeds the addressable limit {MAX_TAGLINES}"
            )));
        }
        if max_blocks_per_line == 0 {
            return Err(RaidlineError::InvalidArgument(
                "max blocks per tagline must be non-zero".to_owned(),
            ));
        }
        let mut lines = Vec::with_capacity(maxlines as usize);
        lines.resize_with(maxlines as usize, Tagline::default);
        Ok(Self {
            lines,
            max_blocks_per_line,
        })
    }

    fn line(&self, tag: TaglineId) -> Result<&Tagline> {
        self.lines.get(tag.0 as usize).ok_or_else(|| {
            RaidlineError::InvalidArgument(format!(
                "tagline {tag} does not exist (maxlines {})",
                self.lines.len()
            ))
        })
    }

    /// High-water mark: the next logical block number an append lands on.
    pub(crate) fn next_index(&self, tag: TaglineId) -> Result<u32> {
        Ok(self.line(tag)?.placements.len() as u32)
    }

    /// Placement of an already-written logical block.
    pub(crate) fn placement(&self, tag: TaglineId, bnum: u32) -> Result<Placement> {
        let line = self.line(tag)?;
        line.placements.get(bnum as usize).copied().ok_or_else(|| {
            RaidlineError::InvalidArgument(format!(
                "block {bnum} of tagline {tag} is unallocated (high-water mark {})",
                line.placements.len()
            ))
        })
    }

    /// Whether the tagline can take another appended block.
    pub(crate) fn can_append(&self, tag: TaglineId) -> Result<()> {
        let line = self.line(tag)?;
        if line.placements.len() as u32 >= self.max_blocks_per_line {
            return Err(RaidlineError::InvalidArgument(format!(
                "tagline {tag} is full ({} blocks)",
                self.max_blocks_per_line
            )));
        }
        Ok(())
    }

    /// Record the placement of the tagline's next logical block.
    pub(crate) fn append(&mut self, tag: TaglineId, placement: Placement) -> Result<u32> {
        let limit = self.max_blocks_per_line;
        let line = self
            .lines
            .get_mut(tag.0 as usize)
            .ok_or_else(|| RaidlineError::InvalidArgument(format!("tagline {tag} does not exist")))?;
        let index = line.placements.len() as u32;
        if index >= limit {
            return Err(RaidlineError::InvalidArgument(format!(
                "tagline {tag} is full ({limit} blocks)"
            )));
        }
        line.placements.push(placement);
        Ok(index)
    }

    /// Every recorded placement, tagline-major.
    pub(crate) fn placements(&self) -> impl Iterator<Item = (TaglineId, u32, Placement)> + '_ {
        self.lines.iter().enumerate().flat_map(|(tag, line)| {
            line.placements
                .iter()
                .enumerate()
                .map(move |(bnum, placement)| {
                    (TaglineId(tag as u16), bnum as u32, *placement)
                })
        })
    }

    pub(crate) fn maxlines(&self) -> u32 {
        self.lines.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raidline_types::PhysAddr;

    fn placement(seed: u32) -> Placement {
        Placement::new(PhysAddr::new(0, seed), PhysAddr::new(1, seed)).expect("placement")
    }

    #[test]
    fn construction_validates_limits() {
        assert!(TaglineDirectory::new(0, 256).is_err());
        assert!(TaglineDirectory::new(4, 0).is_err());
        assert!(TaglineDirectory::new(MAX_TAGLINES + 1, 256).is_err());
        let dir = TaglineDirectory::new(4, 256).expect("directory");
        assert_eq!(dir.maxlines(), 4);
    }

    #[test]
    fn appends_stay_contiguous() {
        let mut dir = TaglineDirectory::new(2, 256).expect("directory");
        let tag = TaglineId(1);
        assert_eq!(dir.next_index(tag).expect("next"), 0);
        assert_eq!(dir.append(tag, placement(0)).expect("append"), 0);
        assert_eq!(dir.append(tag, placement(1)).expect("append"), 1);
        assert_eq!(dir.next_index(tag).expect("next"), 2);
        // The sibling tagline is untouched.
        assert_eq!(dir.next_index(TaglineId(0)).expect("next"), 0);
    }

    #[test]
    fn lookup_rejects_unknown_tag_and_unallocated_block() {
        let mut dir = TaglineDirectory::new(2, 256).expect("directory");
        assert!(dir.next_index(TaglineId(2)).is_err());
        assert!(dir.placement(TaglineId(0), 0).is_err());
        dir.append(TaglineId(0), placement(0)).expect("append");
        assert!(dir.placement(TaglineId(0), 0).is_ok());
        assert!(dir.placement(TaglineId(0), 1).is_err());
    }

    #[test]
    fn per_tagline_block_limit_is_enforced() {
        let mut dir = TaglineDirectory::new(1, 2).expect("directory");
        let tag = TaglineId(0);
        dir.append(tag, placement(0)).expect("first");
        dir.append(tag, placement(1)).expect("second");
        let err = dir.append(tag, placement(2)).expect_err("over the limit");
        assert!(matches!(err, RaidlineError::InvalidArgument(_)));
        assert_eq!(dir.next_index(tag).expect("next"), 2);
    }

    #[test]
    fn placements_iterates_tagline_major() {
        let mut dir = TaglineDirectory::new(3, 256).expect("directory");
        dir.append(TaglineId(0), placement(10)).expect("append");
        dir.append(TaglineId(2), placement(20)).expect("append");
        dir.append(TaglineId(2), placement(21)).expect("append");

        let walked: Vec<(u16, u32, u32)> = dir
            .placements()
            .map(|(tag, bnum, p)| (tag.0, bnum, p.primary.block.0))
            .collect();
        assert_eq!(walked, vec![(0, 0, 10), (2, 0, 20), (2, 1, 21)]);
    }
}
