//! ## Sector Skewing Module
//!
//! This contains the sector skew tables.  A skew table is a per-track
//! permutation taking a logical sector index to the physical sector index,
//! matching the timing of the original host controller.  All block-level
//! I/O in the file system goes through one of these tables.

/// Skew table for 16-sector tracks (640K HC disks)
pub const CPM_LSEC_TO_PSEC_16: [u8; 16] = [0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15];
/// Skew table for 9-sector tracks (3.5 inch CP/M 2.2 disks)
pub const CPM_LSEC_TO_PSEC_9: [u8; 9] = [0, 2, 4, 6, 8, 1, 3, 5, 7];

/// Get the skew table matching a per-side sector count, if one exists.
pub fn table_for(sectors: usize) -> Option<&'static [u8]> {
    match sectors {
        16 => Some(&CPM_LSEC_TO_PSEC_16),
        9 => Some(&CPM_LSEC_TO_PSEC_9),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_permutations() {
        for table in [&CPM_LSEC_TO_PSEC_16[..], &CPM_LSEC_TO_PSEC_9[..]] {
            let mut seen = vec![false; table.len()];
            for p in table {
                assert!((*p as usize) < table.len());
                assert!(!seen[*p as usize]);
                seen[*p as usize] = true;
            }
        }
    }

    #[test]
    fn table_selection() {
        assert_eq!(table_for(16).unwrap(), &CPM_LSEC_TO_PSEC_16);
        assert_eq!(table_for(9).unwrap(), &CPM_LSEC_TO_PSEC_9);
        assert!(table_for(10).is_none());
    }
}
