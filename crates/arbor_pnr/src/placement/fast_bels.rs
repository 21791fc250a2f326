//! Spatially bucketed bel index for O(1) random placement picks.

use arbor_arch::{Architecture, BelId};
use arbor_common::Ident;
use std::collections::HashMap;

/// A four-level bucket `buckets[type_idx][x][y] → bels`, built once by
/// scanning all bels of the device.
///
/// Types with fewer than `min_bels_for_grid_pick` instances collapse into
/// the `(0, 0)` bucket: with so few candidates a spatial pick buys nothing,
/// and collapsing keeps the move proposer's sampling loop cheap.
pub(crate) struct FastBels {
    type_info: HashMap<Ident, (usize, usize)>,
    buckets: Vec<Vec<Vec<Vec<BelId>>>>,
    /// Largest x coordinate seen over all bels.
    pub max_x: i32,
    /// Largest y coordinate seen over all bels.
    pub max_y: i32,
}

impl FastBels {
    pub fn build(arch: &dyn Architecture, min_bels_for_grid_pick: usize) -> Self {
        let mut type_info: HashMap<Ident, (usize, usize)> = HashMap::new();
        let mut num_types = 0;
        for &bel in arch.bels() {
            let ty = arch.bel_type(bel);
            type_info
                .entry(ty)
                .and_modify(|(_, cnt)| *cnt += 1)
                .or_insert_with(|| {
                    let idx = num_types;
                    num_types += 1;
                    (idx, 1)
                });
        }

        let mut buckets: Vec<Vec<Vec<Vec<BelId>>>> = vec![Vec::new(); num_types];
        let mut max_x = 1;
        let mut max_y = 1;
        for &bel in arch.bels() {
            let loc = arch.bel_location(bel);
            let (type_idx, type_cnt) = type_info[&arch.bel_type(bel)];
            let (mut x, mut y) = (loc.x, loc.y);
            if type_cnt < min_bels_for_grid_pick {
                x = 0;
                y = 0;
            }
            let by_x = &mut buckets[type_idx];
            if by_x.len() <= x as usize {
                by_x.resize(x as usize + 1, Vec::new());
            }
            let by_y = &mut by_x[x as usize];
            if by_y.len() <= y as usize {
                by_y.resize(y as usize + 1, Vec::new());
            }
            by_y[y as usize].push(bel);
            max_x = max_x.max(loc.x);
            max_y = max_y.max(loc.y);
        }

        Self {
            type_info,
            buckets,
            max_x,
            max_y,
        }
    }

    /// Returns `(type_idx, count)` for a bel type, if the device has any.
    pub fn type_info(&self, ty: Ident) -> Option<(usize, usize)> {
        self.type_info.get(&ty).copied()
    }

    /// Returns the bels of `type_idx` at grid position `(x, y)`.
    pub fn bucket(&self, type_idx: usize, x: i32, y: i32) -> &[BelId] {
        if x < 0 || y < 0 {
            return &[];
        }
        self.buckets[type_idx]
            .get(x as usize)
            .and_then(|col| col.get(y as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_arch::{GridArch, Loc};
    use arbor_common::Interner;

    #[test]
    fn buckets_hold_all_bels_of_type() {
        let i = Interner::new();
        let arch = GridArch::new(&i, 3, 3, 4, 1);
        let fb = FastBels::build(&arch, 1);
        let (lut_idx, lut_cnt) = fb.type_info(arch.lut_type()).unwrap();
        assert_eq!(lut_cnt, 3 * 3 * 2);

        let mut found = 0;
        for x in 0..3 {
            for y in 0..3 {
                let bucket = fb.bucket(lut_idx, x, y);
                assert_eq!(bucket.len(), 2);
                for &bel in bucket {
                    assert_eq!(arch.bel_type(bel), arch.lut_type());
                    let loc = arch.bel_location(bel);
                    assert_eq!((loc.x, loc.y), (x, y));
                }
                found += bucket.len();
            }
        }
        assert_eq!(found, lut_cnt);
    }

    #[test]
    fn rare_types_collapse_to_origin() {
        let i = Interner::new();
        let arch = GridArch::new(&i, 3, 3, 4, 1);
        // Threshold above population: everything collapses to (0, 0).
        let fb = FastBels::build(&arch, 1000);
        let (ff_idx, ff_cnt) = fb.type_info(arch.ff_type()).unwrap();
        assert_eq!(fb.bucket(ff_idx, 0, 0).len(), ff_cnt);
        assert!(fb.bucket(ff_idx, 1, 1).is_empty());
    }

    #[test]
    fn unknown_type_is_none() {
        let i = Interner::new();
        let arch = GridArch::new(&i, 2, 2, 2, 1);
        let fb = FastBels::build(&arch, 1);
        assert!(fb.type_info(i.get_or_intern("BRAM")).is_none());
    }

    #[test]
    fn max_dims_match_grid() {
        let i = Interner::new();
        let arch = GridArch::new(&i, 4, 6, 2, 1);
        let fb = FastBels::build(&arch, 1);
        assert_eq!(fb.max_x, 3);
        assert_eq!(fb.max_y, 5);
        let loc = arch.bel_location(arch.bels()[0]);
        assert_eq!(loc, Loc::new(0, 0, 0));
    }

    #[test]
    fn out_of_range_bucket_is_empty() {
        let i = Interner::new();
        let arch = GridArch::new(&i, 2, 2, 2, 1);
        let fb = FastBels::build(&arch, 1);
        let (idx, _) = fb.type_info(arch.lut_type()).unwrap();
        assert!(fb.bucket(idx, 7, 0).is_empty());
        assert!(fb.bucket(idx, -1, 0).is_empty());
    }
}
