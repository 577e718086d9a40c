// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// With this limit a single triangle becomes over 3 million faces
pub const SUBSURF_LEVEL_MAX: usize = 11;

/// Number of samples along one side of a face grid at `level`. Level 1 grids
/// are 2x2, level 2 grids 3x3, and so on.
#[inline]
pub fn ccg_gridsize(level: usize) -> usize {
    debug_assert!(level > 0);
    debug_assert!(level <= SUBSURF_LEVEL_MAX + 1);

    (1 << (level - 1)) + 1
}

/// Number of samples along an edge at `level`, endpoints included. Level 0
/// is the two endpoints themselves.
#[inline]
pub fn ccg_edgesize(level: usize) -> usize {
    debug_assert!(level <= SUBSURF_LEVEL_MAX + 1);

    1 + (1 << level)
}

/// Index step between samples of `low_level` within storage sized for
/// `high_level`.
#[inline]
pub fn ccg_spacing(high_level: usize, low_level: usize) -> usize {
    debug_assert!(high_level > 0 && low_level > 0);
    debug_assert!(high_level >= low_level);
    debug_assert!((high_level - low_level) <= SUBSURF_LEVEL_MAX);

    1 << (high_level - low_level)
}

#[inline]
pub fn ccg_factor(low_level: usize, high_level: usize) -> usize {
    debug_assert!(low_level > 0 && high_level > 0);
    debug_assert!(low_level <= high_level);

    1 << (high_level - low_level)
}

/// Element offset of the first sample of `level` within an edge's packed
/// per-level sample array.
#[inline]
pub fn ccg_edgebase(level: usize) -> usize {
    debug_assert!(level <= SUBSURF_LEVEL_MAX + 1);

    level + (1 << level) - 1
}

/// Element offset of grid `s` within a face's packed data region. The region
/// is laid out as: center element, then per grid an interior-edge strip of
/// `max_gs` elements followed by a `max_gs * max_gs` grid.
#[inline]
pub fn grid_base(s: usize, max_gs: usize) -> usize {
    1 + s * (max_gs + max_gs * max_gs)
}

/// Element offset of interior-edge sample `x` of grid `s` at `level`, within
/// storage sized for `levels`.
#[inline]
pub fn ie_offset(level: usize, s: usize, x: usize, levels: usize) -> usize {
    let max_gs = ccg_gridsize(levels);
    let spacing = ccg_spacing(levels, level);
    grid_base(s, max_gs) + x * spacing
}

/// Element offset of grid sample `(x, y)` of grid `s` at `level`, within
/// storage sized for `levels`. `(0, 0)` is the face center, `(gs-1, gs-1)`
/// the grid's own corner vertex.
#[inline]
pub fn if_offset(level: usize, s: usize, x: usize, y: usize, levels: usize) -> usize {
    let max_gs = ccg_gridsize(levels);
    let spacing = ccg_spacing(levels, level);
    grid_base(s, max_gs) + max_gs + (y * max_gs + x) * spacing
}

/// Element offset of the grid sample seen from edge-local coordinates
/// `(ex, ey)`, where `ex` runs along edge `fe_idx` of a face with
/// `num_verts` corners and `ey` steps into the face. The view crosses into
/// the previous or next grid when the coordinates leave the edge's own grid.
/// `v0_matches` is whether the edge's `v0` is the face corner `fe_idx`.
pub fn if_edge_offset(
    num_verts: usize,
    mut fe_idx: usize,
    v0_matches: bool,
    level: usize,
    ex: usize,
    ey: usize,
    levels: usize,
) -> usize {
    let max_gs = ccg_gridsize(levels) as i32;
    let spacing = ccg_spacing(levels, level) as i32;

    let mut ex = ex as i32 * spacing;
    let ey = ey as i32 * spacing;
    if !v0_matches {
        ex = (max_gs * 2 - 1) - 1 - ex;
    }
    let y = max_gs - 1 - ex;
    let x = max_gs - 1 - ey;
    let (cx, cy) = if x < 0 {
        fe_idx = (fe_idx + num_verts - 1) % num_verts;
        (y, -x)
    } else if y < 0 {
        fe_idx = (fe_idx + 1) % num_verts;
        (-y, x)
    } else {
        (x, y)
    };
    if_offset(levels, fe_idx, cx as usize, cy as usize, levels)
}

/// Element count of a face's packed data region.
#[inline]
pub fn face_data_len(num_verts: usize, levels: usize) -> usize {
    let max_gs = ccg_gridsize(levels);
    1 + num_verts * max_gs + num_verts * max_gs * max_gs
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn size_arithmetic() {
        for level in 1..=SUBSURF_LEVEL_MAX {
            assert_eq!(ccg_edgesize(level), 1 + (1usize << level));
            assert_eq!(ccg_gridsize(level + 1), (1usize << level) + 1);
        }
        assert_eq!(ccg_gridsize(1), 2);
        assert_eq!(ccg_edgesize(1), 3);
        // per-level bases are cumulative edge sizes
        assert_eq!(ccg_edgebase(1), 2);
        for level in 2..=SUBSURF_LEVEL_MAX {
            assert_eq!(
                ccg_edgebase(level),
                ccg_edgebase(level - 1) + ccg_edgesize(level - 1)
            );
        }
    }

    #[test]
    fn edge_view_crosses_into_neighbour_grids() {
        // A quad at levels = 2: grids are 3x3, an edge at the top level has 5
        // samples. Walking the full edge from the corner of grid 0 must start
        // in grid 0 and end up in the adjacent grid.
        let levels = 2;
        let n = 4;
        let o_start = if_edge_offset(n, 0, true, levels, 0, 0, levels);
        assert_eq!(o_start, if_offset(levels, 0, 2, 2, levels));
        let o_mid = if_edge_offset(n, 0, true, levels, 2, 0, levels);
        assert_eq!(o_mid, if_offset(levels, 0, 2, 0, levels));
        let o_end = if_edge_offset(n, 0, true, levels, 4, 0, levels);
        assert_eq!(o_end, if_offset(levels, 1, 2, 2, levels));
    }
}
