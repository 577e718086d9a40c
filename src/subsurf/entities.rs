// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slotmap::SlotMap;

use super::element::ElemLayout;
use super::grid::*;
use super::id_types::*;
use crate::utils::SVec;

/// A control vertex. Its packed sample array holds one element per
/// subdivision level, level 0 being the caller-supplied sample.
#[derive(Debug, Clone)]
pub struct Vert {
    pub(crate) handle: VertHandle,
    pub(crate) edges: SVec<EdgeId>,
    pub(crate) faces: SVec<FaceId>,
    pub(crate) effected: bool,
    pub(crate) changed: bool,
    pub(crate) seam: bool,
    pub(crate) data: Vec<f32>,
    pub(crate) user_data: Vec<u8>,
}

impl Vert {
    pub(crate) fn new(
        handle: VertHandle,
        levels: usize,
        layout: &ElemLayout,
        user_size: usize,
    ) -> Self {
        Self {
            handle,
            edges: SVec::new(),
            faces: SVec::new(),
            effected: false,
            changed: false,
            seam: false,
            data: vec![0.0; (levels + 1) * layout.elem_size],
            user_data: vec![0; user_size],
        }
    }

    pub fn handle(&self) -> VertHandle {
        self.handle
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn edge(&self, index: usize) -> Option<EdgeId> {
        self.edges.get(index).copied()
    }

    pub fn face(&self, index: usize) -> Option<FaceId> {
        self.faces.get(index).copied()
    }

    pub fn is_seam(&self) -> bool {
        self.seam
    }

    pub fn is_boundary(&self, edges: &SlotMap<EdgeId, Edge>) -> bool {
        self.edges.iter().any(|&e| edges[e].is_boundary())
    }

    #[inline]
    pub fn co<'a>(&'a self, lvl: usize, layout: &ElemLayout) -> &'a [f32] {
        layout.elem(&self.data, lvl)
    }

    #[inline]
    pub(crate) fn co_mut<'a>(&'a mut self, lvl: usize, layout: &ElemLayout) -> &'a mut [f32] {
        layout.elem_mut(&mut self.data, lvl)
    }

    pub(crate) fn rem_edge(&mut self, e: EdgeId) {
        if let Some(i) = self.edges.iter().position(|&x| x == e) {
            self.edges.swap_remove(i);
        }
    }

    pub(crate) fn rem_face(&mut self, f: FaceId) {
        if let Some(i) = self.faces.iter().position(|&x| x == f) {
            self.faces.swap_remove(i);
        }
    }
}

/// A control edge. Endpoint order is meaningful: edge samples run from `v0`
/// to `v1`, and grid borders read them through [`Edge::co_vert`] to get a
/// consistent orientation from either side.
#[derive(Debug, Clone)]
pub struct Edge {
    /// `None` marks a synthetic edge created during face sync when the
    /// caller never declared it.
    pub(crate) handle: Option<EdgeHandle>,
    pub(crate) v0: VertId,
    pub(crate) v1: VertId,
    pub(crate) faces: SVec<FaceId>,
    pub(crate) crease: f32,
    pub(crate) effected: bool,
    pub(crate) trigger: bool,
    pub(crate) excluded: bool,
    pub(crate) data: Vec<f32>,
    pub(crate) user_data: Vec<u8>,
}

impl Edge {
    pub(crate) fn new(
        handle: Option<EdgeHandle>,
        v0: VertId,
        v1: VertId,
        crease: f32,
        levels: usize,
        layout: &ElemLayout,
        user_size: usize,
    ) -> Self {
        Self {
            handle,
            v0,
            v1,
            faces: SVec::new(),
            crease,
            effected: false,
            trigger: false,
            excluded: false,
            data: vec![0.0; ccg_edgebase(levels + 1) * layout.elem_size],
            user_data: vec![0; user_size],
        }
    }

    pub fn handle(&self) -> Option<EdgeHandle> {
        self.handle
    }

    pub fn crease(&self) -> f32 {
        self.crease
    }

    pub fn v0(&self) -> VertId {
        self.v0
    }

    pub fn v1(&self) -> VertId {
        self.v1
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn face(&self, index: usize) -> Option<FaceId> {
        self.faces.get(index).copied()
    }

    pub fn is_boundary(&self) -> bool {
        self.faces.len() < 2
    }

    pub fn other_vert(&self, v: VertId) -> VertId {
        if v == self.v0 {
            self.v1
        } else {
            self.v0
        }
    }

    /// Residual sharpness at `lvl`. The integer part of the crease counts
    /// levels at which the edge subdivides as a boundary.
    pub fn sharpness(&self, lvl: usize) -> f32 {
        if lvl == 0 {
            self.crease
        } else if self.crease == 0.0 || self.crease - (lvl as f32) < 0.0 {
            0.0
        } else {
            self.crease - lvl as f32
        }
    }

    #[inline]
    pub(crate) fn co_off(&self, lvl: usize, x: usize) -> usize {
        ccg_edgebase(lvl) + x
    }

    /// Element offset of sample `x` counted from endpoint `v`.
    #[inline]
    pub(crate) fn co_vert_off(&self, v: VertId, lvl: usize, x: usize) -> usize {
        if v == self.v0 {
            ccg_edgebase(lvl) + x
        } else {
            ccg_edgebase(lvl) + (1 << lvl) - x
        }
    }

    #[inline]
    pub fn co<'a>(&'a self, lvl: usize, x: usize, layout: &ElemLayout) -> &'a [f32] {
        layout.elem(&self.data, self.co_off(lvl, x))
    }

    #[inline]
    pub(crate) fn co_mut<'a>(
        &'a mut self,
        lvl: usize,
        x: usize,
        layout: &ElemLayout,
    ) -> &'a mut [f32] {
        let off = self.co_off(lvl, x);
        layout.elem_mut(&mut self.data, off)
    }

    #[inline]
    pub fn co_vert<'a>(
        &'a self,
        v: VertId,
        lvl: usize,
        x: usize,
        layout: &ElemLayout,
    ) -> &'a [f32] {
        layout.elem(&self.data, self.co_vert_off(v, lvl, x))
    }

    #[inline]
    pub(crate) fn co_vert_mut<'a>(
        &'a mut self,
        v: VertId,
        lvl: usize,
        x: usize,
        layout: &ElemLayout,
    ) -> &'a mut [f32] {
        let off = self.co_vert_off(v, lvl, x);
        layout.elem_mut(&mut self.data, off)
    }

    pub(crate) fn rem_face(&mut self, f: FaceId) {
        if let Some(i) = self.faces.iter().position(|&x| x == f) {
            self.faces.swap_remove(i);
        }
    }
}

/// A control face of `num_verts` corners. Its packed data region holds the
/// center element, then per corner an interior-edge strip and a
/// `max_gs * max_gs` grid, all sized for the finest level and indexed with a
/// level-dependent spacing.
#[derive(Debug, Clone)]
pub struct Face {
    pub(crate) handle: FaceHandle,
    pub(crate) verts: SVec<VertId>,
    pub(crate) edges: SVec<EdgeId>,
    pub(crate) effected: bool,
    pub(crate) data: Vec<f32>,
    pub(crate) user_data: Vec<u8>,
}

impl Face {
    pub(crate) fn new(
        handle: FaceHandle,
        verts: SVec<VertId>,
        edges: SVec<EdgeId>,
        levels: usize,
        layout: &ElemLayout,
        user_size: usize,
    ) -> Self {
        let data_len = face_data_len(verts.len(), levels) * layout.elem_size;
        Self {
            handle,
            verts,
            edges,
            effected: false,
            data: vec![0.0; data_len],
            user_data: vec![0; user_size],
        }
    }

    pub fn handle(&self) -> FaceHandle {
        self.handle
    }

    pub fn num_verts(&self) -> usize {
        self.verts.len()
    }

    pub fn vert(&self, index: usize) -> Option<VertId> {
        self.verts.get(index).copied()
    }

    pub fn edge(&self, index: usize) -> Option<EdgeId> {
        self.edges.get(index).copied()
    }

    pub fn vert_index(&self, v: VertId) -> Option<usize> {
        self.verts.iter().position(|&x| x == v)
    }

    pub fn edge_index(&self, e: EdgeId) -> Option<usize> {
        self.edges.iter().position(|&x| x == e)
    }

    #[inline]
    pub fn center<'a>(&'a self, layout: &ElemLayout) -> &'a [f32] {
        layout.elem(&self.data, 0)
    }

    #[inline]
    pub(crate) fn center_mut<'a>(&'a mut self, layout: &ElemLayout) -> &'a mut [f32] {
        layout.elem_mut(&mut self.data, 0)
    }

    #[inline]
    pub fn ie_co<'a>(
        &'a self,
        lvl: usize,
        s: usize,
        x: usize,
        levels: usize,
        layout: &ElemLayout,
    ) -> &'a [f32] {
        layout.elem(&self.data, ie_offset(lvl, s, x, levels))
    }

    #[inline]
    pub(crate) fn ie_co_mut<'a>(
        &'a mut self,
        lvl: usize,
        s: usize,
        x: usize,
        levels: usize,
        layout: &ElemLayout,
    ) -> &'a mut [f32] {
        layout.elem_mut(&mut self.data, ie_offset(lvl, s, x, levels))
    }

    #[inline]
    pub fn if_co<'a>(
        &'a self,
        lvl: usize,
        s: usize,
        x: usize,
        y: usize,
        levels: usize,
        layout: &ElemLayout,
    ) -> &'a [f32] {
        layout.elem(&self.data, if_offset(lvl, s, x, y, levels))
    }

    #[inline]
    pub(crate) fn if_co_mut<'a>(
        &'a mut self,
        lvl: usize,
        s: usize,
        x: usize,
        y: usize,
        levels: usize,
        layout: &ElemLayout,
    ) -> &'a mut [f32] {
        layout.elem_mut(&mut self.data, if_offset(lvl, s, x, y, levels))
    }

    /// Element offset of the grid sample seen through edge `fe_idx` at
    /// edge-local `(ex, ey)`. `e_v0` orients the view.
    #[inline]
    pub(crate) fn if_edge_off(
        &self,
        e_v0: VertId,
        fe_idx: usize,
        lvl: usize,
        ex: usize,
        ey: usize,
        levels: usize,
    ) -> usize {
        let v0_matches = self.verts[fe_idx] == e_v0;
        if_edge_offset(self.verts.len(), fe_idx, v0_matches, lvl, ex, ey, levels)
    }

    #[inline]
    pub fn if_co_edge<'a>(
        &'a self,
        e_v0: VertId,
        fe_idx: usize,
        lvl: usize,
        ex: usize,
        ey: usize,
        levels: usize,
        layout: &ElemLayout,
    ) -> &'a [f32] {
        layout.elem(&self.data, self.if_edge_off(e_v0, fe_idx, lvl, ex, ey, levels))
    }

    #[inline]
    pub(crate) fn if_co_edge_mut<'a>(
        &'a mut self,
        e_v0: VertId,
        fe_idx: usize,
        lvl: usize,
        ex: usize,
        ey: usize,
        levels: usize,
        layout: &ElemLayout,
    ) -> &'a mut [f32] {
        let off = self.if_edge_off(e_v0, fe_idx, lvl, ex, ey, levels);
        layout.elem_mut(&mut self.data, off)
    }
}

/// Age stamps live in the caller's opaque user-data region as a native-endian
/// i32 at a caller-declared byte offset.
pub(crate) fn write_age(user_data: &mut [u8], offset: usize, age: i32) {
    user_data[offset..offset + 4].copy_from_slice(&age.to_ne_bytes());
}

pub(crate) fn read_age(user_data: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&user_data[offset..offset + 4]);
    i32::from_ne_bytes(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sharpness_decays_per_level() {
        let layout = ElemLayout {
            elem_size: 3,
            num_layers: 3,
            normal_offset: None,
            mask_offset: None,
        };
        let mut verts = SlotMap::<VertId, Vert>::with_key();
        let v0 = verts.insert(Vert::new(VertHandle(0), 2, &layout, 0));
        let v1 = verts.insert(Vert::new(VertHandle(1), 2, &layout, 0));

        let e = Edge::new(None, v0, v1, 2.5, 2, &layout, 0);
        assert_eq!(e.sharpness(0), 2.5);
        assert_eq!(e.sharpness(1), 1.5);
        assert_eq!(e.sharpness(2), 0.5);
        assert_eq!(e.sharpness(3), 0.0);

        let smooth = Edge::new(None, v0, v1, 0.0, 2, &layout, 0);
        assert_eq!(smooth.sharpness(0), 0.0);
        assert_eq!(smooth.sharpness(5), 0.0);
    }

    #[test]
    fn co_vert_mirrors_orientation() {
        let layout = ElemLayout {
            elem_size: 1,
            num_layers: 1,
            normal_offset: None,
            mask_offset: None,
        };
        let mut verts = SlotMap::<VertId, Vert>::with_key();
        let v0 = verts.insert(Vert::new(VertHandle(0), 2, &layout, 0));
        let v1 = verts.insert(Vert::new(VertHandle(1), 2, &layout, 0));

        let mut e = Edge::new(None, v0, v1, 0.0, 2, &layout, 0);
        let lvl = 2;
        for x in 0..ccg_edgesize(lvl) {
            e.co_mut(lvl, x, &layout)[0] = x as f32;
        }
        for x in 0..ccg_edgesize(lvl) {
            let from_v0 = e.co_vert(v0, lvl, x, &layout)[0];
            let from_v1 = e.co_vert(v1, lvl, ccg_edgesize(lvl) - 1 - x, &layout)[0];
            assert_eq!(from_v0, from_v1);
        }
    }
}
