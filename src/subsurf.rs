// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{HashMap, HashSet};

use glam::Vec3;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::utils::SVec;

/// Implements indexing traits so the subdivision surface can be used to
/// access vertex, edge or face records using ids as indices.
pub mod mesh_index_impls;

/// Type-safe wrappers over the arena indices and the caller handles
pub mod id_types;
pub use id_types::*;

/// Sample element layout and componentwise arithmetic
pub mod element;
pub use element::*;

/// Level-size arithmetic and packed grid offset computation
pub mod grid;
pub use grid::*;

/// Vertex, edge and face records with their packed sample storage
pub mod entities;
pub use entities::*;

/// The full- and partial-sync protocols that feed topology in
pub mod sync;
pub use sync::SyncState;

/// The subdivision kernel: first-pass specialization and per-level refinement
pub mod kernel;

/// Smooth vertex normals over the finest-level grids
pub mod normals;

/// Stitching and re-computation utilities over the produced grids
pub mod stitch;

/// Element sizes and mesh-wide options, fixed at construction time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeshIfc {
    /// Floats per sample element
    pub vert_data_size: usize,
    /// Leading floats the componentwise arithmetic acts on
    pub num_layers: usize,
    /// Opaque per-vertex user data, in bytes
    pub vert_user_size: usize,
    pub edge_user_size: usize,
    pub face_user_size: usize,
    /// When set, the vertex-update rule is the identity
    pub simple_subdiv: bool,
}

impl Default for MeshIfc {
    fn default() -> Self {
        Self {
            vert_data_size: 3,
            num_layers: 3,
            vert_user_size: 0,
            edge_user_size: 0,
            face_user_size: 0,
            simple_subdiv: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubsurfError {
    /// A referenced handle does not exist, a guarded precondition failed, or
    /// a configured size/offset is out of range
    #[error("invalid value")]
    InvalidValue,
    /// A sync call arrived outside the protocol state that allows it
    #[error("invalid sync state")]
    InvalidSyncState,
}

/// An incremental Catmull-Clark subdivision surface.
///
/// Topology is fed in through the sync protocols (see [`sync`]), after which
/// every vertex, edge and face carries subdivided samples for all levels up
/// to `subdiv_levels`, and every face carries `num_verts` quadrilateral
/// sample grids. Entities carried across a sync keep their arena ids.
#[derive(Debug)]
pub struct SubSurf {
    pub(crate) verts: SlotMap<VertId, Vert>,
    pub(crate) edges: SlotMap<EdgeId, Edge>,
    pub(crate) faces: SlotMap<FaceId, Face>,

    pub(crate) vmap: HashMap<VertHandle, VertId>,
    pub(crate) emap: HashMap<EdgeHandle, EdgeId>,
    pub(crate) fmap: HashMap<FaceHandle, FaceId>,
    /// Edges created by face sync; they have no caller handle, so they live
    /// outside `emap`
    pub(crate) synth_edges: HashSet<EdgeId>,

    pub(crate) layout: ElemLayout,
    pub(crate) vert_user_size: usize,
    pub(crate) edge_user_size: usize,
    pub(crate) face_user_size: usize,
    pub(crate) simple_subdiv: bool,

    pub(crate) subdiv_levels: usize,
    pub(crate) num_grids: usize,

    pub(crate) allow_edge_creation: bool,
    pub(crate) default_crease_value: f32,
    pub(crate) default_edge_user_data: Vec<u8>,

    pub(crate) calc_vert_normals: bool,

    pub(crate) use_age_counts: bool,
    pub(crate) vert_user_age_offset: usize,
    pub(crate) edge_user_age_offset: usize,
    pub(crate) face_user_age_offset: usize,
    pub(crate) current_age: i32,

    pub(crate) sync_state: SyncState,
    pub(crate) old_vmap: HashMap<VertHandle, VertId>,
    pub(crate) old_emap: HashMap<EdgeHandle, EdgeId>,
    pub(crate) old_fmap: HashMap<FaceHandle, FaceId>,
    pub(crate) old_synth_edges: HashSet<EdgeId>,
}

impl SubSurf {
    pub fn new(ifc: MeshIfc, subdiv_levels: usize) -> Result<Self, SubsurfError> {
        if !(1..=SUBSURF_LEVEL_MAX).contains(&subdiv_levels)
            || ifc.vert_data_size == 0
            || ifc.num_layers == 0
            || ifc.num_layers > ifc.vert_data_size
        {
            return Err(SubsurfError::InvalidValue);
        }

        Ok(Self {
            verts: SlotMap::with_key(),
            edges: SlotMap::with_key(),
            faces: SlotMap::with_key(),
            vmap: HashMap::new(),
            emap: HashMap::new(),
            fmap: HashMap::new(),
            synth_edges: HashSet::new(),
            layout: ElemLayout {
                elem_size: ifc.vert_data_size,
                num_layers: ifc.num_layers,
                normal_offset: None,
                mask_offset: None,
            },
            vert_user_size: ifc.vert_user_size,
            edge_user_size: ifc.edge_user_size,
            face_user_size: ifc.face_user_size,
            simple_subdiv: ifc.simple_subdiv,
            subdiv_levels,
            num_grids: 0,
            allow_edge_creation: false,
            default_crease_value: 0.0,
            default_edge_user_data: vec![0; ifc.edge_user_size],
            calc_vert_normals: false,
            use_age_counts: false,
            vert_user_age_offset: 0,
            edge_user_age_offset: 0,
            face_user_age_offset: 0,
            current_age: 0,
            sync_state: SyncState::None,
            old_vmap: HashMap::new(),
            old_emap: HashMap::new(),
            old_fmap: HashMap::new(),
            old_synth_edges: HashSet::new(),
        })
    }

    /* ============== */
    /* Configuration  */
    /* ============== */

    /// Changing the level count invalidates all packed storage, so any value
    /// different from the current one clears the whole entity set. Setting
    /// the current value again is a no-op.
    pub fn set_subdivision_levels(&mut self, subdiv_levels: usize) -> Result<(), SubsurfError> {
        if !(1..=SUBSURF_LEVEL_MAX).contains(&subdiv_levels) {
            return Err(SubsurfError::InvalidValue);
        }
        if subdiv_levels != self.subdiv_levels {
            self.subdiv_levels = subdiv_levels;
            self.num_grids = 0;
            self.verts.clear();
            self.edges.clear();
            self.faces.clear();
            self.vmap.clear();
            self.emap.clear();
            self.fmap.clear();
            self.synth_edges.clear();
        }
        Ok(())
    }

    pub fn set_calc_vertex_normals(
        &mut self,
        enable: bool,
        normal_offset: usize,
    ) -> Result<(), SubsurfError> {
        if enable {
            if normal_offset + 3 > self.layout.elem_size {
                return Err(SubsurfError::InvalidValue);
            }
            self.calc_vert_normals = true;
            self.layout.normal_offset = Some(normal_offset);
        } else {
            self.calc_vert_normals = false;
            self.layout.normal_offset = None;
        }
        Ok(())
    }

    pub fn set_alloc_mask(&mut self, alloc_mask: bool, mask_offset: usize) {
        self.layout.mask_offset = alloc_mask.then_some(mask_offset);
    }

    pub fn set_num_layers(&mut self, num_layers: usize) -> Result<(), SubsurfError> {
        if num_layers == 0 || num_layers > self.layout.elem_size {
            return Err(SubsurfError::InvalidValue);
        }
        self.layout.num_layers = num_layers;
        Ok(())
    }

    pub fn set_use_age_counts(
        &mut self,
        use_age_counts: bool,
        vert_user_offset: usize,
        edge_user_offset: usize,
        face_user_offset: usize,
    ) -> Result<(), SubsurfError> {
        if use_age_counts {
            if vert_user_offset + 4 > self.vert_user_size
                || edge_user_offset + 4 > self.edge_user_size
                || face_user_offset + 4 > self.face_user_size
            {
                return Err(SubsurfError::InvalidValue);
            }
            self.use_age_counts = true;
            self.vert_user_age_offset = vert_user_offset;
            self.edge_user_age_offset = edge_user_offset;
            self.face_user_age_offset = face_user_offset;
        } else {
            self.use_age_counts = false;
            self.vert_user_age_offset = 0;
            self.edge_user_age_offset = 0;
            self.face_user_age_offset = 0;
        }
        Ok(())
    }

    pub fn set_allow_edge_creation(
        &mut self,
        allow: bool,
        default_crease_value: f32,
        default_user_data: Option<&[u8]>,
    ) {
        self.allow_edge_creation = allow;
        self.default_crease_value = default_crease_value;
        self.default_edge_user_data = match default_user_data {
            Some(data) => {
                let mut buf = vec![0; self.edge_user_size];
                let n = data.len().min(self.edge_user_size);
                buf[..n].copy_from_slice(&data[..n]);
                buf
            }
            None => vec![0; self.edge_user_size],
        };
    }

    pub fn subdiv_levels(&self) -> usize {
        self.subdiv_levels
    }

    pub fn simple_subdiv(&self) -> bool {
        self.simple_subdiv
    }

    pub fn allow_edge_creation(&self) -> bool {
        self.allow_edge_creation
    }

    pub fn calc_vert_normals(&self) -> bool {
        self.calc_vert_normals
    }

    pub fn layout(&self) -> &ElemLayout {
        &self.layout
    }

    /* =========== */
    /* Entity ops  */
    /* =========== */

    pub(crate) fn alloc_vert(&mut self, handle: VertHandle) -> VertId {
        let mut v = Vert::new(handle, self.subdiv_levels, &self.layout, self.vert_user_size);
        if self.use_age_counts {
            write_age(&mut v.user_data, self.vert_user_age_offset, self.current_age);
        }
        self.verts.insert(v)
    }

    pub(crate) fn alloc_edge(
        &mut self,
        handle: Option<EdgeHandle>,
        v0: VertId,
        v1: VertId,
        crease: f32,
    ) -> EdgeId {
        let mut e = Edge::new(
            handle,
            v0,
            v1,
            crease,
            self.subdiv_levels,
            &self.layout,
            self.edge_user_size,
        );
        if self.use_age_counts {
            write_age(&mut e.user_data, self.edge_user_age_offset, self.current_age);
        }
        let id = self.edges.insert(e);
        self.verts[v0].edges.push(id);
        self.verts[v1].edges.push(id);
        id
    }

    pub(crate) fn alloc_face(
        &mut self,
        handle: FaceHandle,
        verts: SVec<VertId>,
        edges: SVec<EdgeId>,
    ) -> FaceId {
        let vert_list = verts.clone();
        let edge_list = edges.clone();
        let mut f = Face::new(
            handle,
            verts,
            edges,
            self.subdiv_levels,
            &self.layout,
            self.face_user_size,
        );
        if self.use_age_counts {
            write_age(&mut f.user_data, self.face_user_age_offset, self.current_age);
        }
        let id = self.faces.insert(f);
        for (&v, &e) in vert_list.iter().zip(edge_list.iter()) {
            self.verts[v].faces.push(id);
            self.edges[e].faces.push(id);
        }
        id
    }

    /// Detach an edge from its endpoints, flag them for recomputation and
    /// drop it. Incident faces are the caller's responsibility.
    pub(crate) fn edge_unlink_mark_and_free(&mut self, e_id: EdgeId) {
        if let Some(e) = self.edges.remove(e_id) {
            for v_id in [e.v0, e.v1] {
                if let Some(v) = self.verts.get_mut(v_id) {
                    v.rem_edge(e_id);
                    v.effected = true;
                }
            }
            self.synth_edges.remove(&e_id);
        }
    }

    /// Detach a face from its vertices and edges, flag the vertices for
    /// recomputation and drop it.
    pub(crate) fn face_unlink_mark_and_free(&mut self, f_id: FaceId) {
        if let Some(f) = self.faces.remove(f_id) {
            for (&v_id, &e_id) in f.verts.iter().zip(f.edges.iter()) {
                if let Some(v) = self.verts.get_mut(v_id) {
                    v.rem_face(f_id);
                    v.effected = true;
                }
                if let Some(e) = self.edges.get_mut(e_id) {
                    e.rem_face(f_id);
                }
            }
        }
    }

    /// Find an edge connecting `v` and `v_q`, scanning the adjacency list
    /// newest-first. The scan order matters when duplicate edges exist
    /// between the same pair, as may happen during partial updates.
    pub(crate) fn find_edge_to(&self, v: VertId, v_q: VertId) -> Option<EdgeId> {
        self.verts[v].edges.iter().rev().copied().find(|&e_id| {
            let e = &self.edges[e_id];
            (e.v0 == v && e.v1 == v_q) || (e.v1 == v && e.v0 == v_q)
        })
    }

    /* ===================== */
    /* Lookup and iteration  */
    /* ===================== */

    pub fn num_verts(&self) -> usize {
        self.verts.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn num_grids(&self) -> usize {
        self.num_grids
    }

    pub fn vert_id(&self, handle: VertHandle) -> Option<VertId> {
        self.vmap.get(&handle).copied()
    }

    pub fn edge_id(&self, handle: EdgeHandle) -> Option<EdgeId> {
        self.emap.get(&handle).copied()
    }

    pub fn face_id(&self, handle: FaceHandle) -> Option<FaceId> {
        self.fmap.get(&handle).copied()
    }

    pub fn vert(&self, id: VertId) -> Option<&Vert> {
        self.verts.get(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn face(&self, id: FaceId) -> Option<&Face> {
        self.faces.get(id)
    }

    pub fn iter_verts(&self) -> impl Iterator<Item = (VertId, &Vert)> {
        self.verts.iter()
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter()
    }

    pub fn iter_faces(&self) -> impl Iterator<Item = (FaceId, &Face)> {
        self.faces.iter()
    }

    /* ================= */
    /* Level accessors   */
    /* ================= */

    pub fn edge_size(&self) -> usize {
        ccg_edgesize(self.subdiv_levels)
    }

    pub fn grid_size(&self) -> usize {
        ccg_gridsize(self.subdiv_levels)
    }

    pub fn edge_level_size(&self, level: usize) -> Option<usize> {
        (1..=self.subdiv_levels)
            .contains(&level)
            .then(|| ccg_edgesize(level))
    }

    pub fn grid_level_size(&self, level: usize) -> Option<usize> {
        (1..=self.subdiv_levels)
            .contains(&level)
            .then(|| ccg_gridsize(level))
    }

    pub fn vert_is_boundary(&self, id: VertId) -> bool {
        self.verts
            .get(id)
            .map(|v| v.is_boundary(&self.edges))
            .unwrap_or(false)
    }

    pub fn vert_level_data(&self, id: VertId, level: usize) -> Option<&[f32]> {
        if level > self.subdiv_levels {
            return None;
        }
        Some(self.verts.get(id)?.co(level, &self.layout))
    }

    pub fn vert_data(&self, id: VertId) -> Option<&[f32]> {
        self.vert_level_data(id, self.subdiv_levels)
    }

    pub fn edge_level_data(&self, id: EdgeId, x: usize, level: usize) -> Option<&[f32]> {
        if level > self.subdiv_levels || x >= ccg_edgesize(level) {
            return None;
        }
        Some(self.edges.get(id)?.co(level, x, &self.layout))
    }

    pub fn edge_data(&self, id: EdgeId, x: usize) -> Option<&[f32]> {
        self.edge_level_data(id, x, self.subdiv_levels)
    }

    pub fn face_center_data(&self, id: FaceId) -> Option<&[f32]> {
        Some(self.faces.get(id)?.center(&self.layout))
    }

    pub fn face_grid_data(&self, id: FaceId, s: usize, x: usize, y: usize) -> Option<&[f32]> {
        let f = self.faces.get(id)?;
        let gs = self.grid_size();
        if s >= f.num_verts() || x >= gs || y >= gs {
            return None;
        }
        Some(f.if_co(self.subdiv_levels, s, x, y, self.subdiv_levels, &self.layout))
    }

    pub fn face_grid_edge_data(&self, id: FaceId, s: usize, x: usize) -> Option<&[f32]> {
        let f = self.faces.get(id)?;
        if s >= f.num_verts() || x >= self.grid_size() {
            return None;
        }
        Some(f.ie_co(self.subdiv_levels, s, x, self.subdiv_levels, &self.layout))
    }

    /// Smooth normal of a vertex at the finest level; `None` when normal
    /// calculation is disabled.
    pub fn vert_normal(&self, id: VertId) -> Option<Vec3> {
        if !self.calc_vert_normals {
            return None;
        }
        let elem = self.vert_data(id)?;
        Some(self.layout.no(elem))
    }

    pub fn edge_normal(&self, id: EdgeId, x: usize) -> Option<Vec3> {
        if !self.calc_vert_normals {
            return None;
        }
        let elem = self.edge_data(id, x)?;
        Some(self.layout.no(elem))
    }

    pub fn face_grid_normal(&self, id: FaceId, s: usize, x: usize, y: usize) -> Option<Vec3> {
        if !self.calc_vert_normals {
            return None;
        }
        let elem = self.face_grid_data(id, s, x, y)?;
        Some(self.layout.no(elem))
    }

    pub fn vert_user_data(&self, id: VertId) -> Option<&[u8]> {
        Some(&self.verts.get(id)?.user_data)
    }

    pub fn vert_user_data_mut(&mut self, id: VertId) -> Option<&mut [u8]> {
        Some(&mut self.verts.get_mut(id)?.user_data)
    }

    pub fn edge_user_data(&self, id: EdgeId) -> Option<&[u8]> {
        Some(&self.edges.get(id)?.user_data)
    }

    pub fn edge_user_data_mut(&mut self, id: EdgeId) -> Option<&mut [u8]> {
        Some(&mut self.edges.get_mut(id)?.user_data)
    }

    pub fn face_user_data(&self, id: FaceId) -> Option<&[u8]> {
        Some(&self.faces.get(id)?.user_data)
    }

    pub fn face_user_data_mut(&mut self, id: FaceId) -> Option<&mut [u8]> {
        Some(&mut self.faces.get_mut(id)?.user_data)
    }

    /// Syncs since the vertex was last recomputed; zero when age tracking is
    /// disabled.
    pub fn vert_age(&self, id: VertId) -> Option<i32> {
        let v = self.verts.get(id)?;
        Some(if self.use_age_counts {
            self.current_age - read_age(&v.user_data, self.vert_user_age_offset)
        } else {
            0
        })
    }

    pub fn edge_age(&self, id: EdgeId) -> Option<i32> {
        let e = self.edges.get(id)?;
        Some(if self.use_age_counts {
            self.current_age - read_age(&e.user_data, self.edge_user_age_offset)
        } else {
            0
        })
    }

    pub fn face_age(&self, id: FaceId) -> Option<i32> {
        let f = self.faces.get(id)?;
        Some(if self.use_age_counts {
            self.current_age - read_age(&f.user_data, self.face_user_age_offset)
        } else {
            0
        })
    }

    /* ==================== */
    /* Final-mesh interface */
    /* ==================== */

    pub fn num_final_verts(&self) -> usize {
        let edge_size = ccg_edgesize(self.subdiv_levels);
        let grid_size = ccg_gridsize(self.subdiv_levels);
        self.verts.len()
            + self.edges.len() * (edge_size - 2)
            + self.faces.len()
            + self.num_grids * ((grid_size - 2) + (grid_size - 2) * (grid_size - 2))
    }

    pub fn num_final_edges(&self) -> usize {
        let edge_size = ccg_edgesize(self.subdiv_levels);
        let grid_size = ccg_gridsize(self.subdiv_levels);
        self.edges.len() * (edge_size - 1)
            + self.num_grids * ((grid_size - 1) + 2 * ((grid_size - 2) * (grid_size - 1)))
    }

    pub fn num_final_faces(&self) -> usize {
        let grid_size = ccg_gridsize(self.subdiv_levels);
        self.num_grids * ((grid_size - 1) * (grid_size - 1))
    }

    /// Storage descriptor for one level's grids.
    pub fn key(&self, level: usize) -> Option<GridKey> {
        let grid_size = self.grid_level_size(level)?;
        Some(GridKey {
            level,
            elem_size: self.layout.elem_size,
            num_layers: self.layout.num_layers,
            has_normals: self.calc_vert_normals,
            normal_offset: self.layout.normal_offset,
            has_mask: self.layout.mask_offset.is_some(),
            mask_offset: self.layout.mask_offset,
            grid_size,
            grid_area: grid_size * grid_size,
            grid_floats: self.layout.elem_size * grid_size * grid_size,
        })
    }

    pub fn key_top_level(&self) -> GridKey {
        self.key(self.subdiv_levels)
            .expect("top level key is always valid")
    }

    /* ==================== */
    /* Polygon-soup driver  */
    /* ==================== */

    /// Runs a full sync from a list of positions and a list of polygons
    /// containing indices into it. Handles are derived from the indices, so
    /// repeated calls with a stable indexing re-use entities incrementally.
    ///
    /// - Generic over Index: use as much precision as you need / want.
    /// - Generic over Polygon: use whatever input layout you want.
    ///
    /// If unsure, you can pass `Vec<Vec<u32>>` as `polygons`.
    pub fn sync_from_polygons<Index, Polygon>(
        &mut self,
        positions: &[Vec3],
        polygons: &[Polygon],
    ) -> anyhow::Result<()>
    where
        Index: num_traits::AsPrimitive<usize> + 'static + Eq + PartialEq + core::hash::Hash + Copy,
        Polygon: AsRef<[Index]>,
    {
        use anyhow::{anyhow, bail};

        if self.layout.num_layers < 3 {
            bail!("Positions need at least three layers per element");
        }

        for polygon in polygons.iter().map(|p| p.as_ref()) {
            if polygon.len() < 3 {
                bail!("Cannot sync meshes where polygons have less than three vertices");
            }
            if polygon.iter().duplicates().next().is_some() {
                bail!("Cannot sync meshes where a polygon has duplicate vertices");
            }
            for index in polygon {
                if positions.get(index.as_()).is_none() {
                    bail!("Out-of-bounds index in the polygon array {}", index.as_());
                }
            }
        }

        self.init_full_sync()?;

        let mut elem = vec![0.0f32; self.layout.num_layers];
        for (i, p) in positions.iter().enumerate() {
            elem[0] = p.x;
            elem[1] = p.y;
            elem[2] = p.z;
            self.sync_vert(VertHandle(i as u64), &elem, false)?;
        }

        // Undirected edges, deduplicated; the handle packs the sorted index
        // pair so re-syncs see stable edge identities.
        let mut seen = HashSet::new();
        for polygon in polygons.iter().map(|p| p.as_ref()) {
            for (&a, &b) in polygon.iter().circular_tuple_windows() {
                let (lo, hi) = if a.as_() < b.as_() {
                    (a.as_(), b.as_())
                } else {
                    (b.as_(), a.as_())
                };
                if hi >= u32::MAX as usize {
                    bail!("Vertex index {} does not fit an edge handle", hi);
                }
                if seen.insert((lo, hi)) {
                    let handle = EdgeHandle(((lo as u64) << 32) | hi as u64);
                    self.sync_edge(handle, VertHandle(lo as u64), VertHandle(hi as u64), 0.0)?;
                }
            }
        }

        for (i, polygon) in polygons.iter().enumerate() {
            let handles: SVec<VertHandle> = polygon
                .as_ref()
                .iter()
                .map(|idx| VertHandle(idx.as_() as u64))
                .collect();
            self.sync_face(FaceHandle(i as u64), &handles)?;
        }

        self.process_sync()
            .map_err(|e| anyhow!("Sync failed: {e}"))?;
        Ok(())
    }
}
