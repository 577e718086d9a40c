// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two protocols that feed topology into a [`SubSurf`].
//!
//! A *full sync* declares the complete mesh against the previous snapshot:
//! `init_full_sync`, then every vertex, then every edge, then every face,
//! then `process_sync`. Entities found in the snapshot are carried over
//! (keeping their ids), changed ones are replaced, and whatever the caller
//! did not re-declare is swept away when the sync is processed.
//!
//! A *partial sync* edits the current state in place: `init_partial_sync`,
//! then any order of `sync_*_del` and re-issued `sync_*` calls, then
//! `process_sync`. Because there is no snapshot to diff against, change
//! propagation is wider: a moved vertex flags its whole two-ring for
//! recomputation.

use std::mem;

use super::*;
use crate::utils::SVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    None,
    Vert,
    Edge,
    Face,
    Partial,
}

impl SubSurf {
    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Rotates the three handle maps to their old slots and installs fresh
    /// ones. Until `process_sync`, the old maps are the authoritative record
    /// of what existed before.
    pub fn init_full_sync(&mut self) -> Result<(), SubsurfError> {
        if self.sync_state != SyncState::None {
            return Err(SubsurfError::InvalidSyncState);
        }

        self.current_age += 1;

        self.old_vmap = mem::take(&mut self.vmap);
        self.old_emap = mem::take(&mut self.emap);
        self.old_fmap = mem::take(&mut self.fmap);
        self.old_synth_edges = mem::take(&mut self.synth_edges);

        self.num_grids = 0;
        self.sync_state = SyncState::Vert;
        Ok(())
    }

    pub fn init_partial_sync(&mut self) -> Result<(), SubsurfError> {
        if self.sync_state != SyncState::None {
            return Err(SubsurfError::InvalidSyncState);
        }

        self.current_age += 1;
        self.sync_state = SyncState::Partial;
        Ok(())
    }

    /// Deleting a vertex requires it to be fully disconnected first.
    pub fn sync_vert_del(&mut self, handle: VertHandle) -> Result<(), SubsurfError> {
        if self.sync_state != SyncState::Partial {
            return Err(SubsurfError::InvalidSyncState);
        }
        let v_id = match self.vmap.get(&handle) {
            Some(&v_id) => v_id,
            None => return Err(SubsurfError::InvalidValue),
        };
        {
            let v = &self.verts[v_id];
            if !v.faces.is_empty() || !v.edges.is_empty() {
                return Err(SubsurfError::InvalidValue);
            }
        }
        self.vmap.remove(&handle);
        self.verts.remove(v_id);
        Ok(())
    }

    /// Deleting an edge requires it to have no incident faces.
    pub fn sync_edge_del(&mut self, handle: EdgeHandle) -> Result<(), SubsurfError> {
        if self.sync_state != SyncState::Partial {
            return Err(SubsurfError::InvalidSyncState);
        }
        let e_id = match self.emap.get(&handle) {
            Some(&e_id) => e_id,
            None => return Err(SubsurfError::InvalidValue),
        };
        if !self.edges[e_id].faces.is_empty() {
            return Err(SubsurfError::InvalidValue);
        }
        self.emap.remove(&handle);
        self.edge_unlink_mark_and_free(e_id);
        Ok(())
    }

    /// Face deletion is unconditional; the face's vertices are flagged for
    /// recomputation.
    pub fn sync_face_del(&mut self, handle: FaceHandle) -> Result<(), SubsurfError> {
        if self.sync_state != SyncState::Partial {
            return Err(SubsurfError::InvalidSyncState);
        }
        let f_id = match self.fmap.get(&handle) {
            Some(&f_id) => f_id,
            None => return Err(SubsurfError::InvalidValue),
        };
        self.num_grids -= self.faces[f_id].verts.len();
        self.fmap.remove(&handle);
        self.face_unlink_mark_and_free(f_id);
        Ok(())
    }

    pub fn sync_vert(
        &mut self,
        handle: VertHandle,
        data: &[f32],
        seam: bool,
    ) -> Result<VertId, SubsurfError> {
        let layout = self.layout;
        if data.len() < layout.num_layers {
            return Err(SubsurfError::InvalidValue);
        }

        match self.sync_state {
            SyncState::Partial => {
                if let Some(&v_id) = self.vmap.get(&handle) {
                    let differs = {
                        let v = &self.verts[v_id];
                        !layout.equal(data, v.co(0, &layout)) || v.seam != seam
                    };
                    if differs {
                        {
                            let v = &mut self.verts[v_id];
                            layout.copy(v.co_mut(0, &layout), data);
                            v.effected = true;
                            v.changed = false;
                            v.seam = seam;
                        }
                        // No snapshot to diff against: flag the two-ring
                        let v_edges: SVec<EdgeId> = self.verts[v_id].edges.clone();
                        for e_id in v_edges {
                            let (v0, v1) = {
                                let e = &self.edges[e_id];
                                (e.v0, e.v1)
                            };
                            self.verts[v0].effected = true;
                            self.verts[v1].effected = true;
                        }
                        let v_faces: SVec<FaceId> = self.verts[v_id].faces.clone();
                        for f_id in v_faces {
                            let f_verts: SVec<VertId> = self.faces[f_id].verts.clone();
                            for fv in f_verts {
                                self.verts[fv].effected = true;
                            }
                        }
                    }
                    Ok(v_id)
                } else {
                    let v_id = self.alloc_vert(handle);
                    let v = &mut self.verts[v_id];
                    layout.copy(v.co_mut(0, &layout), data);
                    v.effected = true;
                    v.seam = seam;
                    self.vmap.insert(handle, v_id);
                    Ok(v_id)
                }
            }
            SyncState::Vert => {
                if let Some(&v_id) = self.old_vmap.get(&handle) {
                    let differs = {
                        let v = &self.verts[v_id];
                        !layout.equal(data, v.co(0, &layout)) || v.seam != seam
                    };
                    self.old_vmap.remove(&handle);
                    self.vmap.insert(handle, v_id);
                    let v = &mut self.verts[v_id];
                    if differs {
                        layout.copy(v.co_mut(0, &layout), data);
                        v.effected = true;
                        v.changed = true;
                        v.seam = seam;
                    } else {
                        v.effected = false;
                        v.changed = false;
                        v.seam = false;
                    }
                    Ok(v_id)
                } else {
                    let v_id = self.alloc_vert(handle);
                    let v = &mut self.verts[v_id];
                    layout.copy(v.co_mut(0, &layout), data);
                    v.effected = true;
                    v.seam = seam;
                    self.vmap.insert(handle, v_id);
                    Ok(v_id)
                }
            }
            _ => Err(SubsurfError::InvalidSyncState),
        }
    }

    pub fn sync_edge(
        &mut self,
        handle: EdgeHandle,
        v0_handle: VertHandle,
        v1_handle: VertHandle,
        crease: f32,
    ) -> Result<EdgeId, SubsurfError> {
        match self.sync_state {
            SyncState::Partial => {
                let existing = self.emap.get(&handle).copied();
                let matches = existing.map_or(false, |e_id| {
                    let e = &self.edges[e_id];
                    self.verts[e.v0].handle == v0_handle
                        && self.verts[e.v1].handle == v1_handle
                        && e.crease == crease
                });
                if matches {
                    return Ok(existing.unwrap());
                }

                let v0 = *self.vmap.get(&v0_handle).ok_or(SubsurfError::InvalidValue)?;
                let v1 = *self.vmap.get(&v1_handle).ok_or(SubsurfError::InvalidValue)?;
                let e_new = self.alloc_edge(Some(handle), v0, v1, crease);
                self.emap.insert(handle, e_new);
                if let Some(old) = existing {
                    self.edge_unlink_mark_and_free(old);
                }
                self.verts[v0].effected = true;
                self.verts[v1].effected = true;
                Ok(e_new)
            }
            SyncState::Vert | SyncState::Edge => {
                self.sync_state = SyncState::Edge;

                if let Some(&e_id) = self.old_emap.get(&handle) {
                    let matches = {
                        let e = &self.edges[e_id];
                        self.verts[e.v0].handle == v0_handle
                            && self.verts[e.v1].handle == v1_handle
                            && e.crease == crease
                    };
                    if matches {
                        self.old_emap.remove(&handle);
                        self.emap.insert(handle, e_id);
                        let (v0, v1) = {
                            let e = &mut self.edges[e_id];
                            e.effected = false;
                            e.trigger = false;
                            e.excluded = false;
                            (e.v0, e.v1)
                        };
                        if self.verts[v0].changed || self.verts[v1].changed {
                            self.verts[v0].effected = true;
                            self.verts[v1].effected = true;
                        }
                        return Ok(e_id);
                    }
                }

                // New or replaced; an obsolete edge under the same handle
                // stays in the old map until the end-of-sync sweep
                let v0 = *self.vmap.get(&v0_handle).ok_or(SubsurfError::InvalidValue)?;
                let v1 = *self.vmap.get(&v1_handle).ok_or(SubsurfError::InvalidValue)?;
                let e_id = self.alloc_edge(Some(handle), v0, v1, crease);
                self.emap.insert(handle, e_id);
                self.verts[v0].effected = true;
                self.verts[v1].effected = true;
                Ok(e_id)
            }
            _ => Err(SubsurfError::InvalidSyncState),
        }
    }

    pub fn sync_face(
        &mut self,
        handle: FaceHandle,
        vert_handles: &[VertHandle],
    ) -> Result<FaceId, SubsurfError> {
        let num_verts = vert_handles.len();

        match self.sync_state {
            SyncState::Partial => {
                let temp_verts = self.resolve_face_verts(vert_handles)?;
                let temp_edges = self.resolve_face_edges(&temp_verts, false)?;

                let existing = self.fmap.get(&handle).copied();
                let topology_changed = existing.map_or(false, |f_id| {
                    let f = &self.faces[f_id];
                    f.verts.as_slice() != temp_verts.as_slice()
                        || f.edges.as_slice() != temp_edges.as_slice()
                });

                if existing.is_none() || topology_changed {
                    let f_new = self.alloc_face(handle, temp_verts.clone(), temp_edges);
                    if let Some(old) = existing {
                        self.num_grids = self.num_grids + num_verts - self.faces[old].verts.len();
                        self.fmap.insert(handle, f_new);
                        self.face_unlink_mark_and_free(old);
                    } else {
                        self.num_grids += num_verts;
                        self.fmap.insert(handle, f_new);
                    }
                    for v_id in temp_verts {
                        self.verts[v_id].effected = true;
                    }
                    Ok(f_new)
                } else {
                    Ok(existing.unwrap())
                }
            }
            SyncState::Vert | SyncState::Edge | SyncState::Face => {
                self.sync_state = SyncState::Face;

                let temp_verts = self.resolve_face_verts(vert_handles)?;
                let temp_edges = self.resolve_face_edges(&temp_verts, true)?;

                if let Some(&f_id) = self.old_fmap.get(&handle) {
                    let topology_changed = {
                        let f = &self.faces[f_id];
                        f.verts.as_slice() != temp_verts.as_slice()
                            || f.edges.as_slice() != temp_edges.as_slice()
                    };
                    if !topology_changed {
                        self.old_fmap.remove(&handle);
                        self.fmap.insert(handle, f_id);
                        self.faces[f_id].effected = false;
                        self.num_grids += num_verts;

                        if temp_verts.iter().any(|&v| self.verts[v].changed) {
                            for v_id in temp_verts {
                                self.verts[v_id].effected = true;
                            }
                        }
                        return Ok(f_id);
                    }
                }

                // New or rebuilt; an obsolete face under the same handle
                // stays in the old map until the end-of-sync sweep
                let f_id = self.alloc_face(handle, temp_verts.clone(), temp_edges);
                self.fmap.insert(handle, f_id);
                self.num_grids += num_verts;
                for v_id in temp_verts {
                    self.verts[v_id].effected = true;
                }
                Ok(f_id)
            }
            _ => Err(SubsurfError::InvalidSyncState),
        }
    }

    fn resolve_face_verts(
        &self,
        vert_handles: &[VertHandle],
    ) -> Result<SVec<VertId>, SubsurfError> {
        vert_handles
            .iter()
            .map(|h| self.vmap.get(h).copied().ok_or(SubsurfError::InvalidValue))
            .collect()
    }

    /// Finds the edge connecting each consecutive vertex pair, creating
    /// synthetic edges when allowed. During a full sync, a found edge whose
    /// entry still sits in an old map is transferred to the new one, so the
    /// end-of-sync sweep cannot free an edge the face references.
    fn resolve_face_edges(
        &mut self,
        temp_verts: &[VertId],
        full_sync: bool,
    ) -> Result<SVec<EdgeId>, SubsurfError> {
        let num_verts = temp_verts.len();
        let mut temp_edges = SVec::with_capacity(num_verts);
        for k in 0..num_verts {
            let v0 = temp_verts[k];
            let v1 = temp_verts[(k + 1) % num_verts];
            match self.find_edge_to(v0, v1) {
                Some(e_id) => {
                    if full_sync {
                        self.adopt_stale_edge(e_id);
                    }
                    temp_edges.push(e_id);
                }
                None => {
                    if !self.allow_edge_creation {
                        return Err(SubsurfError::InvalidValue);
                    }
                    let e_id = self.alloc_edge(None, v0, v1, self.default_crease_value);
                    self.synth_edges.insert(e_id);
                    if self.edge_user_size > 0 {
                        let default = self.default_edge_user_data.clone();
                        self.edges[e_id].user_data.copy_from_slice(&default);
                    }
                    self.verts[v0].effected = true;
                    self.verts[v1].effected = true;
                    temp_edges.push(e_id);
                }
            }
        }
        Ok(temp_edges)
    }

    fn adopt_stale_edge(&mut self, e_id: EdgeId) {
        match self.edges[e_id].handle {
            Some(h) => {
                if self.old_emap.get(&h) == Some(&e_id) {
                    self.old_emap.remove(&h);
                    self.emap.insert(h, e_id);
                }
            }
            None => {
                if self.old_synth_edges.remove(&e_id) {
                    self.synth_edges.insert(e_id);
                }
            }
        }
    }

    /// Ends the sync. For a full sync, everything left in the old maps was
    /// not re-declared by the caller and is swept: faces first, then edges
    /// (flagging their surviving endpoints), then vertices. Finally the
    /// subdivision kernel recomputes all levels.
    #[profiling::function]
    pub fn process_sync(&mut self) -> Result<(), SubsurfError> {
        match self.sync_state {
            SyncState::Partial => {
                self.sync_state = SyncState::None;
                self.run_subdivision();
                Ok(())
            }
            SyncState::Vert | SyncState::Edge | SyncState::Face => {
                let old_faces: Vec<FaceId> = self.old_fmap.drain().map(|(_, id)| id).collect();
                for f_id in old_faces {
                    self.face_unlink_mark_and_free(f_id);
                }

                let mut old_edges: Vec<EdgeId> =
                    self.old_emap.drain().map(|(_, id)| id).collect();
                old_edges.extend(mem::take(&mut self.old_synth_edges));
                for e_id in old_edges {
                    self.edge_unlink_mark_and_free(e_id);
                }

                let old_verts: Vec<VertId> = self.old_vmap.drain().map(|(_, id)| id).collect();
                for v_id in old_verts {
                    self.verts.remove(v_id);
                }

                self.sync_state = SyncState::None;
                self.run_subdivision();
                Ok(())
            }
            SyncState::None => Err(SubsurfError::InvalidSyncState),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use glam::Vec3;

    fn quad_positions() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn protocol_order_is_enforced() {
        let mut ss = SubSurf::new(MeshIfc::default(), 2).unwrap();
        // nothing before init
        assert_eq!(
            ss.sync_vert(VertHandle(0), &[0.0; 3], false),
            Err(SubsurfError::InvalidSyncState)
        );
        assert_eq!(ss.process_sync(), Err(SubsurfError::InvalidSyncState));

        ss.init_full_sync().unwrap();
        assert_eq!(ss.init_full_sync(), Err(SubsurfError::InvalidSyncState));

        ss.sync_vert(VertHandle(0), &[0.0; 3], false).unwrap();
        ss.sync_vert(VertHandle(1), &[1.0, 0.0, 0.0], false).unwrap();
        ss.sync_edge(EdgeHandle(0), VertHandle(0), VertHandle(1), 0.0)
            .unwrap();
        // the state machine only moves forward
        assert_eq!(
            ss.sync_vert(VertHandle(2), &[0.0; 3], false),
            Err(SubsurfError::InvalidSyncState)
        );
        ss.process_sync().unwrap();
    }

    #[test]
    fn edge_sync_requires_declared_verts() {
        let mut ss = SubSurf::new(MeshIfc::default(), 2).unwrap();
        ss.init_full_sync().unwrap();
        ss.sync_vert(VertHandle(0), &[0.0; 3], false).unwrap();
        assert_eq!(
            ss.sync_edge(EdgeHandle(0), VertHandle(0), VertHandle(7), 0.0),
            Err(SubsurfError::InvalidValue)
        );
    }

    #[test]
    fn identical_resync_preserves_ids_and_clears_flags() {
        let mut ss = SubSurf::new(MeshIfc::default(), 2).unwrap();
        let positions = quad_positions();
        let polygons: Vec<Vec<u32>> = vec![vec![0, 1, 2, 3]];
        ss.sync_from_polygons(&positions, &polygons).unwrap();

        let ids_before: Vec<VertId> = ss.iter_verts().map(|(id, _)| id).collect();
        let face_before: Vec<FaceId> = ss.iter_faces().map(|(id, _)| id).collect();

        ss.sync_from_polygons(&positions, &polygons).unwrap();

        let ids_after: Vec<VertId> = ss.iter_verts().map(|(id, _)| id).collect();
        let face_after: Vec<FaceId> = ss.iter_faces().map(|(id, _)| id).collect();
        assert_eq!(ids_before, ids_after);
        assert_eq!(face_before, face_after);

        for (_, v) in ss.iter_verts() {
            assert!(!v.effected && !v.changed && !v.seam);
        }
        for (_, e) in ss.iter_edges() {
            assert!(!e.effected && !e.trigger && !e.excluded);
        }
        for (_, f) in ss.iter_faces() {
            assert!(!f.effected);
        }
    }

    #[test]
    fn resync_drops_undeclared_entities() {
        let mut ss = SubSurf::new(MeshIfc::default(), 2).unwrap();
        let positions = quad_positions();
        ss.sync_from_polygons(&positions, &[vec![0u32, 1, 2, 3]])
            .unwrap();
        assert_eq!(ss.num_verts(), 4);
        assert_eq!(ss.num_edges(), 4);
        assert_eq!(ss.num_faces(), 1);
        assert_eq!(ss.num_grids(), 4);

        // re-sync with only a triangle: one vertex, one edge, the quad die
        ss.init_full_sync().unwrap();
        let mut elem = [0.0f32; 3];
        for i in 0..3 {
            elem[0] = positions[i].x;
            elem[1] = positions[i].y;
            elem[2] = positions[i].z;
            ss.sync_vert(VertHandle(i as u64), &elem, false).unwrap();
        }
        for (h, a, b) in [(0u64, 0u64, 1u64), (1, 1, 2), (2, 0, 2)] {
            ss.sync_edge(EdgeHandle(h), VertHandle(a), VertHandle(b), 0.0)
                .unwrap();
        }
        ss.sync_face(FaceHandle(0), &[VertHandle(0), VertHandle(1), VertHandle(2)])
            .unwrap();
        ss.process_sync().unwrap();

        assert_eq!(ss.num_verts(), 3);
        assert_eq!(ss.num_edges(), 3);
        assert_eq!(ss.num_faces(), 1);
        assert_eq!(ss.num_grids(), 3);

        // referential integrity
        for (e_id, e) in ss.iter_edges() {
            assert!(ss.vert(e.v0()).unwrap().edges.contains(&e_id));
            assert!(ss.vert(e.v1()).unwrap().edges.contains(&e_id));
        }
        for (f_id, f) in ss.iter_faces() {
            for s in 0..f.num_verts() {
                assert!(ss.vert(f.vert(s).unwrap()).unwrap().faces.contains(&f_id));
                assert!(ss.edge(f.edge(s).unwrap()).unwrap().faces.contains(&f_id));
            }
        }
    }

    #[test]
    fn partial_delete_guards_incidence() {
        let mut ss = SubSurf::new(MeshIfc::default(), 2).unwrap();
        ss.sync_from_polygons(&quad_positions(), &[vec![0u32, 1, 2, 3]])
            .unwrap();

        ss.init_partial_sync().unwrap();
        // vertex 0 still has edges and a face
        assert_eq!(ss.sync_vert_del(VertHandle(0)), Err(SubsurfError::InvalidValue));
        // edge (0, 1) still has a face
        assert_eq!(ss.sync_edge_del(EdgeHandle(1)), Err(SubsurfError::InvalidValue));
        assert_eq!(ss.num_verts(), 4);
        assert_eq!(ss.num_edges(), 4);

        // dropping the face unblocks both
        ss.sync_face_del(FaceHandle(0)).unwrap();
        ss.sync_edge_del(EdgeHandle(1)).unwrap();
        assert_eq!(ss.num_edges(), 3);
        assert_eq!(ss.num_grids(), 0);
        ss.process_sync().unwrap();
    }

    #[test]
    fn synthetic_edges_are_created_when_allowed() {
        let mut ss = SubSurf::new(MeshIfc::default(), 2).unwrap();
        ss.set_allow_edge_creation(true, 0.75, None);

        ss.init_full_sync().unwrap();
        let positions = quad_positions();
        let mut elem = [0.0f32; 3];
        for (i, p) in positions.iter().enumerate() {
            elem[0] = p.x;
            elem[1] = p.y;
            elem[2] = p.z;
            ss.sync_vert(VertHandle(i as u64), &elem, false).unwrap();
        }
        // no edges declared at all
        ss.sync_face(
            FaceHandle(0),
            &[VertHandle(0), VertHandle(1), VertHandle(2), VertHandle(3)],
        )
        .unwrap();
        ss.process_sync().unwrap();

        assert_eq!(ss.num_edges(), 4);
        for (_, e) in ss.iter_edges() {
            assert_eq!(e.handle(), None);
            assert_eq!(e.crease(), 0.75);
        }

        // a second identical sync keeps the synthetic edges alive
        let edge_ids: Vec<EdgeId> = ss.iter_edges().map(|(id, _)| id).collect();
        ss.init_full_sync().unwrap();
        for (i, p) in positions.iter().enumerate() {
            elem[0] = p.x;
            elem[1] = p.y;
            elem[2] = p.z;
            ss.sync_vert(VertHandle(i as u64), &elem, false).unwrap();
        }
        ss.sync_face(
            FaceHandle(0),
            &[VertHandle(0), VertHandle(1), VertHandle(2), VertHandle(3)],
        )
        .unwrap();
        ss.process_sync().unwrap();

        let mut after: Vec<EdgeId> = ss.iter_edges().map(|(id, _)| id).collect();
        let mut before = edge_ids;
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn missing_edge_without_creation_fails() {
        let mut ss = SubSurf::new(MeshIfc::default(), 2).unwrap();
        ss.init_full_sync().unwrap();
        let mut elem = [0.0f32; 3];
        for (i, p) in quad_positions().iter().enumerate() {
            elem[0] = p.x;
            elem[1] = p.y;
            elem[2] = p.z;
            ss.sync_vert(VertHandle(i as u64), &elem, false).unwrap();
        }
        assert_eq!(
            ss.sync_face(
                FaceHandle(0),
                &[VertHandle(0), VertHandle(1), VertHandle(2), VertHandle(3)],
            ),
            Err(SubsurfError::InvalidValue)
        );
    }
}
