// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utilities to move sample data between the per-face grids and the
//! canonical vertex/edge arrays, to re-average shared borders after external
//! edits (multires sculpting writes straight into the grids), and to re-run
//! refinement or normals from a chosen level.

use super::*;

impl SubSurf {
    /// `None` means "all faces", the common case for whole-mesh updates.
    fn all_faces(&self, effected: Option<&[FaceId]>) -> Vec<FaceId> {
        match effected {
            Some(list) => list.to_vec(),
            None => self.faces.keys().collect(),
        }
    }

    /// Vertices and edges all of whose incident faces are in the effected
    /// set; these are the ones whose canonical samples the face set fully
    /// determines. Flags everything it returns.
    fn effected_face_neighbours(&mut self, face_list: &[FaceId]) -> (Vec<VertId>, Vec<EdgeId>) {
        for &f_id in face_list {
            self.faces[f_id].effected = true;
        }

        let mut effected_v = Vec::new();
        let mut effected_e = Vec::new();

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        for (v_id, v) in verts.iter_mut() {
            if v.faces.iter().all(|&f_id| faces[f_id].effected) {
                v.effected = true;
                effected_v.push(v_id);
            }
        }
        for (e_id, e) in edges.iter_mut() {
            if e.faces.iter().all(|&f_id| faces[f_id].effected) {
                e.effected = true;
                effected_e.push(e_id);
            }
        }

        (effected_v, effected_e)
    }

    /// Copy authoritative values out of the face grids into the vertex and
    /// edge sample arrays.
    #[profiling::function]
    pub fn update_from_faces(
        &mut self,
        lvl: Option<usize>,
        effected: Option<&[FaceId]>,
    ) -> Result<(), SubsurfError> {
        let lvl = lvl.unwrap_or(self.subdiv_levels);
        if !(1..=self.subdiv_levels).contains(&lvl) {
            return Err(SubsurfError::InvalidValue);
        }
        let layout = self.layout;
        let levels = self.subdiv_levels;
        let grid_size = ccg_gridsize(lvl);
        let corner_idx = grid_size - 1;
        let face_list = self.all_faces(effected);

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        for &f_id in &face_list {
            let f = &mut faces[f_id];
            let n = f.verts.len();
            for s in 0..n {
                let e_id = f.edges[s];
                let prev_e_id = f.edges[(s + n - 1) % n];
                let vs = f.verts[s];

                layout.copy_within(&mut f.data, 0, if_offset(lvl, s, 0, 0, levels));
                layout.copy(
                    verts[vs].co_mut(lvl, &layout),
                    f.if_co(lvl, s, corner_idx, corner_idx, levels, &layout),
                );

                for x in 0..grid_size {
                    layout.copy_within(
                        &mut f.data,
                        ie_offset(lvl, s, x, levels),
                        if_offset(lvl, s, x, 0, levels),
                    );
                }

                for x in 0..grid_size {
                    let e_i = grid_size - 1 - x;
                    layout.copy(
                        edges[e_id].co_vert_mut(vs, lvl, e_i, &layout),
                        f.if_co(lvl, s, corner_idx, x, levels, &layout),
                    );
                    layout.copy(
                        edges[prev_e_id].co_vert_mut(vs, lvl, e_i, &layout),
                        f.if_co(lvl, s, x, corner_idx, levels, &layout),
                    );
                }
            }
        }

        Ok(())
    }

    /// Inverse of [`SubSurf::update_from_faces`]: overwrite the face grid
    /// borders from the canonical vertex and edge samples.
    #[profiling::function]
    pub fn update_to_faces(
        &mut self,
        lvl: Option<usize>,
        effected: Option<&[FaceId]>,
    ) -> Result<(), SubsurfError> {
        let lvl = lvl.unwrap_or(self.subdiv_levels);
        if !(1..=self.subdiv_levels).contains(&lvl) {
            return Err(SubsurfError::InvalidValue);
        }
        let layout = self.layout;
        let levels = self.subdiv_levels;
        let grid_size = ccg_gridsize(lvl);
        let corner_idx = grid_size - 1;
        let face_list = self.all_faces(effected);

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        for &f_id in &face_list {
            let f = &mut faces[f_id];
            let n = f.verts.len();
            for s in 0..n {
                let prev_s = (s + n - 1) % n;
                let e_id = f.edges[s];
                let prev_e_id = f.edges[prev_s];
                let vs = f.verts[s];

                for x in 0..grid_size {
                    let e_i = grid_size - 1 - x;
                    layout.copy(
                        f.if_co_mut(lvl, s, corner_idx, x, levels, &layout),
                        edges[e_id].co_vert(vs, lvl, e_i, &layout),
                    );
                    layout.copy(
                        f.if_co_mut(lvl, s, x, corner_idx, levels, &layout),
                        edges[prev_e_id].co_vert(vs, lvl, e_i, &layout),
                    );
                }

                for x in 1..grid_size - 1 {
                    layout.copy_within(
                        &mut f.data,
                        if_offset(lvl, s, 0, x, levels),
                        ie_offset(lvl, prev_s, x, levels),
                    );
                    layout.copy_within(
                        &mut f.data,
                        if_offset(lvl, s, x, 0, levels),
                        ie_offset(lvl, s, x, levels),
                    );
                }

                layout.copy_within(&mut f.data, if_offset(lvl, s, 0, 0, levels), 0);
                layout.copy(
                    f.if_co_mut(lvl, s, corner_idx, corner_idx, levels, &layout),
                    verts[vs].co(lvl, &layout),
                );
            }
        }

        Ok(())
    }

    /// Re-average every sample shared between grids: sum the contributions
    /// of all sharing grids, divide by the incidence count, broadcast the
    /// result back. Used after multires displacement edits.
    #[profiling::function]
    pub fn stitch_faces(
        &mut self,
        lvl: Option<usize>,
        effected: Option<&[FaceId]>,
    ) -> Result<(), SubsurfError> {
        let lvl = lvl.unwrap_or(self.subdiv_levels);
        if !(1..=self.subdiv_levels).contains(&lvl) {
            return Err(SubsurfError::InvalidValue);
        }
        let layout = self.layout;
        let levels = self.subdiv_levels;
        let grid_size = ccg_gridsize(lvl);
        let edge_size = ccg_edgesize(lvl);
        let corner_idx = grid_size - 1;
        let face_list = self.all_faces(effected);
        let (effected_v, effected_e) = self.effected_face_neighbours(&face_list);

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        // zero the shared accumulators
        for &v_id in &effected_v {
            if !verts[v_id].faces.is_empty() {
                layout.zero(verts[v_id].co_mut(lvl, &layout));
            }
        }
        for &e_id in &effected_e {
            if !edges[e_id].faces.is_empty() {
                for x in 0..edge_size {
                    layout.zero(edges[e_id].co_mut(lvl, x, &layout));
                }
            }
        }

        // add the grid contributions
        for &f_id in &face_list {
            let n = faces[f_id].verts.len();
            {
                let f = &mut faces[f_id];
                layout.zero(f.center_mut(&layout));
                for s in 0..n {
                    for x in 0..grid_size {
                        layout.zero(f.ie_co_mut(lvl, s, x, levels, &layout));
                    }
                }
            }

            for s in 0..n {
                let prev_s = (s + n - 1) % n;
                let (e_id, prev_e_id, vs) = {
                    let f = &faces[f_id];
                    (f.edges[s], f.edges[prev_s], f.verts[s])
                };

                {
                    let f = &mut faces[f_id];
                    layout.add_within(&mut f.data, 0, if_offset(lvl, s, 0, 0, levels));
                    for x in 1..grid_size - 1 {
                        layout.add_within(
                            &mut f.data,
                            ie_offset(lvl, s, x, levels),
                            if_offset(lvl, s, x, 0, levels),
                        );
                        layout.add_within(
                            &mut f.data,
                            ie_offset(lvl, prev_s, x, levels),
                            if_offset(lvl, s, 0, x, levels),
                        );
                    }
                }

                if verts[vs].effected {
                    layout.add(
                        verts[vs].co_mut(lvl, &layout),
                        faces[f_id].if_co(lvl, s, corner_idx, corner_idx, levels, &layout),
                    );
                }

                for x in 0..grid_size - 1 {
                    let e_i = grid_size - 1 - x;
                    if edges[e_id].effected {
                        layout.add(
                            edges[e_id].co_vert_mut(vs, lvl, e_i, &layout),
                            faces[f_id].if_co(lvl, s, corner_idx, x, levels, &layout),
                        );
                    }
                    if edges[prev_e_id].effected && x != 0 {
                        layout.add(
                            edges[prev_e_id].co_vert_mut(vs, lvl, e_i, &layout),
                            faces[f_id].if_co(lvl, s, x, corner_idx, levels, &layout),
                        );
                    }
                }
            }
        }

        // average
        for &v_id in &effected_v {
            let num_faces = verts[v_id].faces.len();
            if num_faces > 0 {
                layout.mul_n(verts[v_id].co_mut(lvl, &layout), 1.0 / num_faces as f32);
            }
        }
        for &e_id in &effected_e {
            let (v0, v1, num_faces) = {
                let e = &edges[e_id];
                (e.v0, e.v1, e.faces.len())
            };
            layout.copy(edges[e_id].co_mut(lvl, 0, &layout), verts[v0].co(lvl, &layout));
            layout.copy(
                edges[e_id].co_mut(lvl, edge_size - 1, &layout),
                verts[v1].co(lvl, &layout),
            );
            if num_faces > 0 {
                for x in 1..edge_size - 1 {
                    layout.mul_n(edges[e_id].co_mut(lvl, x, &layout), 1.0 / num_faces as f32);
                }
            }
        }

        // broadcast the averaged values back into every sharing grid
        for &f_id in &face_list {
            let n = faces[f_id].verts.len();
            {
                let f = &mut faces[f_id];
                layout.mul_n(f.center_mut(&layout), 1.0 / n as f32);
                for s in 0..n {
                    for x in 1..grid_size - 1 {
                        layout.mul_n(f.ie_co_mut(lvl, s, x, levels, &layout), 0.5);
                    }
                }
            }

            for s in 0..n {
                let prev_s = (s + n - 1) % n;
                let (e_id, prev_e_id, vs) = {
                    let f = &faces[f_id];
                    (f.edges[s], f.edges[prev_s], f.verts[s])
                };

                {
                    let f = &mut faces[f_id];
                    layout.copy_within(&mut f.data, if_offset(lvl, s, 0, 0, levels), 0);
                }
                layout.copy(
                    faces[f_id].if_co_mut(lvl, s, corner_idx, corner_idx, levels, &layout),
                    verts[vs].co(lvl, &layout),
                );

                {
                    let f = &mut faces[f_id];
                    for x in 1..grid_size - 1 {
                        layout.copy_within(
                            &mut f.data,
                            if_offset(lvl, s, x, 0, levels),
                            ie_offset(lvl, s, x, levels),
                        );
                        layout.copy_within(
                            &mut f.data,
                            if_offset(lvl, s, 0, x, levels),
                            ie_offset(lvl, prev_s, x, levels),
                        );
                    }
                }

                for x in 0..grid_size - 1 {
                    let e_i = grid_size - 1 - x;
                    layout.copy(
                        faces[f_id].if_co_mut(lvl, s, corner_idx, x, levels, &layout),
                        edges[e_id].co_vert(vs, lvl, e_i, &layout),
                    );
                    layout.copy(
                        faces[f_id].if_co_mut(lvl, s, x, corner_idx, levels, &layout),
                        edges[prev_e_id].co_vert(vs, lvl, e_i, &layout),
                    );
                }

                {
                    let f = &mut faces[f_id];
                    layout.copy_within(&mut f.data, ie_offset(lvl, s, 0, levels), 0);
                    layout.copy_within(
                        &mut f.data,
                        ie_offset(lvl, s, grid_size - 1, levels),
                        if_offset(lvl, s, grid_size - 1, 0, levels),
                    );
                }
            }
        }

        self.clear_flags(&effected_v, &effected_e, &face_list);
        Ok(())
    }

    /// Recompute normals only, over the given face set and the vertices and
    /// edges it fully determines.
    #[profiling::function]
    pub fn update_normals(&mut self, effected: Option<&[FaceId]>) -> Result<(), SubsurfError> {
        let face_list = self.all_faces(effected);
        let (effected_v, effected_e) = self.effected_face_neighbours(&face_list);

        if self.calc_vert_normals {
            self.calc_normals(&effected_v, &effected_e, &face_list);
        }

        self.clear_flags(&effected_v, &effected_e, &face_list);
        Ok(())
    }

    /// Re-run refinement from `lvl` up to the finest level, for callers that
    /// fill in coordinates at some level and propagate them upward.
    #[profiling::function]
    pub fn update_levels(
        &mut self,
        lvl: usize,
        effected: Option<&[FaceId]>,
    ) -> Result<(), SubsurfError> {
        if !(1..=self.subdiv_levels).contains(&lvl) {
            return Err(SubsurfError::InvalidValue);
        }
        let face_list = self.all_faces(effected);
        let (effected_v, effected_e) = self.effected_face_neighbours(&face_list);

        for cur_lvl in lvl..self.subdiv_levels {
            self.calc_subdiv_level(&effected_v, &effected_e, &face_list, cur_lvl);
        }

        self.clear_flags(&effected_v, &effected_e, &face_list);
        Ok(())
    }
}
