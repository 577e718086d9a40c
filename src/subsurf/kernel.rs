// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The refinement kernel. Level 0 to 1 runs a specialized first pass that
//! re-projects edge midpoints and face centers to produce smoother curves on
//! low-valence configurations; every deeper level applies the standard
//! Catmull-Clark rules with crease, boundary and seam handling.

use glam::Vec3;
use rayon::prelude::*;

use super::*;

impl SubSurf {
    /// Recompute all subdivision levels for the current entity set, then
    /// normals when enabled, then clear all transient flags.
    #[profiling::function]
    pub(crate) fn run_subdivision(&mut self) {
        let (effected_v, effected_e, effected_f) = self.collect_effected();

        self.subdivide_base_level(&effected_v, &effected_e, &effected_f);

        for cur_lvl in 1..self.subdiv_levels {
            self.calc_subdiv_level(&effected_v, &effected_e, &effected_f, cur_lvl);
        }

        if self.calc_vert_normals {
            self.calc_normals(&effected_v, &effected_e, &effected_f);
        }

        if self.use_age_counts {
            let age = self.current_age;
            for &v_id in &effected_v {
                let off = self.vert_user_age_offset;
                write_age(&mut self.verts[v_id].user_data, off, age);
            }
            for &e_id in &effected_e {
                let off = self.edge_user_age_offset;
                write_age(&mut self.edges[e_id].user_data, off, age);
            }
            for &f_id in &effected_f {
                let off = self.face_user_age_offset;
                write_age(&mut self.faces[f_id].user_data, off, age);
            }
        }

        self.clear_flags(&effected_v, &effected_e, &effected_f);
    }

    pub(crate) fn clear_flags(
        &mut self,
        effected_v: &[VertId],
        effected_e: &[EdgeId],
        effected_f: &[FaceId],
    ) {
        for &v_id in effected_v {
            let v = &mut self.verts[v_id];
            v.effected = false;
            v.changed = false;
            v.seam = false;
        }
        for &e_id in effected_e {
            let e = &mut self.edges[e_id];
            e.effected = false;
            e.trigger = false;
            e.excluded = false;
        }
        for &f_id in effected_f {
            self.faces[f_id].effected = false;
        }
    }

    /// Gather the work set. A changed vertex pulls its whole neighbourhood
    /// in; the edge and face flags double as visit markers and stay set for
    /// the normals pass.
    fn collect_effected(&mut self) -> (Vec<VertId>, Vec<EdgeId>, Vec<FaceId>) {
        let mut effected_v = Vec::with_capacity(self.verts.len());
        let mut effected_e = Vec::with_capacity(self.edges.len());
        let mut effected_f = Vec::with_capacity(self.faces.len());

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        for (v_id, v) in verts.iter() {
            effected_v.push(v_id);

            for &e_id in &v.edges {
                let e = &mut edges[e_id];
                if !e.effected {
                    e.effected = true;
                    effected_e.push(e_id);
                }
            }
            for &f_id in &v.faces {
                let f = &mut faces[f_id];
                if !f.effected {
                    f.effected = true;
                    effected_f.push(f_id);
                }
            }
        }

        (effected_v, effected_e, effected_f)
    }

    /// Level 0 to 1. Face centers, edge midpoints and vertex positions
    /// follow the standard rules; then the first-pass specialization
    /// re-projects midpoints toward the control chords, interpolates the
    /// control vertices, fits circular arcs around valence-4 vertices and
    /// re-centers small n-gons.
    fn subdivide_base_level(
        &mut self,
        effected_v: &[VertId],
        effected_e: &[EdgeId],
        effected_f: &[FaceId],
    ) {
        let layout = self.layout;
        let levels = self.subdiv_levels;
        let simple = self.simple_subdiv;

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        let mut q = vec![0.0f32; layout.elem_size];
        let mut r = vec![0.0f32; layout.elem_size];
        let mut nco = vec![0.0f32; layout.elem_size];

        // face centers: average of the base-level corners
        for &f_id in effected_f {
            let f = &mut faces[f_id];
            layout.zero(&mut q);
            for &v_id in &f.verts {
                layout.add(&mut q, verts[v_id].co(0, &layout));
            }
            layout.mul_n(&mut q, 1.0 / f.verts.len() as f32);
            layout.copy(f.center_mut(&layout), &q);
        }

        // edge midpoints
        for &e_id in effected_e {
            let (v0, v1, sharpness, boundary) = {
                let e = &edges[e_id];
                (e.v0, e.v1, e.sharpness(0), e.is_boundary())
            };

            if boundary || sharpness >= 1.0 {
                layout.copy(&mut r, verts[v0].co(0, &layout));
                layout.add(&mut r, verts[v1].co(0, &layout));
                layout.mul_n(&mut r, 0.5);
                layout.copy(edges[e_id].co_mut(1, 1, &layout), &r);
            } else {
                let mut num_faces = 0;
                layout.copy(&mut q, verts[v0].co(0, &layout));
                layout.add(&mut q, verts[v1].co(0, &layout));
                for &f_id in &edges[e_id].faces {
                    layout.add(&mut q, faces[f_id].center(&layout));
                    num_faces += 1;
                }
                layout.mul_n(&mut q, 1.0 / (2.0 + num_faces as f32));

                layout.copy(&mut r, verts[v0].co(0, &layout));
                layout.add(&mut r, verts[v1].co(0, &layout));
                layout.mul_n(&mut r, 0.5);

                // co = q + sharpness * (r - q)
                layout.sub(&mut r, &q);
                layout.mul_n(&mut r, sharpness);
                layout.add(&mut q, &r);
                layout.copy(edges[e_id].co_mut(1, 1, &layout), &q);
            }
        }

        // vertex positions
        for &v_id in effected_v {
            let num_edges = verts[v_id].edges.len();
            let num_faces = verts[v_id].faces.len();

            let mut sharp_count = 0usize;
            let mut all_sharp = true;
            let mut avg_sharpness = 0.0f32;
            let mut seam = verts[v_id].seam;
            let mut seam_edges = 0usize;

            for &e_id in &verts[v_id].edges {
                let e = &edges[e_id];
                let sharpness = e.sharpness(0);
                if seam && e.is_boundary() {
                    seam_edges += 1;
                }
                if sharpness != 0.0 {
                    sharp_count += 1;
                    avg_sharpness += sharpness;
                } else {
                    all_sharp = false;
                }
            }
            if sharp_count > 0 {
                avg_sharpness = (avg_sharpness / sharp_count as f32).min(1.0);
            }
            if seam_edges < 2 || seam_edges != num_edges {
                seam = false;
            }

            if num_edges == 0 || simple {
                layout.copy(&mut nco, verts[v_id].co(0, &layout));
            } else if verts[v_id].is_boundary(edges) {
                let mut num_boundary = 0;
                layout.zero(&mut r);
                for &e_id in &verts[v_id].edges {
                    let e = &edges[e_id];
                    if e.is_boundary() {
                        layout.add(&mut r, verts[e.other_vert(v_id)].co(0, &layout));
                        num_boundary += 1;
                    }
                }
                layout.copy(&mut nco, verts[v_id].co(0, &layout));
                layout.mul_n(&mut nco, 0.75);
                layout.mul_n(&mut r, 0.25 / num_boundary as f32);
                layout.add(&mut nco, &r);
            } else {
                layout.zero(&mut q);
                for &f_id in &verts[v_id].faces {
                    layout.add(&mut q, faces[f_id].center(&layout));
                }
                layout.mul_n(&mut q, 1.0 / num_faces as f32);
                layout.zero(&mut r);
                for &e_id in &verts[v_id].edges {
                    layout.add(&mut r, verts[edges[e_id].other_vert(v_id)].co(0, &layout));
                }
                layout.mul_n(&mut r, 1.0 / num_edges as f32);

                layout.copy(&mut nco, verts[v_id].co(0, &layout));
                layout.mul_n(&mut nco, num_edges as f32 - 2.0);
                layout.add(&mut nco, &q);
                layout.add(&mut nco, &r);
                layout.mul_n(&mut nco, 1.0 / num_edges as f32);
            }

            if sharp_count > 1 || seam {
                let mut sharp_count = sharp_count;
                let mut all_sharp = all_sharp;
                let mut avg_sharpness = avg_sharpness;

                layout.zero(&mut q);
                if seam {
                    avg_sharpness = 1.0;
                    sharp_count = seam_edges;
                    all_sharp = true;
                }

                for &e_id in &verts[v_id].edges {
                    let e = &edges[e_id];
                    if seam {
                        if e.is_boundary() {
                            layout.add(&mut q, verts[e.other_vert(v_id)].co(0, &layout));
                        }
                    } else if e.sharpness(0) != 0.0 {
                        layout.add(&mut q, verts[e.other_vert(v_id)].co(0, &layout));
                    }
                }
                layout.mul_n(&mut q, 1.0 / sharp_count as f32);

                if sharp_count != 2 || all_sharp {
                    // q = q + (co - q) * avg_sharpness
                    layout.copy(&mut r, verts[v_id].co(0, &layout));
                    layout.sub(&mut r, &q);
                    layout.mul_n(&mut r, avg_sharpness);
                    layout.add(&mut q, &r);
                }

                // r = co * 0.75 + q * 0.25
                layout.copy(&mut r, verts[v_id].co(0, &layout));
                layout.mul_n(&mut r, 0.75);
                layout.mul_n(&mut q, 0.25);
                layout.add(&mut r, &q);

                // nco = nco + (r - nco) * avg_sharpness
                layout.sub(&mut r, &nco);
                layout.mul_n(&mut r, avg_sharpness);
                layout.add(&mut nco, &r);
            }

            layout.copy(verts[v_id].co_mut(1, &layout), &nco);
        }

        // Edges around a valence-5 vertex keep their standard midpoints;
        // both re-projection passes skip them.
        for &v_id in effected_v {
            if verts[v_id].edges.len() == 5 {
                for &e_id in &verts[v_id].edges {
                    edges[e_id].excluded = true;
                }
            }
        }

        // midpoint re-projection: scale the height over the smoothed chord
        // by the old-to-new chord ratio, recovering the control curvature.
        // Boundary and creased midpoints are pinned by their own rules.
        for &e_id in effected_e {
            let (v0, v1, skip) = {
                let e = &edges[e_id];
                (
                    e.v0,
                    e.v1,
                    e.is_boundary() || e.excluded || e.sharpness(0) != 0.0,
                )
            };
            if skip {
                continue;
            }

            let aa = layout.pos(verts[v0].co(0, &layout));
            let bb = layout.pos(verts[v1].co(0, &layout));
            let a = layout.pos(verts[v0].co(1, &layout));
            let b = layout.pos(verts[v1].co(1, &layout));
            let c = layout.pos(edges[e_id].co(1, 1, &layout));

            let h = c - (a + b) * 0.5;
            let ll = (aa - bb).length_squared();
            let l = (a - b).length_squared();
            if l <= EPSILON {
                continue;
            }
            let k = (ll / l).sqrt();
            let cc = (aa + bb) * 0.5 + h * k;
            layout.set_pos(edges[e_id].co_mut(1, 1, &layout), cc);
        }

        // put vertices back: control vertices are interpolated at level 1
        for &v_id in effected_v {
            let v = &mut verts[v_id];
            let p = layout.pos(v.co(0, &layout));
            layout.set_pos(v.co_mut(1, &layout), p);
        }

        // second pass: arc-fit midpoints around low-valence vertices
        for &v_id in effected_v {
            let num_edges = verts[v_id].edges.len();

            if num_edges == 4 {
                let mut e_ids = [
                    verts[v_id].edges[0],
                    verts[v_id].edges[1],
                    verts[v_id].edges[2],
                    verts[v_id].edges[3],
                ];
                sort_edges_by_face_adjacency(&mut e_ids, edges, faces);

                let p = layout.pos(verts[v_id].co(0, &layout));
                let mut vco = [Vec3::ZERO; 4];
                let mut eco = [Vec3::ZERO; 4];
                let mut creased = [false; 4];
                for i in 0..4 {
                    let e = &edges[e_ids[i]];
                    vco[i] = layout.pos(verts[e.other_vert(v_id)].co(0, &layout));
                    eco[i] = layout.pos(e.co(1, 1, &layout));
                    creased[i] = e.crease > 0.1;
                }

                if (creased[0] && creased[2]) || (creased[1] && creased[3]) {
                    if creased[0] && creased[2] {
                        let res0 = interp0(vco[0], p, vco[2]);
                        let res1 = interp0(vco[2], p, vco[0]);
                        set_midpoint(&mut edges[e_ids[0]], &layout, res0, eco[0]);
                        set_midpoint(&mut edges[e_ids[2]], &layout, res1, eco[2]);
                    }
                    if creased[1] && creased[3] {
                        let res0 = interp0(vco[1], p, vco[3]);
                        let res1 = interp0(vco[3], p, vco[1]);
                        set_midpoint(&mut edges[e_ids[1]], &layout, res0, eco[1]);
                        set_midpoint(&mut edges[e_ids[3]], &layout, res1, eco[3]);
                    }
                } else {
                    let res0 = interp0(vco[0], p, vco[2]);
                    let res1 = interp0(vco[2], p, vco[0]);
                    set_midpoint(&mut edges[e_ids[0]], &layout, res0, eco[0]);
                    set_midpoint(&mut edges[e_ids[2]], &layout, res1, eco[2]);

                    let res0 = interp0(vco[1], p, vco[3]);
                    let res1 = interp0(vco[3], p, vco[1]);
                    set_midpoint(&mut edges[e_ids[1]], &layout, res0, eco[1]);
                    set_midpoint(&mut edges[e_ids[3]], &layout, res1, eco[3]);
                }
            }

            if num_edges == 3 {
                let e_ids = [
                    verts[v_id].edges[0],
                    verts[v_id].edges[1],
                    verts[v_id].edges[2],
                ];

                // only corners of 5-gons are recognized here; any other
                // valence-3 configuration keeps its first-pass midpoints
                let mut in_pentagon = [false; 3];
                let mut pentagon = None;
                for (i, &e_id) in e_ids.iter().enumerate() {
                    let e = &edges[e_id];
                    if e.faces.len() == 2 {
                        for &f_id in &e.faces {
                            if faces[f_id].verts.len() == 5 {
                                in_pentagon[i] = true;
                                pentagon = Some(f_id);
                            }
                        }
                    }
                }

                if in_pentagon.iter().filter(|&&x| x).count() == 2 {
                    let ordered = match (in_pentagon[0], in_pentagon[1], in_pentagon[2]) {
                        (true, true, false) => [e_ids[0], e_ids[1], e_ids[2]],
                        (true, false, true) => [e_ids[0], e_ids[2], e_ids[1]],
                        _ => [e_ids[1], e_ids[2], e_ids[0]],
                    };
                    let pentagon = pentagon.unwrap();

                    // opposite corner across the 5-gon aligns the tangent of
                    // the dead-end spline
                    let vi = faces[pentagon]
                        .verts
                        .iter()
                        .position(|&x| x == v_id)
                        .expect("pentagon contains the corner vertex");
                    let opposite = faces[pentagon].verts[(vi + 2) % 5];

                    let p = layout.pos(verts[v_id].co(0, &layout));
                    let vop = layout.pos(verts[opposite].co(0, &layout));
                    let mut vco = [Vec3::ZERO; 3];
                    let mut eco = [Vec3::ZERO; 3];
                    for i in 0..3 {
                        let e = &edges[ordered[i]];
                        vco[i] = layout.pos(verts[e.other_vert(v_id)].co(0, &layout));
                        eco[i] = layout.pos(e.co(1, 1, &layout));
                    }

                    let res0 = interp0(vco[0], p, vco[1]);
                    let res1 = interp0(vco[1], p, vco[0]);
                    set_midpoint(&mut edges[ordered[0]], &layout, res0, eco[0]);
                    set_midpoint(&mut edges[ordered[1]], &layout, res1, eco[1]);

                    let res2 = interp0(vco[2], p, vop);
                    set_midpoint(&mut edges[ordered[2]], &layout, res2, eco[2]);
                }
            }
        }

        // face center re-projection for triangles, quads and pentagons:
        // averaged "move this edge midpoint into the opposing position"
        // contributions
        for &f_id in effected_f {
            let n = faces[f_id].verts.len();
            if !(3..=5).contains(&n) {
                continue;
            }

            let mut v = [Vec3::ZERO; 5];
            let mut e = [Vec3::ZERO; 5];
            for i in 0..n {
                v[i] = layout.pos(verts[faces[f_id].verts[i]].co(1, &layout));
                e[i] = layout.pos(edges[faces[f_id].edges[i]].co(1, 1, &layout));
            }

            let center = match n {
                4 => {
                    let p0 = quad_pair(v[0], v[1], e[0], v[2], v[3], e[2], (e[3] + e[1]) * 0.5);
                    let p1 = quad_pair(v[0], v[3], e[3], v[1], v[2], e[1], (e[0] + e[2]) * 0.5);
                    (p0 + p1) * 0.5
                }
                5 => {
                    let mut p = project_rib(v[0], v[1], e[0], e[1], e[4]);
                    p += project_rib(v[3], v[4], e[3], e[2], e[4]);
                    p += project_rib(v[1], v[2], e[1], e[0], e[2]);
                    p += project_rib(v[2], v[3], e[2], e[1], e[3]);
                    p += project_rib(v[0], v[4], e[4], e[0], e[3]);
                    p * 0.2
                }
                _ => {
                    let mut p = project_rib(v[0], v[1], e[0], v[1], e[2]);
                    p += project_rib(v[1], v[2], e[1], v[1], e[2]);
                    let e0 = (e[0] + v[0]) * 0.5;
                    let e1 = (e[1] + v[2]) * 0.5;
                    p += project_rib(v[0], v[2], e[2], e0, e1);
                    p * (1.0 / 3.0)
                }
            };
            layout.set_pos(faces[f_id].center_mut(&layout), center);
        }

        // copy down into the level-1 storage
        for &e_id in effected_e {
            let (v0, v1) = {
                let e = &edges[e_id];
                (e.v0, e.v1)
            };
            layout.copy(edges[e_id].co_mut(1, 0, &layout), verts[v0].co(1, &layout));
            layout.copy(edges[e_id].co_mut(1, 2, &layout), verts[v1].co(1, &layout));
        }
        for &f_id in effected_f {
            let f = &mut faces[f_id];
            let n = f.verts.len();
            for s in 0..n {
                let e_id = f.edges[s];
                let prev_e_id = f.edges[(s + n - 1) % n];
                let vs = f.verts[s];

                layout.copy_within(&mut f.data, if_offset(1, s, 0, 0, levels), 0);
                layout.copy_within(&mut f.data, ie_offset(1, s, 0, levels), 0);
                layout.copy(
                    f.if_co_mut(1, s, 1, 1, levels, &layout),
                    verts[vs].co(1, &layout),
                );
                layout.copy(
                    f.ie_co_mut(1, s, 1, levels, &layout),
                    edges[e_id].co(1, 1, &layout),
                );
                layout.copy(
                    f.if_co_mut(1, s, 1, 0, levels, &layout),
                    edges[e_id].co_vert(vs, 1, 1, &layout),
                );
                layout.copy(
                    f.if_co_mut(1, s, 0, 1, levels, &layout),
                    edges[prev_e_id].co_vert(vs, 1, 1, &layout),
                );
            }
        }
    }

    /// One level of standard Catmull-Clark refinement, `cur_lvl` to
    /// `cur_lvl + 1`, over the effected set.
    #[profiling::function]
    pub(crate) fn calc_subdiv_level(
        &mut self,
        effected_v: &[VertId],
        effected_e: &[EdgeId],
        effected_f: &[FaceId],
        cur_lvl: usize,
    ) {
        let layout = self.layout;
        let levels = self.subdiv_levels;
        let simple = self.simple_subdiv;
        let edge_size = ccg_edgesize(cur_lvl);
        let grid_size = ccg_gridsize(cur_lvl);
        let next_lvl = cur_lvl + 1;

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        // interior midpoints; each face owns its grids, so the loop is
        // data-parallel
        {
            let face_refs: Vec<&mut Face> = faces
                .iter_mut()
                .filter(|(_, f)| f.effected)
                .map(|(_, f)| f)
                .collect();
            face_refs.into_par_iter().for_each(|f| {
                let n = f.verts.len();

                // interior face midpoints from the old interior face points
                for s in 0..n {
                    for y in 0..grid_size - 1 {
                        for x in 0..grid_size - 1 {
                            let fx = 1 + 2 * x;
                            let fy = 1 + 2 * y;
                            layout.avg4_within(
                                &mut f.data,
                                if_offset(next_lvl, s, fx, fy, levels),
                                [
                                    if_offset(cur_lvl, s, x, y, levels),
                                    if_offset(cur_lvl, s, x + 1, y, levels),
                                    if_offset(cur_lvl, s, x + 1, y + 1, levels),
                                    if_offset(cur_lvl, s, x, y + 1, levels),
                                ],
                            );
                        }
                    }
                }

                for s in 0..n {
                    // interior edge midpoints, between the old interior edge
                    // points and the fresh face midpoints on either side
                    for x in 0..grid_size - 1 {
                        let fx = 2 * x + 1;
                        layout.avg4_within(
                            &mut f.data,
                            ie_offset(next_lvl, s, fx, levels),
                            [
                                ie_offset(cur_lvl, s, x, levels),
                                ie_offset(cur_lvl, s, x + 1, levels),
                                if_offset(next_lvl, (s + 1) % n, 1, fx, levels),
                                if_offset(next_lvl, s, fx, 1, levels),
                            ],
                        );
                    }

                    // interior grid-edge splits, vertical then horizontal
                    for x in 1..grid_size - 1 {
                        for y in 0..grid_size - 1 {
                            let fx = 2 * x;
                            let fy = 2 * y + 1;
                            layout.avg4_within(
                                &mut f.data,
                                if_offset(next_lvl, s, fx, fy, levels),
                                [
                                    if_offset(cur_lvl, s, x, y, levels),
                                    if_offset(cur_lvl, s, x, y + 1, levels),
                                    if_offset(next_lvl, s, fx - 1, fy, levels),
                                    if_offset(next_lvl, s, fx + 1, fy, levels),
                                ],
                            );
                        }
                    }
                    for y in 1..grid_size - 1 {
                        for x in 0..grid_size - 1 {
                            let fx = 2 * x + 1;
                            let fy = 2 * y;
                            layout.avg4_within(
                                &mut f.data,
                                if_offset(next_lvl, s, fx, fy, levels),
                                [
                                    if_offset(cur_lvl, s, x, y, levels),
                                    if_offset(cur_lvl, s, x + 1, y, levels),
                                    if_offset(next_lvl, s, fx, fy - 1, levels),
                                    if_offset(next_lvl, s, fx, fy + 1, levels),
                                ],
                            );
                        }
                    }
                }
            });
        }

        let mut q = vec![0.0f32; layout.elem_size];
        let mut r = vec![0.0f32; layout.elem_size];
        let mut nco = vec![0.0f32; layout.elem_size];

        // exterior edge midpoints
        for &e_id in effected_e {
            let sharpness = edges[e_id].sharpness(cur_lvl);

            if edges[e_id].is_boundary() || sharpness > 1.0 {
                for x in 0..edge_size - 1 {
                    let fx = 2 * x + 1;
                    layout.copy(&mut r, edges[e_id].co(cur_lvl, x, &layout));
                    layout.add(&mut r, edges[e_id].co(cur_lvl, x + 1, &layout));
                    layout.mul_n(&mut r, 0.5);
                    layout.copy(edges[e_id].co_mut(next_lvl, fx, &layout), &r);
                }
            } else {
                let e_v0 = edges[e_id].v0;
                for x in 0..edge_size - 1 {
                    let fx = 2 * x + 1;
                    let mut num_faces = 0;

                    layout.copy(&mut q, edges[e_id].co(cur_lvl, x, &layout));
                    layout.add(&mut q, edges[e_id].co(cur_lvl, x + 1, &layout));
                    for &f_id in &edges[e_id].faces {
                        let f = &faces[f_id];
                        let fe = f.edge_index(e_id).expect("face lists incident edge");
                        layout.add(
                            &mut q,
                            f.if_co_edge(e_v0, fe, next_lvl, fx, 1, levels, &layout),
                        );
                        num_faces += 1;
                    }
                    layout.mul_n(&mut q, 1.0 / (2.0 + num_faces as f32));

                    layout.copy(&mut r, edges[e_id].co(cur_lvl, x, &layout));
                    layout.add(&mut r, edges[e_id].co(cur_lvl, x + 1, &layout));
                    layout.mul_n(&mut r, 0.5);

                    layout.sub(&mut r, &q);
                    layout.mul_n(&mut r, sharpness);
                    layout.add(&mut q, &r);
                    layout.copy(edges[e_id].co_mut(next_lvl, fx, &layout), &q);
                }
            }
        }

        // exterior vertex shift
        for &v_id in effected_v {
            let num_edges = verts[v_id].edges.len();
            let num_faces = verts[v_id].faces.len();

            let mut sharp_count = 0usize;
            let mut all_sharp = true;
            let mut avg_sharpness = 0.0f32;
            let mut seam = verts[v_id].seam;
            let mut seam_edges = 0usize;

            for &e_id in &verts[v_id].edges {
                let e = &edges[e_id];
                let sharpness = e.sharpness(cur_lvl);
                if seam && e.is_boundary() {
                    seam_edges += 1;
                }
                if sharpness != 0.0 {
                    sharp_count += 1;
                    avg_sharpness += sharpness;
                } else {
                    all_sharp = false;
                }
            }
            if sharp_count > 0 {
                avg_sharpness = (avg_sharpness / sharp_count as f32).min(1.0);
            }
            if seam_edges < 2 || seam_edges != num_edges {
                seam = false;
            }

            if num_edges == 0 || simple {
                layout.copy(&mut nco, verts[v_id].co(cur_lvl, &layout));
            } else if verts[v_id].is_boundary(edges) {
                let mut num_boundary = 0;
                layout.zero(&mut r);
                for &e_id in &verts[v_id].edges {
                    let e = &edges[e_id];
                    if e.is_boundary() {
                        layout.add(&mut r, e.co_vert(v_id, cur_lvl, 1, &layout));
                        num_boundary += 1;
                    }
                }
                layout.copy(&mut nco, verts[v_id].co(cur_lvl, &layout));
                layout.mul_n(&mut nco, 0.75);
                layout.mul_n(&mut r, 0.25 / num_boundary as f32);
                layout.add(&mut nco, &r);
            } else {
                let corner_idx = (1 + (1 << cur_lvl)) - 2;
                layout.zero(&mut q);
                for &f_id in &verts[v_id].faces {
                    let f = &faces[f_id];
                    let vi = f.vert_index(v_id).expect("face lists incident vertex");
                    layout.add(
                        &mut q,
                        f.if_co(next_lvl, vi, corner_idx, corner_idx, levels, &layout),
                    );
                }
                layout.mul_n(&mut q, 1.0 / num_faces as f32);
                layout.zero(&mut r);
                for &e_id in &verts[v_id].edges {
                    layout.add(&mut r, edges[e_id].co_vert(v_id, cur_lvl, 1, &layout));
                }
                layout.mul_n(&mut r, 1.0 / num_edges as f32);

                layout.copy(&mut nco, verts[v_id].co(cur_lvl, &layout));
                layout.mul_n(&mut nco, num_edges as f32 - 2.0);
                layout.add(&mut nco, &q);
                layout.add(&mut nco, &r);
                layout.mul_n(&mut nco, 1.0 / num_edges as f32);
            }

            if (sharp_count > 1 && num_faces > 0) || seam {
                let mut sharp_count = sharp_count;
                let mut all_sharp = all_sharp;
                let mut avg_sharpness = avg_sharpness;

                layout.zero(&mut q);
                if seam {
                    avg_sharpness = 1.0;
                    sharp_count = seam_edges;
                    all_sharp = true;
                }

                for &e_id in &verts[v_id].edges {
                    let e = &edges[e_id];
                    if seam {
                        if e.is_boundary() {
                            layout.add(&mut q, e.co_vert(v_id, cur_lvl, 1, &layout));
                        }
                    } else if e.sharpness(cur_lvl) != 0.0 {
                        layout.add(&mut q, e.co_vert(v_id, cur_lvl, 1, &layout));
                    }
                }
                layout.mul_n(&mut q, 1.0 / sharp_count as f32);

                if sharp_count != 2 || all_sharp {
                    layout.copy(&mut r, verts[v_id].co(cur_lvl, &layout));
                    layout.sub(&mut r, &q);
                    layout.mul_n(&mut r, avg_sharpness);
                    layout.add(&mut q, &r);
                }

                layout.copy(&mut r, verts[v_id].co(cur_lvl, &layout));
                layout.mul_n(&mut r, 0.75);
                layout.mul_n(&mut q, 0.25);
                layout.add(&mut r, &q);

                layout.sub(&mut r, &nco);
                layout.mul_n(&mut r, avg_sharpness);
                layout.add(&mut nco, &r);
            }

            layout.copy(verts[v_id].co_mut(next_lvl, &layout), &nco);
        }

        // exterior edge interior shift
        for &e_id in effected_e {
            let sharpness = edges[e_id].sharpness(cur_lvl);
            let (sharp_count, avg_sharpness) = if sharpness != 0.0 {
                (2, sharpness.min(1.0))
            } else {
                (0, 0.0)
            };

            if edges[e_id].is_boundary() {
                for x in 1..edge_size - 1 {
                    let fx = 2 * x;
                    layout.copy(&mut r, edges[e_id].co(cur_lvl, x - 1, &layout));
                    layout.add(&mut r, edges[e_id].co(cur_lvl, x + 1, &layout));
                    layout.mul_n(&mut r, 0.5);

                    layout.copy(&mut nco, edges[e_id].co(cur_lvl, x, &layout));
                    layout.mul_n(&mut nco, 0.75);
                    layout.mul_n(&mut r, 0.25);
                    layout.add(&mut nco, &r);
                    layout.copy(edges[e_id].co_mut(next_lvl, fx, &layout), &nco);
                }
            } else {
                let e_v0 = edges[e_id].v0;
                for x in 1..edge_size - 1 {
                    let fx = 2 * x;
                    let mut num_faces = 0;

                    layout.zero(&mut q);
                    layout.zero(&mut r);
                    layout.add(&mut r, edges[e_id].co(cur_lvl, x - 1, &layout));
                    layout.add(&mut r, edges[e_id].co(cur_lvl, x + 1, &layout));
                    for &f_id in &edges[e_id].faces {
                        let f = &faces[f_id];
                        let fe = f.edge_index(e_id).expect("face lists incident edge");
                        layout.add(
                            &mut q,
                            f.if_co_edge(e_v0, fe, next_lvl, fx - 1, 1, levels, &layout),
                        );
                        layout.add(
                            &mut q,
                            f.if_co_edge(e_v0, fe, next_lvl, fx + 1, 1, levels, &layout),
                        );
                        layout.add(
                            &mut r,
                            f.if_co_edge(e_v0, fe, cur_lvl, x, 1, levels, &layout),
                        );
                        num_faces += 1;
                    }
                    layout.mul_n(&mut q, 1.0 / (num_faces as f32 * 2.0));
                    layout.mul_n(&mut r, 1.0 / (2.0 + num_faces as f32));

                    layout.copy(&mut nco, edges[e_id].co(cur_lvl, x, &layout));
                    layout.mul_n(&mut nco, num_faces as f32);
                    layout.add(&mut nco, &q);
                    layout.add(&mut nco, &r);
                    layout.mul_n(&mut nco, 1.0 / (2.0 + num_faces as f32));

                    if sharp_count == 2 {
                        // pull toward the subdivide-mask-6 stencil
                        layout.copy(&mut q, edges[e_id].co(cur_lvl, x, &layout));
                        layout.mul_n(&mut q, 6.0);
                        layout.add(&mut q, edges[e_id].co(cur_lvl, x - 1, &layout));
                        layout.add(&mut q, edges[e_id].co(cur_lvl, x + 1, &layout));
                        layout.mul_n(&mut q, 1.0 / 8.0);

                        layout.sub(&mut q, &nco);
                        layout.mul_n(&mut q, avg_sharpness);
                        layout.add(&mut nco, &q);
                    }

                    layout.copy(edges[e_id].co_mut(next_lvl, fx, &layout), &nco);
                }
            }
        }

        // interior center and grid shifts (parallel, per-worker scratch)
        {
            let face_refs: Vec<&mut Face> = faces
                .iter_mut()
                .filter(|(_, f)| f.effected)
                .map(|(_, f)| f)
                .collect();
            face_refs.into_par_iter().for_each(|f| {
                let mut q = vec![0.0f32; layout.elem_size];
                let mut r = vec![0.0f32; layout.elem_size];
                let mut nco = vec![0.0f32; layout.elem_size];
                let n = f.verts.len();

                // center shift from the fresh face midpoints and the old
                // interior edge points
                layout.zero(&mut q);
                for s in 0..n {
                    layout.add(&mut q, f.if_co(next_lvl, s, 1, 1, levels, &layout));
                }
                layout.mul_n(&mut q, 1.0 / n as f32);
                layout.zero(&mut r);
                for s in 0..n {
                    layout.add(&mut r, f.ie_co(cur_lvl, s, 1, levels, &layout));
                }
                layout.mul_n(&mut r, 1.0 / n as f32);

                {
                    let center = f.center_mut(&layout);
                    layout.mul_n(center, n as f32 - 2.0);
                    layout.add(center, &q);
                    layout.add(center, &r);
                    layout.mul_n(center, 1.0 / n as f32);
                }

                for s in 0..n {
                    // interior face shift
                    for x in 1..grid_size - 1 {
                        for y in 1..grid_size - 1 {
                            let fx = 2 * x;
                            let fy = 2 * y;
                            layout.avg4(
                                &mut q,
                                f.if_co(next_lvl, s, fx - 1, fy - 1, levels, &layout),
                                f.if_co(next_lvl, s, fx + 1, fy - 1, levels, &layout),
                                f.if_co(next_lvl, s, fx + 1, fy + 1, levels, &layout),
                                f.if_co(next_lvl, s, fx - 1, fy + 1, levels, &layout),
                            );
                            layout.avg4(
                                &mut r,
                                f.if_co(next_lvl, s, fx - 1, fy, levels, &layout),
                                f.if_co(next_lvl, s, fx + 1, fy, levels, &layout),
                                f.if_co(next_lvl, s, fx, fy - 1, levels, &layout),
                                f.if_co(next_lvl, s, fx, fy + 1, levels, &layout),
                            );

                            layout.copy(&mut nco, f.if_co(cur_lvl, s, x, y, levels, &layout));
                            layout.sub(&mut nco, &q);
                            layout.mul_n(&mut nco, 0.25);
                            layout.add(&mut nco, &r);
                            layout.copy(f.if_co_mut(next_lvl, s, fx, fy, levels, &layout), &nco);
                        }
                    }

                    // interior edge interior shift
                    for x in 1..grid_size - 1 {
                        let fx = 2 * x;
                        layout.avg4(
                            &mut q,
                            f.if_co(next_lvl, (s + 1) % n, 1, fx - 1, levels, &layout),
                            f.if_co(next_lvl, (s + 1) % n, 1, fx + 1, levels, &layout),
                            f.if_co(next_lvl, s, fx + 1, 1, levels, &layout),
                            f.if_co(next_lvl, s, fx - 1, 1, levels, &layout),
                        );
                        layout.avg4(
                            &mut r,
                            f.ie_co(next_lvl, s, fx - 1, levels, &layout),
                            f.ie_co(next_lvl, s, fx + 1, levels, &layout),
                            f.if_co(next_lvl, (s + 1) % n, 1, fx, levels, &layout),
                            f.if_co(next_lvl, s, fx, 1, levels, &layout),
                        );

                        layout.copy(&mut nco, f.ie_co(cur_lvl, s, x, levels, &layout));
                        layout.sub(&mut nco, &q);
                        layout.mul_n(&mut nco, 0.25);
                        layout.add(&mut nco, &r);
                        layout.copy(f.ie_co_mut(next_lvl, s, fx, levels, &layout), &nco);
                    }
                }
            });
        }

        // copy down
        let edge_size = ccg_edgesize(next_lvl);
        let grid_size = ccg_gridsize(next_lvl);
        let corner_idx = grid_size - 1;

        for &e_id in effected_e {
            let (v0, v1) = {
                let e = &edges[e_id];
                (e.v0, e.v1)
            };
            layout.copy(
                edges[e_id].co_mut(next_lvl, 0, &layout),
                verts[v0].co(next_lvl, &layout),
            );
            layout.copy(
                edges[e_id].co_mut(next_lvl, edge_size - 1, &layout),
                verts[v1].co(next_lvl, &layout),
            );
        }

        {
            let verts = &*verts;
            let edges = &*edges;
            let face_refs: Vec<&mut Face> = faces
                .iter_mut()
                .filter(|(_, f)| f.effected)
                .map(|(_, f)| f)
                .collect();
            face_refs.into_par_iter().for_each(|f| {
                let n = f.verts.len();
                for s in 0..n {
                    let e_id = f.edges[s];
                    let prev_e_id = f.edges[(s + n - 1) % n];
                    let vs = f.verts[s];

                    layout.copy_within(&mut f.data, if_offset(next_lvl, s, 0, 0, levels), 0);
                    layout.copy_within(&mut f.data, ie_offset(next_lvl, s, 0, levels), 0);
                    layout.copy(
                        f.if_co_mut(next_lvl, s, corner_idx, corner_idx, levels, &layout),
                        verts[vs].co(next_lvl, &layout),
                    );
                    layout.copy(
                        f.ie_co_mut(next_lvl, s, corner_idx, levels, &layout),
                        edges[e_id].co(next_lvl, corner_idx, &layout),
                    );
                    for x in 1..grid_size - 1 {
                        let src = ie_offset(next_lvl, s, x, levels);
                        layout.copy_within(&mut f.data, if_offset(next_lvl, s, x, 0, levels), src);
                        layout.copy_within(
                            &mut f.data,
                            if_offset(next_lvl, (s + 1) % n, 0, x, levels),
                            src,
                        );
                    }
                    for x in 0..grid_size - 1 {
                        let e_i = grid_size - 1 - x;
                        layout.copy(
                            f.if_co_mut(next_lvl, s, corner_idx, x, levels, &layout),
                            edges[e_id].co_vert(vs, next_lvl, e_i, &layout),
                        );
                        layout.copy(
                            f.if_co_mut(next_lvl, s, x, corner_idx, levels, &layout),
                            edges[prev_e_id].co_vert(vs, next_lvl, e_i, &layout),
                        );
                    }
                }
            });
        }
    }
}

/// Bring face-sharing edges next to each other so that opposite edges land
/// at positions (0, 2) and (1, 3).
fn sort_edges_by_face_adjacency(
    e_ids: &mut [EdgeId; 4],
    edges: &slotmap::SlotMap<EdgeId, Edge>,
    faces: &slotmap::SlotMap<FaceId, Face>,
) {
    for i in 0..4 {
        let num_faces = edges[e_ids[i]].faces.len();
        for j in 0..num_faces {
            let f_id = edges[e_ids[i]].faces[j];
            let f = &faces[f_id];
            for k in 0..f.edges.len() {
                if i + 2 < 4 && f.edges[k] == e_ids[i + 2] {
                    e_ids.swap(i + 1, i + 2);
                } else if i + 3 < 4 && f.edges[k] == e_ids[i + 3] {
                    e_ids.swap(i + 1, i + 3);
                }
            }
        }
    }
}

/// Circular-arc midpoint construction: given chord endpoints `a` and `c` and
/// an interior point `p`, offset the chord midpoint along the sagitta by an
/// amount set by the half-chord / hypotenuse ratio.
fn interp0(a: Vec3, p: Vec3, c: Vec3) -> Vec3 {
    let ac = c - a;
    let ap = p - a;
    let ac_sq = ac.dot(ac);
    let ap_sq = ap.dot(ap);
    if ac_sq <= EPSILON || ap_sq <= EPSILON {
        return (a + c) * 0.5;
    }
    let projection = ap.dot(ac) / ac_sq;
    let ac = ac * projection;
    let sagitta = ap - ac;
    let halfchord_sq = ac.dot(ac);
    let cos = (halfchord_sq / ap_sq).sqrt();
    a + ac * (cos * 0.5) + sagitta * (0.5 + cos * 0.25)
}

/// Assign an arc-fit midpoint to an edge's level-1 sample. The first writer
/// stores its value; a second writer averages with it. Excluded edges keep
/// their bookkeeping but are never written.
fn set_midpoint(e: &mut Edge, layout: &ElemLayout, mut res: Vec3, e_co: Vec3) {
    if e.trigger {
        res = (res + e_co) * 0.5;
    } else {
        e.trigger = true;
    }
    if !e.excluded {
        layout.set_pos(e.co_mut(1, 1, layout), res);
    }
}

/// Move the midpoint of rib `(va, vb)` into the opposing position spanned by
/// `(ta, tb)`, preserving its relative height scaled by the span ratio.
fn project_rib(va: Vec3, vb: Vec3, emid: Vec3, ta: Vec3, tb: Vec3) -> Vec3 {
    let h = emid - (va + vb) * 0.5;
    let m1 = (ta + tb) * 0.5;
    let from_sq = (va - vb).length_squared();
    if from_sq <= EPSILON {
        return m1 + h;
    }
    let k = ((ta - tb).length_squared() / from_sq).sqrt();
    m1 + h * k
}

/// One opposite-edge-pair contribution to a quad's re-centered midpoint: the
/// mean height of the pair over its chords, re-scaled to the mean of the
/// individual heights and applied at `m1`.
fn quad_pair(va0: Vec3, va1: Vec3, ea: Vec3, vb0: Vec3, vb1: Vec3, eb: Vec3, m1: Vec3) -> Vec3 {
    let h = ea - (va0 + va1) * 0.5;
    let h1 = eb - (vb0 + vb1) * 0.5;
    let h2 = (h + h1) * 0.5;
    let h2_len = h2.length_squared();
    if h2_len <= EPSILON {
        return m1;
    }
    let h3_len = (h1.length_squared() + h.length_squared()) * 0.5;
    let kh = (h3_len / h2_len).sqrt();
    m1 + h2 * (kh * 1.1)
}
