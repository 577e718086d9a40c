// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Smooth vertex normals over the finest-level grids: per-cell gradient
//! normals accumulated into the surrounding samples, stitched across grid
//! seams, shared edges and shared vertices, then renormalized.

use glam::Vec3;
use rayon::prelude::*;

use super::*;

/// Gradient normal of the grid cell with lower corner `(x, y)`.
fn face_cell_normal(
    f: &Face,
    lvl: usize,
    s: usize,
    x: usize,
    y: usize,
    levels: usize,
    layout: &ElemLayout,
) -> Vec3 {
    let a = layout.pos(f.if_co(lvl, s, x, y, levels, layout));
    let b = layout.pos(f.if_co(lvl, s, x + 1, y, levels, layout));
    let c = layout.pos(f.if_co(lvl, s, x + 1, y + 1, levels, layout));
    let d = layout.pos(f.if_co(lvl, s, x, y + 1, levels, layout));
    normalize_or_zero((d - b).cross(c - a))
}

impl SubSurf {
    #[profiling::function]
    pub(crate) fn calc_normals(
        &mut self,
        effected_v: &[VertId],
        effected_e: &[EdgeId],
        effected_f: &[FaceId],
    ) {
        let layout = self.layout;
        let levels = self.subdiv_levels;
        let lvl = levels;
        let edge_size = ccg_edgesize(lvl);
        let grid_size = ccg_gridsize(lvl);

        let Self {
            verts,
            edges,
            faces,
            ..
        } = self;

        // accumulate per-cell normals into each face's own grids; border
        // slots are reset only on sides whose bounding edge or vertex is
        // being recomputed
        {
            let verts_r = &*verts;
            let edges_r = &*edges;
            let face_refs: Vec<&mut Face> = faces
                .iter_mut()
                .filter(|(_, f)| f.effected)
                .map(|(_, f)| f)
                .collect();
            face_refs.into_par_iter().for_each(|f| {
                let n = f.verts.len();

                for s in 0..n {
                    for y in 0..grid_size - 1 {
                        for x in 0..grid_size - 1 {
                            layout.zero_no(f.if_co_mut(lvl, s, x, y, levels, &layout));
                        }
                    }
                    if edges_r[f.edges[(s + n - 1) % n]].effected {
                        for x in 0..grid_size - 1 {
                            layout.zero_no(f.if_co_mut(lvl, s, x, grid_size - 1, levels, &layout));
                        }
                    }
                    if edges_r[f.edges[s]].effected {
                        for y in 0..grid_size - 1 {
                            layout.zero_no(f.if_co_mut(lvl, s, grid_size - 1, y, levels, &layout));
                        }
                    }
                    if verts_r[f.verts[s]].effected {
                        layout.zero_no(f.if_co_mut(
                            lvl,
                            s,
                            grid_size - 1,
                            grid_size - 1,
                            levels,
                            &layout,
                        ));
                    }
                }

                for s in 0..n {
                    let y_limit = !edges_r[f.edges[(s + n - 1) % n]].effected;
                    let x_limit = !edges_r[f.edges[s]].effected;
                    let y_limit_next = x_limit;
                    let x_limit_prev = y_limit;

                    for y in 0..grid_size - 1 {
                        for x in 0..grid_size - 1 {
                            let x_plus_ok = !x_limit || x < grid_size - 2;
                            let y_plus_ok = !y_limit || y < grid_size - 2;

                            let no = face_cell_normal(f, lvl, s, x, y, levels, &layout);

                            layout.add_no(f.if_co_mut(lvl, s, x, y, levels, &layout), no);
                            if x_plus_ok {
                                layout.add_no(f.if_co_mut(lvl, s, x + 1, y, levels, &layout), no);
                            }
                            if y_plus_ok {
                                layout.add_no(f.if_co_mut(lvl, s, x, y + 1, levels, &layout), no);
                            }
                            if x_plus_ok
                                && y_plus_ok
                                && (x < grid_size - 2
                                    || y < grid_size - 2
                                    || verts_r[f.verts[s]].effected)
                            {
                                layout
                                    .add_no(f.if_co_mut(lvl, s, x + 1, y + 1, levels, &layout), no);
                            }

                            // cells touching the center also feed the
                            // neighbouring grids of this face
                            if x == 0 && y == 0 {
                                if !y_limit_next || 1 < grid_size - 1 {
                                    layout.add_no(
                                        f.if_co_mut(lvl, (s + 1) % n, 0, 1, levels, &layout),
                                        no,
                                    );
                                }
                                if !x_limit_prev || 1 < grid_size - 1 {
                                    layout.add_no(
                                        f.if_co_mut(lvl, (s + n - 1) % n, 1, 0, levels, &layout),
                                        no,
                                    );
                                }
                                for k in 0..n {
                                    if k != s {
                                        layout.add_no(
                                            f.if_co_mut(lvl, k, 0, 0, levels, &layout),
                                            no,
                                        );
                                    }
                                }
                            } else if y == 0 {
                                layout.add_no(
                                    f.if_co_mut(lvl, (s + 1) % n, 0, x, levels, &layout),
                                    no,
                                );
                                if !y_limit_next || x < grid_size - 2 {
                                    layout.add_no(
                                        f.if_co_mut(lvl, (s + 1) % n, 0, x + 1, levels, &layout),
                                        no,
                                    );
                                }
                            } else if x == 0 {
                                layout.add_no(
                                    f.if_co_mut(lvl, (s + n - 1) % n, y, 0, levels, &layout),
                                    no,
                                );
                                if !x_limit_prev || y < grid_size - 2 {
                                    layout.add_no(
                                        f.if_co_mut(lvl, (s + n - 1) % n, y + 1, 0, levels, &layout),
                                        no,
                                    );
                                }
                            }
                        }
                    }
                }
            });
        }

        // shared vertices: gather the incident corner slots, normalize once,
        // broadcast back
        for &v_id in effected_v {
            let mut sum = Vec3::ZERO;
            for &f_id in &verts[v_id].faces {
                let f = &faces[f_id];
                let vi = f.vert_index(v_id).expect("face lists incident vertex");
                sum += layout.no(f.if_co(lvl, vi, grid_size - 1, grid_size - 1, levels, &layout));
            }
            if verts[v_id].faces.is_empty() {
                sum = layout.pos(verts[v_id].co(lvl, &layout));
            }
            let no = normalize_or_zero(sum);
            layout.set_no(verts[v_id].co_mut(lvl, &layout), no);

            for &f_id in &verts[v_id].faces {
                let vi = faces[f_id].vert_index(v_id).expect("face lists incident vertex");
                layout.set_no(
                    faces[f_id].if_co_mut(lvl, vi, grid_size - 1, grid_size - 1, levels, &layout),
                    no,
                );
            }
        }

        // shared edges: sum the matching border slots across all incident
        // faces and write the total back to each
        for &e_id in effected_e {
            if edges[e_id].faces.is_empty() {
                continue;
            }
            let e_v0 = edges[e_id].v0;
            let mut sums = vec![Vec3::ZERO; edge_size];
            for &f_id in &edges[e_id].faces {
                let f = &faces[f_id];
                let fe = f.edge_index(e_id).expect("face lists incident edge");
                for (x, sum) in sums.iter_mut().enumerate().take(edge_size - 1).skip(1) {
                    let off = f.if_edge_off(e_v0, fe, lvl, x, 0, levels);
                    *sum += layout.no(layout.elem(&f.data, off));
                }
            }
            for &f_id in &edges[e_id].faces {
                let fe = faces[f_id].edge_index(e_id).expect("face lists incident edge");
                for (x, sum) in sums.iter().enumerate().take(edge_size - 1).skip(1) {
                    let off = faces[f_id].if_edge_off(e_v0, fe, lvl, x, 0, levels);
                    layout.set_no(layout.elem_mut(&mut faces[f_id].data, off), *sum);
                }
            }
        }

        // renormalize every sample, close the corner equality around each
        // face, fill the center and interior-edge normal slots
        {
            let face_refs: Vec<&mut Face> = faces
                .iter_mut()
                .filter(|(_, f)| f.effected)
                .map(|(_, f)| f)
                .collect();
            face_refs.into_par_iter().for_each(|f| {
                let n = f.verts.len();

                for s in 0..n {
                    let src = if_offset(lvl, s, grid_size - 1, 0, levels);
                    let dst = if_offset(lvl, (s + 1) % n, 0, grid_size - 1, levels);
                    let no = layout.no(layout.elem(&f.data, src));
                    layout.set_no(layout.elem_mut(&mut f.data, dst), no);
                }

                for s in 0..n {
                    for y in 0..grid_size {
                        for x in 0..grid_size {
                            let elem = f.if_co_mut(lvl, s, x, y, levels, &layout);
                            let no = normalize_or_zero(layout.no(elem));
                            layout.set_no(elem, no);
                        }
                    }
                }

                let no = layout.no(f.if_co(lvl, 0, 0, 0, levels, &layout));
                layout.set_no(f.center_mut(&layout), no);

                for s in 0..n {
                    for x in 1..grid_size - 1 {
                        let no = layout.no(f.if_co(lvl, s, x, 0, levels, &layout));
                        layout.set_no(f.ie_co_mut(lvl, s, x, levels, &layout), no);
                    }
                }
            });
        }

        // canonical edge normal arrays, from the first incident face; an
        // isolated edge derives them from its positions instead of carrying
        // uninitialized slots
        for &e_id in effected_e {
            if !edges[e_id].faces.is_empty() {
                let f_id = edges[e_id].faces[0];
                let e_v0 = edges[e_id].v0;
                let fe = faces[f_id]
                    .edge_index(e_id)
                    .expect("face lists incident edge");
                for x in 0..edge_size {
                    let off = faces[f_id].if_edge_off(e_v0, fe, lvl, x, 0, levels);
                    let no = layout.no(layout.elem(&faces[f_id].data, off));
                    layout.set_no(edges[e_id].co_mut(lvl, x, &layout), no);
                }
            } else {
                for x in 0..edge_size {
                    let elem = edges[e_id].co_mut(lvl, x, &layout);
                    let no = normalize_or_zero(layout.pos(elem));
                    layout.set_no(elem, no);
                }
            }
        }
    }
}
