// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Some useful re-exports
pub mod prelude;

/// The subdivision surface engine: topological store, refinement kernel,
/// normals and stitching utilities
pub mod subsurf;

/// Small container aliases and slice helpers
pub mod utils;

#[cfg(test)]
mod subsurf_tests;
