/*
This file is part of the Roof Detection Tool
Copyright (C) 2022 Novel-T

The Roof Detection Tool is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

//! Detects the planar roof areas of buildings from LiDAR pixels and turns
//! them into clean, non overlapping roof polygons constrained to the
//! building footprint.

pub mod constants;
pub mod datatypes;
pub mod detect_roofs;
pub mod detsac;
pub mod fit_rules;
pub mod merge_adjacent;
pub mod messy_roofs;
pub mod ols;
pub mod premade_planes;
pub mod ransac;
pub mod roof_polygons;
pub mod split_evenly;

pub mod test_util;
