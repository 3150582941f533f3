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

//! The slice of the GEOS C api the roof detection pipeline needs, behind a
//! safe geometry handle.  Coordinates go in and out as plain (x, y) slices
//! or rust geo types, the coordinate sequence plumbing stays internal.

mod context;
mod convert;
mod geometry;

pub use context::*;
pub use convert::*;
pub use geometry::*;
