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
mod labeling;
mod morphology;
mod pixel_grid;

pub use labeling::*;
pub use morphology::*;
pub use pixel_grid::*;
