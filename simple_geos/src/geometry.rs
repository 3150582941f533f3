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
use crate::GeosContext;
use anyhow::{bail, Result};
use geos_sys::*;
use libc::c_int;
use std::os::raw::c_char;

//type ids of the GEOS geometry type enum
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeometryTypes {
    Point,
    LineString,
    LinearRing,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    Unknown(i32),
}

impl From<i32> for GeometryTypes {
    fn from(type_id: i32) -> Self {
        match type_id {
            0 => GeometryTypes::Point,
            1 => GeometryTypes::LineString,
            2 => GeometryTypes::LinearRing,
            3 => GeometryTypes::Polygon,
            4 => GeometryTypes::MultiPoint,
            5 => GeometryTypes::MultiLineString,
            6 => GeometryTypes::MultiPolygon,
            7 => GeometryTypes::GeometryCollection,
            other => GeometryTypes::Unknown(other),
        }
    }
}

impl From<GeometryTypes> for c_int {
    fn from(t: GeometryTypes) -> Self {
        match t {
            GeometryTypes::Point => 0,
            GeometryTypes::LineString => 1,
            GeometryTypes::LinearRing => 2,
            GeometryTypes::Polygon => 3,
            GeometryTypes::MultiPoint => 4,
            GeometryTypes::MultiLineString => 5,
            GeometryTypes::MultiPolygon => 6,
            GeometryTypes::GeometryCollection => 7,
            GeometryTypes::Unknown(other) => other,
        }
    }
}

//values match GEOSBufCapStyles / GEOSBufJoinStyles in geos_c.h
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CapStyle {
    Round,
    Flat,
    Square,
}

impl From<CapStyle> for c_int {
    fn from(t: CapStyle) -> Self {
        match t {
            CapStyle::Round => 1,
            CapStyle::Flat => 2,
            CapStyle::Square => 3,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JoinStyle {
    Round,
    Mitre,
    Bevel,
}

impl From<JoinStyle> for c_int {
    fn from(t: JoinStyle) -> Self {
        match t {
            JoinStyle::Round => 1,
            JoinStyle::Mitre => 2,
            JoinStyle::Bevel => 3,
        }
    }
}

/// A GEOS geometry tied to the context that created it.  Sub-geometry
/// accessors hand out borrowed views that must not outlive their parent.
pub struct SimpleGeometry<'c> {
    c_handle: *mut GEOSGeometry,
    //borrowed views into a parent geometry are not destroyed
    owned: bool,
    context: &'c GeosContext,
}

/// A filled coordinate sequence ready to hand to a geometry constructor,
/// which takes over freeing it
unsafe fn coord_seq_from(context: &GeosContext, points: &[(f64, f64)]) -> Result<*mut GEOSCoordSequence> {
    let seq = GEOSCoordSeq_create_r(context.c_handle, points.len() as u32, 2);
    if seq.is_null() {
        bail!("GEOSCoordSeq_create_r returned null");
    }
    for (i, &(x, y)) in points.iter().enumerate() {
        let ok_x = GEOSCoordSeq_setX_r(context.c_handle, seq, i as u32, x);
        let ok_y = GEOSCoordSeq_setY_r(context.c_handle, seq, i as u32, y);
        if ok_x == 0 || ok_y == 0 {
            GEOSCoordSeq_destroy_r(context.c_handle, seq);
            bail!("setting coordinate {} failed", i);
        }
    }
    Ok(seq)
}

unsafe fn ring_from(context: &GeosContext, points: &[(f64, f64)]) -> Result<*mut GEOSGeometry> {
    let ptr = GEOSGeom_createLinearRing_r(context.c_handle, coord_seq_from(context, points)?);
    if ptr.is_null() {
        bail!("GEOSGeom_createLinearRing_r returned null");
    }
    Ok(ptr)
}

/// Copies a GEOS allocated string, freeing the GEOS side
unsafe fn take_geos_string(context: &GeosContext, raw: *mut c_char) -> Result<String> {
    if raw.is_null() {
        bail!("geos returned a null string");
    }
    let s = std::ffi::CStr::from_ptr(raw).to_string_lossy().into_owned();
    GEOSFree_r(context.c_handle, raw as *mut _);
    Ok(s)
}

impl<'c> SimpleGeometry<'c> {
    fn owned_ptr(
        context: &'c GeosContext,
        ptr: *mut GEOSGeometry,
        what: &str,
    ) -> Result<SimpleGeometry<'c>> {
        if ptr.is_null() {
            bail!("{} returned null", what);
        }
        Ok(SimpleGeometry {
            c_handle: ptr,
            owned: true,
            context,
        })
    }

    fn view_ptr(&self, ptr: *const GEOSGeometry, what: &str) -> Result<SimpleGeometry<'c>> {
        if ptr.is_null() {
            bail!("{} returned null", what);
        }
        Ok(SimpleGeometry {
            c_handle: ptr as *mut GEOSGeometry,
            owned: false,
            context: self.context,
        })
    }

    pub fn create_point(context: &'c GeosContext, x: f64, y: f64) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSGeom_createPointFromXY_r(context.c_handle, x, y);
            Self::owned_ptr(context, ptr, "GEOSGeom_createPointFromXY_r")
        }
    }

    pub fn create_line_string(
        context: &'c GeosContext,
        points: &[(f64, f64)],
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSGeom_createLineString_r(context.c_handle, coord_seq_from(context, points)?);
            Self::owned_ptr(context, ptr, "GEOSGeom_createLineString_r")
        }
    }

    /// Rings must be explicitly closed (first point repeated at the end)
    pub fn create_polygon(
        context: &'c GeosContext,
        exterior: &[(f64, f64)],
        interiors: &[Vec<(f64, f64)>],
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let shell = ring_from(context, exterior)?;
            let mut holes = Vec::with_capacity(interiors.len());
            for ring in interiors {
                holes.push(ring_from(context, ring)?);
            }
            let ptr = GEOSGeom_createPolygon_r(
                context.c_handle,
                shell,
                holes.as_mut_ptr(),
                holes.len() as _,
            );
            Self::owned_ptr(context, ptr, "GEOSGeom_createPolygon_r")
        }
    }

    pub fn create_collection(
        context: &'c GeosContext,
        members: Vec<SimpleGeometry<'c>>,
        kind: GeometryTypes,
    ) -> Result<SimpleGeometry<'c>> {
        assert!(matches!(
            kind,
            GeometryTypes::GeometryCollection
                | GeometryTypes::MultiPoint
                | GeometryTypes::MultiLineString
                | GeometryTypes::MultiPolygon
        ));

        //the collection takes over freeing its members
        let mut raw: Vec<*mut GEOSGeometry> = Vec::with_capacity(members.len());
        for mut member in members {
            member.owned = false;
            raw.push(member.c_handle);
        }
        unsafe {
            let ptr = GEOSGeom_createCollection_r(
                context.c_handle,
                kind.into(),
                raw.as_mut_ptr(),
                raw.len() as _,
            );
            Self::owned_ptr(context, ptr, "GEOSGeom_createCollection_r")
        }
    }

    pub fn geometry_type(&self) -> GeometryTypes {
        unsafe { GEOSGeomTypeId_r(self.context.c_handle, self.c_handle) as i32 }.into()
    }

    pub fn num_geometries(&self) -> Result<usize> {
        let n = unsafe { GEOSGetNumGeometries_r(self.context.c_handle, self.c_handle) };
        if n < 0 {
            bail!("GEOSGetNumGeometries_r failed");
        }
        Ok(n as usize)
    }

    pub fn geometry_at(&self, n: usize) -> Result<SimpleGeometry<'c>> {
        let ptr = unsafe { GEOSGetGeometryN_r(self.context.c_handle, self.c_handle, n as _) };
        self.view_ptr(ptr, "GEOSGetGeometryN_r")
    }

    pub fn exterior_ring(&self) -> Result<SimpleGeometry<'c>> {
        let ptr = unsafe { GEOSGetExteriorRing_r(self.context.c_handle, self.c_handle) };
        self.view_ptr(ptr, "GEOSGetExteriorRing_r")
    }

    pub fn num_interior_rings(&self) -> Result<usize> {
        let n = unsafe { GEOSGetNumInteriorRings_r(self.context.c_handle, self.c_handle) };
        if n < 0 {
            bail!("GEOSGetNumInteriorRings_r failed");
        }
        Ok(n as usize)
    }

    pub fn interior_ring(&self, n: usize) -> Result<SimpleGeometry<'c>> {
        let ptr = unsafe { GEOSGetInteriorRingN_r(self.context.c_handle, self.c_handle, n as _) };
        self.view_ptr(ptr, "GEOSGetInteriorRingN_r")
    }

    /// The coordinates of a linestring or ring
    pub fn ring_points(&self) -> Result<Vec<(f64, f64)>> {
        unsafe {
            let seq = GEOSGeom_getCoordSeq_r(self.context.c_handle, self.c_handle);
            if seq.is_null() {
                bail!("not a linestring, ring or point");
            }
            let mut size = 0u32;
            if GEOSCoordSeq_getSize_r(self.context.c_handle, seq, &mut size) == 0 {
                bail!("GEOSCoordSeq_getSize_r failed");
            }
            let mut points = Vec::with_capacity(size as usize);
            for i in 0..size {
                let mut x = 0.0;
                let mut y = 0.0;
                let ok_x = GEOSCoordSeq_getX_r(self.context.c_handle, seq, i, &mut x);
                let ok_y = GEOSCoordSeq_getY_r(self.context.c_handle, seq, i, &mut y);
                if ok_x == 0 || ok_y == 0 {
                    bail!("reading coordinate {} failed", i);
                }
                points.push((x, y));
            }
            Ok(points)
        }
    }

    /// The coordinates of a point geometry
    pub fn point_xy(&self) -> Result<(f64, f64)> {
        unsafe {
            let mut x = 0.0;
            let mut y = 0.0;
            if GEOSGeomGetX_r(self.context.c_handle, self.c_handle, &mut x) == 0
                || GEOSGeomGetY_r(self.context.c_handle, self.c_handle, &mut y) == 0
            {
                bail!("GEOSGeomGetX_r/GEOSGeomGetY_r failed");
            }
            Ok((x, y))
        }
    }

    pub fn centroid(&self) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSGetCentroid_r(self.context.c_handle, self.c_handle);
            Self::owned_ptr(self.context, ptr, "GEOSGetCentroid_r")
        }
    }

    pub fn boundary(&self) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSBoundary_r(self.context.c_handle, self.c_handle);
            Self::owned_ptr(self.context, ptr, "GEOSBoundary_r")
        }
    }

    pub fn unary_union(&self, context: &'c GeosContext) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSUnaryUnion_r(context.c_handle, self.c_handle);
            Self::owned_ptr(context, ptr, "GEOSUnaryUnion_r")
        }
    }

    pub fn intersection(
        &self,
        context: &'c GeosContext,
        rhs: &SimpleGeometry,
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSIntersection_r(context.c_handle, self.c_handle, rhs.c_handle);
            Self::owned_ptr(context, ptr, "GEOSIntersection_r")
        }
    }

    pub fn difference(
        &self,
        context: &'c GeosContext,
        rhs: &SimpleGeometry,
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSDifference_r(context.c_handle, self.c_handle, rhs.c_handle);
            Self::owned_ptr(context, ptr, "GEOSDifference_r")
        }
    }

    pub fn intersects(&self, rhs: &SimpleGeometry) -> Result<bool> {
        match unsafe { GEOSIntersects_r(self.context.c_handle, self.c_handle, rhs.c_handle) } {
            0 => Ok(false),
            1 => Ok(true),
            _ => bail!("GEOSIntersects_r exception"),
        }
    }

    pub fn contains(&self, rhs: &SimpleGeometry) -> Result<bool> {
        match unsafe { GEOSContains_r(self.context.c_handle, self.c_handle, rhs.c_handle) } {
            0 => Ok(false),
            1 => Ok(true),
            _ => bail!("GEOSContains_r exception"),
        }
    }

    /// quadsegs is the number of segments per quarter circle
    pub fn buffer(
        &self,
        context: &'c GeosContext,
        width: f64,
        quadsegs: i32,
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSBuffer_r(context.c_handle, self.c_handle, width, quadsegs as _);
            Self::owned_ptr(context, ptr, "GEOSBuffer_r")
        }
    }

    pub fn buffer_with_style(
        &self,
        context: &'c GeosContext,
        width: f64,
        quadsegs: i32,
        cap_style: CapStyle,
        join_style: JoinStyle,
        mitre_limit: f64,
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSBufferWithStyle_r(
                context.c_handle,
                self.c_handle,
                width,
                quadsegs as _,
                cap_style.into(),
                join_style.into(),
                mitre_limit,
            );
            Self::owned_ptr(context, ptr, "GEOSBufferWithStyle_r")
        }
    }

    pub fn line_merge(&self, context: &'c GeosContext) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSLineMerge_r(context.c_handle, self.c_handle);
            Self::owned_ptr(context, ptr, "GEOSLineMerge_r")
        }
    }

    /// The voronoi diagram of the geometry's vertices, edges only when
    /// `only_edges`
    pub fn voronoi(
        &self,
        envelope: Option<&SimpleGeometry<'c>>,
        tolerance: f64,
        only_edges: bool,
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSVoronoiDiagram_r(
                self.context.c_handle,
                self.c_handle,
                envelope
                    .map(|e| e.c_handle as *const GEOSGeometry)
                    .unwrap_or(std::ptr::null()),
                tolerance,
                only_edges as _,
            );
            Self::owned_ptr(self.context, ptr, "GEOSVoronoiDiagram_r")
        }
    }

    pub fn area(&self) -> Result<f64> {
        let mut area = 0.0;
        if unsafe { GEOSArea_r(self.context.c_handle, self.c_handle, &mut area) } != 1 {
            bail!("GEOSArea_r failed");
        }
        Ok(area)
    }

    pub fn is_empty(&self) -> Result<bool> {
        match unsafe { GEOSisEmpty_r(self.context.c_handle, self.c_handle) } {
            0 => Ok(false),
            1 => Ok(true),
            _ => bail!("GEOSisEmpty_r exception"),
        }
    }

    pub fn is_valid(&self) -> bool {
        unsafe { GEOSisValid_r(self.context.c_handle, self.c_handle) == 1 }
    }

    pub fn make_valid(&self, context: &'c GeosContext) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSMakeValid_r(context.c_handle, self.c_handle);
            Self::owned_ptr(context, ptr, "GEOSMakeValid_r")
        }
    }

    /// Snaps all coordinates to a grid, keeping the output valid
    pub fn set_precision(
        &self,
        context: &'c GeosContext,
        grid_size: f64,
    ) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSGeom_setPrecision_r(context.c_handle, self.c_handle, grid_size, 0);
            Self::owned_ptr(context, ptr, "GEOSGeom_setPrecision_r")
        }
    }

    pub fn clone_geom(&self, context: &'c GeosContext) -> Result<SimpleGeometry<'c>> {
        unsafe {
            let ptr = GEOSGeom_clone_r(context.c_handle, self.c_handle);
            Self::owned_ptr(context, ptr, "GEOSGeom_clone_r")
        }
    }

    pub fn to_wkt(&self) -> Result<String> {
        unsafe {
            let writer = GEOSWKTWriter_create_r(self.context.c_handle);
            let raw = GEOSWKTWriter_write_r(self.context.c_handle, writer, self.c_handle);
            GEOSWKTWriter_destroy_r(self.context.c_handle, writer);
            take_geos_string(self.context, raw)
        }
    }

    pub fn to_wkt_precision(&self, precision: u32) -> Result<String> {
        unsafe {
            let writer = GEOSWKTWriter_create_r(self.context.c_handle);
            GEOSWKTWriter_setRoundingPrecision_r(self.context.c_handle, writer, precision as _);
            let raw = GEOSWKTWriter_write_r(self.context.c_handle, writer, self.c_handle);
            GEOSWKTWriter_destroy_r(self.context.c_handle, writer);
            take_geos_string(self.context, raw)
        }
    }
}

impl<'c> Drop for SimpleGeometry<'c> {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                GEOSGeom_destroy_r(self.context.c_handle, self.c_handle);
            }
        }
    }
}
