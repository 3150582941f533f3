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
use geos_sys::{
    GEOSContext_setErrorMessageHandler_r, GEOSContext_setNoticeMessageHandler_r,
    GEOSContextHandle_t, GEOS_finish_r, GEOS_init_r,
};
use log::debug;
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr::null_mut;

unsafe extern "C" fn log_geos_message(message: *const c_char, _userdata: *mut c_void) {
    debug!("geos: {}", CStr::from_ptr(message).to_string_lossy());
}

/// An owned GEOS context.  Every geometry belongs to the context that made
/// it; one context per worker keeps the ffi reentrant across the building
/// batches.  Notices and errors from GEOS go to the log.
pub struct GeosContext {
    pub(crate) c_handle: GEOSContextHandle_t,
}

impl GeosContext {
    pub fn new() -> GeosContext {
        unsafe {
            let c_handle = GEOS_init_r();
            GEOSContext_setNoticeMessageHandler_r(c_handle, Some(log_geos_message), null_mut());
            GEOSContext_setErrorMessageHandler_r(c_handle, Some(log_geos_message), null_mut());
            GeosContext { c_handle }
        }
    }
}

impl Default for GeosContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GeosContext {
    fn drop(&mut self) {
        unsafe {
            GEOS_finish_r(self.c_handle);
        }
    }
}
