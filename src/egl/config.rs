// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bitflags::bitflags;

use crate::egl::ConfigHandle;
use crate::egl_defines::*;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;

bitflags! {
    /// Values of `EGL_SURFACE_TYPE`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SurfaceType: u32 {
        const PBUFFER = EGL_PBUFFER_BIT as u32;
        const PIXMAP = EGL_PIXMAP_BIT as u32;
        const WINDOW = EGL_WINDOW_BIT as u32;
    }
}

bitflags! {
    /// Values of `EGL_RENDERABLE_TYPE`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct RenderableType: u32 {
        const OPENGL_ES = EGL_OPENGL_ES_BIT as u32;
        const OPENGL_ES2 = EGL_OPENGL_ES2_BIT as u32;
        const OPENGL_ES3 = EGL_OPENGL_ES3_BIT_KHR as u32;
    }
}

/// The host's config table: one row of attribute ids, then one row of values per config.
#[derive(Clone, Debug, Default)]
pub struct ConfigTable {
    attribs: Vec<EGLint>,
    values: Vec<Vec<EGLint>>,
}

impl ConfigTable {
    /// Builds the table from the raw words returned by `rcGetConfigs`.
    pub fn from_host(num_configs: u32, num_attribs: u32, words: &[u32]) -> GfxstreamResult<ConfigTable> {
        let num_attribs = num_attribs as usize;
        let expected = (num_configs as usize + 1) * num_attribs;
        if num_attribs == 0 || words.len() != expected {
            return Err(GfxstreamError::ProtocolViolation("malformed config table"));
        }

        let mut rows = words.chunks_exact(num_attribs).map(|row| {
            row.iter()
                .map(|word| *word as EGLint)
                .collect::<Vec<EGLint>>()
        });
        let attribs = rows
            .next()
            .ok_or(GfxstreamError::ProtocolViolation("malformed config table"))?;

        Ok(ConfigTable {
            attribs,
            values: rows.collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_valid(&self, config: ConfigHandle) -> bool {
        config.index().map(|i| i < self.len()).unwrap_or(false)
    }

    pub fn get_index_of_config(&self, config: ConfigHandle) -> Option<usize> {
        config.index().filter(|i| *i < self.len())
    }

    pub fn get_config_at_index(&self, index: usize) -> Option<ConfigHandle> {
        (index < self.len()).then(|| ConfigHandle::from_index(index))
    }

    pub fn handles(&self) -> impl Iterator<Item = ConfigHandle> {
        (0..self.len()).map(ConfigHandle::from_index)
    }

    /// Returns the value of `attrib` for `config`.
    pub fn get_attrib(&self, config: ConfigHandle, attrib: EGLint) -> GfxstreamResult<EGLint> {
        let index = self
            .get_index_of_config(config)
            .ok_or(GfxstreamError::BadConfig)?;
        let column = self
            .attribs
            .iter()
            .position(|a| *a == attrib)
            .ok_or(GfxstreamError::BadAttribute(attrib))?;
        Ok(self.values[index][column])
    }

    /// Like `get_attrib` but with a fallback for attributes the host did not report.
    pub fn get_attrib_or(&self, config: ConfigHandle, attrib: EGLint, default: EGLint) -> GfxstreamResult<EGLint> {
        match self.get_attrib(config, attrib) {
            Err(GfxstreamError::BadAttribute(_)) => Ok(default),
            other => other,
        }
    }

    pub fn surface_type(&self, config: ConfigHandle) -> GfxstreamResult<SurfaceType> {
        let bits = self.get_attrib_or(config, EGL_SURFACE_TYPE, 0)?;
        Ok(SurfaceType::from_bits_truncate(bits as u32))
    }

    pub fn renderable_type(&self, config: ConfigHandle) -> GfxstreamResult<RenderableType> {
        let bits = self.get_attrib_or(config, EGL_RENDERABLE_TYPE, 0)?;
        Ok(RenderableType::from_bits_truncate(bits as u32))
    }

    /// Color buffer format to allocate for pbuffers of `config`.
    pub fn color_buffer_format(&self, config: ConfigHandle) -> GfxstreamResult<GLenum> {
        let red = self.get_attrib_or(config, EGL_RED_SIZE, 8)?;
        let green = self.get_attrib_or(config, EGL_GREEN_SIZE, 8)?;
        let blue = self.get_attrib_or(config, EGL_BLUE_SIZE, 8)?;
        let alpha = self.get_attrib_or(config, EGL_ALPHA_SIZE, 0)?;

        Ok(match (red, green, blue, alpha) {
            (5, 6, 5, 0) => GL_RGB565,
            (_, _, _, 0) => GL_RGB,
            _ => GL_RGBA,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ConfigTable {
        let words = [
            EGL_CONFIG_ID as u32,
            EGL_SURFACE_TYPE as u32,
            EGL_ALPHA_SIZE as u32,
            // config 0
            7,
            (EGL_WINDOW_BIT | EGL_PBUFFER_BIT) as u32,
            8,
            // config 1
            9,
            EGL_PBUFFER_BIT as u32,
            0,
        ];
        ConfigTable::from_host(2, 3, &words).unwrap()
    }

    #[test]
    fn attribs_are_looked_up_by_column() {
        let table = table();
        assert_eq!(table.len(), 2);
        let second = table.get_config_at_index(1).unwrap();
        assert_eq!(table.get_attrib(second, EGL_CONFIG_ID).unwrap(), 9);
        assert_eq!(table.surface_type(second).unwrap(), SurfaceType::PBUFFER);
        assert_eq!(table.color_buffer_format(second).unwrap(), GL_RGB);
        assert!(matches!(
            table.get_attrib(second, EGL_DEPTH_SIZE),
            Err(GfxstreamError::BadAttribute(EGL_DEPTH_SIZE))
        ));
    }

    #[test]
    fn out_of_range_configs_are_invalid() {
        let table = table();
        assert!(!table.is_valid(ConfigHandle::NONE));
        assert!(!table.is_valid(ConfigHandle::from_index(2)));
        assert!(table.get_config_at_index(2).is_none());
        assert!(matches!(
            table.get_attrib(ConfigHandle::from_index(5), EGL_CONFIG_ID),
            Err(GfxstreamError::BadConfig)
        ));
    }

    #[test]
    fn truncated_table_is_rejected() {
        assert!(ConfigTable::from_host(2, 3, &[0; 6]).is_err());
    }
}
