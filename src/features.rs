// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! features: The capability set learned from the host renderer once per connection.

use crate::ipc::MAX_CHECKSUM_VERSION;

pub const NATIVE_SYNC_V2: &str = "ANDROID_EMU_native_sync_v2";
pub const NATIVE_SYNC_V3: &str = "ANDROID_EMU_native_sync_v3";
pub const NATIVE_SYNC_V4: &str = "ANDROID_EMU_native_sync_v4";
pub const DMA_V1: &str = "ANDROID_EMU_dma_v1";
pub const GLES_MAX_VERSION_3_0: &str = "ANDROID_EMU_gles_max_version_3_0";
pub const GLES_MAX_VERSION_3_1: &str = "ANDROID_EMU_gles_max_version_3_1";
pub const GLES_MAX_VERSION_3_2: &str = "ANDROID_EMU_gles_max_version_3_2";
pub const HOST_COMPOSITION_V1: &str = "ANDROID_EMU_host_composition_v1";
pub const HOST_COMPOSITION_V2: &str = "ANDROID_EMU_host_composition_v2";
pub const YUV_CACHE: &str = "ANDROID_EMU_YUV_Cache";
pub const ASYNC_UNMAP_BUFFER: &str = "ANDROID_EMU_async_unmap_buffer";
pub const DIRECT_MEM: &str = "ANDROID_EMU_direct_mem";
pub const REFCOUNT_PIPE: &str = "ANDROID_EMU_refcount_pipe";
pub const VULKAN: &str = "ANDROID_EMU_vulkan";
pub const CHECKSUM_HELPER_PREFIX: &str = "ANDROID_EMU_CHECKSUM_HELPER_v";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncImpl {
    #[default]
    None,
    NativeSyncV2,
    NativeSyncV3,
    NativeSyncV4,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DmaImpl {
    #[default]
    None,
    V1,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum GlesMaxVersion {
    #[default]
    V2_0,
    V3_0,
    V3_1,
    V3_2,
}

impl GlesMaxVersion {
    /// Returns the version as (major, minor).
    pub fn major_minor(&self) -> (u32, u32) {
        match self {
            GlesMaxVersion::V2_0 => (2, 0),
            GlesMaxVersion::V3_0 => (3, 0),
            GlesMaxVersion::V3_1 => (3, 1),
            GlesMaxVersion::V3_2 => (3, 2),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostComposition {
    #[default]
    None,
    V1,
    V2,
}

/// What the host renderer supports. Built once by negotiation and never mutated afterwards.
///
/// The default value is the lowest level of every feature, which is also what a host that could
/// not answer the negotiation queries gets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostFeatures {
    pub renderer_version: u32,
    pub sync_impl: SyncImpl,
    pub dma_impl: DmaImpl,
    pub gles_max_version: GlesMaxVersion,
    pub host_composition: HostComposition,
    pub yuv_cache: bool,
    pub async_unmap_buffer: bool,
    pub direct_mem: bool,
    pub refcount_pipe: bool,
    pub vulkan: bool,
    /// Checksum version in use on the connection. Zero when none was selected.
    pub checksum_version: u32,
}

impl HostFeatures {
    /// Parses the space separated extension list returned by the host.
    pub fn from_extensions(renderer_version: u32, extensions: &str) -> HostFeatures {
        let mut features = HostFeatures {
            renderer_version,
            ..Default::default()
        };

        for token in extensions.split_ascii_whitespace() {
            match token {
                NATIVE_SYNC_V2 => features.sync_impl = features.sync_impl.max(SyncImpl::NativeSyncV2),
                NATIVE_SYNC_V3 => features.sync_impl = features.sync_impl.max(SyncImpl::NativeSyncV3),
                NATIVE_SYNC_V4 => features.sync_impl = features.sync_impl.max(SyncImpl::NativeSyncV4),
                DMA_V1 => features.dma_impl = DmaImpl::V1,
                GLES_MAX_VERSION_3_0 => {
                    features.gles_max_version = features.gles_max_version.max(GlesMaxVersion::V3_0)
                }
                GLES_MAX_VERSION_3_1 => {
                    features.gles_max_version = features.gles_max_version.max(GlesMaxVersion::V3_1)
                }
                GLES_MAX_VERSION_3_2 => {
                    features.gles_max_version = features.gles_max_version.max(GlesMaxVersion::V3_2)
                }
                HOST_COMPOSITION_V1 => {
                    features.host_composition = features.host_composition.max(HostComposition::V1)
                }
                HOST_COMPOSITION_V2 => {
                    features.host_composition = features.host_composition.max(HostComposition::V2)
                }
                YUV_CACHE => features.yuv_cache = true,
                ASYNC_UNMAP_BUFFER => features.async_unmap_buffer = true,
                DIRECT_MEM => features.direct_mem = true,
                REFCOUNT_PIPE => features.refcount_pipe = true,
                VULKAN => features.vulkan = true,
                _ => (),
            }
        }

        features
    }

    /// Highest checksum version offered by the host that the guest can produce.
    pub fn offered_checksum_version(extensions: &str) -> u32 {
        extensions
            .split_ascii_whitespace()
            .filter_map(|token| token.strip_prefix(CHECKSUM_HELPER_PREFIX))
            .filter_map(|version| version.parse::<u32>().ok())
            .filter(|version| *version <= MAX_CHECKSUM_VERSION)
            .max()
            .unwrap_or(0)
    }

    pub fn has_native_sync(&self) -> bool {
        self.sync_impl >= SyncImpl::NativeSyncV2
    }

    pub fn has_native_sync_v3(&self) -> bool {
        self.sync_impl >= SyncImpl::NativeSyncV3
    }

    pub fn has_native_sync_v4(&self) -> bool {
        self.sync_impl >= SyncImpl::NativeSyncV4
    }

    pub fn has_dma(&self) -> bool {
        self.dma_impl != DmaImpl::None
    }

    pub fn has_host_composition_v1(&self) -> bool {
        self.host_composition >= HostComposition::V1
    }

    pub fn has_host_composition_v2(&self) -> bool {
        self.host_composition >= HostComposition::V2
    }

    pub fn has_refcount_pipe(&self) -> bool {
        self.refcount_pipe
    }

    /// True if a context of GLES `major.minor` can be created on the host.
    pub fn supports_gles(&self, major: u32, minor: u32) -> bool {
        (major, minor) <= self.gles_max_version.major_minor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_extensions_are_lowest_level() {
        let features = HostFeatures::from_extensions(1, "");
        assert_eq!(features.sync_impl, SyncImpl::None);
        assert!(!features.has_native_sync());
        assert!(features.supports_gles(2, 0));
        assert!(!features.supports_gles(3, 0));
        assert_eq!(HostFeatures::offered_checksum_version(""), 0);
    }

    #[test]
    fn highest_level_wins_regardless_of_order() {
        let extensions = "ANDROID_EMU_native_sync_v4 ANDROID_EMU_native_sync_v2 \
                          ANDROID_EMU_gles_max_version_3_1 ANDROID_EMU_gles_max_version_3_0 \
                          ANDROID_EMU_host_composition_v2 ANDROID_EMU_refcount_pipe";
        let features = HostFeatures::from_extensions(2, extensions);
        assert_eq!(features.sync_impl, SyncImpl::NativeSyncV4);
        assert!(features.has_native_sync_v3());
        assert_eq!(features.gles_max_version, GlesMaxVersion::V3_1);
        assert!(features.supports_gles(3, 1));
        assert!(!features.supports_gles(3, 2));
        assert!(features.has_host_composition_v1());
        assert!(features.has_refcount_pipe());
        assert!(!features.vulkan);
    }

    #[test]
    fn unsupported_checksum_versions_are_ignored() {
        assert_eq!(
            HostFeatures::offered_checksum_version(
                "ANDROID_EMU_CHECKSUM_HELPER_v1 ANDROID_EMU_CHECKSUM_HELPER_v7"
            ),
            1
        );
        assert_eq!(
            HostFeatures::offered_checksum_version("ANDROID_EMU_CHECKSUM_HELPER_vX"),
            0
        );
    }
}
