//! Render System Configuration
//!
//! [`RenderSystemConfig`] sizes the per-frame pools and toggles ordering
//! behavior. It is plain data and can be loaded from any serde format.
//!
//! ```rust,ignore
//! use vesta_render::RenderSystemConfig;
//!
//! let config = RenderSystemConfig {
//!     buffer_pool_size: 4 * 1024 * 1024,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

/// Capacities and switches of a render system.
///
/// Pools are frame arenas: they are reset every frame and grow (with a log
/// line) when a frame needs more than the configured capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSystemConfig {
    /// Initial number of descriptor sets the frame descriptor pool holds.
    pub descriptor_pool_capacity: usize,

    /// Initial size in bytes of the frame constant-buffer pool.
    pub buffer_pool_size: usize,

    /// Alignment of every constant-buffer allocation, matching the device's
    /// uniform offset alignment.
    pub constant_buffer_alignment: usize,

    /// Initial length of each feature's flat resource group pool.
    pub initial_resource_group_pool_size: usize,

    /// Stable-sort every view stage's render nodes by feature index after
    /// extraction, so that draw batches one contiguous run per feature.
    pub sort_render_nodes_by_feature: bool,
}

impl Default for RenderSystemConfig {
    fn default() -> Self {
        Self {
            descriptor_pool_capacity: 16384,
            buffer_pool_size: 32 * 1024 * 1024,
            constant_buffer_alignment: 256,
            initial_resource_group_pool_size: 256,
            sort_render_nodes_by_feature: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: RenderSystemConfig =
            serde_json::from_str(r#"{ "buffer_pool_size": 1024 }"#).unwrap();
        assert_eq!(config.buffer_pool_size, 1024);
        assert_eq!(config.constant_buffer_alignment, 256);
        assert!(config.sort_render_nodes_by_feature);
    }
}
