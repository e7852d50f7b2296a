//! GPU-facing resource abstractions
//!
//! - [`BufferPool`] / [`DescriptorPool`]: per-frame arenas, reset every frame
//! - [`ResourceGroup`]: a descriptor set plus its constant-buffer region
//! - [`ResourceGroupLayout`] and the frame/view specializations, with
//!   constant-buffer offset resolution by member name
//! - [`ParameterCollection`]: typed parameter storage in a byte arena

mod parameters;
mod pools;
mod resource_group;

pub use parameters::{
    ParameterCollection, ParameterCollectionLayout, ParameterKey, ResourceParameter,
    ValueParameter,
};
pub use pools::{
    BufferPool, BufferPoolAllocation, BufferPoolAllocationType, DescriptorEntry, DescriptorPool,
    DescriptorSet, DescriptorSetId, ResourceValue,
};
pub use resource_group::{
    ConstantBufferOffsetReference, FrameLayoutId, FrameResourceGroupLayout, FrameResources,
    INVALID_OFFSET, ResourceGroup, ResourceGroupEntry, ResourceGroupLayout, ViewLayoutId,
    ViewResourceGroupLayout,
};
