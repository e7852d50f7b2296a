//! Frame Pools
//!
//! Pure logical arenas: they manage bytes and indices on the host and upload
//! once per frame. Both are reset at the beginning of every frame, which
//! invalidates every allocation handed out during the previous one.

use smallvec::SmallVec;

use crate::device::{
    BufferDescriptor, BufferHandle, DescriptorSetLayoutHandle, DeviceError, GraphicsDevice,
    SamplerHandle, TextureHandle,
};

// ============================================================================
// Buffer Pool
// ============================================================================

/// Usage hint of a constant-buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferPoolAllocationType {
    /// Written once, read by a single draw.
    UsedOnce,
    /// Shared by every draw of a view or frame.
    UsedMultipleTime,
}

/// A region of the frame constant-buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolAllocation {
    pub offset: u32,
    pub size: u32,
    pub ty: BufferPoolAllocationType,
}

/// Bump allocator for per-frame constant data.
pub struct BufferPool {
    /// Host copy, uploaded in one write per frame
    host_data: Vec<u8>,
    /// Current write position for this frame
    cursor: usize,
    alignment: usize,
    buffer: Option<BufferHandle>,
    /// The device buffer is smaller than `host_data`
    needs_recreate: bool,
}

impl BufferPool {
    #[must_use]
    pub fn new(size: usize, alignment: usize) -> Self {
        Self {
            host_data: vec![0; size.max(alignment)],
            cursor: 0,
            alignment: alignment.max(1),
            buffer: None,
            needs_recreate: true,
        }
    }

    /// Reset at the beginning of each frame
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn allocate(&mut self, size: usize, ty: BufferPoolAllocationType) -> BufferPoolAllocation {
        let offset = self.cursor.next_multiple_of(self.alignment);
        let end = offset + size;
        if end > self.host_data.len() {
            self.expand_capacity(end);
        }
        self.host_data[offset..end].fill(0);
        self.cursor = end;

        BufferPoolAllocation {
            offset: offset as u32,
            size: size as u32,
            ty,
        }
    }

    fn expand_capacity(&mut self, required: usize) {
        let mut new_cap = (self.host_data.len() * 2).max(4096);
        while new_cap < required {
            new_cap *= 2;
        }
        log::info!(
            "Constant buffer pool expanding capacity: {} -> {}",
            self.host_data.len(),
            new_cap
        );
        self.host_data.resize(new_cap, 0);
        self.needs_recreate = true;
    }

    /// Writes `value` at `offset` bytes into `allocation`. Out-of-range writes
    /// are dropped with a warning.
    pub fn write<T: bytemuck::Pod>(&mut self, allocation: BufferPoolAllocation, offset: usize, value: &T) {
        self.write_bytes(allocation, offset, bytemuck::bytes_of(value));
    }

    pub fn write_bytes(&mut self, allocation: BufferPoolAllocation, offset: usize, bytes: &[u8]) {
        if offset + bytes.len() > allocation.size as usize {
            log::warn!(
                "Ignoring constant write of {} bytes at {} past allocation size {}",
                bytes.len(),
                offset,
                allocation.size
            );
            return;
        }
        let start = allocation.offset as usize + offset;
        self.host_data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Reads back a value previously written into `allocation`.
    #[must_use]
    pub fn read<T: bytemuck::Pod>(&self, allocation: BufferPoolAllocation, offset: usize) -> T {
        let start = allocation.offset as usize + offset;
        bytemuck::pod_read_unaligned(&self.host_data[start..start + size_of::<T>()])
    }

    #[must_use]
    pub fn allocation_bytes(&self, allocation: BufferPoolAllocation) -> &[u8] {
        let start = allocation.offset as usize;
        &self.host_data[start..start + allocation.size as usize]
    }

    #[must_use]
    pub fn used_size(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.host_data.len()
    }

    /// Device buffer backing the pool, available after the first flush.
    #[must_use]
    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Uploads the bytes used this frame, recreating the device buffer after
    /// growth.
    pub fn flush(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        if self.needs_recreate || self.buffer.is_none() {
            if let Some(old) = self.buffer.take() {
                device.destroy_buffer(old);
            }
            self.buffer = Some(device.create_buffer(&BufferDescriptor {
                label: Some("FrameConstantBufferPool"),
                size: self.host_data.len() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })?);
            self.needs_recreate = false;
        }

        if self.cursor == 0 {
            return Ok(());
        }
        match self.buffer {
            Some(buffer) => device.write_buffer(buffer, 0, &self.host_data[..self.cursor]),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Descriptor Pool
// ============================================================================

/// A bindable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceValue {
    Texture(TextureHandle),
    Sampler(SamplerHandle),
    Buffer(BufferHandle),
}

impl From<TextureHandle> for ResourceValue {
    fn from(value: TextureHandle) -> Self {
        Self::Texture(value)
    }
}

impl From<SamplerHandle> for ResourceValue {
    fn from(value: SamplerHandle) -> Self {
        Self::Sampler(value)
    }
}

impl From<BufferHandle> for ResourceValue {
    fn from(value: BufferHandle) -> Self {
        Self::Buffer(value)
    }
}

/// Contents of one descriptor-set binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptorEntry {
    #[default]
    Empty,
    ConstantBuffer(BufferPoolAllocation),
    Resource(ResourceValue),
}

/// Index of a descriptor set in the frame [`DescriptorPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetId(pub u32);

#[derive(Debug, Clone)]
pub struct DescriptorSet {
    pub layout: DescriptorSetLayoutHandle,
    pub entries: SmallVec<[DescriptorEntry; 4]>,
}

/// Arena of descriptor sets for the current frame.
pub struct DescriptorPool {
    sets: Vec<DescriptorSet>,
    capacity: usize,
}

impl DescriptorPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            sets: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.sets.clear();
    }

    pub fn allocate(&mut self, layout: DescriptorSetLayoutHandle, entry_count: usize) -> DescriptorSetId {
        if self.sets.len() == self.capacity {
            let new_cap = self.capacity * 2;
            log::info!(
                "Descriptor pool expanding capacity: {} -> {}",
                self.capacity,
                new_cap
            );
            self.sets.reserve(new_cap - self.sets.len());
            self.capacity = new_cap;
        }

        let id = DescriptorSetId(self.sets.len() as u32);
        self.sets.push(DescriptorSet {
            layout,
            entries: SmallVec::from_elem(DescriptorEntry::Empty, entry_count),
        });
        id
    }

    pub fn set_entry(&mut self, set: DescriptorSetId, binding: usize, entry: DescriptorEntry) {
        if let Some(slot) = self
            .sets
            .get_mut(set.0 as usize)
            .and_then(|s| s.entries.get_mut(binding))
        {
            *slot = entry;
        }
    }

    #[must_use]
    pub fn get(&self, set: DescriptorSetId) -> Option<&DescriptorSet> {
        self.sets.get(set.0 as usize)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn allocations_are_aligned_and_reset() {
        let mut pool = BufferPool::new(1024, 256);
        let a = pool.allocate(64, BufferPoolAllocationType::UsedOnce);
        let b = pool.allocate(64, BufferPoolAllocationType::UsedOnce);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);

        pool.reset();
        let c = pool.allocate(16, BufferPoolAllocationType::UsedMultipleTime);
        assert_eq!(c.offset, 0);
    }

    #[test]
    fn pool_grows_and_recreates_device_buffer() {
        let mut device = HeadlessDevice::new();
        let mut pool = BufferPool::new(256, 256);
        pool.flush(&mut device).unwrap();
        let first = pool.buffer().unwrap();

        for _ in 0..4 {
            pool.allocate(200, BufferPoolAllocationType::UsedOnce);
        }
        assert!(pool.capacity() >= 1024);

        pool.flush(&mut device).unwrap();
        assert_ne!(pool.buffer(), Some(first));
        assert_eq!(device.live_buffer_count(), 1);
    }

    #[test]
    fn writes_stay_inside_allocation() {
        let mut pool = BufferPool::new(512, 16);
        let allocation = pool.allocate(16, BufferPoolAllocationType::UsedOnce);
        pool.write(allocation, 4, &7.5f32);
        assert!((pool.read::<f32>(allocation, 4) - 7.5).abs() < f32::EPSILON);

        pool.write(allocation, 12, &[1.0f32; 2]);
        assert_eq!(pool.read::<u32>(allocation, 12), 0);
    }

    #[test]
    fn descriptor_pool_grows_past_capacity() {
        let mut pool = DescriptorPool::new(2);
        for _ in 0..5 {
            pool.allocate(DescriptorSetLayoutHandle(0), 1);
        }
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.capacity(), 8);
        pool.reset();
        assert!(pool.is_empty());
    }
}
