//! Parameter Collections
//!
//! Typed parameter storage backed by one byte arena and an index table.
//!
//! Values are appended to the arena as they are first requested; arrays start
//! on a 16-byte boundary and use a 16-byte element stride, matching constant
//! buffer packing. [`ParameterCollection::update_layout`] rearranges the arena
//! so that its prefix matches a constant buffer byte for byte, after which the
//! prefix can be copied into a frame allocation as is.
//!
//! Handles ([`ValueParameter`], [`ResourceParameter`]) are plain offsets; they
//! are invalidated by a relayout and must be fetched again.

use std::fmt;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use vesta_core::{ObjectId, ObjectIdBuilder, Symbol, interner};

use super::pools::ResourceValue;
use crate::effect::EffectConstantBufferDescription;

const ARRAY_ALIGNMENT: usize = 16;
const VALUE_ALIGNMENT: usize = 4;

/// Typed name of a parameter.
pub struct ParameterKey<T> {
    name: Symbol,
    element_count: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ParameterKey<T> {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::array(name, 1)
    }

    #[must_use]
    pub fn array(name: &str, element_count: usize) -> Self {
        Self {
            name: interner::intern(name),
            element_count: element_count.max(1),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        interner::resolve(self.name)
    }

    #[must_use]
    pub fn element_count(&self) -> usize {
        self.element_count
    }
}

impl<T> Clone for ParameterKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ParameterKey<T> {}

impl<T> fmt::Debug for ParameterKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterKey")
            .field("name", &self.name())
            .field("element_count", &self.element_count)
            .finish()
    }
}

/// Location of a value parameter inside a collection's arena.
pub struct ValueParameter<T> {
    offset: usize,
    count: usize,
    stride: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ValueParameter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ValueParameter<T> {}

impl<T> ValueParameter<T> {
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Binding slot of a resource parameter.
pub struct ResourceParameter<T> {
    slot: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ResourceParameter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResourceParameter<T> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParameterEntry {
    Value {
        offset: usize,
        element_size: usize,
        count: usize,
    },
    Resource {
        slot: usize,
    },
}

impl ParameterEntry {
    fn stride(element_size: usize, count: usize) -> usize {
        if count > 1 {
            element_size.next_multiple_of(ARRAY_ALIGNMENT)
        } else {
            element_size
        }
    }
}

/// Forced arrangement of a collection, usually derived from a constant buffer.
#[derive(Debug, Clone, Default)]
pub struct ParameterCollectionLayout {
    entries: Vec<(Symbol, ParameterEntry)>,
    buffer_size: usize,
    resource_count: usize,
}

impl ParameterCollectionLayout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places each member of `cb` at its reflected offset.
    #[must_use]
    pub fn from_constant_buffer(cb: &EffectConstantBufferDescription) -> Self {
        let entries = cb
            .members
            .iter()
            .map(|member| {
                (
                    interner::intern(&member.key_name),
                    ParameterEntry::Value {
                        offset: member.offset as usize,
                        element_size: member.size as usize,
                        count: 1,
                    },
                )
            })
            .collect();
        Self {
            entries,
            buffer_size: cb.size as usize,
            resource_count: 0,
        }
    }

    pub fn add_resource(&mut self, name: &str) -> &mut Self {
        self.entries.push((
            interner::intern(name),
            ParameterEntry::Resource {
                slot: self.resource_count,
            },
        ));
        self.resource_count += 1;
        self
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub fn hash(&self) -> ObjectId {
        let mut builder = ObjectIdBuilder::new();
        builder.write_u64(self.buffer_size as u64);
        for (key, entry) in &self.entries {
            builder.write_str(interner::resolve(*key));
            match *entry {
                ParameterEntry::Value {
                    offset,
                    element_size,
                    count,
                } => builder
                    .write_u64(offset as u64)
                    .write_u64(element_size as u64)
                    .write_u64(count as u64),
                ParameterEntry::Resource { slot } => builder.write_u64(u64::MAX).write_u64(slot as u64),
            };
        }
        builder.finish()
    }
}

/// Typed parameters in a byte arena plus a resource table.
#[derive(Debug, Clone, Default)]
pub struct ParameterCollection {
    keys: Vec<(Symbol, ParameterEntry)>,
    lookup: FxHashMap<Symbol, usize>,
    data: Vec<u8>,
    resources: Vec<Option<ResourceValue>>,
    layout_hash: Option<ObjectId>,
}

impl ParameterCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: Symbol) -> Option<ParameterEntry> {
        self.lookup.get(&key).map(|&index| self.keys[index].1)
    }

    fn push_entry(&mut self, key: Symbol, entry: ParameterEntry) {
        self.lookup.insert(key, self.keys.len());
        self.keys.push((key, entry));
    }

    /// Appends a value slot and returns its offset.
    fn append_value(&mut self, key: Symbol, element_size: usize, count: usize) -> usize {
        let alignment = if count > 1 { ARRAY_ALIGNMENT } else { VALUE_ALIGNMENT };
        let offset = self.data.len().next_multiple_of(alignment);
        self.data
            .resize(offset + ParameterEntry::stride(element_size, count) * count, 0);
        self.push_entry(
            key,
            ParameterEntry::Value {
                offset,
                element_size,
                count,
            },
        );
        offset
    }

    /// Returns the value slot of `key`, appending it on first use.
    pub fn get_value_parameter<T: bytemuck::Pod>(&mut self, key: &ParameterKey<T>) -> ValueParameter<T> {
        let (offset, element_size, count) = match self.entry(key.name) {
            Some(ParameterEntry::Value {
                offset,
                element_size,
                count,
            }) => (offset, element_size, count),
            _ => {
                let offset = self.append_value(key.name, size_of::<T>(), key.element_count);
                (offset, size_of::<T>(), key.element_count)
            }
        };
        ValueParameter {
            offset,
            count,
            stride: ParameterEntry::stride(element_size, count),
            _marker: PhantomData,
        }
    }

    pub fn set_value<T: bytemuck::Pod>(&mut self, parameter: ValueParameter<T>, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        let end = parameter.offset + bytes.len();
        if let Some(target) = self.data.get_mut(parameter.offset..end) {
            target.copy_from_slice(bytes);
        }
    }

    /// Writes array elements; extra values beyond the parameter's count are ignored.
    pub fn set_values<T: bytemuck::Pod>(&mut self, parameter: ValueParameter<T>, values: &[T]) {
        for (index, value) in values.iter().take(parameter.count).enumerate() {
            let start = parameter.offset + index * parameter.stride;
            let bytes = bytemuck::bytes_of(value);
            if let Some(target) = self.data.get_mut(start..start + bytes.len()) {
                target.copy_from_slice(bytes);
            }
        }
    }

    #[must_use]
    pub fn get_value<T: bytemuck::Pod>(&self, parameter: ValueParameter<T>) -> T {
        self.read_at(parameter.offset).unwrap_or_else(T::zeroed)
    }

    #[must_use]
    pub fn get_values<T: bytemuck::Pod>(&self, parameter: ValueParameter<T>) -> Vec<T> {
        (0..parameter.count)
            .map(|index| {
                self.read_at(parameter.offset + index * parameter.stride)
                    .unwrap_or_else(T::zeroed)
            })
            .collect()
    }

    fn read_at<T: bytemuck::Pod>(&self, offset: usize) -> Option<T> {
        self.data
            .get(offset..offset + size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
    }

    /// Convenience: fetch-or-create the slot and write `value`.
    pub fn set<T: bytemuck::Pod>(&mut self, key: &ParameterKey<T>, value: T) {
        let parameter = self.get_value_parameter(key);
        self.set_value(parameter, &value);
    }

    /// Reads a value without creating its slot.
    #[must_use]
    pub fn get<T: bytemuck::Pod>(&self, key: &ParameterKey<T>) -> Option<T> {
        match self.entry(key.name)? {
            ParameterEntry::Value { offset, .. } => self.read_at(offset),
            ParameterEntry::Resource { .. } => None,
        }
    }

    pub fn get_resource_parameter<T: Into<ResourceValue>>(
        &mut self,
        key: &ParameterKey<T>,
    ) -> ResourceParameter<T> {
        let slot = if let Some(ParameterEntry::Resource { slot }) = self.entry(key.name) {
            slot
        } else {
            let slot = self.resources.len();
            self.resources.push(None);
            self.push_entry(key.name, ParameterEntry::Resource { slot });
            slot
        };
        ResourceParameter {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn set_resource<T: Into<ResourceValue>>(&mut self, parameter: ResourceParameter<T>, value: T) {
        if let Some(slot) = self.resources.get_mut(parameter.slot) {
            *slot = Some(value.into());
        }
    }

    #[must_use]
    pub fn get_resource<T>(&self, parameter: ResourceParameter<T>) -> Option<ResourceValue> {
        self.resources.get(parameter.slot).copied().flatten()
    }

    /// Resource stored under `name`, if any.
    #[must_use]
    pub fn resource_by_name(&self, name: &str) -> Option<ResourceValue> {
        match self.entry(interner::get(name)?)? {
            ParameterEntry::Resource { slot } => self.resources.get(slot).copied().flatten(),
            ParameterEntry::Value { .. } => None,
        }
    }

    /// Raw arena bytes; after [`update_layout`](Self::update_layout) the first
    /// `layout.buffer_size()` bytes mirror the layout's constant buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Moves values to the positions `layout` forces and appends every other
    /// parameter after them. Existing values are preserved.
    pub fn update_layout(&mut self, layout: &ParameterCollectionLayout) {
        let hash = layout.hash();
        if self.layout_hash == Some(hash) {
            return;
        }

        let old = std::mem::take(self);
        let mut next = Self {
            data: vec![0; layout.buffer_size],
            resources: vec![None; layout.resource_count],
            ..Self::default()
        };

        for &(key, entry) in &layout.entries {
            next.push_entry(key, entry);
            next.copy_from(&old, key, entry);
        }

        for &(key, entry) in &old.keys {
            if next.lookup.contains_key(&key) {
                continue;
            }
            let new_entry = match entry {
                ParameterEntry::Value {
                    element_size,
                    count,
                    ..
                } => ParameterEntry::Value {
                    offset: next.append_value(key, element_size, count),
                    element_size,
                    count,
                },
                ParameterEntry::Resource { .. } => {
                    let slot = next.resources.len();
                    next.resources.push(None);
                    let entry = ParameterEntry::Resource { slot };
                    next.push_entry(key, entry);
                    entry
                }
            };
            next.copy_from(&old, key, new_entry);
        }

        next.layout_hash = Some(hash);
        *self = next;
    }

    fn copy_from(&mut self, old: &Self, key: Symbol, entry: ParameterEntry) {
        match (old.entry(key), entry) {
            (
                Some(ParameterEntry::Value {
                    offset: src,
                    element_size: src_size,
                    count: src_count,
                }),
                ParameterEntry::Value {
                    offset: dst,
                    element_size: dst_size,
                    count: dst_count,
                },
            ) => {
                let len = (ParameterEntry::stride(src_size, src_count) * src_count)
                    .min(ParameterEntry::stride(dst_size, dst_count) * dst_count)
                    .min(old.data.len().saturating_sub(src))
                    .min(self.data.len().saturating_sub(dst));
                self.data[dst..dst + len].copy_from_slice(&old.data[src..src + len]);
            }
            (Some(ParameterEntry::Resource { slot: src }), ParameterEntry::Resource { slot: dst }) => {
                if let Some(target) = self.resources.get_mut(dst) {
                    *target = old.resources.get(src).copied().flatten();
                }
            }
            _ => {}
        }
    }
}
