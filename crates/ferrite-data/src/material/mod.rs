// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Versioned material tables.
//!
//! A [`MaterialSet`] maps material ids to a record in a device-side table
//! and to reference-counted image slots. Sets are never edited after they are
//! published: an update clones the current generation with
//! [`MaterialSet::next_generation`], rewrites the records that changed, and
//! publishes the clone as a fresh `Arc<MaterialSet>`. Frames still holding
//! the previous `Arc` keep seeing the previous bindings.

use crate::objects::{Buffer, Image};
use bytemuck::{Pod, Zeroable};
use ferrite_core::gpu::ImageId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Identifier of a material, chosen by the scene layer.
pub type MaterialId = u32;

/// Maximum number of images one material can bind.
pub const MAX_MATERIAL_IMAGES: usize = 4;

/// Marks an unused image entry in a [`MaterialRecord`].
pub const EMPTY_SLOT: u32 = u32::MAX;

/// Errors raised while updating a material set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MaterialError {
    /// The set already binds as many distinct images as it may.
    #[error("Material set is out of image slots (limit {limit})")]
    SlotsExhausted {
        /// Configured slot limit.
        limit: u32,
    },
    /// A material binds more images than a record can hold.
    #[error("Material {material} binds {count} images, at most 4 are supported")]
    TooManyImages {
        /// The offending material.
        material: MaterialId,
        /// Number of images it binds.
        count: usize,
    },
}

/// A material: a pipeline plus the images it samples.
#[derive(Debug, Clone)]
pub struct Material {
    id: MaterialId,
    pipeline: u32,
    images: Vec<Arc<Image>>,
}

impl Material {
    /// Creates a material.
    pub fn new(id: MaterialId, pipeline: u32, images: Vec<Arc<Image>>) -> Self {
        Self {
            id,
            pipeline,
            images,
        }
    }

    /// Material id.
    pub fn id(&self) -> MaterialId {
        self.id
    }

    /// Pipeline index the material is drawn with.
    pub fn pipeline(&self) -> u32 {
        self.pipeline
    }

    /// Sampled images.
    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }
}

/// A batch of material changes submitted to a material attachment.
#[derive(Debug, Clone, Default)]
pub struct MaterialInputData {
    /// Materials to add or replace.
    pub materials: Vec<Arc<Material>>,
    /// Materials to remove.
    pub removed: Vec<MaterialId>,
}

impl MaterialInputData {
    /// Returns `true` if the batch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty() && self.removed.is_empty()
    }
}

/// One entry of the device-side material table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct MaterialRecord {
    /// Material id.
    pub id: u32,
    /// Pipeline index.
    pub pipeline: u32,
    /// Number of valid entries in `slots`.
    pub image_count: u32,
    /// `1` for a live record, `0` for a free one.
    pub live: u32,
    /// Image slot per bound image, [`EMPTY_SLOT`] when unused.
    pub slots: [u32; MAX_MATERIAL_IMAGES],
}

#[derive(Debug, Clone)]
struct MaterialSlot {
    image: Arc<Image>,
    ref_count: u32,
}

/// Reference-counted assignment of images to descriptor slots.
#[derive(Debug, Clone, Default)]
pub struct MaterialLayout {
    slots: Vec<Option<MaterialSlot>>,
    used_slots: u32,
}

impl MaterialLayout {
    /// Number of occupied slots.
    pub fn used_slots(&self) -> u32 {
        self.used_slots
    }

    /// Highest slot index in use plus one.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The image bound to `slot`.
    pub fn image(&self, slot: u32) -> Option<&Arc<Image>> {
        self.slots
            .get(slot as usize)
            .and_then(|s| s.as_ref())
            .map(|s| &s.image)
    }

    /// How many material bindings reference `slot`.
    pub fn ref_count(&self, slot: u32) -> u32 {
        self.slots
            .get(slot as usize)
            .and_then(|s| s.as_ref())
            .map_or(0, |s| s.ref_count)
    }

    fn find(&self, image: ImageId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.image.id() == image))
    }

    fn acquire(&mut self, image: &Arc<Image>, limit: u32) -> Result<u32, MaterialError> {
        if let Some(index) = self.find(image.id()) {
            if let Some(slot) = self.slots[index].as_mut() {
                slot.ref_count += 1;
            }
            return Ok(index as u32);
        }

        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None if (self.slots.len() as u32) < limit => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(MaterialError::SlotsExhausted { limit }),
        };
        self.slots[index] = Some(MaterialSlot {
            image: image.clone(),
            ref_count: 1,
        });
        self.used_slots += 1;
        Ok(index as u32)
    }

    fn release(&mut self, slot: u32) {
        let Some(entry) = self.slots.get_mut(slot as usize) else {
            return;
        };
        let emptied = match entry.as_mut() {
            Some(s) => {
                s.ref_count = s.ref_count.saturating_sub(1);
                s.ref_count == 0
            }
            None => false,
        };
        if emptied {
            *entry = None;
            self.used_slots -= 1;
        }
    }
}

/// One generation of the material table.
#[derive(Debug, Clone)]
pub struct MaterialSet {
    generation: u64,
    max_slots: u32,
    layout: MaterialLayout,
    records: Vec<MaterialRecord>,
    free_records: Vec<usize>,
    index: HashMap<MaterialId, usize>,
    materials: HashMap<MaterialId, Arc<Material>>,
    buffer: Option<Arc<Buffer>>,
}

impl MaterialSet {
    /// An empty generation-zero set allowing `max_slots` distinct images.
    pub fn new(max_slots: u32) -> Self {
        Self {
            generation: 0,
            max_slots,
            layout: MaterialLayout::default(),
            records: Vec::new(),
            free_records: Vec::new(),
            index: HashMap::new(),
            materials: HashMap::new(),
            buffer: None,
        }
    }

    /// Generation number; grows by one per published update.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A mutable copy of this set with the next generation number and no
    /// device table yet.
    pub fn next_generation(&self) -> Self {
        let mut next = self.clone();
        next.generation += 1;
        next.buffer = None;
        next
    }

    /// Applies a batch of changes and returns the indices of the records
    /// that were rewritten.
    ///
    /// Removals apply first. Records of untouched materials keep their bytes.
    pub fn update(&mut self, input: &MaterialInputData) -> Result<Vec<usize>, MaterialError> {
        let mut changed = Vec::new();

        for id in &input.removed {
            if let Some(record) = self.index.remove(id) {
                self.release_record(record);
                self.records[record] = MaterialRecord::default();
                self.free_records.push(record);
                self.materials.remove(id);
                changed.push(record);
            }
        }

        for material in &input.materials {
            if material.images().len() > MAX_MATERIAL_IMAGES {
                return Err(MaterialError::TooManyImages {
                    material: material.id(),
                    count: material.images().len(),
                });
            }

            let mut slots = [EMPTY_SLOT; MAX_MATERIAL_IMAGES];
            for (slot, image) in slots.iter_mut().zip(material.images()) {
                *slot = self.layout.acquire(image, self.max_slots)?;
            }

            let record = match self.index.get(&material.id()) {
                Some(&existing) => {
                    self.release_record(existing);
                    existing
                }
                None => {
                    let record = match self.free_records.pop() {
                        Some(free) => free,
                        None => {
                            self.records.push(MaterialRecord::default());
                            self.records.len() - 1
                        }
                    };
                    self.index.insert(material.id(), record);
                    record
                }
            };

            self.records[record] = MaterialRecord {
                id: material.id(),
                pipeline: material.pipeline(),
                image_count: material.images().len() as u32,
                live: 1,
                slots,
            };
            self.materials.insert(material.id(), material.clone());
            changed.push(record);
        }

        changed.sort_unstable();
        changed.dedup();
        Ok(changed)
    }

    fn release_record(&mut self, record: usize) {
        let entry = self.records[record];
        for slot in entry.slots.iter().take(entry.image_count as usize) {
            self.layout.release(*slot);
        }
    }

    /// The material with the given id.
    pub fn material(&self, id: MaterialId) -> Option<&Arc<Material>> {
        self.materials.get(&id)
    }

    /// Table index of a material, as stored in [`Vertex::material`](crate::vertex::Vertex).
    pub fn record_index(&self, id: MaterialId) -> Option<u32> {
        self.index.get(&id).map(|&i| i as u32)
    }

    /// The record of a material.
    pub fn record(&self, id: MaterialId) -> Option<&MaterialRecord> {
        self.index.get(&id).map(|&i| &self.records[i])
    }

    /// All records, free ones included.
    pub fn records(&self) -> &[MaterialRecord] {
        &self.records
    }

    /// Image slot assignment.
    pub fn layout(&self) -> &MaterialLayout {
        &self.layout
    }

    /// Number of live materials.
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Returns `true` if the set holds no material.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// The table as uploaded to the device.
    pub fn encode(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    /// Size of the device table; never zero, so an empty set still gets a
    /// bindable buffer.
    pub fn table_size(&self) -> u64 {
        let record = std::mem::size_of::<MaterialRecord>() as u64;
        (self.records.len() as u64 * record).max(record)
    }

    /// Attaches the device table of this generation.
    pub fn set_buffer(&mut self, buffer: Arc<Buffer>) {
        self.buffer = Some(buffer);
    }

    /// Device table of this generation, once compiled.
    pub fn buffer(&self) -> Option<&Arc<Buffer>> {
        self.buffer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(id: MaterialId, pipeline: u32) -> Arc<Material> {
        Arc::new(Material::new(id, pipeline, Vec::new()))
    }

    #[test]
    fn record_is_32_bytes() {
        assert_eq!(std::mem::size_of::<MaterialRecord>(), 32);
    }

    #[test]
    fn next_generation_leaves_previous_untouched() {
        let mut first = MaterialSet::new(16);
        first
            .update(&MaterialInputData {
                materials: vec![material(1, 10)],
                removed: vec![],
            })
            .unwrap();
        let first = Arc::new(first);

        let mut second = first.next_generation();
        second
            .update(&MaterialInputData {
                materials: vec![material(1, 20)],
                removed: vec![],
            })
            .unwrap();

        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(first.record(1).unwrap().pipeline, 10);
        assert_eq!(second.record(1).unwrap().pipeline, 20);
    }

    #[test]
    fn update_rewrites_only_changed_records() {
        let mut set = MaterialSet::new(16);
        set.update(&MaterialInputData {
            materials: vec![material(1, 1), material(2, 2), material(3, 3)],
            removed: vec![],
        })
        .unwrap();

        let mut next = set.next_generation();
        let changed = next
            .update(&MaterialInputData {
                materials: vec![material(2, 9)],
                removed: vec![],
            })
            .unwrap();

        assert_eq!(changed, vec![next.record_index(2).unwrap() as usize]);
        assert_eq!(next.record(1), set.record(1));
        assert_eq!(next.record(3), set.record(3));
    }

    #[test]
    fn removed_records_are_reused() {
        let mut set = MaterialSet::new(16);
        set.update(&MaterialInputData {
            materials: vec![material(1, 1), material(2, 2)],
            removed: vec![],
        })
        .unwrap();
        let freed = set.record_index(1).unwrap();

        set.update(&MaterialInputData {
            materials: vec![material(5, 5)],
            removed: vec![1],
        })
        .unwrap();

        assert!(set.material(1).is_none());
        assert_eq!(set.record_index(5), Some(freed));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn empty_set_still_has_a_table() {
        let set = MaterialSet::new(4);
        assert!(set.is_empty());
        assert_eq!(set.table_size(), 32);
        assert!(set.encode().is_empty());
    }
}
