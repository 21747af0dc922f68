//! Per-instance records and the CPU-side instance store.
//!
//! The store owns the authoritative instance list for one (mesh, material)
//! pairing. GPU upload happens through an [`InstanceSink`], which lets the
//! capacity policies run without a device.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec4};
use std::mem;

use crate::renderer::error::RenderError;

/// Default number of instances a batch reserves up front.
pub const DEFAULT_INSTANCE_CAPACITY: usize = 512;

/// One instanced draw record: color, model matrix, normal matrix.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct InstanceRecord {
    pub color: [f32; 4],
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
}

impl InstanceRecord {
    pub const ATTRS: [wgpu::VertexAttribute; 8] = wgpu::vertex_attr_array![
        4 => Float32x4,
        5 => Float32x4,
        6 => Float32x4,
        7 => Float32x4,
        8 => Float32x4,
        9 => Float32x3,
        10 => Float32x3,
        11 => Float32x3
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRecord>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }

    pub fn new(model: Mat4, color: Vec4) -> Self {
        Self::with_mode(model, color, NormalMatrixMode::UpperLeft)
    }

    pub fn with_mode(model: Mat4, color: Vec4, mode: NormalMatrixMode) -> Self {
        Self {
            color: color.to_array(),
            model: model.to_cols_array_2d(),
            normal: mode.derive(model).to_cols_array_2d(),
        }
    }

    /// Writes the model matrix and the normal matrix derived from it.
    pub fn set_model(&mut self, model: Mat4, mode: NormalMatrixMode) {
        self.model = model.to_cols_array_2d();
        self.normal = mode.derive(model).to_cols_array_2d();
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }

    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_cols_array_2d(&self.normal)
    }

    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }
}

/// How the per-instance normal matrix is derived from the model matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NormalMatrixMode {
    /// Upper-left 3x3 of the model matrix. Exact for rotation + uniform scale.
    #[default]
    UpperLeft,
    /// Inverse-transpose of the upper-left 3x3; correct under non-uniform scale.
    InverseTranspose,
}

impl NormalMatrixMode {
    pub fn derive(self, model: Mat4) -> Mat3 {
        let linear = Mat3::from_mat4(model);
        match self {
            NormalMatrixMode::UpperLeft => linear,
            NormalMatrixMode::InverseTranspose => {
                if linear.determinant().abs() <= f32::EPSILON {
                    linear
                } else {
                    linear.inverse().transpose()
                }
            }
        }
    }
}

/// Capacity behaviour of an instance store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Capacity doubles on demand. `limit` caps the live count when set.
    Growable { limit: Option<usize> },
    /// Fixed bound; `push` flushes and resets before accepting an overflow.
    Bounded { max: usize },
}

impl CapacityPolicy {
    pub fn initial_capacity(&self, requested: usize) -> usize {
        match *self {
            CapacityPolicy::Growable { limit: Some(limit) } => requested.min(limit).max(1),
            CapacityPolicy::Growable { limit: None } => requested.max(1),
            CapacityPolicy::Bounded { max } => max.max(1),
        }
    }
}

/// Destination of flushed instance ranges.
pub trait InstanceSink {
    fn submit(&mut self, records: &[InstanceRecord]) -> Result<(), RenderError>;
}

#[derive(Debug, Clone)]
pub struct InstanceStore {
    records: Vec<InstanceRecord>,
    capacity: usize,
    policy: CapacityPolicy,
    normal_mode: NormalMatrixMode,
    grown: bool,
}

impl InstanceStore {
    pub fn new(policy: CapacityPolicy, initial_capacity: usize) -> Self {
        let capacity = policy.initial_capacity(initial_capacity);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            policy,
            normal_mode: NormalMatrixMode::default(),
            grown: false,
        }
    }

    pub fn growable(initial_capacity: usize) -> Self {
        Self::new(CapacityPolicy::Growable { limit: None }, initial_capacity)
    }

    pub fn bounded(max: usize) -> Self {
        Self::new(CapacityPolicy::Bounded { max }, max)
    }

    pub fn with_normal_mode(mut self, mode: NormalMatrixMode) -> Self {
        self.normal_mode = mode;
        self
    }

    pub fn normal_mode(&self) -> NormalMatrixMode {
        self.normal_mode
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        match self.policy {
            CapacityPolicy::Bounded { max } => self.records.len() >= max,
            CapacityPolicy::Growable { limit: Some(limit) } => self.records.len() >= limit,
            CapacityPolicy::Growable { limit: None } => false,
        }
    }

    pub fn records(&self) -> &[InstanceRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&InstanceRecord> {
        self.records.get(index)
    }

    /// Returns true once after the capacity changed.
    pub fn take_growth(&mut self) -> bool {
        std::mem::take(&mut self.grown)
    }

    /// Appends a zeroed record and returns its index.
    pub fn add_instance(&mut self) -> Result<usize, RenderError> {
        self.ensure_room()?;
        self.records.push(InstanceRecord::zeroed());
        Ok(self.records.len() - 1)
    }

    pub fn add_instance_with(&mut self, model: Mat4, color: Vec4) -> Result<usize, RenderError> {
        self.ensure_room()?;
        self.records
            .push(InstanceRecord::with_mode(model, color, self.normal_mode));
        Ok(self.records.len() - 1)
    }

    pub fn update_instance(&mut self, index: usize, model: Mat4) -> Result<(), RenderError> {
        let mode = self.normal_mode;
        self.record_mut(index)?.set_model(model, mode);
        Ok(())
    }

    pub fn update_instance_with_color(
        &mut self,
        index: usize,
        model: Mat4,
        color: Vec4,
    ) -> Result<(), RenderError> {
        let mode = self.normal_mode;
        let record = self.record_mut(index)?;
        record.set_model(model, mode);
        record.color = color.to_array();
        Ok(())
    }

    /// Removes one record; every later index shifts down by one.
    pub fn remove_instance(&mut self, index: usize) -> Result<InstanceRecord, RenderError> {
        if index >= self.records.len() {
            return Err(RenderError::InvalidInstance {
                index,
                len: self.records.len(),
            });
        }
        Ok(self.records.remove(index))
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Submits the live range and leaves the records in place.
    pub fn draw<S: InstanceSink>(&self, sink: &mut S) -> Result<usize, RenderError> {
        if self.records.is_empty() {
            return Ok(0);
        }
        sink.submit(&self.records)?;
        Ok(self.records.len())
    }

    /// Submits the live range and resets the count.
    pub fn flush<S: InstanceSink>(&mut self, sink: &mut S) -> Result<usize, RenderError> {
        let drawn = self.draw(sink)?;
        self.records.clear();
        Ok(drawn)
    }

    /// Adds an instance, flushing first when a bounded store is full.
    ///
    /// Returns the index of the new record. Growable stores never flush here
    /// and report `CapacityExceeded` at their limit instead.
    pub fn push<S: InstanceSink>(
        &mut self,
        model: Mat4,
        color: Vec4,
        sink: &mut S,
    ) -> Result<usize, RenderError> {
        if let CapacityPolicy::Bounded { max } = self.policy {
            if self.records.len() >= max {
                log::debug!("Instance batch full at {}, flushing", max);
                self.flush(sink)?;
            }
        }
        self.add_instance_with(model, color)
    }

    fn record_mut(&mut self, index: usize) -> Result<&mut InstanceRecord, RenderError> {
        let len = self.records.len();
        self.records
            .get_mut(index)
            .ok_or(RenderError::InvalidInstance { index, len })
    }

    fn ensure_room(&mut self) -> Result<(), RenderError> {
        let required = self.records.len() + 1;
        match self.policy {
            CapacityPolicy::Bounded { max } => {
                if required > max {
                    return Err(RenderError::CapacityExceeded {
                        what: "instance batch",
                        limit: max,
                    });
                }
            }
            CapacityPolicy::Growable { limit } => {
                if let Some(limit) = limit {
                    if required > limit {
                        return Err(RenderError::CapacityExceeded {
                            what: "instance batch",
                            limit,
                        });
                    }
                }
                if required > self.capacity {
                    let mut new_capacity = required.max(self.capacity * 2);
                    if let Some(limit) = limit {
                        new_capacity = new_capacity.min(limit);
                    }
                    log::info!(
                        "Growing instance store: {} -> {}",
                        self.capacity,
                        new_capacity
                    );
                    self.records.reserve(new_capacity - self.records.len());
                    self.capacity = new_capacity;
                    self.grown = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[derive(Default)]
    struct Recorder {
        batches: Vec<usize>,
    }

    impl InstanceSink for Recorder {
        fn submit(&mut self, records: &[InstanceRecord]) -> Result<(), RenderError> {
            self.batches.push(records.len());
            Ok(())
        }
    }

    #[test]
    fn record_is_29_floats() {
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 29 * 4);
        assert_eq!(
            InstanceRecord::layout().array_stride,
            std::mem::size_of::<InstanceRecord>() as wgpu::BufferAddress
        );
    }

    #[test]
    fn instance_attributes_start_after_mesh_locations() {
        let locations: Vec<u32> = InstanceRecord::ATTRS
            .iter()
            .map(|a| a.shader_location)
            .collect();
        assert_eq!(locations, (4..=11).collect::<Vec<_>>());
        let offsets: Vec<u64> = InstanceRecord::ATTRS.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32, 48, 64, 80, 92, 104]);
    }

    #[test]
    fn add_instance_is_zeroed() {
        let mut store = InstanceStore::growable(4);
        let index = store.add_instance().unwrap();
        assert_eq!(index, 0);
        assert_eq!(store.get(0), Some(&InstanceRecord::zeroed()));
    }

    #[test]
    fn update_writes_upper_left_normal_matrix() {
        let mut store = InstanceStore::growable(4);
        let index = store.add_instance().unwrap();
        let model = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::from_rotation_y(0.7),
            Vec3::new(1.0, 2.0, 3.0),
        );
        store.update_instance(index, model).unwrap();

        let record = store.get(index).unwrap();
        assert_eq!(record.model_matrix(), model);
        assert_eq!(record.normal_matrix(), Mat3::from_mat4(model));
        assert_eq!(record.color, [0.0; 4]);
    }

    #[test]
    fn update_with_color_sets_color() {
        let mut store = InstanceStore::growable(1);
        store.add_instance().unwrap();
        store
            .update_instance_with_color(0, Mat4::IDENTITY, Vec4::new(1.0, 0.5, 0.25, 1.0))
            .unwrap();
        assert_eq!(store.get(0).unwrap().color, [1.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn inverse_transpose_mode_differs_under_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let upper = NormalMatrixMode::UpperLeft.derive(model);
        let fixed = NormalMatrixMode::InverseTranspose.derive(model);
        assert_ne!(upper, fixed);
        assert!((fixed.x_axis.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_update_is_rejected() {
        let mut store = InstanceStore::growable(2);
        store.add_instance().unwrap();
        assert!(matches!(
            store.update_instance(3, Mat4::IDENTITY),
            Err(RenderError::InvalidInstance { index: 3, len: 1 })
        ));
        assert!(store.remove_instance(1).is_err());
    }

    #[test]
    fn growable_store_doubles_capacity() {
        let mut store = InstanceStore::growable(2);
        for _ in 0..3 {
            store.add_instance().unwrap();
        }
        assert_eq!(store.capacity(), 4);
        assert!(store.take_growth());
        assert!(!store.take_growth());
        for _ in 0..2 {
            store.add_instance().unwrap();
        }
        assert_eq!(store.capacity(), 8);
    }

    #[test]
    fn growable_limit_reports_capacity_exceeded() {
        let mut store = InstanceStore::new(CapacityPolicy::Growable { limit: Some(3) }, 2);
        for _ in 0..3 {
            store.add_instance().unwrap();
        }
        assert_eq!(store.capacity(), 3);
        assert!(matches!(
            store.add_instance(),
            Err(RenderError::CapacityExceeded { limit: 3, .. })
        ));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn remove_shifts_following_indices() {
        let mut store = InstanceStore::growable(4);
        for i in 0..3 {
            store
                .add_instance_with(Mat4::IDENTITY, Vec4::splat(i as f32))
                .unwrap();
        }
        store.remove_instance(0).unwrap();
        assert_eq!(store.get(0).unwrap().color, [1.0; 4]);
        assert_eq!(store.get(1).unwrap().color, [2.0; 4]);
        assert_eq!(store.get(2), None);
    }

    #[test]
    fn draw_keeps_records_and_flush_resets() {
        let mut store = InstanceStore::growable(4);
        store.add_instance().unwrap();
        store.add_instance().unwrap();
        let mut sink = Recorder::default();

        assert_eq!(store.draw(&mut sink).unwrap(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.flush(&mut sink).unwrap(), 2);
        assert!(store.is_empty());
        assert_eq!(store.flush(&mut sink).unwrap(), 0);
        assert_eq!(sink.batches, vec![2, 2]);
    }

    #[test]
    fn bounded_add_rejects_when_full() {
        let mut store = InstanceStore::bounded(2);
        store.add_instance().unwrap();
        store.add_instance().unwrap();
        assert!(store.is_full());
        assert!(store.add_instance().is_err());
    }

    #[test]
    fn bounded_push_flushes_once_before_overflow() {
        let mut store = InstanceStore::bounded(3);
        let mut sink = Recorder::default();
        for _ in 0..3 {
            store.push(Mat4::IDENTITY, Vec4::ONE, &mut sink).unwrap();
        }
        assert!(sink.batches.is_empty());

        let index = store.push(Mat4::IDENTITY, Vec4::ONE, &mut sink).unwrap();
        assert_eq!(index, 0);
        assert_eq!(sink.batches, vec![3]);
        assert_eq!(store.len(), 1);
    }
}
