//! Typed device buffers with automatic resizing
//!
//! Buffers grow when incoming data exceeds capacity, at least doubling so
//! repeated writes of slowly growing data reallocate rarely. They never
//! shrink.

use std::cell::Cell;
use std::rc::Rc;

use bytemuck::Zeroable;

use super::data_type::{type_label, BufferElement, RenderDataType};
use super::render_context::RenderContext;
use crate::device::{BufferId, BufferTarget};
use crate::error::RenderError;

/// A device array of one fixed semantic element type.
///
/// Holds elements of `data_type`, `array_count` of them per logical entry
/// (e.g. a `[Vec3; 3]` buffer is `Vector3Float` x 3). Length and capacity
/// count logical entries.
#[derive(Debug)]
pub struct AttributeBuffer {
    ctx: Rc<RenderContext>,
    handle: BufferId,
    data_type: RenderDataType,
    array_count: u32,
    len: Cell<usize>,
    capacity: Cell<usize>,
    written: Cell<bool>,
}

impl AttributeBuffer {
    /// Empty buffer; storage is allocated on the first write.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] if the device cannot create a
    /// buffer object.
    pub fn new(
        ctx: &Rc<RenderContext>,
        data_type: RenderDataType,
        array_count: u32,
    ) -> Result<Self, RenderError> {
        let handle = ctx.device().create_buffer()?;
        Ok(Self {
            ctx: Rc::clone(ctx),
            handle,
            data_type,
            array_count: array_count.max(1),
            len: Cell::new(0),
            capacity: Cell::new(0),
            written: Cell::new(false),
        })
    }

    /// Buffer typed after `T`, written with `data`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Allocation`] on allocation failure, or
    /// [`RenderError::Device`] if the upload raises a device error.
    pub fn with_data<T: BufferElement>(
        ctx: &Rc<RenderContext>,
        data: &[T],
    ) -> Result<Self, RenderError> {
        let buffer = Self::new(ctx, T::DATA_TYPE, T::ARRAY_COUNT)?;
        buffer.set_data(data)?;
        Ok(buffer)
    }

    fn entry_bytes(&self) -> usize {
        self.data_type.size_bytes() * self.array_count as usize
    }

    fn check_type<T: BufferElement>(&self) -> Result<(), RenderError> {
        if T::DATA_TYPE == self.data_type && T::ARRAY_COUNT == self.array_count
        {
            Ok(())
        } else {
            Err(RenderError::TypeMismatch(format!(
                "buffer holds {} but data is {}",
                type_label(self.data_type, self.array_count),
                type_label(T::DATA_TYPE, T::ARRAY_COUNT)
            )))
        }
    }

    fn bind(&self) {
        self.ctx
            .device()
            .bind_buffer(BufferTarget::Array, Some(self.handle));
    }

    /// Replace the contents, growing storage if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] if `T` is not the buffer's
    /// element type, or [`RenderError::Device`] on a device error.
    pub fn set_data<T: BufferElement>(&self, data: &[T]) -> Result<(), RenderError> {
        self.check_type::<T>()?;
        let stored: Vec<T::Stored> = data.iter().map(|v| v.store()).collect();
        let device = self.ctx.device();
        self.bind();

        let needed = data.len();
        if !self.written.get() || needed > self.capacity.get() {
            let new_capacity = needed.max(self.capacity.get() * 2);
            log::trace!(
                "buffer {:?}: {} -> {} entries",
                self.handle,
                self.capacity.get(),
                new_capacity
            );
            device.buffer_storage(
                BufferTarget::Array,
                new_capacity * self.entry_bytes(),
            );
            self.capacity.set(new_capacity);
        }

        if needed > 0 {
            device.buffer_sub_data(
                BufferTarget::Array,
                0,
                bytemuck::cast_slice(&stored),
            );
        }
        self.len.set(needed);
        self.written.set(true);
        self.ctx.check_error()
    }

    fn check_readable(&self, end: usize) -> Result<(), RenderError> {
        if !self.written.get() {
            return Err(RenderError::InvalidState(
                "buffer read before any data was written".to_owned(),
            ));
        }
        if end > self.len.get() {
            return Err(RenderError::OutOfBounds {
                requested: end,
                len: self.len.get(),
            });
        }
        Ok(())
    }

    /// Read one entry. Blocks until the device is idle.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_range`].
    pub fn get<T: BufferElement>(&self, index: usize) -> Result<T, RenderError> {
        let mut values = self.get_range::<T>(index, 1)?;
        values.pop().ok_or(RenderError::OutOfBounds {
            requested: index.saturating_add(1),
            len: self.len.get(),
        })
    }

    /// Read `count` entries starting at `start`. Blocks until the device is
    /// idle.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] before the first write,
    /// [`RenderError::OutOfBounds`] if the range passes the logical end, and
    /// [`RenderError::TypeMismatch`] if `T` is not the element type.
    pub fn get_range<T: BufferElement>(
        &self,
        start: usize,
        count: usize,
    ) -> Result<Vec<T>, RenderError> {
        self.check_type::<T>()?;
        let end = start.checked_add(count).ok_or(RenderError::OutOfBounds {
            requested: usize::MAX,
            len: self.len.get(),
        })?;
        self.check_readable(end)?;
        let device = self.ctx.device();
        self.bind();
        device.finish();

        let mut stored = vec![T::Stored::zeroed(); count];
        if count > 0 {
            device.get_buffer_sub_data(
                BufferTarget::Array,
                start * self.entry_bytes(),
                bytemuck::cast_slice_mut(&mut stored),
            );
        }
        self.ctx.check_error()?;
        Ok(stored.into_iter().map(T::load).collect())
    }

    /// Read the whole buffer.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_range`].
    pub fn get_all<T: BufferElement>(&self) -> Result<Vec<T>, RenderError> {
        self.get_range(0, self.len.get())
    }

    /// Semantic element type.
    #[must_use]
    pub fn data_type(&self) -> RenderDataType {
        self.data_type
    }

    /// Elements per logical entry.
    #[must_use]
    pub fn array_count(&self) -> u32 {
        self.array_count
    }

    /// Logical entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    /// Whether the buffer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    /// Allocated capacity in entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Whether data was written at least once.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.written.get()
    }

    /// Native handle.
    #[must_use]
    pub fn handle(&self) -> BufferId {
        self.handle
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Rc<RenderContext> {
        &self.ctx
    }
}

impl Drop for AttributeBuffer {
    fn drop(&mut self) {
        self.ctx.device().delete_buffer(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3};

    use super::*;
    use crate::device::HeadlessDevice;

    fn context() -> (Rc<HeadlessDevice>, Rc<RenderContext>) {
        let device = Rc::new(HeadlessDevice::new());
        let ctx = RenderContext::new(device.clone());
        (device, ctx)
    }

    #[test]
    fn vec3_round_trip() {
        let (_, ctx) = context();
        let data = vec![Vec3::X, Vec3::Y, Vec3::new(1.0, 2.0, 3.0)];
        let buf = AttributeBuffer::with_data(&ctx, &data).unwrap();
        assert_eq!(buf.get_all::<Vec3>().unwrap(), data);
        assert_eq!(buf.get::<Vec3>(2).unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(buf.get_range::<Vec3>(1, 2).unwrap(), &data[1..]);
    }

    #[test]
    fn f64_is_narrowed() {
        let (_, ctx) = context();
        let buf = AttributeBuffer::new(&ctx, RenderDataType::Float, 1).unwrap();
        buf.set_data(&[0.1_f64, 1e-12, 3.5]).unwrap();
        let back = buf.get_all::<f64>().unwrap();
        assert_eq!(back[0], f64::from(0.1_f32));
        assert_eq!(back[2], 3.5);
        // the same storage reads back as f32 too
        assert_eq!(buf.get::<f32>(0).unwrap(), 0.1_f32);
    }

    #[test]
    fn array_entries_round_trip() {
        let (_, ctx) = context();
        let tri = [[Vec3::ZERO, Vec3::X, Vec3::Y]; 4];
        let buf = AttributeBuffer::with_data(&ctx, &tri).unwrap();
        assert_eq!(buf.array_count(), 3);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.get::<[Vec3; 3]>(3).unwrap(), tri[3]);
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let (_, ctx) = context();
        let buf = AttributeBuffer::new(&ctx, RenderDataType::Vector3Float, 1)
            .unwrap();
        assert!(matches!(
            buf.set_data(&[1.0_f32]),
            Err(RenderError::TypeMismatch(_))
        ));
        assert!(matches!(
            buf.set_data(&[[Vec3::ZERO; 2]]),
            Err(RenderError::TypeMismatch(_))
        ));
        assert!(!buf.is_set());
        assert!(buf.set_data(&[UVec3::ONE]).is_err());
    }

    #[test]
    fn growth_is_monotonic() {
        let (device, ctx) = context();
        let buf = AttributeBuffer::new(&ctx, RenderDataType::UInt, 1).unwrap();
        let mut last_capacity = 0;
        for (len, expected_capacity) in [(10, 10), (15, 20), (5, 20), (50, 50)] {
            buf.set_data(&vec![7_u32; len]).unwrap();
            assert_eq!(buf.len(), len);
            assert_eq!(buf.capacity(), expected_capacity);
            assert!(buf.capacity() >= last_capacity);
            last_capacity = buf.capacity();
        }
        assert_eq!(device.buffer_size(buf.handle()), Some(50 * 4));
    }

    #[test]
    fn reads_are_bounds_checked() {
        let (_, ctx) = context();
        let buf = AttributeBuffer::new(&ctx, RenderDataType::Int, 1).unwrap();
        assert!(matches!(buf.get::<i32>(0), Err(RenderError::InvalidState(_))));
        buf.set_data(&[1_i32, 2, 3]).unwrap();
        assert!(matches!(
            buf.get::<i32>(3),
            Err(RenderError::OutOfBounds { requested: 4, len: 3 })
        ));
        assert!(matches!(
            buf.get_range::<i32>(2, 5),
            Err(RenderError::OutOfBounds { requested: 7, len: 3 })
        ));
    }

    #[test]
    fn huge_ranges_are_out_of_bounds() {
        let (_, ctx) = context();
        let buf = AttributeBuffer::with_data(&ctx, &[1_i32, 2, 3]).unwrap();
        assert!(matches!(
            buf.get_range::<i32>(1, usize::MAX),
            Err(RenderError::OutOfBounds { len: 3, .. })
        ));
        assert!(matches!(
            buf.get::<i32>(usize::MAX),
            Err(RenderError::OutOfBounds { len: 3, .. })
        ));
    }

    #[test]
    fn reads_finish_the_pipeline() {
        let (device, ctx) = context();
        let buf = AttributeBuffer::with_data(&ctx, &[1.0_f32]).unwrap();
        let before = device.finish_count();
        let _ = buf.get::<f32>(0).unwrap();
        assert_eq!(device.finish_count(), before + 1);
    }

    #[test]
    fn drop_releases_handle() {
        let (device, ctx) = context();
        let before = device.live_object_count();
        {
            let _buf = AttributeBuffer::with_data(&ctx, &[1_u32]).unwrap();
            assert_eq!(device.live_object_count(), before + 1);
        }
        assert_eq!(device.live_object_count(), before);
    }
}
