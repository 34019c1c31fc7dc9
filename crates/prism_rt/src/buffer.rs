//! Device data buffers.
//!
//! A buffer is typed storage for vertex attributes, index triples, or
//! texel data. The element format is fixed at creation; validation checks
//! that the declared format matches the stored data.

use crate::error::{RtError, RtResult};

/// Element format of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Int3,
    UByte,
    UByte4,
}

impl BufferFormat {
    pub fn element_size(self) -> usize {
        match self {
            BufferFormat::Float => 4,
            BufferFormat::Float2 => 8,
            BufferFormat::Float3 => 12,
            BufferFormat::Float4 => 16,
            BufferFormat::Int3 => 12,
            BufferFormat::UByte => 1,
            BufferFormat::UByte4 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferFormat::Float => "float",
            BufferFormat::Float2 => "float2",
            BufferFormat::Float3 => "float3",
            BufferFormat::Float4 => "float4",
            BufferFormat::Int3 => "int3",
            BufferFormat::UByte => "ubyte",
            BufferFormat::UByte4 => "ubyte4",
        }
    }
}

/// Typed element storage matching a [`BufferFormat`].
#[derive(Debug, Clone)]
pub enum BufferData {
    Float(Vec<f32>),
    Float2(Vec<[f32; 2]>),
    Float3(Vec<[f32; 3]>),
    Float4(Vec<[f32; 4]>),
    Int3(Vec<[i32; 3]>),
    UByte(Vec<u8>),
    UByte4(Vec<[u8; 4]>),
}

impl BufferData {
    pub fn format(&self) -> BufferFormat {
        match self {
            BufferData::Float(_) => BufferFormat::Float,
            BufferData::Float2(_) => BufferFormat::Float2,
            BufferData::Float3(_) => BufferFormat::Float3,
            BufferData::Float4(_) => BufferFormat::Float4,
            BufferData::Int3(_) => BufferFormat::Int3,
            BufferData::UByte(_) => BufferFormat::UByte,
            BufferData::UByte4(_) => BufferFormat::UByte4,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferData::Float(v) => v.len(),
            BufferData::Float2(v) => v.len(),
            BufferData::Float3(v) => v.len(),
            BufferData::Float4(v) => v.len(),
            BufferData::Int3(v) => v.len(),
            BufferData::UByte(v) => v.len(),
            BufferData::UByte4(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A 1D or 2D device buffer.
///
/// 1D buffers have `height == 1`; texel buffers use the full 2D shape.
#[derive(Debug, Clone)]
pub struct Buffer {
    pub format: BufferFormat,
    pub width: usize,
    pub height: usize,
    pub(crate) data: BufferData,
    pub(crate) validated: bool,
}

impl Buffer {
    /// A 1D buffer taking its size from the data.
    pub fn from_data(data: BufferData) -> Self {
        Self {
            format: data.format(),
            width: data.len(),
            height: 1,
            data,
            validated: false,
        }
    }

    /// A 2D buffer (texel storage); data length must be width * height.
    pub fn from_data_2d(data: BufferData, width: usize, height: usize) -> Self {
        Self {
            format: data.format(),
            width,
            height,
            data,
            validated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.format.element_size()
    }

    pub fn as_float(&self) -> Option<&[f32]> {
        match &self.data {
            BufferData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float2(&self) -> Option<&[[f32; 2]]> {
        match &self.data {
            BufferData::Float2(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float3(&self) -> Option<&[[f32; 3]]> {
        match &self.data {
            BufferData::Float3(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float4(&self) -> Option<&[[f32; 4]]> {
        match &self.data {
            BufferData::Float4(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int3(&self) -> Option<&[[i32; 3]]> {
        match &self.data {
            BufferData::Int3(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ubyte(&self) -> Option<&[u8]> {
        match &self.data {
            BufferData::UByte(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ubyte4(&self) -> Option<&[[u8; 4]]> {
        match &self.data {
            BufferData::UByte4(v) => Some(v),
            _ => None,
        }
    }

    /// Check the declared shape against the stored data.
    pub(crate) fn validate(&mut self) -> RtResult<()> {
        if self.data.format() != self.format {
            return Err(RtError::Validation(format!(
                "buffer declared {} but holds {} data",
                self.format.name(),
                self.data.format().name()
            )));
        }
        if self.data.len() != self.len() {
            return Err(RtError::BufferSizeMismatch {
                what: format!("{} buffer ({}x{})", self.format.name(), self.width, self.height),
                expected: self.len(),
                actual: self.data.len(),
            });
        }
        self.validated = true;
        Ok(())
    }
}
