// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptors and dimension utilities.

use std::fmt;

/// Describes the dimensionality of a tensor.
///
/// Dimensions are ordered `[batch, channels, spatial...]`. Flat layers
/// (affine, diagonal, PWL) only care about [`Shape::num_elements`];
/// convolution and pooling read the channel and width dimensions through
/// [`Shape::channels`] and [`Shape::width`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a new shape from the given dimensions.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![1, 3, 4]);
    /// assert_eq!(s.rank(), 3);
    /// assert_eq!(s.num_elements(), 12);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Creates a 1-D shape.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Creates a `[batch, features]` shape.
    pub fn nc(batch: usize, features: usize) -> Self {
        Self {
            dims: vec![batch, features],
        }
    }

    /// Creates a `[batch, channels, width]` shape for 1-D convolution.
    pub fn ncw(batch: usize, channels: usize, width: usize) -> Self {
        Self {
            dims: vec![batch, channels, width],
        }
    }

    /// Returns the number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    ///
    /// For a rank-0 shape, returns 1.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the size of a specific dimension, or `None` if out of bounds.
    pub fn dim(&self, index: usize) -> Option<usize> {
        self.dims.get(index).copied()
    }

    /// Number of channels of a `[batch, channels, width]` tensor.
    ///
    /// Rank-2 shapes are treated as a single channel.
    pub fn channels(&self) -> usize {
        match self.dims.len() {
            0 | 1 | 2 => 1,
            _ => self.dims[1],
        }
    }

    /// Spatial width of a `[batch, channels, width]` tensor.
    ///
    /// Rank-2 shapes report their feature count as the width.
    pub fn width(&self) -> usize {
        match self.dims.len() {
            0 => 1,
            1 => self.dims[0],
            2 => self.dims[1],
            _ => self.dims[2..].iter().product(),
        }
    }

    /// Computes the memory footprint in bytes for a given [`crate::DType`].
    pub fn size_bytes(&self, dtype: super::DType) -> usize {
        self.num_elements() * dtype.size_bytes()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}
