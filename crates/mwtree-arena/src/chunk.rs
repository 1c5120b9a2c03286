//! Fixed-capacity chunks of node records and their coefficient blocks.
//!
//! Node chunk `c` and coefficient chunk `c` describe the same slots: the
//! coefficient block of slot `s` lives in coefficient chunk
//! `s / capacity` at offset `(s % capacity) * block`. Chunks are appended,
//! never resized or moved, so a slot's storage stays put for the life of
//! the table.
//!
//! A whole table is the unit handed to another process: it serializes the
//! records' index fields and the raw coefficients, nothing else.

use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::error::ArenaError;
use crate::node::{CoefficientHandle, NodeRecord, SerialIndex, SlotRef};

/// Parallel node and coefficient chunk lists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkTable<const D: usize> {
    chunk_capacity: usize,
    coefficients_per_node: usize,
    nodes: Vec<Box<[NodeRecord<D>]>>,
    coefficients: Vec<Box<[f64]>>,
}

impl<const D: usize> ChunkTable<D> {
    /// Empty table for the given geometry.
    pub fn new(chunk_capacity: usize, coefficients_per_node: usize) -> Self {
        Self {
            chunk_capacity,
            coefficients_per_node,
            nodes: Vec::new(),
            coefficients: Vec::new(),
        }
    }

    /// Slots per chunk.
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Values per coefficient block.
    pub fn coefficients_per_node(&self) -> usize {
        self.coefficients_per_node
    }

    /// Number of chunk pairs.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no chunk has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total slots across all chunks.
    pub fn slot_count(&self) -> usize {
        self.nodes.len() * self.chunk_capacity
    }

    /// Bulk-allocate one node chunk and its coefficient chunk.
    pub fn append(&mut self) -> usize {
        let nodes: Box<[NodeRecord<D>]> = (0..self.chunk_capacity)
            .map(|_| NodeRecord::default())
            .collect();
        let coefficients = vec![0.0; self.chunk_capacity * self.coefficients_per_node];
        self.nodes.push(nodes);
        self.coefficients.push(coefficients.into_boxed_slice());
        self.nodes.len() - 1
    }

    /// Append chunks until `chunk` exists; returns how many were added.
    pub fn ensure(&mut self, chunk: usize) -> usize {
        let mut added = 0;
        while self.nodes.len() <= chunk {
            self.append();
            added += 1;
        }
        added
    }

    /// Coefficient location of `serial`.
    pub fn handle(&self, serial: SerialIndex) -> CoefficientHandle {
        CoefficientHandle::for_serial(serial, self.chunk_capacity, self.coefficients_per_node)
    }

    /// Record at `serial`, if its chunk exists.
    pub fn node(&self, serial: SerialIndex) -> Option<&NodeRecord<D>> {
        self.node_at(serial.slot(self.chunk_capacity))
    }

    /// Mutable record at `serial`, if its chunk exists.
    pub fn node_mut(&mut self, serial: SerialIndex) -> Option<&mut NodeRecord<D>> {
        let slot = serial.slot(self.chunk_capacity);
        self.nodes
            .get_mut(slot.chunk as usize)
            .and_then(|c| c.get_mut(slot.offset as usize))
    }

    /// Record at a resolved location.
    pub fn node_at(&self, slot: SlotRef) -> Option<&NodeRecord<D>> {
        self.nodes
            .get(slot.chunk as usize)
            .and_then(|c| c.get(slot.offset as usize))
    }

    /// Coefficient block behind a handle.
    pub fn coefficients(&self, handle: CoefficientHandle) -> Option<&[f64]> {
        let start = handle.offset as usize;
        self.coefficients
            .get(handle.chunk as usize)
            .and_then(|c| c.get(start..start + handle.len as usize))
    }

    /// Mutable coefficient block behind a handle.
    pub fn coefficients_mut(&mut self, handle: CoefficientHandle) -> Option<&mut [f64]> {
        let start = handle.offset as usize;
        self.coefficients
            .get_mut(handle.chunk as usize)
            .and_then(|c| c.get_mut(start..start + handle.len as usize))
    }

    /// Records and contiguous coefficients of `count` slots from `base`.
    ///
    /// # Panics
    ///
    /// Panics if the range straddles a chunk boundary or its chunk is
    /// missing; the allocator never produces such a range.
    pub fn group_mut(
        &mut self,
        base: SerialIndex,
        count: usize,
    ) -> (&mut [NodeRecord<D>], &mut [f64]) {
        let chunk = base.chunk(self.chunk_capacity);
        let offset = base.offset(self.chunk_capacity);
        assert!(
            offset + count <= self.chunk_capacity,
            "group {base}+{count} straddles a chunk boundary"
        );
        let block = self.coefficients_per_node;
        let nodes = &mut self.nodes[chunk][offset..offset + count];
        let coefficients =
            &mut self.coefficients[chunk][offset * block..(offset + count) * block];
        (nodes, coefficients)
    }

    /// Node chunk `chunk`.
    pub fn node_chunk(&self, chunk: usize) -> Option<&[NodeRecord<D>]> {
        self.nodes.get(chunk).map(AsRef::as_ref)
    }

    /// Coefficient chunk `chunk`.
    pub fn coefficient_chunk(&self, chunk: usize) -> Option<&[f64]> {
        self.coefficients.get(chunk).map(AsRef::as_ref)
    }

    /// Every slot with its serial index, in index order.
    pub fn slots(&self) -> impl Iterator<Item = (SerialIndex, &NodeRecord<D>)> {
        let capacity = self.chunk_capacity;
        self.nodes.iter().enumerate().flat_map(move |(c, chunk)| {
            chunk
                .iter()
                .enumerate()
                .map(move |(o, node)| (SerialIndex::new(c * capacity + o), node))
        })
    }

    /// Mutable variant of [`ChunkTable::slots`].
    pub fn slots_mut(&mut self) -> impl Iterator<Item = (SerialIndex, &mut NodeRecord<D>)> {
        let capacity = self.chunk_capacity;
        self.nodes.iter_mut().enumerate().flat_map(move |(c, chunk)| {
            chunk
                .iter_mut()
                .enumerate()
                .map(move |(o, node)| (SerialIndex::new(c * capacity + o), node))
        })
    }

    /// Check the table's shape against the expected geometry.
    pub fn check_geometry(
        &self,
        chunk_capacity: usize,
        coefficients_per_node: usize,
    ) -> Result<(), ArenaError> {
        if self.chunk_capacity != chunk_capacity
            || self.coefficients_per_node != coefficients_per_node
        {
            return Err(ArenaError::InvalidConfig(format!(
                "chunk geometry {}x{} does not match {chunk_capacity}x{coefficients_per_node}",
                self.chunk_capacity, self.coefficients_per_node
            )));
        }
        if self.nodes.len() != self.coefficients.len() {
            return Err(ArenaError::InvalidConfig(format!(
                "{} node chunks but {} coefficient chunks",
                self.nodes.len(),
                self.coefficients.len()
            )));
        }
        let block_len = chunk_capacity * coefficients_per_node;
        let bad_chunk = self
            .nodes
            .iter()
            .zip(&self.coefficients)
            .position(|(n, c)| n.len() != chunk_capacity || c.len() != block_len);
        if let Some(chunk) = bad_chunk {
            return Err(ArenaError::InvalidConfig(format!(
                "chunk {chunk} has the wrong length"
            )));
        }
        Ok(())
    }

    /// Bytes held by one chunk pair.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_capacity * (size_of::<NodeRecord<D>>() + self.coefficients_per_node * size_of::<f64>())
    }

    /// Bytes held by the whole table.
    pub fn memory_bytes(&self) -> usize {
        self.len() * self.chunk_bytes()
    }
}
