// SPDX-License-Identifier: AGPL-3.0-only

//! Register session contract
//!
//! A session is a transactional register client for one device. Reads and
//! writes are queued; nothing reaches the hardware until [`RegisterSession::dispatch`]
//! flushes the batch. Read results come back as deferred handles
//! ([`ValWord`], [`ValVector`]) that become valid once their batch has been
//! dispatched, so a whole refresh cycle can be read in one round trip.
//!
//! The bus protocol itself lives behind this trait. The crate ships a
//! simulated transport ([`crate::backends::SimBoard`]); real transports are
//! plugged in through [`crate::TransportFactory`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Result, TimingError};

/// Transactional register client for one device
pub trait RegisterSession: Debug {
    /// Device identifier (as named in the connections file)
    fn id(&self) -> &str;

    /// Whether `path` names a register or register group on the device
    ///
    /// Address-table lookup only; never touches the bus.
    fn has_node(&self, path: &str) -> bool;

    /// Names of the immediate children of the group at `path`
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if `path` does not exist.
    fn sub_nodes(&self, path: &str) -> Result<Vec<String>>;

    /// Queue a single-word read
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if `path` does not exist.
    fn read(&mut self, path: &str) -> Result<ValWord>;

    /// Queue a block read of `words` words
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if `path` does not exist.
    fn read_block(&mut self, path: &str, words: usize) -> Result<ValVector>;

    /// Queue a single-word write
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if `path` does not exist.
    fn write(&mut self, path: &str, value: u32) -> Result<()>;

    /// Queue a block write
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if `path` does not exist.
    fn write_block(&mut self, path: &str, values: &[u32]) -> Result<()>;

    /// Commit every queued operation and fill pending read handles
    ///
    /// # Errors
    ///
    /// Returns a transport error if the batch fails on the bus.
    fn dispatch(&mut self) -> Result<()>;

    /// Set the transaction timeout
    fn set_timeout(&mut self, timeout: Duration) {
        tracing::debug!("{}: timeout {timeout:?} ignored by transport", self.id());
    }
}

impl<T: RegisterSession + ?Sized> RegisterSession for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn has_node(&self, path: &str) -> bool {
        (**self).has_node(path)
    }

    fn sub_nodes(&self, path: &str) -> Result<Vec<String>> {
        (**self).sub_nodes(path)
    }

    fn read(&mut self, path: &str) -> Result<ValWord> {
        (**self).read(path)
    }

    fn read_block(&mut self, path: &str, words: usize) -> Result<ValVector> {
        (**self).read_block(path, words)
    }

    fn write(&mut self, path: &str, value: u32) -> Result<()> {
        (**self).write(path, value)
    }

    fn write_block(&mut self, path: &str, values: &[u32]) -> Result<()> {
        (**self).write_block(path, values)
    }

    fn dispatch(&mut self) -> Result<()> {
        (**self).dispatch()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout);
    }
}

/// Deferred result of a single-word read
#[derive(Debug, Clone)]
pub struct ValWord {
    path: Rc<str>,
    slot: Rc<Cell<Option<u32>>>,
}

impl ValWord {
    /// Create an unfilled handle (transport side)
    pub fn pending(path: &str) -> Self {
        Self {
            path: Rc::from(path),
            slot: Rc::new(Cell::new(None)),
        }
    }

    /// Fill the handle once the batch has completed (transport side)
    pub fn fill(&self, value: u32) {
        self.slot.set(Some(value));
    }

    /// Whether the value is available
    pub fn is_valid(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Node path this handle was read from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read value
    ///
    /// # Errors
    ///
    /// Returns `NotDispatched` if the batch has not been dispatched yet.
    pub fn value(&self) -> Result<u32> {
        self.slot.get().ok_or_else(|| TimingError::NotDispatched {
            path: self.path.to_string(),
        })
    }
}

/// Deferred result of a block read
#[derive(Debug, Clone)]
pub struct ValVector {
    path: Rc<str>,
    slot: Rc<RefCell<Option<Vec<u32>>>>,
}

impl ValVector {
    /// Create an unfilled handle (transport side)
    pub fn pending(path: &str) -> Self {
        Self {
            path: Rc::from(path),
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Fill the handle once the batch has completed (transport side)
    pub fn fill(&self, values: Vec<u32>) {
        *self.slot.borrow_mut() = Some(values);
    }

    /// Whether the values are available
    pub fn is_valid(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Node path this handle was read from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read values
    ///
    /// # Errors
    ///
    /// Returns `NotDispatched` if the batch has not been dispatched yet.
    pub fn values(&self) -> Result<Vec<u32>> {
        self.slot
            .borrow()
            .clone()
            .ok_or_else(|| TimingError::NotDispatched {
                path: self.path.to_string(),
            })
    }
}

/// One queued register operation
#[derive(Debug, Clone)]
pub enum PendingOp {
    /// Single-word read into a handle
    Read(ValWord),
    /// Block read into a handle
    ReadBlock(ValVector, usize),
    /// Single-word write
    Write(String, u32),
    /// Block write
    WriteBlock(String, Vec<u32>),
}

/// Queue of operations awaiting dispatch
///
/// Transports keep one of these and drain it in order on dispatch.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<PendingOp>,
}

impl Batch {
    /// Queue an operation
    pub fn push(&mut self, op: PendingOp) {
        self.ops.push(op);
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Take every queued operation, leaving the batch empty
    pub fn drain(&mut self) -> Vec<PendingOp> {
        std::mem::take(&mut self.ops)
    }
}

/// Queue reads of every child of the group at `path`
///
/// # Errors
///
/// Returns `NodeNotFound` if the group or a child cannot be read.
pub fn read_sub_nodes<S: RegisterSession + ?Sized>(
    session: &mut S,
    path: &str,
) -> Result<BTreeMap<String, ValWord>> {
    let mut words = BTreeMap::new();
    for child in session.sub_nodes(path)? {
        let full = timing_regs::node_path(path, &child);
        words.insert(child, session.read(&full)?);
    }
    Ok(words)
}

/// Collect dispatched handles into plain values
///
/// # Errors
///
/// Returns `NotDispatched` if any handle is still pending.
pub fn collect_words(words: &BTreeMap<String, ValWord>) -> Result<BTreeMap<String, u32>> {
    words
        .iter()
        .map(|(name, word)| Ok((name.clone(), word.value()?)))
        .collect()
}
