//! `Word` register definitions and the `WordStore` that indexes them.
//!
//! Matches a design note calling for a sorted vector with binary-search
//! lookup rather than a general map: a Server's word table is built once at
//! startup and then read far more often than it changes, so linear
//! insertion-order staging before `begin()` followed by O(log N) lookup
//! after it is the right trade-off.

use std::{any::Any, sync::Arc};

use crate::{error::ServerError, frame::Exception};

/// Default capacity of a register group's atomic access unit.
pub const DEFAULT_MAX_WORD_SIZE: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RegisterType {
    Coil = 0,
    DiscreteInput = 1,
    HoldingRegister = 2,
    InputRegister = 3,
}

impl RegisterType {
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }
}

/// Opaque, type-erased context handed back to handlers untouched.
pub type UserCtx = Arc<dyn Any + Send + Sync>;

pub type ReadHandler =
    Arc<dyn Fn(u16, u16, Option<&UserCtx>) -> Result<Vec<u16>, Exception> + Send + Sync>;
pub type WriteHandler =
    Arc<dyn Fn(u16, &[u16], Option<&UserCtx>) -> Result<(), Exception> + Send + Sync>;

/// Either a direct pointer to backing storage (only valid for a
/// single-register `Word`) or a pair of read/write handlers.
pub enum WordMode {
    Direct(Arc<std::sync::atomic::AtomicU16>),
    Handler {
        read: Option<ReadHandler>,
        write: Option<WriteHandler>,
    },
}

/// One contiguous, atomically-accessed register range in a Server's table.
pub struct Word {
    pub reg_type: RegisterType,
    pub start_addr: u16,
    pub nb_regs: u16,
    pub mode: WordMode,
    pub user_ctx: Option<UserCtx>,
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Word")
            .field("reg_type", &self.reg_type)
            .field("start_addr", &self.start_addr)
            .field("nb_regs", &self.nb_regs)
            .finish_non_exhaustive()
    }
}

impl Word {
    /// A single directly-addressable register or coil, backed by an
    /// `AtomicU16` the caller retains a handle to.
    #[must_use]
    pub fn direct(reg_type: RegisterType, addr: u16, storage: Arc<std::sync::atomic::AtomicU16>) -> Self {
        Self {
            reg_type,
            start_addr: addr,
            nb_regs: 1,
            mode: WordMode::Direct(storage),
            user_ctx: None,
        }
    }

    /// A handler-backed register group, spanning `nb_regs` registers that
    /// are always accessed atomically.
    #[must_use]
    pub fn handler(
        reg_type: RegisterType,
        start_addr: u16,
        nb_regs: u16,
        read: Option<ReadHandler>,
        write: Option<WriteHandler>,
        user_ctx: Option<UserCtx>,
    ) -> Self {
        Self {
            reg_type,
            start_addr,
            nb_regs,
            mode: WordMode::Handler { read, write },
            user_ctx,
        }
    }

    fn end_addr(&self) -> u32 {
        u32::from(self.start_addr) + u32::from(self.nb_regs)
    }
}

fn validate_word(word: &Word, max_word_size: u16) -> Result<(), ServerError> {
    if word.nb_regs == 0 || word.nb_regs > max_word_size {
        return Err(ServerError::InvalidWordSize(word.nb_regs));
    }
    if matches!(word.mode, WordMode::Direct(_)) && word.nb_regs != 1 {
        return Err(ServerError::DirectPointerMultiWord);
    }
    if let WordMode::Handler { read, write } = &word.mode {
        if read.is_none() && write.is_none() {
            return Err(ServerError::MissingHandler);
        }
        if word.reg_type != RegisterType::Coil && read.is_none() {
            return Err(ServerError::MissingHandler);
        }
        if !word.reg_type.is_writable() && write.is_some() {
            return Err(ServerError::MissingHandler);
        }
    }
    Ok(())
}

/// A Server's register table: insertion-ordered before `begin()`, sorted
/// and overlap-free after it.
pub struct WordStore {
    capacity: usize,
    max_word_size: u16,
    words: Vec<Word>,
    began: bool,
}

impl std::fmt::Debug for WordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordStore")
            .field("capacity", &self.capacity)
            .field("max_word_size", &self.max_word_size)
            .field("len", &self.words.len())
            .field("began", &self.began)
            .finish_non_exhaustive()
    }
}

impl WordStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_max_word_size(capacity, DEFAULT_MAX_WORD_SIZE)
    }

    #[must_use]
    pub fn with_max_word_size(capacity: usize, max_word_size: u16) -> Self {
        Self {
            capacity,
            max_word_size,
            words: Vec::new(),
            began: false,
        }
    }

    /// Adds one `Word`. Before `begin()` this only validates and stages
    /// the word (overlap is checked once, at `begin()`); after `begin()`
    /// it is inserted in sorted position and checked for overlap
    /// immediately, in O(log N).
    pub fn add_word(&mut self, word: Word) -> Result<(), ServerError> {
        validate_word(&word, self.max_word_size)?;
        if self.words.len() >= self.capacity {
            return Err(ServerError::WordOverflow);
        }

        if !self.began {
            self.words.push(word);
            return Ok(());
        }

        let key = (word.reg_type, word.start_addr);
        let idx = self
            .words
            .partition_point(|w| (w.reg_type, w.start_addr) < key);
        if let Some(prev) = idx.checked_sub(1).and_then(|i| self.words.get(i)) {
            if prev.reg_type == word.reg_type && u32::from(word.start_addr) < prev.end_addr() {
                return Err(ServerError::WordOverlap);
            }
        }
        if let Some(next) = self.words.get(idx) {
            if next.reg_type == word.reg_type && word.end_addr() > u32::from(next.start_addr) {
                return Err(ServerError::WordOverlap);
            }
        }
        self.words.insert(idx, word);
        Ok(())
    }

    pub fn add_words(&mut self, words: Vec<Word>) -> Result<(), ServerError> {
        for word in words {
            self.add_word(word)?;
        }
        Ok(())
    }

    /// Sorts the staged words by `(reg_type, start_addr)` and rejects the
    /// table if any two overlap. Idempotent once it has already run.
    pub fn begin(&mut self) -> Result<(), ServerError> {
        if self.began {
            return Ok(());
        }
        self.words
            .sort_by_key(|w| (w.reg_type as u8, w.start_addr));
        for pair in self.words.windows(2) {
            let [a, b] = pair else { unreachable!() };
            if a.reg_type == b.reg_type && a.end_addr() > u32::from(b.start_addr) {
                return Err(ServerError::WordOverlap);
            }
        }
        self.began = true;
        Ok(())
    }

    /// Finds the `Word` covering `addr`, if any, via binary search.
    #[must_use]
    pub fn lookup(&self, reg_type: RegisterType, addr: u16) -> Option<&Word> {
        let idx = self
            .words
            .partition_point(|w| (w.reg_type, w.start_addr) <= (reg_type, addr));
        let word = self.words.get(idx.checked_sub(1)?)?;
        if word.reg_type == reg_type && u32::from(addr) < word.end_addr() {
            Some(word)
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
