//! Access-pattern model
//!
//! An access pattern splits a target's address space into percentage-weighted
//! sections. Each section has its own operation kind, block size and, for
//! mixed kinds, a read percentage. The descriptor is a comma-separated list
//! of `percent:op[|readPercent]:blockSize` tuples:
//!
//! ```text
//! 50:randread:4k,30:write:64k,20:randrw|70:8k
//! ```
//!
//! If the percentages sum to less than 100, an idle section absorbs the
//! remainder. Once the target size is known, [`AccessPattern::resolve`]
//! assigns each section a byte range and [`AccessPattern::next_request`]
//! produces one concrete request per call.
//!
//! `next_request` mutates sequential cursors and must be driven by a single
//! generator; concurrency comes from the queue the generator feeds.
//!
//! # Example
//!
//! ```
//! use iodrive::access::AccessPattern;
//!
//! let mut pattern = AccessPattern::parse("50:randread:4k,50:write:4k").unwrap();
//! pattern.resolve(1024 * 1024).unwrap();
//!
//! let req = pattern.next_request().unwrap();
//! assert!(req.offset % 512 == 0);
//! ```

use crate::error::PatternError;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sector granularity for section boundaries and random offsets
pub const SECTOR_SIZE: u64 = 512;

/// Read share used by mixed kinds without an explicit `|N`
pub const DEFAULT_READ_PERCENT: u32 = 50;

/// Operation kind of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Idle share of the address space, generates no I/O
    None,
    ReadSeq,
    WriteSeq,
    RwSeq,
    ReadRand,
    WriteRand,
    RwRand,
}

impl OpKind {
    /// Parse an operation keyword
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let kind = match keyword.trim().to_ascii_lowercase().as_str() {
            "read" | "seqread" => OpKind::ReadSeq,
            "write" | "seqwrite" => OpKind::WriteSeq,
            "rw" | "seqrw" | "readwrite" => OpKind::RwSeq,
            "randread" => OpKind::ReadRand,
            "randwrite" => OpKind::WriteRand,
            "randrw" => OpKind::RwRand,
            "none" | "idle" => OpKind::None,
            _ => return None,
        };
        Some(kind)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            OpKind::None => "none",
            OpKind::ReadSeq => "read",
            OpKind::WriteSeq => "write",
            OpKind::RwSeq => "rw",
            OpKind::ReadRand => "randread",
            OpKind::WriteRand => "randwrite",
            OpKind::RwRand => "randrw",
        }
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, OpKind::ReadSeq | OpKind::WriteSeq | OpKind::RwSeq)
    }

    pub fn is_random(&self) -> bool {
        matches!(self, OpKind::ReadRand | OpKind::WriteRand | OpKind::RwRand)
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self, OpKind::RwSeq | OpKind::RwRand)
    }

    /// Mixed kind with the same access order
    fn to_mixed(self) -> Self {
        match self {
            OpKind::ReadSeq | OpKind::WriteSeq | OpKind::RwSeq => OpKind::RwSeq,
            OpKind::ReadRand | OpKind::WriteRand | OpKind::RwRand => OpKind::RwRand,
            OpKind::None => OpKind::None,
        }
    }

    /// Fixed direction for non-mixed kinds
    fn direction(&self) -> IoDirection {
        match self {
            OpKind::ReadSeq | OpKind::ReadRand => IoDirection::Read,
            OpKind::WriteSeq | OpKind::WriteRand => IoDirection::Write,
            OpKind::None => IoDirection::Idle,
            // mixed kinds are decided per request
            OpKind::RwSeq | OpKind::RwRand => IoDirection::Read,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Direction of one generated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoDirection {
    Read,
    Write,
    /// Drawn from an idle section; the worker skips it
    Idle,
}

/// One resolved request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest {
    /// Absolute byte offset
    pub offset: u64,
    pub direction: IoDirection,
    pub block_size: u64,
    /// Index of the owning section
    pub section: usize,
}

/// One weighted slice of the address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub percent: u32,
    pub kind: OpKind,
    pub block_size: u64,
    /// Share of reads for mixed kinds (0-100)
    pub read_percent: u32,
    /// First byte of the section (512-aligned)
    pub start: u64,
    /// Last valid request offset
    pub end: u64,
    /// Sequential cursor
    pub last_blk: u64,
}

impl Section {
    fn new(percent: u32, kind: OpKind, block_size: u64, read_percent: u32) -> Self {
        Self {
            percent,
            kind,
            block_size,
            read_percent,
            start: 0,
            end: 0,
            last_blk: 0,
        }
    }

    /// Bytes covered by the section once resolved
    pub fn len(&self) -> u64 {
        if self.kind == OpKind::None {
            0
        } else {
            self.end - self.start + self.block_size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered, percentage-weighted list of sections
#[derive(Debug, Clone)]
pub struct AccessPattern {
    sections: Vec<Section>,
    total_size: Option<u64>,
    rng: Xoshiro256PlusPlus,
}

impl AccessPattern {
    /// Parse a descriptor
    ///
    /// Fails on a tuple without exactly three fields, an unknown operation
    /// keyword, an unrecognized block-size suffix, or percentages summing
    /// above 100. A sum below 100 is padded with an idle section.
    pub fn parse(descriptor: &str) -> Result<Self, PatternError> {
        let mut sections = Vec::new();
        let mut sum = 0u32;

        for tuple in descriptor.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let fields: Vec<&str> = tuple.split(':').map(str::trim).collect();
            if fields.len() != 3 {
                return Err(PatternError::FieldCount(tuple.to_string()));
            }

            let percent: u32 = fields[0]
                .parse()
                .ok()
                .filter(|p| (1..=100).contains(p))
                .ok_or_else(|| PatternError::Percent(fields[0].to_string()))?;

            let (kind, read_percent) = parse_op_spec(fields[1])?;
            let block_size = parse_block_size(fields[2])?;

            sum += percent;
            sections.push(Section::new(percent, kind, block_size, read_percent));
        }

        if sections.is_empty() {
            return Err(PatternError::Empty);
        }
        if sum > 100 {
            return Err(PatternError::PercentOverflow(sum));
        }
        if sum < 100 {
            sections.push(Section::new(100 - sum, OpKind::None, SECTOR_SIZE, 0));
        }

        Ok(Self {
            sections,
            total_size: None,
            rng: Xoshiro256PlusPlus::from_entropy(),
        })
    }

    /// Parse and resolve in one step
    pub fn parse_resolved(descriptor: &str, total_size: u64) -> Result<Self, PatternError> {
        let mut pattern = Self::parse(descriptor)?;
        pattern.resolve(total_size)?;
        Ok(pattern)
    }

    /// Replace the selection RNG with a seeded one (reproducible tests)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    /// Assign byte ranges to every section
    ///
    /// Walks sections in declaration order accumulating `total*percent/100`.
    /// Starts are aligned up to 512 bytes and every section's last request
    /// offset leaves room for one block before the next section begins.
    pub fn resolve(&mut self, total_size: u64) -> Result<(), PatternError> {
        let mut cumulative = 0u32;
        let count = self.sections.len();

        let boundaries: Vec<u64> = (0..=count)
            .map(|i| {
                if i == count {
                    return total_size;
                }
                let c: u32 = self.sections[..i].iter().map(|s| s.percent).sum();
                align_up(percent_of(total_size, c), SECTOR_SIZE).min(total_size)
            })
            .collect();

        for (index, section) in self.sections.iter_mut().enumerate() {
            let start = boundaries[index];
            let next = boundaries[index + 1];
            cumulative += section.percent;

            section.start = start;
            section.last_blk = start;

            if section.kind == OpKind::None {
                section.end = start;
                continue;
            }

            let len = percent_of(total_size, section.percent);
            let limit = next.saturating_sub(start);
            if len.min(limit) < section.block_size {
                return Err(PatternError::SectionTooSmall {
                    index,
                    len: len.min(limit),
                    block_size: section.block_size,
                });
            }

            section.end = (start + len - section.block_size)
                .min(next - section.block_size)
                .min(total_size - section.block_size);
        }

        debug_assert_eq!(cumulative, 100);
        self.total_size = Some(total_size);
        Ok(())
    }

    /// Produce the next request
    ///
    /// Draws the owning section by percent weight, then an offset inside it.
    /// Sequential sections return their cursor and advance it by one block,
    /// wrapping to the section start once past the section end.
    pub fn next_request(&mut self) -> Result<AccessRequest, PatternError> {
        if self.total_size.is_none() {
            return Err(PatternError::Unresolved);
        }

        let index = self.pick_section();
        let draw_rw: u32 = self.rng.gen_range(0..100);
        let rand_blocks = {
            let s = &self.sections[index];
            (s.end - s.start) / SECTOR_SIZE
        };
        let rand_index = self.rng.gen_range(0..=rand_blocks);

        let section = &mut self.sections[index];
        let offset = match section.kind {
            OpKind::None => section.start,
            k if k.is_sequential() => {
                let offset = section.last_blk;
                section.last_blk += section.block_size;
                if section.last_blk > section.end {
                    section.last_blk = section.start;
                }
                offset
            }
            _ => section.start + rand_index * SECTOR_SIZE,
        };

        let direction = if section.kind.is_mixed() {
            if draw_rw < section.read_percent {
                IoDirection::Read
            } else {
                IoDirection::Write
            }
        } else {
            section.kind.direction()
        };

        Ok(AccessRequest {
            offset,
            direction,
            block_size: section.block_size,
            section: index,
        })
    }

    /// First section whose cumulative percent strictly exceeds a [0,100) draw
    fn pick_section(&mut self) -> usize {
        let mut draw: u32 = self.rng.gen_range(0..100);
        for (index, section) in self.sections.iter().enumerate() {
            if draw < section.percent {
                return index;
            }
            draw -= section.percent;
        }
        self.sections.len() - 1
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn percent_sum(&self) -> u32 {
        self.sections.iter().map(|s| s.percent).sum()
    }

    /// Largest block size of any section
    pub fn max_block_size(&self) -> u64 {
        self.sections
            .iter()
            .filter(|s| s.kind != OpKind::None)
            .map(|s| s.block_size)
            .max()
            .unwrap_or(SECTOR_SIZE)
    }

    /// True if any section issues writes
    pub fn has_writes(&self) -> bool {
        self.sections.iter().any(|s| match s.kind {
            OpKind::WriteSeq | OpKind::WriteRand => true,
            OpKind::RwSeq | OpKind::RwRand => s.read_percent < 100,
            _ => false,
        })
    }
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.sections.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if s.kind.is_mixed() {
                write!(f, "{}:{}|{}:{}", s.percent, s.kind, s.read_percent, s.block_size)?;
            } else {
                write!(f, "{}:{}:{}", s.percent, s.kind, s.block_size)?;
            }
        }
        Ok(())
    }
}

/// Parse `keyword[|readPercent]`
///
/// A read percent on a pure read or write keyword turns the section into
/// the mixed kind with the same access order.
fn parse_op_spec(spec: &str) -> Result<(OpKind, u32), PatternError> {
    let (keyword, read) = match spec.split_once('|') {
        Some((k, r)) => (k, Some(r)),
        None => (spec, None),
    };

    let kind = OpKind::from_keyword(keyword)
        .ok_or_else(|| PatternError::UnknownOp(keyword.trim().to_string()))?;

    match read {
        Some(r) => {
            let percent: u32 = r
                .trim()
                .parse()
                .ok()
                .filter(|p| *p <= 100)
                .ok_or_else(|| PatternError::ReadPercent(r.trim().to_string()))?;
            Ok((kind.to_mixed(), percent))
        }
        None if kind.is_mixed() => Ok((kind, DEFAULT_READ_PERCENT)),
        None => Ok((kind, 0)),
    }
}

/// Parse a block size: digits with optional b/k/m/g suffix (powers of 1024)
pub fn parse_block_size(s: &str) -> Result<u64, PatternError> {
    let lower = s.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, suffix) = lower.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| PatternError::BlockSize(s.to_string()))?;

    let multiplier: u64 = match suffix {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return Err(PatternError::BlockSize(s.to_string())),
    };

    let size = value
        .checked_mul(multiplier)
        .ok_or_else(|| PatternError::BlockSize(s.to_string()))?;

    if size == 0 || size % SECTOR_SIZE != 0 {
        return Err(PatternError::BlockAlignment(size));
    }
    Ok(size)
}

#[inline]
fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

#[inline]
fn percent_of(total: u64, percent: u32) -> u64 {
    (total as u128 * percent as u128 / 100) as u64
}
