#![allow(unsafe_code)]
//! The memory arena and the in-process bus that serves it.
//!
//! The arena is a flat byte region of `segment_capacity * segment_count`
//! bytes backed by a memory mapping: anonymous for in-process engines, or
//! file-backed (typically under `/dev/shm`) so that external capture
//! tools can map the same region. No header or metadata is stored in the
//! arena itself; all bookkeeping lives in the engine's volatile state.
//!
//! [`ArenaBus`] exposes the arena through the two-phase burst protocol
//! with a configurable response latency, so requests are genuinely
//! outstanding between address acceptance and data completion and the
//! engines' ledger accounting is exercised for real.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::{MmapMut, MmapOptions};

use crate::bus::protocol::{
    AddressRequest, BurstType, BusResponse, ReadBeat, WriteBeat, WORD_BYTES,
};
use crate::error::Result;

/// Flat byte region backing the ring segments.
///
/// # Safety
///
/// The arena hands out raw-pointer access through `&self`. This is sound
/// under the engine's ownership discipline: exactly one writer mutates any
/// byte range at a time (the ring writer, via its bus), and readers only
/// touch ranges whose completion the writer has published through the
/// ring's Release/Acquire counters, which gives the byte writes a
/// happens-before edge to every reader.
pub struct Arena {
    /// Keeps the mapping alive; all access goes through `data_ptr`.
    #[expect(
        dead_code,
        reason = "mmap must be kept alive to maintain memory mapping validity"
    )]
    mmap: MmapMut,
    data_ptr: *mut u8,
    len: usize,
    path: Option<PathBuf>,
}

// SAFETY: Arena only exposes raw pointers internally, and every mutation
// site is serialized by the single-writer discipline documented above.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.len)
            .field("path", &self.path)
            .finish()
    }
}

impl Arena {
    /// Create an anonymous (process-private) arena of `len` bytes.
    pub fn anon(len: usize) -> Result<Self> {
        let mut mmap = MmapOptions::new().len(len).map_anon()?;
        let data_ptr = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            data_ptr,
            len,
            path: None,
        })
    }

    /// Create a file-backed arena of `len` bytes at `path`, truncating any
    /// existing file.
    ///
    /// The file holds exactly the raw segment bytes (no header), so an
    /// external process can map `[i * segment_capacity, (i + 1) *
    /// segment_capacity)` to see segment `i`.
    pub fn create(path: &Path, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        // SAFETY: we just created the file and set its size, so mapping it
        // mutably is safe.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let data_ptr = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            data_ptr,
            len,
            path: Some(path.to_path_buf()),
        })
    }

    /// Size of the arena in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length arena (never the case for a validated
    /// engine configuration).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing file path, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one word at `offset`, honoring the byte-enable mask.
    /// Out-of-range writes are refused.
    pub(crate) fn write_word_masked(&self, offset: u64, data: u64, byte_enable: u8) -> bool {
        let offset = offset as usize;
        if offset + WORD_BYTES as usize > self.len {
            return false;
        }
        let bytes = data.to_le_bytes();
        for (i, byte) in bytes.iter().enumerate() {
            if byte_enable & (1u8 << i) != 0 {
                // SAFETY: offset + WORD_BYTES <= len was checked above and
                // the single-writer discipline gives exclusive access.
                unsafe {
                    *self.data_ptr.add(offset + i) = *byte;
                }
            }
        }
        true
    }

    /// Read one little-endian word at `offset`; zero when out of range.
    pub fn read_word(&self, offset: u64) -> u64 {
        let offset = offset as usize;
        if offset + WORD_BYTES as usize > self.len {
            return 0;
        }
        let mut bytes = [0u8; WORD_BYTES as usize];
        // SAFETY: range checked above; completed data is published with a
        // happens-before edge before any reader gets here.
        unsafe {
            std::ptr::copy_nonoverlapping(self.data_ptr.add(offset), bytes.as_mut_ptr(), 8);
        }
        u64::from_le_bytes(bytes)
    }

    /// Bulk-copy `len` bytes starting at `offset` out of the arena.
    ///
    /// The copy is clamped to the arena bounds.
    pub fn read_bytes(&self, offset: u64, len: u64) -> Bytes {
        let offset = (offset as usize).min(self.len);
        let len = (len as usize).min(self.len - offset);
        // SAFETY: the range is clamped into the mapping, which lives as
        // long as `self`.
        let slice = unsafe { std::slice::from_raw_parts(self.data_ptr.add(offset), len) };
        Bytes::copy_from_slice(slice)
    }
}

/// In-flight write burst: address accepted, beats still arriving.
#[derive(Debug)]
struct PendingWrite {
    req: AddressRequest,
    beats_done: u32,
    fault: Option<BusResponse>,
}

/// A completed request's response, aging toward delivery.
#[derive(Debug)]
struct AgingResponse {
    countdown: u32,
    resp: BusResponse,
}

/// In-flight read burst.
#[derive(Debug)]
struct PendingRead {
    req: AddressRequest,
    countdown: u32,
    next_beat: u32,
    fault: Option<BusResponse>,
}

/// One engine's port onto the arena, speaking the burst protocol.
///
/// Each burst engine owns its own `ArenaBus` over a shared [`Arena`]; the
/// bus itself holds only that engine's in-flight request state.
#[derive(Debug)]
pub struct ArenaBus {
    arena: Arc<Arena>,
    base_address: u64,
    response_latency: u32,
    writes_awaiting_data: VecDeque<PendingWrite>,
    write_responses: VecDeque<AgingResponse>,
    reads_pending: VecDeque<PendingRead>,
}

impl ArenaBus {
    /// Create a bus port mapping `[base_address, base_address +
    /// arena.len())` onto the arena.
    pub fn new(arena: Arc<Arena>, base_address: u64, response_latency: u32) -> Self {
        Self {
            arena,
            base_address,
            response_latency,
            writes_awaiting_data: VecDeque::new(),
            write_responses: VecDeque::new(),
            reads_pending: VecDeque::new(),
        }
    }

    /// Check a burst against the decoded address window.
    fn decode(&self, req: &AddressRequest) -> Option<BusResponse> {
        let in_range = req.address >= self.base_address
            && req.address % WORD_BYTES == 0
            && req.beats > 0
            && req.address + req.span() <= self.base_address + self.arena.len() as u64;
        if in_range {
            None
        } else {
            Some(BusResponse::DecodeError)
        }
    }

    /// Accept a write burst's address phase.
    pub fn submit_write(&mut self, req: AddressRequest) {
        let fault = self.decode(&req);
        self.writes_awaiting_data.push_back(PendingWrite {
            req,
            beats_done: 0,
            fault,
        });
    }

    /// Deliver one write data beat for the oldest open write burst.
    ///
    /// Returns `false` when no write burst is open (a protocol violation
    /// by the caller; the beat is discarded).
    pub fn push_write_beat(&mut self, beat: WriteBeat) -> bool {
        let Some(pending) = self.writes_awaiting_data.front_mut() else {
            return false;
        };
        if pending.fault.is_none() {
            let beat_offset = match pending.req.burst_type {
                BurstType::Incr => u64::from(pending.beats_done) * WORD_BYTES,
                BurstType::Fixed => 0,
            };
            let offset = pending.req.address - self.base_address + beat_offset;
            if !self.arena.write_word_masked(offset, beat.data, beat.byte_enable) {
                pending.fault = Some(BusResponse::SlaveError);
            }
        }
        pending.beats_done += 1;

        let complete = pending.beats_done == pending.req.beats;
        if complete != beat.last && pending.fault.is_none() {
            // Beat count and last marker disagree: malformed burst.
            pending.fault = Some(BusResponse::SlaveError);
        }
        if complete || beat.last {
            let resp = pending.fault.unwrap_or(BusResponse::Okay);
            self.writes_awaiting_data.pop_front();
            self.write_responses.push_back(AgingResponse {
                countdown: self.response_latency,
                resp,
            });
        }
        true
    }

    /// Collect the oldest write response once its latency has elapsed.
    pub fn poll_write_response(&mut self) -> Option<BusResponse> {
        if self.write_responses.front()?.countdown == 0 {
            self.write_responses.pop_front().map(|aging| aging.resp)
        } else {
            None
        }
    }

    /// Accept a read burst's address phase.
    pub fn submit_read(&mut self, req: AddressRequest) {
        let fault = self.decode(&req);
        self.reads_pending.push_back(PendingRead {
            req,
            countdown: self.response_latency,
            next_beat: 0,
            fault,
        });
    }

    /// Collect the next read data beat once its burst's latency has
    /// elapsed.
    pub fn poll_read_beat(&mut self) -> Option<ReadBeat> {
        let pending = self.reads_pending.front_mut()?;
        if pending.countdown > 0 {
            return None;
        }
        let beat_offset = match pending.req.burst_type {
            BurstType::Incr => u64::from(pending.next_beat) * WORD_BYTES,
            BurstType::Fixed => 0,
        };
        let beat = ReadBeat {
            data: match pending.fault {
                // Data undefined on a faulted burst; serve zeros.
                Some(_) => 0,
                None => self
                    .arena
                    .read_word(pending.req.address - self.base_address + beat_offset),
            },
            last: pending.next_beat + 1 == pending.req.beats,
            resp: pending.fault.unwrap_or(BusResponse::Okay),
        };
        pending.next_beat += 1;
        if beat.last {
            self.reads_pending.pop_front();
        }
        Some(beat)
    }

    /// Advance the bus one step: responses age toward delivery.
    pub fn step(&mut self) {
        for aging in &mut self.write_responses {
            aging.countdown = aging.countdown.saturating_sub(1);
        }
        for pending in &mut self.reads_pending {
            pending.countdown = pending.countdown.saturating_sub(1);
        }
    }

    /// True when no request is in flight in either direction.
    pub fn idle(&self) -> bool {
        self.writes_awaiting_data.is_empty()
            && self.write_responses.is_empty()
            && self.reads_pending.is_empty()
    }

    /// The arena this bus decodes into.
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }
}
