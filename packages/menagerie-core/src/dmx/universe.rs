//! Per-universe DMX state and the merge rules between writers.
//!
//! Three writers can touch a universe within one tick: the animation
//! runner, live stream fragments, and interrupt playback. Animation
//! writes persist across ticks (a creature that is not being animated
//! keeps its last pose); stream and interrupt writes are per-tick
//! overlays that evaporate when the packet is composed. Priority on
//! overlap is interrupt > stream > animation, applied at compose time,
//! so dispatch order within the tick does not matter.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{ServerError, ServerResult};
use crate::model::UniverseId;
use crate::protocol_constants::{DMX_PROPERTY_COUNT, DMX_START_CODE, E131_MAX_UNIVERSE};

/// Which writer a DMX write comes from. Determines overlap priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLayer {
    /// Animation playback. Persists across ticks.
    Animation,
    /// Live stream fragment. Next tick only.
    Stream,
    /// Interrupt playback. Next tick only, wins every overlap.
    Interrupt,
}

/// A one-tick overlay of slot values.
struct Overlay {
    data: [u8; DMX_PROPERTY_COUNT],
    mask: [bool; DMX_PROPERTY_COUNT],
    dirty: bool,
}

impl Overlay {
    fn new() -> Self {
        Self {
            data: [0; DMX_PROPERTY_COUNT],
            mask: [false; DMX_PROPERTY_COUNT],
            dirty: false,
        }
    }

    fn write(&mut self, first_slot: usize, bytes: &[u8]) {
        self.data[first_slot..first_slot + bytes.len()].copy_from_slice(bytes);
        for touched in &mut self.mask[first_slot..first_slot + bytes.len()] {
            *touched = true;
        }
        self.dirty = true;
    }

    fn apply_to(&self, slots: &mut [u8; DMX_PROPERTY_COUNT]) {
        if !self.dirty {
            return;
        }
        for slot in 1..DMX_PROPERTY_COUNT {
            if self.mask[slot] {
                slots[slot] = self.data[slot];
            }
        }
    }

    fn clear(&mut self) {
        if self.dirty {
            self.mask = [false; DMX_PROPERTY_COUNT];
            self.dirty = false;
        }
    }
}

struct UniverseInner {
    /// Persistent slot state from animation writes. Index is the DMX
    /// slot number; index 0 is the START code and stays zero.
    base: [u8; DMX_PROPERTY_COUNT],
    stream: Overlay,
    interrupt: Overlay,
    /// Rolling E1.31 sequence number, post-incremented per packet.
    sequence: u8,
}

/// One DMX universe: 512 slots plus the packet sequence counter.
///
/// Created on first reference, never destroyed during the process
/// lifetime. Interior mutex so writers on any thread can stage values;
/// only the event loop composes packets.
pub struct Universe {
    id: UniverseId,
    inner: Mutex<UniverseInner>,
}

impl Universe {
    fn new(id: UniverseId) -> Self {
        Self {
            id,
            inner: Mutex::new(UniverseInner {
                base: [0; DMX_PROPERTY_COUNT],
                stream: Overlay::new(),
                interrupt: Overlay::new(),
                sequence: 0,
            }),
        }
    }

    pub fn id(&self) -> UniverseId {
        self.id
    }

    /// Stages a write from the given layer.
    ///
    /// Slot 0 (the START code) can never be written and no write may
    /// extend past slot 512.
    pub fn write(&self, layer: WriteLayer, channel_offset: u16, bytes: &[u8]) -> ServerResult<()> {
        let first = channel_offset as usize;
        if first == 0 || bytes.is_empty() || first + bytes.len() > DMX_PROPERTY_COUNT {
            return Err(ServerError::InvalidData(format!(
                "universe {}: write of {} bytes at slot {} is out of range",
                self.id,
                bytes.len(),
                channel_offset
            )));
        }

        let mut inner = self.inner.lock();
        match layer {
            WriteLayer::Animation => {
                inner.base[first..first + bytes.len()].copy_from_slice(bytes);
            }
            WriteLayer::Stream => inner.stream.write(first, bytes),
            WriteLayer::Interrupt => {
                // Interrupts are animation playback at higher priority:
                // the pose persists like any animation write, while the
                // overlay settles same-tick overlaps in their favor.
                inner.base[first..first + bytes.len()].copy_from_slice(bytes);
                inner.interrupt.write(first, bytes);
            }
        }
        Ok(())
    }

    /// Stages an animation write (persists across ticks).
    pub fn write_animation(&self, channel_offset: u16, bytes: &[u8]) -> ServerResult<()> {
        self.write(WriteLayer::Animation, channel_offset, bytes)
    }

    /// Stages a live-stream write (this tick only).
    pub fn write_stream(&self, channel_offset: u16, bytes: &[u8]) -> ServerResult<()> {
        self.write(WriteLayer::Stream, channel_offset, bytes)
    }

    /// Stages an interrupt write (persists, wins same-tick overlaps).
    pub fn write_interrupt(&self, channel_offset: u16, bytes: &[u8]) -> ServerResult<()> {
        self.write(WriteLayer::Interrupt, channel_offset, bytes)
    }

    /// Merges the layers into the property values for this tick's
    /// packet and returns them with the sequence number to use.
    ///
    /// Overlays are consumed; the persistent base is not. The START
    /// code at index 0 is forced to zero.
    pub fn compose(&self) -> ([u8; DMX_PROPERTY_COUNT], u8) {
        let mut inner = self.inner.lock();

        let mut slots = inner.base;
        inner.stream.apply_to(&mut slots);
        inner.interrupt.apply_to(&mut slots);
        slots[0] = DMX_START_CODE;

        inner.stream.clear();
        inner.interrupt.clear();

        let sequence = inner.sequence;
        inner.sequence = inner.sequence.wrapping_add(1);
        (slots, sequence)
    }

    /// Current sequence number (the one the next packet will carry).
    pub fn sequence(&self) -> u8 {
        self.inner.lock().sequence
    }
}

/// All universes this server has ever referenced.
///
/// Every universe in here is emitted every tick as keepalive, whether
/// or not anything wrote to it.
#[derive(Default)]
pub struct UniverseRegistry {
    map: DashMap<UniverseId, Arc<Universe>>,
}

impl UniverseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the universe, creating it on first reference.
    pub fn get_or_create(&self, id: UniverseId) -> ServerResult<Arc<Universe>> {
        if id == 0 || id > E131_MAX_UNIVERSE {
            return Err(ServerError::InvalidData(format!(
                "universe {} is outside 1..={}",
                id, E131_MAX_UNIVERSE
            )));
        }
        let universe = self
            .map
            .entry(id)
            .or_insert_with(|| {
                log::debug!("universe {}: created on first reference", id);
                Arc::new(Universe::new(id))
            })
            .value()
            .clone();
        Ok(universe)
    }

    /// Snapshot of all universes, ordered by id so packet emission is
    /// deterministic.
    pub fn all(&self) -> Vec<Arc<Universe>> {
        let mut universes: Vec<_> = self.map.iter().map(|r| r.value().clone()).collect();
        universes.sort_by_key(|u| u.id());
        universes
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots_of(universe: &Universe) -> [u8; DMX_PROPERTY_COUNT] {
        universe.compose().0
    }

    #[test]
    fn animation_writes_persist_across_ticks() {
        let universe = Universe::new(7);
        universe
            .write(WriteLayer::Animation, 10, &[0xAA, 0xBB])
            .unwrap();

        let first = slots_of(&universe);
        assert_eq!(&first[10..12], &[0xAA, 0xBB]);

        // Nothing written this tick; the pose holds.
        let second = slots_of(&universe);
        assert_eq!(&second[10..12], &[0xAA, 0xBB]);
    }

    #[test]
    fn stream_writes_last_one_tick() {
        let universe = Universe::new(7);
        universe.write(WriteLayer::Animation, 5, &[0x10]).unwrap();
        universe.write(WriteLayer::Stream, 5, &[0xFF]).unwrap();

        let with_stream = slots_of(&universe);
        assert_eq!(with_stream[5], 0xFF);

        // Next tick the animation value shows again.
        let after = slots_of(&universe);
        assert_eq!(after[5], 0x10);
    }

    #[test]
    fn merge_priority_interrupt_stream_animation() {
        let universe = Universe::new(1);
        universe
            .write(WriteLayer::Animation, 1, &[0x01, 0x01, 0x01])
            .unwrap();
        universe.write(WriteLayer::Stream, 2, &[0x02, 0x02]).unwrap();
        universe.write(WriteLayer::Interrupt, 3, &[0x03]).unwrap();

        let slots = slots_of(&universe);
        assert_eq!(slots[1], 0x01, "animation only");
        assert_eq!(slots[2], 0x02, "stream beats animation");
        assert_eq!(slots[3], 0x03, "interrupt beats stream");
    }

    #[test]
    fn non_overlapping_writers_all_land() {
        let universe = Universe::new(1);
        universe.write(WriteLayer::Animation, 10, &[0xA1]).unwrap();
        universe.write(WriteLayer::Stream, 20, &[0xB2]).unwrap();
        universe.write(WriteLayer::Interrupt, 30, &[0xC3]).unwrap();

        let slots = slots_of(&universe);
        assert_eq!(slots[10], 0xA1);
        assert_eq!(slots[20], 0xB2);
        assert_eq!(slots[30], 0xC3);
    }

    #[test]
    fn priority_holds_regardless_of_write_order() {
        let universe = Universe::new(1);
        universe.write(WriteLayer::Interrupt, 4, &[0x33]).unwrap();
        universe.write(WriteLayer::Stream, 4, &[0x22]).unwrap();
        universe.write(WriteLayer::Animation, 4, &[0x11]).unwrap();

        assert_eq!(slots_of(&universe)[4], 0x33);
    }

    #[test]
    fn interrupt_pose_persists_after_its_tick() {
        let universe = Universe::new(1);
        universe.write(WriteLayer::Animation, 6, &[0x10]).unwrap();
        universe.write(WriteLayer::Interrupt, 6, &[0x77]).unwrap();

        assert_eq!(slots_of(&universe)[6], 0x77);
        // The interrupted pose holds on following ticks; an interrupt
        // is still animation playback.
        assert_eq!(slots_of(&universe)[6], 0x77);
    }

    #[test]
    fn slot_zero_cannot_be_written() {
        let universe = Universe::new(1);
        let err = universe.write(WriteLayer::Animation, 0, &[0x10]).unwrap_err();
        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn writes_past_slot_512_rejected() {
        let universe = Universe::new(1);
        // 512 + 1 byte is the last legal write.
        assert!(universe.write(WriteLayer::Animation, 512, &[0x10]).is_ok());
        assert!(universe
            .write(WriteLayer::Animation, 512, &[0x10, 0x20])
            .is_err());
        assert!(universe.write(WriteLayer::Stream, 513, &[0x10]).is_err());
    }

    #[test]
    fn empty_write_rejected() {
        let universe = Universe::new(1);
        assert!(universe.write(WriteLayer::Stream, 1, &[]).is_err());
    }

    #[test]
    fn start_code_is_always_zero() {
        let universe = Universe::new(1);
        universe.write(WriteLayer::Animation, 1, &[0xFF; 512]).unwrap();
        let (slots, _) = universe.compose();
        assert_eq!(slots[0], 0);
    }

    #[test]
    fn sequence_increments_and_wraps() {
        let universe = Universe::new(1);
        for expected in 0..=255u8 {
            let (_, seq) = universe.compose();
            assert_eq!(seq, expected);
        }
        let (_, wrapped) = universe.compose();
        assert_eq!(wrapped, 0);
    }

    #[test]
    fn registry_creates_on_first_reference() {
        let registry = UniverseRegistry::new();
        assert!(registry.is_empty());

        let a = registry.get_or_create(9).unwrap();
        let b = registry.get_or_create(9).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_rejects_out_of_range_ids() {
        let registry = UniverseRegistry::new();
        assert!(registry.get_or_create(0).is_err());
        assert!(registry.get_or_create(E131_MAX_UNIVERSE + 1).is_err());
        assert!(registry.get_or_create(E131_MAX_UNIVERSE).is_ok());
    }

    #[test]
    fn registry_all_is_sorted_by_id() {
        let registry = UniverseRegistry::new();
        registry.get_or_create(9).unwrap();
        registry.get_or_create(3).unwrap();
        registry.get_or_create(7).unwrap();

        let ids: Vec<_> = registry.all().iter().map(|u| u.id()).collect();
        assert_eq!(ids, vec![3, 7, 9]);
    }
}
