//! Session state mirrored from the server.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::packet::{
    ClientStatus, ConnectedPacket, NetworkItem, NetworkPlayer, ReceivedItemsPacket,
    RoomUpdatePacket,
};

/// Result of applying a ReceivedItems packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedOutcome {
    /// Index 0: the full list replaced what we had. No per-item events.
    Replaced { count: i32 },
    /// Items past what we had already counted.
    Appended(Vec<NetworkItem>),
    /// The server skipped ahead of us; a Sync is needed.
    OutOfSync { expected: i32, got: i32 },
    /// Negative index. Nothing was applied.
    InvalidIndex { got: i32 },
}

/// Everything the client knows about its slot.
///
/// `checked_locations` keeps insertion order and is mirrored by a set for
/// membership tests; the two are only ever changed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub team: i32,
    pub slot: i32,
    pub players: Vec<NetworkPlayer>,
    checked_locations: Vec<i64>,
    #[serde(skip)]
    checked_index: HashSet<i64>,
    missing_locations: Vec<i64>,
    pending_items: Vec<NetworkItem>,
    received_item_count: i32,
    pub hint_points: i32,
    pub status: ClientStatus,
    scouted: BTreeMap<i64, NetworkItem>,
}

impl SessionSnapshot {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn checked_locations(&self) -> &[i64] {
        &self.checked_locations
    }

    pub fn missing_locations(&self) -> &[i64] {
        &self.missing_locations
    }

    pub fn pending_items(&self) -> &[NetworkItem] {
        &self.pending_items
    }

    pub fn clear_pending_items(&mut self) {
        self.pending_items.clear();
    }

    pub fn received_item_count(&self) -> i32 {
        self.received_item_count
    }

    pub fn is_checked(&self, location: i64) -> bool {
        self.checked_index.contains(&location)
    }

    /// Scouted item at `location`, if LocationInfo reported one.
    pub fn scouted(&self, location: i64) -> Option<&NetworkItem> {
        self.scouted.get(&location)
    }

    /// Mark a location checked. Returns false if it already was.
    pub fn apply_check(&mut self, location: i64) -> bool {
        if !self.checked_index.insert(location) {
            return false;
        }
        self.checked_locations.push(location);
        self.missing_locations.retain(|&id| id != location);
        true
    }

    pub fn apply_connected(&mut self, packet: &ConnectedPacket) {
        self.team = packet.team;
        self.slot = packet.slot;
        self.players = packet.players.clone();
        self.hint_points = packet.hint_points;

        self.checked_locations.clear();
        self.checked_index.clear();
        for &location in &packet.checked_locations {
            if self.checked_index.insert(location) {
                self.checked_locations.push(location);
            }
        }
        self.missing_locations = packet
            .missing_locations
            .iter()
            .copied()
            .filter(|id| !self.checked_index.contains(id))
            .collect();
    }

    pub fn apply_received_items(&mut self, packet: &ReceivedItemsPacket) -> ReceivedOutcome {
        if packet.index < 0 {
            return ReceivedOutcome::InvalidIndex { got: packet.index };
        }
        if packet.index == 0 {
            self.pending_items = packet.items.clone();
            self.received_item_count = saturating_count(packet.items.len());
            return ReceivedOutcome::Replaced {
                count: self.received_item_count,
            };
        }
        if packet.index > self.received_item_count {
            return ReceivedOutcome::OutOfSync {
                expected: self.received_item_count,
                got: packet.index,
            };
        }

        // 0 <= index <= count here, so the difference is non-negative.
        let already = usize::try_from(i64::from(self.received_item_count) - i64::from(packet.index))
            .unwrap_or(0);
        let fresh: Vec<NetworkItem> = packet.items.iter().skip(already).copied().collect();
        self.pending_items.extend_from_slice(&fresh);
        self.received_item_count = self
            .received_item_count
            .saturating_add(saturating_count(fresh.len()));
        ReceivedOutcome::Appended(fresh)
    }

    /// Apply the fields present in a RoomUpdate. Returns checked locations
    /// learned from the server that were not known locally.
    pub fn apply_room_update(&mut self, update: &RoomUpdatePacket) -> Vec<i64> {
        if let Some(players) = &update.players {
            self.players = players.clone();
        }
        if let Some(hint_points) = update.hint_points {
            self.hint_points = hint_points;
        }
        if let Some(missing) = &update.missing_locations {
            self.missing_locations = missing
                .iter()
                .copied()
                .filter(|id| !self.checked_index.contains(id))
                .collect();
        }
        match &update.checked_locations {
            Some(checked) => checked
                .iter()
                .copied()
                .filter(|&id| self.apply_check(id))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn record_scouts(&mut self, items: &[NetworkItem]) {
        for item in items {
            self.scouted.insert(item.location, *item);
        }
    }
}

/// A locally checked location the server has not acknowledged yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCheck {
    pub location: i64,
    /// LocationChecked was already published for this id.
    pub announced: bool,
}

/// Outbox of location checks, delivered again after a reconnect until the
/// server lists them as checked.
#[derive(Debug, Clone, Default)]
pub struct PendingChecks {
    entries: Vec<PendingCheck>,
}

impl PendingChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, location: i64, announced: bool) {
        if !self.contains(location) {
            self.entries.push(PendingCheck {
                location,
                announced,
            });
        }
    }

    pub fn contains(&self, location: i64) -> bool {
        self.entries.iter().any(|e| e.location == location)
    }

    pub fn acknowledge(&mut self, checked: &[i64]) {
        if checked.is_empty() {
            return;
        }
        let acked: HashSet<i64> = checked.iter().copied().collect();
        self.entries.retain(|e| !acked.contains(&e.location));
    }

    pub fn entries(&self) -> &[PendingCheck] {
        &self.entries
    }

    pub fn mark_all_announced(&mut self) {
        for entry in &mut self.entries {
            entry.announced = true;
        }
    }

    pub fn locations(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.location).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn saturating_count(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64) -> NetworkItem {
        NetworkItem {
            item: id,
            location: id + 1000,
            player: 1,
            flags: 0,
        }
    }

    fn connected(checked: Vec<i64>, missing: Vec<i64>) -> ConnectedPacket {
        ConnectedPacket {
            team: 0,
            slot: 2,
            players: vec![],
            missing_locations: missing,
            checked_locations: checked,
            slot_data: serde_json::Value::Null,
            slot_info: Default::default(),
            hint_points: 5,
        }
    }

    #[test]
    fn apply_check_is_idempotent() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.apply_connected(&connected(vec![], vec![1, 2, 3]));

        assert!(snapshot.apply_check(2));
        assert!(!snapshot.apply_check(2));
        assert!(snapshot.apply_check(9));
        assert_eq!(snapshot.checked_locations(), &[2, 9]);
        assert_eq!(snapshot.missing_locations(), &[1, 3]);
        assert!(snapshot.is_checked(9));
    }

    #[test]
    fn connected_rebuilds_index() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.apply_check(50);
        snapshot.apply_connected(&connected(vec![4, 4, 5], vec![5, 6]));
        assert_eq!(snapshot.checked_locations(), &[4, 5]);
        assert_eq!(snapshot.missing_locations(), &[6]);
        assert!(!snapshot.is_checked(50));
        assert_eq!(snapshot.slot, 2);
        assert_eq!(snapshot.hint_points, 5);
    }

    #[test]
    fn received_items_full_then_incremental() {
        let mut snapshot = SessionSnapshot::default();
        let outcome = snapshot.apply_received_items(&ReceivedItemsPacket {
            index: 0,
            items: vec![item(1), item(2)],
        });
        assert_eq!(outcome, ReceivedOutcome::Replaced { count: 2 });

        let outcome = snapshot.apply_received_items(&ReceivedItemsPacket {
            index: 2,
            items: vec![item(3)],
        });
        assert_eq!(outcome, ReceivedOutcome::Appended(vec![item(3)]));
        assert_eq!(snapshot.pending_items(), &[item(1), item(2), item(3)]);
        assert_eq!(snapshot.received_item_count(), 3);
    }

    #[test]
    fn received_items_overlap_and_gap() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.apply_received_items(&ReceivedItemsPacket {
            index: 0,
            items: vec![item(1), item(2)],
        });

        let outcome = snapshot.apply_received_items(&ReceivedItemsPacket {
            index: 1,
            items: vec![item(2), item(3)],
        });
        assert_eq!(outcome, ReceivedOutcome::Appended(vec![item(3)]));
        assert_eq!(snapshot.received_item_count(), 3);

        let outcome = snapshot.apply_received_items(&ReceivedItemsPacket {
            index: 7,
            items: vec![item(8)],
        });
        assert_eq!(
            outcome,
            ReceivedOutcome::OutOfSync {
                expected: 3,
                got: 7
            }
        );
        assert_eq!(snapshot.received_item_count(), 3);
    }

    #[test]
    fn negative_item_index_is_rejected_untouched() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.apply_received_items(&ReceivedItemsPacket {
            index: 0,
            items: vec![item(1)],
        });

        for index in [-1, i32::MIN] {
            let outcome = snapshot.apply_received_items(&ReceivedItemsPacket {
                index,
                items: vec![item(9)],
            });
            assert_eq!(outcome, ReceivedOutcome::InvalidIndex { got: index });
        }
        assert_eq!(snapshot.pending_items(), &[item(1)]);
        assert_eq!(snapshot.received_item_count(), 1);

        let mut empty = SessionSnapshot::default();
        let outcome = empty.apply_received_items(&ReceivedItemsPacket {
            index: -1,
            items: vec![item(9)],
        });
        assert_eq!(outcome, ReceivedOutcome::InvalidIndex { got: -1 });
        assert!(empty.pending_items().is_empty());
        assert_eq!(empty.received_item_count(), 0);
    }

    #[test]
    fn room_update_applies_present_fields() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.apply_connected(&connected(vec![1], vec![2, 3, 4]));

        let learned = snapshot.apply_room_update(&RoomUpdatePacket {
            checked_locations: Some(vec![1, 3]),
            hint_points: Some(12),
            ..Default::default()
        });
        assert_eq!(learned, vec![3]);
        assert_eq!(snapshot.hint_points, 12);
        assert_eq!(snapshot.missing_locations(), &[2, 4]);
        assert_eq!(snapshot.slot, 2);
    }

    #[test]
    fn outbox_acknowledgement() {
        let mut outbox = PendingChecks::new();
        outbox.record(10, true);
        outbox.record(11, false);
        outbox.record(10, false);
        assert_eq!(outbox.len(), 2);
        assert!(outbox.entries()[0].announced);

        outbox.acknowledge(&[10]);
        assert_eq!(outbox.locations(), vec![11]);
        outbox.mark_all_announced();
        assert!(outbox.entries()[0].announced);
        outbox.clear();
        assert!(outbox.is_empty());
    }

    #[test]
    fn scouts_are_indexed_by_location() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.record_scouts(&[item(1), item(2)]);
        assert_eq!(snapshot.scouted(1001), Some(&item(1)));
        assert!(snapshot.scouted(5).is_none());
    }
}
