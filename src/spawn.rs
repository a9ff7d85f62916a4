use std::collections::HashMap;

use serde::Serialize;

use crate::physics::ROAD_HALF_WIDTH;

/// Lane width of the demo road.
pub const LANE_WIDTH: f32 = 12.0;
/// Gap between cars sharing a lane.
pub const SPAWN_SPACING: f32 = 15.0;

// ---------------------------------------------
// SPAWN RESULT RETURNED TO NET
// ---------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSpawnInfo {
    pub player_id: String,
    pub lane: i32,
    pub position: [f32; 3],
}

// ---------------------------------------------
// SPAWN MANAGER: ONE GRID SLOT PER PLAYER
// ---------------------------------------------
#[derive(Debug)]
pub struct SpawnManager {
    lanes: i32,
    /// player -> (lane, row)
    taken: HashMap<String, (i32, i32)>,
}

impl Default for SpawnManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SpawnManager {
    pub fn new() -> Self {
        Self {
            lanes: ((2.0 * ROAD_HALF_WIDTH) / LANE_WIDTH) as i32,
            taken: HashMap::new(),
        }
    }

    /// Lane index in road coordinates: lanes run from -lanes/2 upwards.
    fn lane_index(&self, column: i32) -> i32 {
        column - self.lanes / 2
    }

    pub fn lane_center(lane: i32) -> f32 {
        lane as f32 * LANE_WIDTH + LANE_WIDTH * 0.5
    }

    // ---------------------------------------------------------
    // First free (lane, row) slot, rows filled front to back
    // ---------------------------------------------------------
    fn free_slot(&self) -> (i32, i32) {
        let mut row = 0;
        loop {
            for column in 0..self.lanes {
                let slot = (self.lane_index(column), row);
                if !self.taken.values().any(|s| *s == slot) {
                    return slot;
                }
            }
            row += 1;
        }
    }

    pub fn allocate_spawn(&mut self, player_id: &str) -> PlayerSpawnInfo {
        let (lane, row) = match self.taken.get(player_id) {
            Some(slot) => *slot,
            None => {
                let slot = self.free_slot();
                self.taken.insert(player_id.to_string(), slot);
                slot
            }
        };

        PlayerSpawnInfo {
            player_id: player_id.to_string(),
            lane,
            position: [Self::lane_center(lane), 0.0, -(row as f32) * SPAWN_SPACING],
        }
    }

    pub fn release(&mut self, player_id: &str) {
        self.taken.remove(player_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn players_fill_lanes_then_rows() {
        let mut spawns = SpawnManager::new();
        let infos: Vec<_> = (0..5).map(|i| spawns.allocate_spawn(&format!("p{i}"))).collect();
        let lanes: Vec<i32> = infos.iter().map(|i| i.lane).collect();
        assert_eq!(lanes, vec![-2, -1, 0, 1, -2]);
        assert_eq!(infos[0].position, [-18.0, 0.0, 0.0]);
        assert_eq!(infos[4].position, [-18.0, 0.0, -SPAWN_SPACING]);
    }

    #[test]
    fn released_slots_are_reused() {
        let mut spawns = SpawnManager::new();
        spawns.allocate_spawn("a");
        let b = spawns.allocate_spawn("b");
        spawns.release("a");
        let c = spawns.allocate_spawn("c");
        assert_eq!(c.lane, -2);
        assert_ne!(c.lane, b.lane);
    }

    #[test]
    fn same_player_keeps_its_slot() {
        let mut spawns = SpawnManager::new();
        let first = spawns.allocate_spawn("a");
        assert_eq!(spawns.allocate_spawn("a"), first);
    }

    #[test]
    fn every_lane_centre_is_on_the_road() {
        let spawns = SpawnManager::new();
        for column in 0..spawns.lanes {
            let x = SpawnManager::lane_center(spawns.lane_index(column));
            assert!(x.abs() < ROAD_HALF_WIDTH);
        }
    }
}
