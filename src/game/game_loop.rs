//! Fixed-step simulation driver
//!
//! One call to [`GameLoop::tick`] runs, in order: fly maintenance, expiry of
//! dead and timed-out entities, integration and reindexing, the feeding
//! pass, and delta encoding. The caller owns the clock and the transport.

use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::game::combat;
use crate::game::entity::{ConnectionId, EntityId, EntityKind, Spider};
use crate::game::world::{NameTable, World};
use crate::net::protocol;

/// Candidate ids gathered from one 3x3 neighbourhood
type Candidates = SmallVec<[EntityId; 32]>;

/// What a tick produced for the session layer to act on
#[derive(Debug, Default)]
pub struct TickReport {
    /// Connections whose spider was eaten; they get a YouDied message
    pub died: Vec<ConnectionId>,
    /// Connections silent for longer than the ping timeout; force-closed
    pub timed_out: Vec<ConnectionId>,
    /// Fly spawned this tick
    pub spawned_fly: Option<EntityId>,
    /// Whether steps past the expiry pass ran
    pub simulated: bool,
    /// Entities that could not be filed in the grid
    pub index_faults: usize,
    /// Bites that landed
    pub bites: usize,
    /// Encoded delta to broadcast to every player
    pub update: Option<Vec<u8>>,
}

pub struct GameLoop {
    world: World,
    tick: u64,
}

impl GameLoop {
    pub fn new(config: GameConfig, names: NameTable) -> Self {
        Self::from_world(World::new(Arc::new(config), names))
    }

    pub fn from_world(world: World) -> Self {
        Self { world, tick: 0 }
    }

    #[inline]
    pub fn world(&self) -> &World {
        &self.world
    }

    #[inline]
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    #[inline]
    pub fn config(&self) -> &GameConfig {
        self.world.config()
    }

    /// Ticks run so far
    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Advance the simulation by `dt` seconds of wall time
    pub fn tick(&mut self, dt: f32, now: Instant) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            spawned_fly: self.world.maintain_flies(dt),
            ..TickReport::default()
        };

        self.expire(now, &mut report);

        if self.world.player_count() == 0 {
            return report;
        }
        report.simulated = true;

        let config = Arc::clone(self.world.config());
        for spider in self.world.spiders_mut() {
            if !spider.is_fly() {
                spider.integrate(dt, &config);
            }
        }
        report.index_faults = self.world.reindex();

        report.bites = self.feed(dt, &config);

        report.update = self.make_delta();
        report
    }

    /// Remove dead spiders and players whose connection went quiet
    fn expire(&mut self, now: Instant, report: &mut TickReport) {
        let timeout = self.world.config().ping_timeout;
        let mut expired: SmallVec<[EntityId; 8]> = SmallVec::new();

        for spider in self.world.spiders() {
            if spider.is_dead() {
                if let Some(connection) = spider.connection() {
                    report.died.push(connection);
                }
                expired.push(spider.id);
            } else if let EntityKind::Player {
                connection,
                last_seen,
            } = spider.kind
            {
                if now.saturating_duration_since(last_seen) > timeout {
                    info!("Spider {} timed out (connection {})", spider.id, connection);
                    report.timed_out.push(connection);
                    expired.push(spider.id);
                }
            }
        }

        for id in expired {
            if let Some(spider) = self.world.remove(id) {
                debug!("Removed spider {} (kills: {}, size: {:.1})", id, spider.kills, spider.size);
            }
        }
    }

    /// Feeding pass: every player against the neighbourhood of its cell
    fn feed(&mut self, dt: f32, config: &GameConfig) -> usize {
        let mut bites = 0;
        let mut candidates = Candidates::new();

        for slot in 0..self.world.len() {
            let spider = &self.world.spiders()[slot];
            if spider.is_fly() {
                continue;
            }
            let Some(cell) = spider.current_cell else {
                continue;
            };
            let id = spider.id;

            candidates.clear();
            candidates.extend(self.world.grid().query(cell).filter(|&other| other != id));

            for &other in &candidates {
                let Some(other_slot) = self.world.slot_of(other) else {
                    warn!("Grid lists unknown spider {}", other);
                    continue;
                };
                if let Some((attacker, defender)) = self.world.pair_mut(slot, other_slot) {
                    if let Some(feeding) = combat::resolve(attacker, defender, dt, config) {
                        bites += 1;
                        if feeding.killed {
                            debug!("Spider {} ate spider {}", attacker.id, defender.id);
                        }
                    }
                }
            }

            let spider = &mut self.world.spiders_mut()[slot];
            if spider.state != spider.last_state {
                spider.dirty = true;
            }
        }
        bites
    }

    /// Encode dirty entities and pending removals, clearing both.
    ///
    /// Returns `None` when there is nothing to send.
    pub fn make_delta(&mut self) -> Option<Vec<u8>> {
        let dirty = self.world.spiders().iter().filter(|s| s.dirty).count();
        if dirty == 0 && self.world.removed().is_empty() {
            return None;
        }

        let encoded = protocol::encode_update(
            DirtySpiders {
                inner: self.world.spiders().iter(),
                remaining: dirty,
            },
            self.world.removed(),
        );

        for spider in self.world.spiders_mut() {
            spider.dirty = false;
            spider.last_state = spider.state;
        }
        self.world.take_removed();

        match encoded {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Delta dropped: {}", e);
                None
            }
        }
    }

    /// Every live entity, for a freshly spawned client. Leaves dirty flags
    /// and the removed list untouched.
    pub fn full_snapshot(&self) -> Option<Vec<u8>> {
        protocol::encode_update(self.world.spiders().iter(), &[])
            .map_err(|e| warn!("Snapshot dropped: {}", e))
            .ok()
    }
}

/// Iterator over dirty spiders with a known length
struct DirtySpiders<'a> {
    inner: std::slice::Iter<'a, Spider>,
    remaining: usize,
}

impl<'a> Iterator for DirtySpiders<'a> {
    type Item = &'a Spider;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.by_ref().find(|s| s.dirty)?;
        self.remaining -= 1;
        Some(next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a> ExactSizeIterator for DirtySpiders<'a> {}
