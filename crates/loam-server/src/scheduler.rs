use loam_geom::Vec3;
use loam_map::{GenState, VoxelMap};
use loam_net::{PeerId, PlayerPos};
use loam_runtime::EmergeQueue;
use loam_world::{BLOCK_SIZE, BlockPos};

use crate::config::ServerConfig;
use crate::peers::PeerBlockStates;
use crate::sight::{DEFAULT_FOV, block_in_sight, shell};

/// Eye height above the reported feet position, in nodes.
pub const EYE_HEIGHT: f32 = 1.625;

/// Shells scanned per call beyond the resume point.
const MAX_D_INCREMENT: i32 = 2;
/// Shells close enough to ignore the building throttle.
const DISABLE_LIMITS_MAX_D: i32 = 1;
/// Per-client cap while the player is building.
const LIMITED_SENDS: usize = 1;
const NOTHING_TO_SEND_PAUSE: f32 = 2.0;
const RESET_INTERVAL: f32 = 20.0;

/// Sort key for a send candidate; lower goes first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u32);

/// Last player state the server accepted from a client.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerView {
    pub position: Vec3,
    pub speed: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub fov: f32,
    pub wanted_range: i32,
}

impl PlayerView {
    pub fn eye(&self) -> Vec3 {
        self.position + Vec3::new(0.0, EYE_HEIGHT, 0.0)
    }

    pub fn look_dir(&self) -> Vec3 {
        Vec3::look_dir(self.pitch, self.yaw)
    }

    /// Anchor for the scan: a block ahead of the player when moving.
    pub fn predicted_position(&self) -> Vec3 {
        if self.speed.length() > 1.0 {
            self.position + self.speed.normalized() * BLOCK_SIZE as f32
        } else {
            self.position
        }
    }

    /// Rejects reports with non-finite numbers.
    pub fn from_report(p: &PlayerPos) -> Option<Self> {
        let finite = p.position.is_finite()
            && p.speed.is_finite()
            && p.pitch.is_finite()
            && p.yaw.is_finite()
            && p.fov.is_finite();
        finite.then(|| Self {
            position: p.position,
            speed: p.speed,
            pitch: p.pitch,
            yaw: p.yaw,
            fov: if p.fov > 0.0 { p.fov } else { DEFAULT_FOV },
            wanted_range: i32::from(p.wanted_range.max(0)),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SendLimits {
    pub max_send_distance: i32,
    pub max_generate_distance: i32,
    pub optimize_distance: i32,
    pub max_per_client: usize,
    pub full_send_min_time_from_building: f32,
}

impl From<&ServerConfig> for SendLimits {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            max_send_distance: cfg.max_block_send_distance,
            max_generate_distance: cfg.max_block_generate_distance,
            optimize_distance: cfg.block_send_optimize_distance,
            max_per_client: cfg.max_simultaneous_block_sends_per_client,
            full_send_min_time_from_building: cfg.full_block_send_enable_min_time_from_building,
        }
    }
}

/// What a scan needs besides the peer's own state.
pub struct ScanContext<'a> {
    pub peer: PeerId,
    pub map: &'a VoxelMap,
    pub emerge: &'a EmergeQueue,
    pub limits: &'a SendLimits,
    pub time_from_building: f32,
    pub max_candidates: usize,
}

/// Resumable nearest-first scan over the shells around a player.
#[derive(Clone, Debug, Default)]
pub struct SendScheduler {
    nearest_unsent_d: i32,
    last_center: Option<BlockPos>,
    nothing_to_send_pause: f32,
    reset_timer: f32,
}

impl SendScheduler {
    pub fn nearest_unsent_d(&self) -> i32 {
        self.nearest_unsent_d
    }

    pub fn is_paused(&self) -> bool {
        self.nothing_to_send_pause > 0.0
    }

    /// Scan again from the player outward on the next call.
    pub fn reset(&mut self) {
        self.nearest_unsent_d = 0;
        self.nothing_to_send_pause = 0.0;
    }

    /// Picks blocks to send, nearest shell first, and marks each one
    /// tentatively sending. Missing blocks are handed to the emerge queue
    /// instead; the scan resumes next call where it stopped.
    pub fn next_candidates(
        &mut self,
        blocks: &mut PeerBlockStates,
        view: &PlayerView,
        ctx: &ScanContext<'_>,
        dtime: f32,
    ) -> Vec<(BlockPos, Priority)> {
        let mut out = Vec::new();

        self.nothing_to_send_pause -= dtime;
        if self.nothing_to_send_pause > 0.0 {
            return out;
        }
        self.nothing_to_send_pause = 0.0;

        self.reset_timer += dtime;
        if self.reset_timer > RESET_INTERVAL {
            self.reset_timer = 0.0;
            self.nearest_unsent_d = 0;
        }

        let limits = ctx.limits;
        let mut num_selected = blocks.sending_count();
        if num_selected >= limits.max_per_client {
            return out;
        }

        let center = BlockPos::containing(view.predicted_position());
        if self.last_center != Some(center) {
            self.nearest_unsent_d = 0;
            self.last_center = Some(center);
        }

        let camera_pos = view.eye();
        let camera_dir = view.look_dir();
        let max_usually = if ctx.time_from_building < limits.full_send_min_time_from_building {
            LIMITED_SENDS
        } else {
            limits.max_per_client
        };

        let wanted = view.wanted_range;
        let full_d_max = limits.max_send_distance.min(wanted);
        let d_opt = limits.optimize_distance.min(wanted);
        let d_max_gen = limits.max_generate_distance.min(wanted);
        let d_start = self.nearest_unsent_d;
        let d_max = full_d_max.min(d_start + MAX_D_INCREMENT);
        let range = (full_d_max * BLOCK_SIZE) as f32;

        let mut nearest_emerged_d = None;
        let mut nearest_emergefull_d = None;
        let mut nearest_sent_d = None;

        let mut d = d_start;
        'scan: while d <= d_max {
            for pos in shell(center, d) {
                let max_dynamic = if d <= DISABLE_LIMITS_MAX_D {
                    limits.max_per_client
                } else {
                    max_usually
                };
                if num_selected >= max_dynamic || out.len() >= ctx.max_candidates {
                    break 'scan;
                }
                if blocks.is_known(pos) || pos.over_limit() {
                    continue;
                }
                let generate = d <= d_max_gen;
                if !block_in_sight(pos, camera_pos, camera_dir, view.fov, range) {
                    continue;
                }
                if (pos.y - center.y).abs() > full_d_max / 2 {
                    continue;
                }

                let found = ctx.map.with_block(pos, |b| (b.state, b.day_night_differs));
                let mut surely_not_found = false;
                let mut usable = false;
                if let Some((state, day_night_differs)) = found {
                    ctx.map.touch(pos);
                    usable = state.is_usable();
                    surely_not_found = state == GenState::Unloaded;
                    if usable && d >= d_opt && !day_night_differs {
                        continue;
                    }
                }
                if !generate && surely_not_found {
                    continue;
                }

                if !usable {
                    if ctx.emerge.push(pos, ctx.peer, generate) {
                        nearest_emerged_d.get_or_insert(d);
                        continue;
                    }
                    nearest_emergefull_d.get_or_insert(d);
                    break 'scan;
                }

                nearest_sent_d.get_or_insert(d);
                blocks.mark_tentative(pos);
                out.push((pos, Priority(d as u32)));
                num_selected += 1;
            }
            d += 1;
        }

        self.nearest_unsent_d = if let Some(e) = nearest_emerged_d {
            e
        } else if let Some(e) = nearest_emergefull_d {
            e
        } else if d > full_d_max {
            if out.is_empty() {
                self.nothing_to_send_pause = NOTHING_TO_SEND_PAUSE;
            }
            0
        } else {
            nearest_sent_d.unwrap_or(d)
        };
        out
    }
}
