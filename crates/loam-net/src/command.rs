use loam_geom::Vec3;
use loam_world::{BlockPos, ContentDef, Node, NodePos};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

/// Player state reported by a client. Angles are radians, `fov` is the full
/// horizontal field of view, `wanted_range` is in blocks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerPos {
    pub position: Vec3,
    pub speed: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub fov: f32,
    pub wanted_range: i16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Hello {
        player_name: String,
        protocol_version: u16,
    },
    Init {
        protocol_version: u16,
        spawn: Vec3,
        seed: i32,
    },
    Init2,
    AccessDenied {
        reason: String,
    },
    ContentDefs(Vec<ContentDef>),
    PlayerPos(PlayerPos),
    BlockData {
        pos: BlockPos,
        payload: Vec<u8>,
    },
    AddNode {
        pos: NodePos,
        node: Node,
    },
    RemoveNode {
        pos: NodePos,
    },
    GotBlocks(Vec<BlockPos>),
    DeletedBlocks(Vec<BlockPos>),
    PlaceNode {
        pos: NodePos,
        node: Node,
    },
    DigNode {
        pos: NodePos,
    },
    TimeOfDay {
        time: u16,
        speed: f32,
    },
    ChatMessage(String),
    /// Traffic this layer does not interpret.
    Opaque {
        opcode: u16,
        bytes: Vec<u8>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Hello { .. } => "Hello",
            Command::Init { .. } => "Init",
            Command::Init2 => "Init2",
            Command::AccessDenied { .. } => "AccessDenied",
            Command::ContentDefs(_) => "ContentDefs",
            Command::PlayerPos(_) => "PlayerPos",
            Command::BlockData { .. } => "BlockData",
            Command::AddNode { .. } => "AddNode",
            Command::RemoveNode { .. } => "RemoveNode",
            Command::GotBlocks(_) => "GotBlocks",
            Command::DeletedBlocks(_) => "DeletedBlocks",
            Command::PlaceNode { .. } => "PlaceNode",
            Command::DigNode { .. } => "DigNode",
            Command::TimeOfDay { .. } => "TimeOfDay",
            Command::ChatMessage(_) => "ChatMessage",
            Command::Opaque { .. } => "Opaque",
        }
    }

    /// Which side is allowed to receive this command. Chat and opaque
    /// traffic flow both ways.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Command::Hello { .. }
            | Command::Init2
            | Command::PlayerPos(_)
            | Command::GotBlocks(_)
            | Command::DeletedBlocks(_)
            | Command::PlaceNode { .. }
            | Command::DigNode { .. } => Some(Direction::ToServer),
            Command::Init { .. }
            | Command::AccessDenied { .. }
            | Command::ContentDefs(_)
            | Command::BlockData { .. }
            | Command::AddNode { .. }
            | Command::RemoveNode { .. }
            | Command::TimeOfDay { .. } => Some(Direction::ToClient),
            Command::ChatMessage(_) | Command::Opaque { .. } => None,
        }
    }

    pub fn accepted_by(&self, side: Direction) -> bool {
        self.direction().is_none_or(|d| d == side)
    }
}
