use bincode::Options;
use thiserror::Error;

use crate::command::Command;

/// Every frame starts with a 4-byte command tag.
pub const MIN_FRAME_LEN: usize = 4;
/// Upper bound on a decoded frame; larger length prefixes are rejected
/// before anything is allocated.
pub const MAX_FRAME_LEN: u64 = 1 << 20;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[source] bincode::Error),
    #[error("cannot encode {name}: {source}")]
    Encode {
        name: &'static str,
        #[source]
        source: bincode::Error,
    },
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_FRAME_LEN)
}

pub fn encode(cmd: &Command) -> Result<Vec<u8>, CodecError> {
    options().serialize(cmd).map_err(|source| CodecError::Encode {
        name: cmd.name(),
        source,
    })
}

/// Decodes one frame. Trailing bytes after a complete command are rejected.
pub fn decode(bytes: &[u8]) -> Result<Command, CodecError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(CodecError::TooShort(bytes.len()));
    }
    options().deserialize(bytes).map_err(CodecError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_world::{BlockPos, Node, NodePos};

    #[test]
    fn short_frames_are_rejected() {
        assert!(matches!(decode(&[]), Err(CodecError::TooShort(0))));
        assert!(matches!(decode(&[1, 0, 0]), Err(CodecError::TooShort(3))));
    }

    #[test]
    fn unknown_tag_is_malformed() {
        assert!(matches!(
            decode(&[0xff, 0xff, 0, 0]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn payload_less_command_fits_minimum_frame() {
        let bytes = encode(&Command::Init2).unwrap();
        assert_eq!(bytes.len(), MIN_FRAME_LEN);
        assert_eq!(decode(&bytes).unwrap(), Command::Init2);
    }

    #[test]
    fn truncated_block_data_is_malformed() {
        let cmd = Command::BlockData {
            pos: BlockPos::new(1, -2, 3),
            payload: vec![7; 32],
        };
        let bytes = encode(&cmd).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_garbage_is_malformed() {
        let mut bytes = encode(&Command::AddNode {
            pos: NodePos::new(0, 1, 2),
            node: Node::new(3),
        })
        .unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(CodecError::Malformed(_))));
    }
}
