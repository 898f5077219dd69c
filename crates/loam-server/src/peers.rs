use hashbrown::{HashMap, HashSet};
use loam_net::PeerId;
use loam_world::BlockPos;

use crate::scheduler::{PlayerView, SendScheduler};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, no Hello yet.
    Created,
    /// Init sent, waiting for the client's Init2.
    AwaitingInit2,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum SendMark {
    /// Picked by the scheduler this step; not on the wire yet.
    Tentative,
    /// On the wire; `age` counts seconds without an acknowledgement.
    Confirmed { age: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSendState {
    Sending,
    Sent,
}

/// Which blocks a peer has, or is about to have. A position is in at most
/// one of `sending` and `sent`; absence from both means "not sent".
#[derive(Debug, Default)]
pub struct PeerBlockStates {
    sending: HashMap<BlockPos, SendMark>,
    sent: HashSet<BlockPos>,
    /// Invalidated while a copy was on the wire, with seconds since. A late
    /// ack for these must not promote the stale copy to `sent`.
    modified: HashMap<BlockPos, f32>,
    excess_gotblocks: u32,
}

impl PeerBlockStates {
    pub fn state(&self, pos: BlockPos) -> Option<BlockSendState> {
        if self.sending.contains_key(&pos) {
            Some(BlockSendState::Sending)
        } else if self.sent.contains(&pos) {
            Some(BlockSendState::Sent)
        } else {
            None
        }
    }

    pub fn is_known(&self, pos: BlockPos) -> bool {
        self.state(pos).is_some()
    }

    /// Counts tentative and confirmed transfers.
    pub fn sending_count(&self) -> usize {
        self.sending.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.sending
            .values()
            .filter(|m| matches!(m, SendMark::Confirmed { .. }))
            .count()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn excess_gotblocks(&self) -> u32 {
        self.excess_gotblocks
    }

    pub fn is_modified(&self, pos: BlockPos) -> bool {
        self.modified.contains_key(&pos)
    }

    pub fn modified_count(&self) -> usize {
        self.modified.len()
    }

    /// Reserves `pos` for this step's dispatch. Fails if already known.
    pub fn mark_tentative(&mut self, pos: BlockPos) -> bool {
        if self.is_known(pos) {
            return false;
        }
        self.sending.insert(pos, SendMark::Tentative);
        true
    }

    /// The block went on the wire.
    pub fn sent_block(&mut self, pos: BlockPos) {
        self.modified.remove(&pos);
        self.sent.remove(&pos);
        self.sending.insert(pos, SendMark::Confirmed { age: 0.0 });
    }

    /// Drops a tentative reservation the dispatcher did not honor.
    pub fn release(&mut self, pos: BlockPos) {
        if self.sending.get(&pos) == Some(&SendMark::Tentative) {
            self.sending.remove(&pos);
        }
    }

    /// Client acknowledged `pos`.
    pub fn got_block(&mut self, pos: BlockPos) {
        if !self.sending.contains_key(&pos) && self.modified.remove(&pos).is_some() {
            return;
        }
        if self.sending.remove(&pos).is_some() {
            self.sent.insert(pos);
        } else {
            self.excess_gotblocks += 1;
        }
    }

    /// Forgets everything about `pos` so it is sent again. Only a copy that
    /// was on the wire can still be acknowledged, so only those are kept in
    /// `modified`.
    pub fn set_not_sent(&mut self, pos: BlockPos) {
        self.sent.remove(&pos);
        if let Some(SendMark::Confirmed { .. }) = self.sending.remove(&pos) {
            self.modified.insert(pos, 0.0);
        }
    }

    /// Ages confirmed transfers and returns those that waited longer than
    /// `timeout` for an acknowledgement; they are forgotten. Stale-copy marks
    /// older than `timeout` are dropped too.
    pub fn expire_sending(&mut self, dtime: f32, timeout: f32) -> Vec<BlockPos> {
        self.modified.retain(|_, age| {
            *age += dtime;
            *age <= timeout
        });
        let mut expired = Vec::new();
        for (pos, mark) in self.sending.iter_mut() {
            if let SendMark::Confirmed { age } = mark {
                *age += dtime;
                if *age > timeout {
                    expired.push(*pos);
                }
            }
        }
        for pos in &expired {
            self.sending.remove(pos);
        }
        expired
    }

    pub fn sending_positions(&self) -> impl Iterator<Item = BlockPos> + '_ {
        self.sending.keys().copied()
    }

    pub fn sent_positions(&self) -> impl Iterator<Item = BlockPos> + '_ {
        self.sent.iter().copied()
    }
}

/// Server-side record of one connection.
#[derive(Debug)]
pub struct RemoteClient {
    pub id: PeerId,
    pub name: String,
    pub state: ClientState,
    pub blocks: PeerBlockStates,
    pub scheduler: SendScheduler,
    pub view: Option<PlayerView>,
    /// Seconds since this client last placed or dug a node.
    pub time_from_building: f32,
}

impl RemoteClient {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            name: String::new(),
            state: ClientState::Created,
            blocks: PeerBlockStates::default(),
            scheduler: SendScheduler::default(),
            view: None,
            time_from_building: 9999.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ClientState::Active
    }

    /// Marks `pos` not-sent and restarts the radius scan.
    pub fn set_block_not_sent(&mut self, pos: BlockPos) {
        self.blocks.set_not_sent(pos);
        self.scheduler.reset();
    }

    pub fn set_blocks_not_sent(&mut self, blocks: &[BlockPos]) {
        for pos in blocks {
            self.blocks.set_not_sent(*pos);
        }
        if !blocks.is_empty() {
            self.scheduler.reset();
        }
    }
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    clients: HashMap<PeerId, RemoteClient>,
}

impl PeerRegistry {
    pub fn insert(&mut self, id: PeerId) -> &mut RemoteClient {
        self.clients.entry(id).or_insert_with(|| RemoteClient::new(id))
    }

    pub fn remove(&mut self, id: PeerId) -> Option<RemoteClient> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&RemoteClient> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut RemoteClient> {
        self.clients.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Active peer ids in ascending order, so iteration is reproducible.
    pub fn active_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .clients
            .values()
            .filter(|c| c.is_active())
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteClient> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RemoteClient> {
        self.clients.values_mut()
    }

    /// Blocks on the wire across every peer.
    pub fn total_sending(&self) -> usize {
        self.clients.values().map(|c| c.blocks.confirmed_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: BlockPos = BlockPos::new(1, 2, 3);

    #[test]
    fn ack_moves_sending_to_sent() {
        let mut s = PeerBlockStates::default();
        assert!(s.mark_tentative(P));
        s.sent_block(P);
        assert_eq!(s.state(P), Some(BlockSendState::Sending));
        s.got_block(P);
        assert_eq!(s.state(P), Some(BlockSendState::Sent));
        assert_eq!(s.excess_gotblocks(), 0);
    }

    #[test]
    fn unexpected_ack_is_counted() {
        let mut s = PeerBlockStates::default();
        s.got_block(P);
        assert_eq!(s.state(P), None);
        assert_eq!(s.excess_gotblocks(), 1);
    }

    #[test]
    fn ack_for_invalidated_block_is_ignored() {
        let mut s = PeerBlockStates::default();
        s.mark_tentative(P);
        s.sent_block(P);
        s.set_not_sent(P);
        s.got_block(P);
        assert_eq!(s.state(P), None);
        assert!(!s.is_modified(P));
        s.mark_tentative(P);
        s.sent_block(P);
        s.got_block(P);
        assert_eq!(s.state(P), Some(BlockSendState::Sent));
    }

    #[test]
    fn resend_clears_the_stale_mark() {
        let mut s = PeerBlockStates::default();
        s.mark_tentative(P);
        s.sent_block(P);
        s.set_not_sent(P);
        assert!(s.is_modified(P));
        s.mark_tentative(P);
        s.sent_block(P);
        assert!(!s.is_modified(P));
        s.got_block(P);
        assert_eq!(s.state(P), Some(BlockSendState::Sent));
    }

    #[test]
    fn invalidating_unsent_or_acked_blocks_keeps_no_mark() {
        let mut s = PeerBlockStates::default();
        for x in 0..10_000 {
            s.set_not_sent(BlockPos::new(x, 0, 0));
        }
        assert_eq!(s.modified_count(), 0);

        s.mark_tentative(P);
        s.set_not_sent(P);
        assert!(!s.is_modified(P));

        s.mark_tentative(P);
        s.sent_block(P);
        s.got_block(P);
        s.set_not_sent(P);
        assert!(!s.is_modified(P));
        assert_eq!(s.state(P), None);
    }

    #[test]
    fn unanswered_stale_marks_expire() {
        let mut s = PeerBlockStates::default();
        s.mark_tentative(P);
        s.sent_block(P);
        s.set_not_sent(P);
        s.expire_sending(6.0, 10.0);
        assert!(s.is_modified(P));
        s.expire_sending(6.0, 10.0);
        assert_eq!(s.modified_count(), 0);
    }

    #[test]
    fn release_only_drops_tentative_marks() {
        let mut s = PeerBlockStates::default();
        s.mark_tentative(P);
        s.release(P);
        assert_eq!(s.state(P), None);
        s.mark_tentative(P);
        s.sent_block(P);
        s.release(P);
        assert_eq!(s.state(P), Some(BlockSendState::Sending));
    }

    #[test]
    fn stale_transfers_expire() {
        let mut s = PeerBlockStates::default();
        s.mark_tentative(P);
        s.sent_block(P);
        assert!(s.expire_sending(4.0, 10.0).is_empty());
        assert_eq!(s.expire_sending(7.0, 10.0), vec![P]);
        assert_eq!(s.state(P), None);
    }

    #[test]
    fn active_ids_are_sorted_and_filtered() {
        let mut reg = PeerRegistry::default();
        for id in [5, 2, 9] {
            reg.insert(PeerId(id)).state = ClientState::Active;
        }
        reg.insert(PeerId(3));
        assert_eq!(reg.active_ids(), vec![PeerId(2), PeerId(5), PeerId(9)]);
    }
}
