//! Frame logic of the authoritative server.
//!
//! A `Session` owns the ocean, the client registry and the physics backend,
//! and runs every step of a frame except accepting sockets. It never touches
//! a listener, so tests drive it with scripted channels.
//!
//! Ordering rules:
//! - A message is executed on the ocean before it is sent to anyone.
//! - Each generated message is executed exactly once.
//! - A failed send kicks that client; other clients are unaffected.

use std::collections::BTreeMap;

use sub3_shared::{
    ids::{PlayerId, VesselId},
    message::Message,
    net::ClientChannel,
    ocean::Ocean,
    physics::PhysicsBackend,
    vessel::{VesselKind, VesselState},
};
use tracing::{debug, error, info, warn};

use crate::error::ServerError;

/// Snapshot of the session published after every frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub frame: u64,
    pub players: Vec<PlayerId>,
    pub vessels: usize,
}

pub struct Session {
    ocean: Ocean,
    clients: BTreeMap<PlayerId, Box<dyn ClientChannel>>,
    next_player: Option<PlayerId>,
    physics: Box<dyn PhysicsBackend>,
    frame: u64,
}

impl Session {
    pub fn new(physics: Box<dyn PhysicsBackend>) -> Self {
        Self {
            ocean: Ocean::new(),
            clients: BTreeMap::new(),
            next_player: Some(PlayerId::FIRST),
            physics,
            frame: 0,
        }
    }

    pub fn ocean(&self) -> &Ocean {
        &self.ocean
    }

    /// Connected players in id order.
    pub fn players(&self) -> Vec<PlayerId> {
        self.clients.keys().copied().collect()
    }

    pub fn is_connected(&self, player: PlayerId) -> bool {
        self.clients.contains_key(&player)
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            frame: self.frame,
            players: self.players(),
            vessels: self.ocean.len(),
        }
    }

    /// Registers a new connection and brings it up to date.
    ///
    /// The new player receives, in order: its id, the messages rebuilding the
    /// current ocean, the spawn of its first vessel (which everyone else
    /// receives too) and the id of the vessel it controls. If any of those
    /// sends fail the player is kicked again and the id is still consumed.
    ///
    /// Fails with `PlayerIdsExhausted`, dropping the channel, once every id
    /// has been handed out.
    pub async fn admit(
        &mut self,
        channel: Box<dyn ClientChannel>,
    ) -> Result<PlayerId, ServerError> {
        let player = self.next_player.ok_or(ServerError::PlayerIdsExhausted)?;
        self.next_player = player.next();

        info!(%player, peer = %channel.peer(), "accepting a new player");
        self.clients.insert(player, channel);

        if !self.send_to(player, &Message::SetPlayerId { player }).await? {
            self.kick(player)?;
            return Ok(player);
        }

        for msg in self.ocean.initiation_messages() {
            if !self.send_to(player, &msg).await? {
                self.kick(player)?;
                return Ok(player);
            }
        }

        self.spawn_vessel_for(player).await?;
        info!(%player, players = self.clients.len(), "new player");
        Ok(player)
    }

    async fn spawn_vessel_for(&mut self, player: PlayerId) -> Result<(), ServerError> {
        let id = VesselId::first_of(player);
        let spawn = Message::Spawn {
            kind: VesselKind::BasicSubmarine,
            id,
            state: VesselState::default(),
        };
        spawn.execute(&mut self.ocean)?;
        self.send_to_all(&spawn).await?;

        if self.is_connected(player)
            && !self.send_to(player, &Message::SetCurrentVessel { id }).await?
        {
            self.kick(player)?;
        }
        Ok(())
    }

    /// Runs one frame after accepting: inbound, world tick, broadcast and
    /// collisions, all with the same elapsed time.
    pub async fn run_frame(&mut self, dt_sec: f64) -> Result<(), ServerError> {
        let relayed = self.drain_inbound()?;
        self.broadcast(&relayed).await?;
        let batch = self.world_tick(dt_sec)?;
        self.broadcast(&batch).await?;
        self.resolve_collisions(dt_sec).await?;
        self.frame += 1;
        Ok(())
    }

    /// Executes every message the clients had sent when the frame started.
    ///
    /// Inbound commands are trusted; only the ocean's own invariants apply.
    /// Returns the executed messages that every client has to see, in
    /// execution order.
    pub fn drain_inbound(&mut self) -> Result<Vec<Message>, ServerError> {
        let mut relayed = Vec::new();
        let mut broken = Vec::new();
        for (player, channel) in self.clients.iter_mut() {
            channel.poll_inbound();
            while channel.has_pending_message() {
                let Some(msg) = channel.receive_one() else {
                    break;
                };
                debug!(%player, message = msg.name(), "inbound");
                msg.execute(&mut self.ocean).map_err(|e| {
                    error!(%player, error = %e, "inbound message corrupted the ocean");
                    e
                })?;
                if msg.relayed_from_clients() {
                    relayed.push(msg);
                }
            }
            if channel.is_broken() {
                broken.push(*player);
            }
        }
        for player in broken {
            self.kick(player)?;
        }
        Ok(relayed)
    }

    /// Advances the ocean and applies the resulting batch locally. The batch
    /// is returned for broadcasting.
    pub fn world_tick(&mut self, dt_sec: f64) -> Result<Vec<Message>, ServerError> {
        let batch = self.ocean.tick(dt_sec);
        for msg in &batch {
            msg.execute(&mut self.ocean)?;
        }
        Ok(batch)
    }

    /// Sends `batch` to every client that should see it. A client whose send
    /// fails is kicked and gets nothing more from this batch.
    pub async fn broadcast(&mut self, batch: &[Message]) -> Result<(), ServerError> {
        for player in self.players() {
            for msg in batch {
                if !msg.should_send_to(player) {
                    continue;
                }
                if !self.send_to(player, msg).await? {
                    self.kick(player)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Despawns every vessel the physics backend reports as colliding.
    ///
    /// A vessel can appear in several pairs of the same step. It is despawned
    /// on its first appearance and skipped afterwards, so each collided
    /// vessel produces exactly one `Despawn`.
    pub async fn resolve_collisions(&mut self, dt_sec: f64) -> Result<(), ServerError> {
        let collisions = self.physics.step(&self.ocean, dt_sec);
        for (a, b) in collisions {
            info!(first = %a, second = %b, "collision");
            for id in [a, b] {
                if !self.ocean.has_vessel(id) {
                    debug!(vessel = %id, "already despawned this frame");
                    continue;
                }
                self.despawn_vessel(id).await?;
            }
        }
        Ok(())
    }

    async fn despawn_vessel(&mut self, id: VesselId) -> Result<(), ServerError> {
        let msg = Message::Despawn { id };
        self.send_to_all(&msg).await?;
        msg.execute(&mut self.ocean)?;
        Ok(())
    }

    /// Sends one message to every client it targets, kicking failures.
    async fn send_to_all(&mut self, msg: &Message) -> Result<(), ServerError> {
        for player in self.players() {
            if msg.should_send_to(player) && !self.send_to(player, msg).await? {
                self.kick(player)?;
            }
        }
        Ok(())
    }

    /// Returns `Ok(false)` when the channel failed to deliver.
    async fn send_to(&mut self, player: PlayerId, msg: &Message) -> Result<bool, ServerError> {
        let channel = self
            .clients
            .get_mut(&player)
            .ok_or(ServerError::UnknownPlayer(player))?;
        match channel.send(msg).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(%player, message = msg.name(), error = %e, "send failed");
                Ok(false)
            }
        }
    }

    fn kick(&mut self, player: PlayerId) -> Result<(), ServerError> {
        self.clients
            .remove(&player)
            .ok_or(ServerError::UnknownPlayer(player))?;
        info!(%player, "kicked player");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
    };

    use async_trait::async_trait;
    use sub3_shared::{
        ocean::{Month, OceanError},
        physics::{Collision, NullPhysics},
    };

    use super::*;

    /// Test-side view of a scripted channel.
    #[derive(Clone, Default)]
    struct Remote {
        sent: Arc<Mutex<Vec<Message>>>,
        inbound: Arc<Mutex<VecDeque<Message>>>,
        fail_sends: Arc<AtomicBool>,
        broken: Arc<AtomicBool>,
    }

    impl Remote {
        fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }

        fn push_inbound(&self, msg: Message) {
            self.inbound.lock().unwrap().push_back(msg);
        }

        fn channel(&self) -> Box<dyn ClientChannel> {
            Box::new(ScriptedChannel {
                remote: self.clone(),
            })
        }
    }

    struct ScriptedChannel {
        remote: Remote,
    }

    #[async_trait]
    impl ClientChannel for ScriptedChannel {
        fn has_pending_message(&mut self) -> bool {
            !self.remote.inbound.lock().unwrap().is_empty()
        }

        fn receive_one(&mut self) -> Option<Message> {
            self.remote.inbound.lock().unwrap().pop_front()
        }

        fn is_broken(&self) -> bool {
            self.remote.broken.load(Ordering::SeqCst)
        }

        async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
            if self.remote.fail_sends.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.remote.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn peer(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Physics that reports pre-planned collisions, one list per step.
    struct ScriptedPhysics(VecDeque<Vec<Collision>>);

    impl PhysicsBackend for ScriptedPhysics {
        fn step(&mut self, _ocean: &Ocean, _dt_sec: f64) -> Vec<Collision> {
            self.0.pop_front().unwrap_or_default()
        }
    }

    fn vid(owner: u32) -> VesselId {
        VesselId::first_of(PlayerId(owner))
    }

    fn spawn_of(owner: u32) -> Message {
        Message::Spawn {
            kind: VesselKind::BasicSubmarine,
            id: vid(owner),
            state: VesselState::default(),
        }
    }

    async fn session_with(n: usize) -> (Session, Vec<Remote>) {
        let mut session = Session::new(Box::new(NullPhysics));
        let mut remotes = Vec::new();
        for _ in 0..n {
            let remote = Remote::default();
            session.admit(remote.channel()).await.unwrap();
            remotes.push(remote);
        }
        (session, remotes)
    }

    #[tokio::test]
    async fn joining_players_get_id_world_spawn_then_control() {
        let (session, remotes) = session_with(2).await;

        assert_eq!(
            remotes[0].sent(),
            vec![
                Message::SetPlayerId { player: PlayerId(1) },
                spawn_of(1),
                Message::SetCurrentVessel { id: vid(1) },
                spawn_of(2),
            ]
        );
        assert_eq!(
            remotes[1].sent(),
            vec![
                Message::SetPlayerId { player: PlayerId(2) },
                spawn_of(1),
                spawn_of(2),
                Message::SetCurrentVessel { id: vid(2) },
            ]
        );
        assert_eq!(session.players(), vec![PlayerId(1), PlayerId(2)]);
        assert_eq!(session.ocean().vessel_ids(), vec![vid(1), vid(2)]);
    }

    #[tokio::test]
    async fn player_ids_are_not_reused_after_a_kick() {
        let (mut session, remotes) = session_with(1).await;
        remotes[0].fail_sends.store(true, Ordering::SeqCst);
        session.run_frame(0.1).await.unwrap();
        assert!(session.players().is_empty());

        let late = Remote::default();
        let player = session.admit(late.channel()).await.unwrap();
        assert_eq!(player, PlayerId(2));
        // The kicked player's vessel stays in the world and is synced.
        assert_eq!(late.sent()[1], spawn_of(1));
    }

    #[tokio::test]
    async fn failed_send_kicks_only_that_client() {
        let (mut session, remotes) = session_with(3).await;
        let before: Vec<usize> = remotes.iter().map(|r| r.sent().len()).collect();

        remotes[0].fail_sends.store(true, Ordering::SeqCst);
        session.run_frame(0.1).await.unwrap();

        assert_eq!(session.players(), vec![PlayerId(2), PlayerId(3)]);
        assert_eq!(remotes[0].sent().len(), before[0]);
        for (remote, before) in remotes.iter().zip(&before).skip(1) {
            let updates = &remote.sent()[*before..];
            assert_eq!(updates.len(), 3);
            assert!(updates
                .iter()
                .all(|m| matches!(m, Message::UpdateState { .. })));
        }

        // Recovery does not bring the kicked client back.
        remotes[0].fail_sends.store(false, Ordering::SeqCst);
        session.run_frame(0.1).await.unwrap();
        assert_eq!(remotes[0].sent().len(), before[0]);
        assert_eq!(remotes[1].sent().len(), before[1] + 6);
    }

    #[tokio::test]
    async fn world_tick_is_applied_before_broadcast() {
        let (mut session, remotes) = session_with(1).await;
        let steered = VesselState::default().with_motion(0.0, 20.0, -1.0);
        remotes[0].push_inbound(Message::UpdateState {
            id: vid(1),
            state: steered,
        });

        session.run_frame(0.5).await.unwrap();

        let expected = steered.advanced(0.5);
        assert_eq!(session.ocean().state(vid(1)).unwrap(), expected);
        assert_eq!(
            remotes[0].sent().last(),
            Some(&Message::UpdateState {
                id: vid(1),
                state: expected,
            })
        );
    }

    #[tokio::test]
    async fn collisions_despawn_both_vessels_once() {
        let mut session = Session::new(Box::new(ScriptedPhysics(VecDeque::from(vec![vec![
            (vid(1), vid(2)),
            (vid(2), vid(3)),
            (vid(1), vid(3)),
        ]]))));
        let mut remotes = Vec::new();
        for _ in 0..3 {
            let remote = Remote::default();
            session.admit(remote.channel()).await.unwrap();
            remotes.push(remote);
        }

        session.run_frame(0.1).await.unwrap();

        assert!(session.ocean().is_empty());
        for remote in &remotes {
            let despawns: Vec<_> = remote
                .sent()
                .into_iter()
                .filter(|m| matches!(m, Message::Despawn { .. }))
                .collect();
            assert_eq!(
                despawns,
                vec![
                    Message::Despawn { id: vid(1) },
                    Message::Despawn { id: vid(2) },
                    Message::Despawn { id: vid(3) },
                ]
            );
        }
    }

    #[tokio::test]
    async fn collision_with_a_dead_client_still_despawns() {
        let mut session = Session::new(Box::new(ScriptedPhysics(VecDeque::from(vec![
            vec![],
            vec![(vid(1), vid(2))],
        ]))));
        let a = Remote::default();
        let b = Remote::default();
        session.admit(a.channel()).await.unwrap();
        session.admit(b.channel()).await.unwrap();
        session.run_frame(0.1).await.unwrap();

        a.fail_sends.store(true, Ordering::SeqCst);
        session.resolve_collisions(0.1).await.unwrap();
        session.resolve_collisions(0.1).await.unwrap();

        assert!(session.ocean().is_empty());
        assert_eq!(session.players(), vec![PlayerId(2)]);
        assert_eq!(
            b.sent().last(),
            Some(&Message::Despawn { id: vid(2) })
        );
    }

    #[tokio::test]
    async fn corrupting_inbound_message_is_fatal() {
        let (mut session, remotes) = session_with(1).await;
        remotes[0].push_inbound(spawn_of(1));

        let err = session.run_frame(0.1).await.unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(
            err,
            ServerError::Corruption(OceanError::AlreadySpawned(id)) if id == vid(1)
        ));
    }

    #[tokio::test]
    async fn broken_inbound_stream_is_kicked_after_draining() {
        let (mut session, remotes) = session_with(2).await;
        let moved = VesselState::at(1.0, 1.0, -40.0);
        remotes[1].push_inbound(Message::UpdateState {
            id: vid(2),
            state: moved,
        });
        remotes[1].broken.store(true, Ordering::SeqCst);

        session.drain_inbound().unwrap();

        assert_eq!(session.players(), vec![PlayerId(1)]);
        assert_eq!(session.ocean().state(vid(2)).unwrap(), moved);
    }

    /// Rebuilds a client's mirror from everything it was sent.
    fn replay(sent: &[Message]) -> Ocean {
        let mut mirror = Ocean::new();
        for msg in sent {
            msg.execute(&mut mirror).unwrap();
        }
        mirror
    }

    fn assert_mirrors(session: &Session, mirror: &Ocean) {
        assert_eq!(mirror.vessel_ids(), session.ocean().vessel_ids());
        assert_eq!(mirror.month(), session.ocean().month());
        for id in session.ocean().vessel_ids() {
            assert_eq!(mirror.state(id).unwrap(), session.ocean().state(id).unwrap());
        }
    }

    #[tokio::test]
    async fn inbound_world_changes_reach_every_mirror() {
        let (mut session, remotes) = session_with(2).await;
        let second = VesselId::new(PlayerId(1), 1);
        remotes[0].push_inbound(Message::Spawn {
            kind: VesselKind::Dummy,
            id: second,
            state: VesselState::at(2.0, 3.0, -50.0),
        });
        remotes[0].push_inbound(Message::Despawn { id: vid(1) });
        remotes[1].push_inbound(Message::SetMonth { month: Month::March });

        session.run_frame(0.1).await.unwrap();
        session.run_frame(0.1).await.unwrap();

        assert_eq!(session.ocean().vessel_ids(), vec![second, vid(2)]);
        for remote in &remotes {
            assert_mirrors(&session, &replay(&remote.sent()));
        }
    }

    #[tokio::test]
    async fn inbound_state_updates_are_not_relayed() {
        let (mut session, remotes) = session_with(2).await;
        let before = remotes[1].sent().len();
        remotes[0].push_inbound(Message::UpdateState {
            id: vid(1),
            state: VesselState::at(4.0, 4.0, -10.0),
        });

        let relayed = session.drain_inbound().unwrap();

        assert!(relayed.is_empty());
        assert_eq!(remotes[1].sent().len(), before);
    }

    #[tokio::test]
    async fn admitting_stops_when_player_ids_run_out() {
        let mut session = Session::new(Box::new(NullPhysics));
        session.next_player = Some(PlayerId(u32::MAX));

        let last = Remote::default();
        assert_eq!(
            session.admit(last.channel()).await.unwrap(),
            PlayerId(u32::MAX)
        );

        let refused = Remote::default();
        let err = session.admit(refused.channel()).await.unwrap_err();
        assert!(matches!(err, ServerError::PlayerIdsExhausted));
        assert!(!err.is_fatal());
        assert!(refused.sent().is_empty());
        assert_eq!(session.players(), vec![PlayerId(u32::MAX)]);
    }

    #[tokio::test]
    async fn sending_to_an_unknown_player_is_fatal() {
        let (mut session, _remotes) = session_with(1).await;
        let err = session
            .send_to(PlayerId(9), &Message::SetPlayerId { player: PlayerId(9) })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownPlayer(PlayerId(9))));
        assert!(!err.is_corruption());
    }

    #[tokio::test]
    async fn client_failing_during_join_is_dropped() {
        let (mut session, _remotes) = session_with(1).await;
        let flaky = Remote::default();
        flaky.fail_sends.store(true, Ordering::SeqCst);

        let player = session.admit(flaky.channel()).await.unwrap();

        assert_eq!(player, PlayerId(2));
        assert!(!session.is_connected(player));
        assert!(!session.ocean().has_vessel(vid(2)));
    }

    #[tokio::test]
    async fn status_reflects_frames_players_and_vessels() {
        let (mut session, _remotes) = session_with(2).await;
        session.run_frame(0.1).await.unwrap();
        session.run_frame(0.1).await.unwrap();
        assert_eq!(
            session.status(),
            ServerStatus {
                frame: 2,
                players: vec![PlayerId(1), PlayerId(2)],
                vessels: 2,
            }
        );
    }
}
