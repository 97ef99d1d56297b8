//! Join sequence over real sockets.

use sub3_shared::{
    config::ServerConfig,
    ids::{PlayerId, VesselId},
    message::Message,
    vessel::{VesselKind, VesselState},
};
use sub3_tests::{init_tracing, join, start_server, wait_for_status, WAIT};

fn first_spawn(owner: u32) -> Message {
    Message::Spawn {
        kind: VesselKind::BasicSubmarine,
        id: VesselId::first_of(PlayerId(owner)),
        state: VesselState::default(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn players_receive_identity_world_and_control_in_order() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server(ServerConfig::ephemeral(20))?;

    let mut first = join(addr).await?;
    assert_eq!(
        first.received[..3],
        [
            Message::SetPlayerId { player: PlayerId(1) },
            first_spawn(1),
            Message::SetCurrentVessel {
                id: VesselId::first_of(PlayerId(1)),
            },
        ]
    );

    let second = join(addr).await?;
    assert_eq!(
        second.received[..4],
        [
            Message::SetPlayerId { player: PlayerId(2) },
            first_spawn(1),
            first_spawn(2),
            Message::SetCurrentVessel {
                id: VesselId::first_of(PlayerId(2)),
            },
        ]
    );
    assert_eq!(second.player_id, Some(PlayerId(2)));
    assert_eq!(second.current_vessel, Some(VesselId::first_of(PlayerId(2))));

    let second_vessel = VesselId::first_of(PlayerId(2));
    first
        .poll_until(WAIT, |m| *m == first_spawn(2))
        .await?;
    first
        .poll_until(WAIT, |m| {
            matches!(m, Message::UpdateState { id, .. } if *id == second_vessel)
        })
        .await?;

    assert!(!first.received.iter().any(|m| matches!(
        m,
        Message::SetPlayerId { player } if *player == PlayerId(2)
    )));
    assert!(!first.received.iter().any(|m| matches!(
        m,
        Message::SetCurrentVessel { id } if *id == second_vessel
    )));
    assert_eq!(first.current_vessel, Some(VesselId::first_of(PlayerId(1))));

    wait_for_status(&server, |s| s.players.len() == 2 && s.vessels == 2).await?;
    assert_eq!(first.ocean.vessel_ids(), second.ocean.vessel_ids());

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn steering_moves_the_vessel_on_every_mirror() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server(ServerConfig::ephemeral(20))?;
    let mut pilot = join(addr).await?;
    let mut watcher = join(addr).await?;
    let sub = VesselId::first_of(PlayerId(1));

    pilot.steer(0.0, 200.0, -1.0).await?;

    let moved = |m: &Message| {
        matches!(m, Message::UpdateState { id, state } if *id == sub && state.latitude > 0.0)
    };
    pilot.poll_until(WAIT, moved).await?;
    watcher.poll_until(WAIT, moved).await?;

    let seen_by_pilot = pilot.ocean.state(sub)?;
    assert_eq!(seen_by_pilot.speed, 200.0);
    assert_eq!(seen_by_pilot.depth_rate, -1.0);
    assert!(seen_by_pilot.altitude < -100.0);
    assert!(watcher.ocean.state(sub)?.latitude > 0.0);

    server.stop().await?;
    Ok(())
}
