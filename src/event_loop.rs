mod scanner;
mod update_listener;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use futures_lite::StreamExt as _;
use tokio::{select, sync::mpsc};
use zbus::Connection;

use crate::{
    dbus::{player_buses, BusActivity, BusChange},
    forwarder::Forwarder,
    player::PlayerInformationUpdate,
};

use scanner::AvailablePlayers;
use update_listener::watch_player;

/// Which forwarder entry point a player update maps onto.
enum UpdateKind {
    State,
    Item,
    Time,
}

impl From<&PlayerInformationUpdate> for UpdateKind {
    fn from(update: &PlayerInformationUpdate) -> Self {
        match update {
            PlayerInformationUpdate::Status(_) => Self::State,
            PlayerInformationUpdate::Metadata(_) => Self::Item,
            PlayerInformationUpdate::Position(..) => Self::Time,
        }
    }
}

/// Watch MPRIS players on the bus and drive the forwarder with their
/// playback events. One player at a time is elected as the source of truth;
/// a playing player always wins over a paused or stopped one.
pub async fn event_loop(
    conn: Connection,
    forwarder: &mut Forwarder,
    refresh_interval: Duration,
    allowed_players: Vec<String>,
) -> Result<()> {
    let mut dbus_stream = player_buses(&conn).await?;

    let (player_update_sender, mut player_update_receiver) = mpsc::channel(1);

    let mut available_players = AvailablePlayers::new();
    let mut current_player = None;

    loop {
        select! {
            bus_change = dbus_stream.next() => {
                let Some(bus_change) = bus_change else {
                    tracing::error!("DBus NameOwnerChanged stream closed");
                    continue
                };
                if !bus_change.matches_players(&allowed_players) {
                    tracing::debug!(bus_name = %bus_change.name, "Player not in allowed list, skipping");
                    continue;
                }
                let BusChange { name: bus_name, activity } = bus_change;
                let bus_name = Arc::new(bus_name);
                match activity {
                    BusActivity::Created => {
                        tracing::info!(%bus_name, "New player registered");
                        let (info, updater) = match watch_player(Arc::clone(&bus_name), conn.clone(), refresh_interval, player_update_sender.clone()).await {
                            Ok(i) => i,
                            Err(e) => {
                                tracing::error!(?e, "Failed to get player information from DBus");
                                continue
                            }
                        };

                        if current_player.is_none() && info.is_playing() {
                            current_player = Some(Arc::clone(&bus_name));
                            forwarder.on_now_playing_item_changed(Some(&info.attributes()));
                        }

                        available_players.insert(bus_name, (info, updater));
                    },
                    BusActivity::Destroyed => {
                        let Some((_, updater)) = available_players.remove(&bus_name) else {
                            tracing::error!("Attempting to destroy a non-existent player {bus_name}");
                            continue
                        };
                        updater.abort();

                        if current_player.as_ref() == Some(&bus_name) {
                            tracing::info!(%bus_name, "Current player disappeared");
                            match scanner::find_active_player(&available_players) {
                                Some(next) => {
                                    let attributes = available_players[&next].0.attributes();
                                    current_player = Some(next);
                                    forwarder.on_now_playing_item_changed(Some(&attributes));
                                }
                                None => {
                                    current_player = None;
                                    forwarder.on_playback_state_changed(None);
                                }
                            }
                        }
                    }
                }
            }
            Some((bus_name, update)) = player_update_receiver.recv() => {
                tracing::debug!(%bus_name, ?update, "Player status updated");
                let kind = UpdateKind::from(&update);
                let (attributes, playing) = {
                    let Some((info, _)) = available_players.get_mut(&bus_name) else {
                        tracing::error!("Attempting to update a non-existent player {bus_name}");
                        continue
                    };
                    info.apply_update(update);
                    (info.attributes(), info.is_playing())
                };

                if current_player.as_ref() == Some(&bus_name) {
                    match kind {
                        UpdateKind::State => forwarder.on_playback_state_changed(Some(&attributes)),
                        UpdateKind::Item => forwarder.on_now_playing_item_changed(Some(&attributes)),
                        UpdateKind::Time => forwarder.on_playback_time_changed(Some(&attributes)),
                    }
                } else if playing {
                    let current_is_playing = current_player
                        .as_ref()
                        .and_then(|c| available_players.get(c))
                        .is_some_and(|(info, _)| info.is_playing());
                    if !current_is_playing {
                        tracing::info!(%bus_name, "Player has gone active");
                        current_player = Some(bus_name);
                        forwarder.on_now_playing_item_changed(Some(&attributes));
                    }
                }
            }
            else => { bail!("Player stream closed"); }
        }
    }
}
