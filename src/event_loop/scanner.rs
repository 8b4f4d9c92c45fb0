use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use tokio::task::JoinHandle;
use zbus::names::OwnedBusName;

use crate::player::PlayerInformation;

pub type AvailablePlayers =
    HashMap<Arc<OwnedBusName>, (PlayerInformation, JoinHandle<Result<()>>)>;

/// Find a player worth forwarding, preferring one that is actually playing.
pub fn find_active_player(players: &AvailablePlayers) -> Option<Arc<OwnedBusName>> {
    players
        .iter()
        .find(|(_, (info, _))| info.is_playing())
        .map(|(name, _)| Arc::clone(name))
}
