use std::{
    collections::HashMap,
    ops::Deref,
    str::FromStr,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context as _, Result};
use futures_lite::{stream::Fuse, StreamExt as _};
use tokio::{
    select,
    time::{interval, Interval},
};
use zbus::{
    proxy::PropertyStream,
    zvariant::{OwnedValue, Value},
};

use crate::{
    attributes::{Artwork, PlaybackAttributes},
    dbus::player::{PlayerProxy, SeekedStream},
};

/// Current playback status of a MPRIS-compliant player
#[derive(Eq, PartialEq, Debug)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}
impl FromStr for PlaybackStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "playing" => Ok(Self::Playing),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            _ => Err(anyhow!("Unknown PlaybackStatus {s}")),
        }
    }
}

fn as_string(v: &Value<'_>) -> Option<String> {
    match v {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

/// Snapshot of a player's state as reported over MPRIS.
#[derive(Debug)]
pub struct PlayerInformation {
    pub metadata: HashMap<String, OwnedValue>,
    /// Playback position in microseconds, as of `position_last_refresh`.
    pub position: i64,
    pub position_last_refresh: Instant,
    pub status: Option<PlaybackStatus>,
}

impl PlayerInformation {
    pub async fn new(player: &PlayerProxy<'_>) -> Result<Self> {
        Ok(Self {
            metadata: player
                .metadata()
                .await
                .inspect_err(|e| {
                    tracing::warn!(?e, "Failed to get player metadata");
                })
                .ok()
                .unwrap_or_default(),
            position: player
                .position()
                .await
                .context("Failed to get player position")?,
            status: player
                .playback_status()
                .await
                .inspect_err(|e| {
                    tracing::warn!(?e, "Failed to get player playback status");
                })
                .ok()
                .as_deref()
                .map(str::parse)
                .transpose()
                .context("Failed to parse player playback status")?,
            position_last_refresh: Instant::now(),
        })
    }

    pub fn apply_update(&mut self, update: PlayerInformationUpdate) {
        match update {
            PlayerInformationUpdate::Metadata(metadata) => {
                self.metadata = metadata;
            }
            PlayerInformationUpdate::Status(status) => {
                self.status = Some(status);
            }
            PlayerInformationUpdate::Position(position, instant) => {
                self.position = position;
                self.position_last_refresh = instant;
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.status, Some(PlaybackStatus::Playing))
    }

    /// Translate this snapshot into the attribute bag the forwarder
    /// understands. Fields missing from the MPRIS metadata stay absent.
    #[must_use]
    pub fn attributes(&self) -> PlaybackAttributes {
        PlaybackAttributes {
            name: self.metadata_string("xesam:title"),
            album_name: self.metadata_string("xesam:album"),
            artist_name: self.metadata_first_string("xesam:artist"),
            primary_artist: self.metadata_first_string("xesam:albumArtist"),
            duration_in_millis: self.length_micros().map(|us| us as f64 / 1000.0),
            current_playback_time: Some(self.playback_time().as_secs_f64()),
            status: Some(self.is_playing()),
            artwork: self.metadata_string("mpris:artUrl").map(|url| Artwork {
                url,
                width: None,
                height: None,
            }),
        }
    }

    fn metadata_string(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(Deref::deref).and_then(as_string)
    }

    /// MPRIS list-of-string fields (artists). Only the first entry is used.
    fn metadata_first_string(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)?.deref() {
            Value::Array(items) => items.iter().next().and_then(as_string),
            v => as_string(v),
        }
    }

    fn length_micros(&self) -> Option<i64> {
        match self.metadata.get("mpris:length")?.deref() {
            Value::I64(us) => Some(*us),
            Value::U64(us) => Some(*us as i64),
            Value::I32(us) => Some(i64::from(*us)),
            Value::U32(us) => Some(i64::from(*us)),
            _ => None,
        }
    }

    /// Current position, advanced by the wall time elapsed since the last
    /// refresh while the player is playing.
    fn playback_time(&self) -> Duration {
        let base = Duration::from_micros(self.position.max(0) as u64);
        if self.is_playing() {
            base + self.position_last_refresh.elapsed()
        } else {
            base
        }
    }
}

pub struct PlayerInformationUpdateListener<'a> {
    player: PlayerProxy<'a>,
    metadata_stream: Fuse<PropertyStream<'a, HashMap<String, OwnedValue>>>,
    status_stream: Fuse<PropertyStream<'a, String>>,
    seeked: SeekedStream,
    position_refresh_stream: Interval,
}

#[derive(Debug)]
pub enum PlayerInformationUpdate {
    Metadata(HashMap<String, OwnedValue>),
    Status(PlaybackStatus),
    Position(i64, Instant),
}

impl<'a> PlayerInformationUpdateListener<'a> {
    pub async fn new(player: PlayerProxy<'a>, refresh_interval: Duration) -> Result<Self> {
        Ok(Self {
            metadata_stream: player.receive_metadata_changed().await.fuse(),
            status_stream: player.receive_playback_status_changed().await.fuse(),
            seeked: player
                .receive_seeked()
                .await
                .context("Failed to receive seek signal")?,
            position_refresh_stream: interval(refresh_interval),
            player,
        })
    }

    pub async fn update(&mut self) -> Result<PlayerInformationUpdate> {
        select! {
            metadata = self.metadata_stream.next() => {
                metadata.context("Failed to receive metadata update event")?.get().await.context("Failed to get player metadata").map(PlayerInformationUpdate::Metadata)
            },
            status = self.status_stream.next() => {
                status.context("Failed to receive status update event")?.get().await.context("Failed to get player playback status")?.parse().map(PlayerInformationUpdate::Status)
            }
            seek = self.seeked.next() => {
                seek.context("Failed to receive seek signal")?.args().context("Failed to get player seeked position").map(|p| PlayerInformationUpdate::Position(p.position, Instant::now()))
            }
            _ = self.position_refresh_stream.tick() => {
                self.player.position().await.context("Failed to get player position").map(|p| PlayerInformationUpdate::Position(p, Instant::now()))
            }
        }
    }
}
