use std::collections::HashMap;

use zbus::{proxy, zvariant::OwnedValue};

/// Proxy for the `org.mpris.MediaPlayer2.Player` interface.
///
/// Only the properties and signals needed to build a now-playing snapshot
/// are mapped here.
#[proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2",
    gen_blocking = false
)]
pub trait Player {
    /// Track metadata, keyed by MPRIS/xesam field name.
    #[zbus(property)]
    fn metadata(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    /// "Playing", "Paused" or "Stopped".
    #[zbus(property)]
    fn playback_status(&self) -> zbus::Result<String>;

    /// Playback position in microseconds.
    #[zbus(property)]
    fn position(&self) -> zbus::Result<i64>;

    /// Emitted when the position changes in a non-linear way (seek).
    #[zbus(signal)]
    fn seeked(&self, position: i64) -> zbus::Result<()>;
}
