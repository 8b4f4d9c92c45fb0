/// Cover artwork attached to a track.
///
/// The URL may be a template containing literal `{w}`/`{h}` placeholders
/// (Apple Music style); `resolved_url` substitutes them with the known
/// dimensions. MPRIS players expose no artwork dimensions, so both are
/// optional and an unknown dimension leaves its placeholder untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artwork {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Artwork {
    /// Substitute the `{h}` and `{w}` placeholders, in that order.
    #[must_use]
    pub fn resolved_url(&self) -> String {
        let mut url = self.url.clone();
        if let Some(height) = self.height {
            url = url.replace("{h}", &height.to_string());
        }
        if let Some(width) = self.width {
            url = url.replace("{w}", &width.to_string());
        }
        url
    }
}

/// A loose bag of now-playing attributes as reported by the host player.
///
/// Every field is optional; the presence of `name` is the sole signal that
/// a track is loaded at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackAttributes {
    /// Track title.
    pub name: Option<String>,
    pub album_name: Option<String>,
    pub artist_name: Option<String>,
    pub primary_artist: Option<String>,
    /// Track length in milliseconds.
    pub duration_in_millis: Option<f64>,
    /// Playback position in seconds.
    pub current_playback_time: Option<f64>,
    /// Whether the player is currently playing (as opposed to paused or
    /// stopped).
    pub status: Option<bool>,
    pub artwork: Option<Artwork>,
}
