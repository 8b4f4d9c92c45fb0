use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::attributes::PlaybackAttributes;

/// Minimum interval between two forwarded playback-time updates.
pub const TIME_UPDATE_MIN_INTERVAL: Duration = Duration::from_millis(2500);

/// Playback state as understood by Tuna.
#[derive(Serialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Playing,
    Stopped,
}

/// A Tuna-compatible now-playing record.
///
/// Fields other than `status` are only present while a track is loaded;
/// absent fields are dropped from the serialized JSON entirely.
#[derive(Serialize, Debug, PartialEq)]
pub struct NowPlayingInfo {
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<String>,
    /// Always a one-element list; Tuna does not model multi-artist tracks.
    /// The element is `null` when the artist is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    artists: Option<Vec<Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album_artist: Option<String>,
    /// Track length in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
    /// Playback position in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cover_url: Option<String>,
}

impl NowPlayingInfo {
    /// The "no track loaded" sentinel.
    const fn unknown() -> Self {
        Self {
            status: Status::Unknown,
            title: None,
            album: None,
            artists: None,
            album_artist: None,
            duration: None,
            progress: None,
            cover_url: None,
        }
    }
}

/// The body POSTed to the aggregation service.
#[derive(Serialize, Debug)]
struct StatusUpdate {
    data: NowPlayingInfo,
    /// Wall-clock timestamp of the update, milliseconds since the epoch.
    date: u64,
}

/// Build a Tuna-compatible now-playing record from the given attributes.
///
/// Never fails: an absent bag or one without a track title yields the
/// `unknown` sentinel, and any other missing field is simply absent from
/// the result.
#[must_use]
pub fn normalize(attributes: Option<&PlaybackAttributes>) -> NowPlayingInfo {
    let Some(attributes) = attributes else {
        return NowPlayingInfo::unknown();
    };
    let Some(title) = attributes.name.clone() else {
        return NowPlayingInfo::unknown();
    };

    let cover_url = attributes
        .artwork
        .as_ref()
        .filter(|artwork| !artwork.url.is_empty())
        .map(|artwork| artwork.resolved_url());

    NowPlayingInfo {
        status: if attributes.status.unwrap_or(false) {
            Status::Playing
        } else {
            Status::Stopped
        },
        title: Some(title),
        album: attributes.album_name.clone(),
        artists: Some(vec![attributes.artist_name.clone()]),
        album_artist: attributes.primary_artist.clone(),
        duration: attributes.duration_in_millis.map(|d| d.trunc() as i64),
        // Tuna expects milliseconds here, but the position is truncated to
        // whole seconds *before* scaling. Historical contract; receivers
        // rely on the coarse value, so do not reorder.
        progress: attributes
            .current_playback_time
            .map(|t| t.trunc() as i64 * 1000),
        cover_url,
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Forwards now-playing status updates to a Tuna-compatible HTTP endpoint.
///
/// Playback-state and track changes are forwarded unconditionally;
/// playback-time updates are rate limited to one per
/// [`TIME_UPDATE_MIN_INTERVAL`].
pub struct Forwarder {
    name: &'static str,
    description: &'static str,
    version: &'static str,
    author: &'static str,
    endpoint: String,
    client: Client,
    last_time_update: Instant,
}

impl Forwarder {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            name: "Tuna Now Playing Updater",
            description: "Makes the currently playing song information available to Tuna",
            version: env!("CARGO_PKG_VERSION"),
            author: env!("CARGO_PKG_AUTHORS"),
            endpoint,
            client: Client::new(),
            last_time_update: Instant::now(),
        }
    }

    /// Normalize the attributes and POST them to the aggregation service.
    ///
    /// Fire and forget: the request runs on a detached task and its outcome
    /// is only ever logged. This never fails synchronously, even for an
    /// unparseable endpoint.
    pub fn dispatch(&self, attributes: Option<&PlaybackAttributes>) {
        let data = normalize(attributes);
        tracing::debug!(?data, "Sending status update");

        let update = StatusUpdate {
            data,
            date: epoch_millis(),
        };
        let request = self.client.post(&self.endpoint).json(&update);
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    tracing::info!("Successfully updated now-playing info");
                }
                Ok(response) => {
                    tracing::error!(
                        status = %response.status(),
                        "Aggregation service rejected status update"
                    );
                }
                Err(e) => {
                    tracing::error!(%e, "Unable to contact aggregation service");
                }
            }
        });
    }

    pub fn on_playback_state_changed(&self, attributes: Option<&PlaybackAttributes>) {
        self.dispatch(attributes);
    }

    pub fn on_now_playing_item_changed(&self, attributes: Option<&PlaybackAttributes>) {
        self.dispatch(attributes);
    }

    /// Forward a playback-position update, unless one was already forwarded
    /// within [`TIME_UPDATE_MIN_INTERVAL`]. Suppressed updates have no side
    /// effect at all, not even a log line.
    pub fn on_playback_time_changed(&mut self, attributes: Option<&PlaybackAttributes>) {
        if !self.time_update_due() {
            return;
        }
        self.dispatch(attributes);
        self.last_time_update = Instant::now();
    }

    fn time_update_due(&self) -> bool {
        self.last_time_update.elapsed() >= TIME_UPDATE_MIN_INTERVAL
    }

    pub fn on_ready(&self) {
        tracing::info!(
            name = self.name,
            description = self.description,
            version = self.version,
            author = self.author,
            "Ready"
        );
    }

    pub fn on_before_quit(&self) {
        tracing::info!("Terminating");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Artwork;
    use serde_json::json;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio::time::{advance, timeout};

    fn sample_attributes() -> PlaybackAttributes {
        PlaybackAttributes {
            name: Some("Siren Song".to_string()),
            album_name: Some("Exits".to_string()),
            artist_name: Some("Maribou State".to_string()),
            primary_artist: Some("Maribou State".to_string()),
            duration_in_millis: Some(123456.789),
            current_playback_time: Some(42.9),
            status: Some(true),
            artwork: Some(Artwork {
                url: "https://x/{w}x{h}.jpg".to_string(),
                width: Some(100),
                height: Some(200),
            }),
        }
    }

    #[test]
    fn absent_attributes_normalize_to_unknown() {
        assert_eq!(normalize(None), NowPlayingInfo::unknown());
        assert_eq!(
            serde_json::to_value(normalize(None)).unwrap(),
            json!({"status": "unknown"})
        );
    }

    #[test]
    fn missing_title_normalizes_to_unknown() {
        let attributes = PlaybackAttributes {
            name: None,
            ..sample_attributes()
        };
        assert_eq!(normalize(Some(&attributes)), NowPlayingInfo::unknown());
    }

    #[test]
    fn status_flag_maps_to_playing_or_stopped() {
        let playing = sample_attributes();
        assert_eq!(normalize(Some(&playing)).status, Status::Playing);

        let stopped = PlaybackAttributes {
            status: Some(false),
            ..sample_attributes()
        };
        assert_eq!(normalize(Some(&stopped)).status, Status::Stopped);

        let no_flag = PlaybackAttributes {
            status: None,
            ..sample_attributes()
        };
        assert_eq!(normalize(Some(&no_flag)).status, Status::Stopped);
    }

    #[test]
    fn duration_is_truncated_not_rounded() {
        let info = normalize(Some(&sample_attributes()));
        assert_eq!(info.duration, Some(123456));
    }

    #[test]
    fn progress_truncates_seconds_before_scaling() {
        // 42.9 s truncates to 42 s, scaled to 42000 ms. Not 42900.
        let info = normalize(Some(&sample_attributes()));
        assert_eq!(info.progress, Some(42000));
    }

    #[test]
    fn artists_is_always_a_single_element() {
        let info = normalize(Some(&sample_attributes()));
        assert_eq!(
            info.artists,
            Some(vec![Some("Maribou State".to_string())])
        );

        let anonymous = PlaybackAttributes {
            artist_name: None,
            ..sample_attributes()
        };
        let value = serde_json::to_value(normalize(Some(&anonymous))).unwrap();
        assert_eq!(value["artists"], json!([null]));
    }

    #[test]
    fn cover_url_substitutes_both_placeholders() {
        let info = normalize(Some(&sample_attributes()));
        assert_eq!(info.cover_url, Some("https://x/100x200.jpg".to_string()));
    }

    #[test]
    fn missing_or_empty_artwork_yields_no_cover_url() {
        let bare = PlaybackAttributes {
            artwork: None,
            ..sample_attributes()
        };
        let value = serde_json::to_value(normalize(Some(&bare))).unwrap();
        assert!(value.get("cover_url").is_none());

        let empty_url = PlaybackAttributes {
            artwork: Some(Artwork::default()),
            ..sample_attributes()
        };
        assert_eq!(normalize(Some(&empty_url)).cover_url, None);
    }

    /// Minimal HTTP fixture standing in for the aggregation service:
    /// replies to every request with the given status line and reports
    /// received bodies through the returned channel.
    async fn spawn_aggregator(
        reply_status: &'static str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(body) = read_request(&mut stream).await {
                        let reply = format!(
                            "HTTP/1.1 {reply_status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        );
                        let _ = stream.write_all(reply.as_bytes()).await;
                        let _ = stream.shutdown().await;
                        let _ = tx.send(body);
                    }
                });
            }
        });
        (endpoint, rx)
    }

    async fn read_request(stream: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Some(String::from_utf8_lossy(&buf[header_end..header_end + content_length]).into_owned())
    }

    #[tokio::test]
    async fn state_change_posts_a_status_update() {
        let (endpoint, mut requests) = spawn_aggregator("200 OK").await;
        let forwarder = Forwarder::new(endpoint);

        forwarder.on_playback_state_changed(Some(&sample_attributes()));

        let body = timeout(Duration::from_secs(5), requests.recv())
            .await
            .unwrap()
            .unwrap();
        let update: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(update["data"]["status"], "playing");
        assert_eq!(update["data"]["title"], "Siren Song");
        assert_eq!(update["data"]["duration"], 123456);
        assert_eq!(update["data"]["progress"], 42000);
        assert!(update["date"].is_u64());
    }

    #[tokio::test]
    async fn item_change_dispatches_once_per_call() {
        let (endpoint, mut requests) = spawn_aggregator("200 OK").await;
        let forwarder = Forwarder::new(endpoint);

        let attributes = sample_attributes();
        forwarder.on_now_playing_item_changed(Some(&attributes));
        forwarder.on_now_playing_item_changed(Some(&attributes));
        forwarder.on_now_playing_item_changed(Some(&attributes));

        for _ in 0..3 {
            timeout(Duration::from_secs(5), requests.recv())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn rejected_update_is_not_retried() {
        let (endpoint, mut requests) = spawn_aggregator("404 Not Found").await;
        let forwarder = Forwarder::new(endpoint);

        forwarder.on_playback_state_changed(Some(&sample_attributes()));

        timeout(Duration::from_secs(5), requests.recv())
            .await
            .unwrap()
            .unwrap();
        // A retry would show up as a second request.
        assert!(timeout(Duration::from_millis(300), requests.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unreachable_aggregator_is_swallowed() {
        // Nothing listens on port 1; the connection error must stay inside
        // the dispatch task.
        let forwarder = Forwarder::new("http://127.0.0.1:1/".to_string());
        forwarder.on_playback_state_changed(Some(&sample_attributes()));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn time_updates_are_rate_limited() {
        let mut forwarder = Forwarder::new("http://127.0.0.1:1/".to_string());
        let attributes = sample_attributes();

        // The window starts at construction, so the first update within it
        // is already suppressed.
        assert!(!forwarder.time_update_due());
        advance(Duration::from_millis(2400)).await;
        assert!(!forwarder.time_update_due());
        advance(Duration::from_millis(100)).await;
        assert!(forwarder.time_update_due());

        forwarder.on_playback_time_changed(Some(&attributes));
        assert!(!forwarder.time_update_due());

        // A suppressed call must not touch the timestamp.
        advance(Duration::from_millis(2400)).await;
        forwarder.on_playback_time_changed(Some(&attributes));
        assert!(!forwarder.time_update_due());
        advance(Duration::from_millis(100)).await;
        assert!(forwarder.time_update_due());
    }
}
