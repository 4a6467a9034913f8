//! Fetching a listener's top albums from the Last.fm API.

use anyhow::{Context, Result, bail};
use log::warn;
use reqwest::blocking::Client;
use reqwest::header;
use serde::Deserialize;

use crate::config::LastfmCredentials;
use crate::models::Album;

const API_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";
const USER_AGENT: &str = "lastfm-collage/0.1.0";

/// Account whose listening the collage summarizes.
const LISTENER: &str = "jpegaga";
/// Trailing window the top-albums ranking covers.
const LISTENER_PERIOD: &str = "1month";
/// Despite only needing 9 albums for the collage, fetch a few more so
/// entries with no album art can be dropped and the next album drawn
/// instead.
const FETCH_COUNT: usize = 15;
/// Last.fm serves several artwork sizes per album; this one is the 300px
/// rendition that matches the collage cell.
const COVER_SIZE: &str = "extralarge";

pub struct LastfmClient {
    http: Client,
    creds: LastfmCredentials,
}

impl LastfmClient {
    pub fn new(creds: LastfmCredentials) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(USER_AGENT),
        );

        let http = Client::builder().default_headers(headers).build()?;

        Ok(Self { http, creds })
    }

    /// One `user.gettopalbums` call, in descending-play-count order as
    /// returned by the service. Any transport, auth, or HTTP failure here
    /// is fatal to the run.
    fn top_albums(&self, user: &str, period: &str, limit: usize) -> Result<Vec<RawTopAlbum>> {
        let limit = limit.to_string();
        let response = self
            .http
            .get(API_BASE_URL)
            .query(&[
                ("method", "user.gettopalbums"),
                ("user", user),
                ("api_key", self.creds.api_key.as_str()),
                ("period", period),
                ("limit", limit.as_str()),
                ("format", "json"),
            ])
            .send()
            .context("Failed to send top-albums request")?;

        if !response.status().is_success() {
            bail!(
                "Top-albums request failed with status: {}",
                response.status()
            );
        }

        let parsed: TopAlbumsResponse = response.json()?;
        Ok(parsed.topalbums.album)
    }
}

/// Narrow seam over "download these bytes" so cover-art retrieval can be
/// faked in tests.
pub trait CoverSource {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

impl CoverSource for LastfmClient {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("Failed to download cover art from {url}"))?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// Fetch the listener's top albums for the trailing month.
///
/// The listing call happens eagerly and any failure there aborts the run.
/// The returned iterator then yields albums one at a time, downloading
/// cover art on demand and dropping entries without usable metadata, so a
/// caller that stops early never pays for the covers it didn't use.
pub fn fetch_albums(client: &LastfmClient) -> Result<Albums<'_, LastfmClient>> {
    let raw = client.top_albums(LISTENER, LISTENER_PERIOD, FETCH_COUNT)?;
    Ok(Albums::new(client, raw))
}

/// Lazy, finite, single-pass stream of well-formed albums backed by one
/// bounded page of raw results.
pub struct Albums<'a, S: CoverSource> {
    source: &'a S,
    raw: std::vec::IntoIter<RawTopAlbum>,
}

impl<'a, S: CoverSource> Albums<'a, S> {
    fn new(source: &'a S, mut raw: Vec<RawTopAlbum>) -> Self {
        raw.truncate(FETCH_COUNT);
        Self {
            source,
            raw: raw.into_iter(),
        }
    }
}

impl<S: CoverSource> Iterator for Albums<'_, S> {
    type Item = Album;

    fn next(&mut self) -> Option<Album> {
        for raw in self.raw.by_ref() {
            let Some((title, artist, url)) = raw.identity() else {
                continue;
            };

            let bytes = match self.source.fetch_bytes(url) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping \"{title}\" by {artist}: {e:#}");
                    continue;
                }
            };

            let cover_art = match image::load_from_memory(&bytes) {
                Ok(decoded) => decoded.to_rgba8(),
                Err(e) => {
                    warn!("Skipping \"{title}\" by {artist}: undecodable cover art: {e}");
                    continue;
                }
            };

            return Some(Album {
                title: title.to_string(),
                artist: artist.to_string(),
                cover_art,
            });
        }

        None
    }
}

// --- Serde Structs ---

#[derive(Deserialize, Debug)]
struct TopAlbumsResponse {
    topalbums: TopAlbums,
}

#[derive(Deserialize, Debug)]
struct TopAlbums {
    #[serde(default)]
    album: Vec<RawTopAlbum>,
}

#[derive(Deserialize, Debug)]
struct RawTopAlbum {
    name: Option<String>,
    artist: Option<RawArtist>,
    #[serde(default)]
    image: Vec<RawImage>,
}

#[derive(Deserialize, Debug)]
struct RawArtist {
    name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawImage {
    #[serde(rename = "#text")]
    url: String,
    size: String,
}

impl RawTopAlbum {
    /// Title, artist name, and cell-sized artwork URL, or `None` when any
    /// of them is missing from the upstream entry.
    fn identity(&self) -> Option<(&str, &str, &str)> {
        let title = self.name.as_deref().filter(|t| !t.is_empty())?;
        let artist = self
            .artist
            .as_ref()?
            .name
            .as_deref()
            .filter(|a| !a.is_empty())?;
        let url = self
            .image
            .iter()
            .find(|img| img.size == COVER_SIZE)
            .map(|img| img.url.as_str())
            .filter(|u| !u.is_empty())?;
        Some((title, artist, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use serde_json::json;
    use std::io::Cursor;

    fn encoded_cover(rgba: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(300, 300, Rgba(rgba));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("png encoding should succeed");
        cursor.into_inner()
    }

    struct FakeCovers;

    impl CoverSource for FakeCovers {
        fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(encoded_cover([40, 80, 120, 255]))
        }
    }

    /// Fails for any URL containing "broken", serves a solid cover
    /// otherwise.
    struct FlakyCovers;

    impl CoverSource for FlakyCovers {
        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
            if url.contains("broken") {
                bail!("connection reset by peer");
            }
            Ok(encoded_cover([1, 2, 3, 255]))
        }
    }

    fn entry(title: Option<&str>, artist: Option<&str>, art: Option<&str>) -> RawTopAlbum {
        let images = match art {
            Some(url) => json!([
                { "#text": url, "size": "small" },
                { "#text": url, "size": "extralarge" },
            ]),
            None => json!([]),
        };
        let value = json!({
            "name": title,
            "artist": artist.map(|name| json!({ "name": name })),
            "image": images,
        });
        serde_json::from_value(value).expect("raw album fixture should deserialize")
    }

    fn yielded_titles<S: CoverSource>(source: &S, raw: Vec<RawTopAlbum>) -> Vec<String> {
        Albums::new(source, raw).map(|album| album.title).collect()
    }

    #[test]
    fn response_parsing_handles_lastfm_field_names() {
        let body = r##"{"topalbums":{"album":[{"artist":{"url":"https://www.last.fm/music/Bj%C3%B6rk","name":"Björk","mbid":""},"image":[{"size":"small","#text":"https://lastfm.freetls.fastly.net/i/u/34s/a.png"},{"size":"extralarge","#text":"https://lastfm.freetls.fastly.net/i/u/300x300/a.png"}],"mbid":"","url":"https://www.last.fm/music/Bj%C3%B6rk/Vespertine","playcount":"57","@attr":{"rank":"1"},"name":"Vespertine"}],"@attr":{"user":"jpegaga","totalPages":"1","page":"1","perPage":"15","total":"1"}}}"##;

        let parsed: TopAlbumsResponse =
            serde_json::from_str(body).expect("response fixture should deserialize");
        let albums = parsed.topalbums.album;
        assert_eq!(albums.len(), 1);

        let (title, artist, url) = albums[0].identity().expect("entry is well-formed");
        assert_eq!(title, "Vespertine");
        assert_eq!(artist, "Björk");
        assert_eq!(url, "https://lastfm.freetls.fastly.net/i/u/300x300/a.png");
    }

    #[test]
    fn malformed_entries_are_dropped_in_order() {
        let raw = vec![
            entry(Some("First"), Some("A"), Some("https://img.example/1.png")),
            entry(Some("No Art"), Some("B"), None),
            entry(Some("Empty Art"), Some("C"), Some("")),
            entry(Some("No Artist"), None, Some("https://img.example/2.png")),
            entry(Some("Blank Artist"), Some(""), Some("https://img.example/3.png")),
            entry(None, Some("D"), Some("https://img.example/4.png")),
            entry(Some("Last"), Some("E"), Some("https://img.example/5.png")),
        ];

        assert_eq!(yielded_titles(&FakeCovers, raw), vec!["First", "Last"]);
    }

    #[test]
    fn never_yields_more_than_the_fetch_cap() {
        let raw: Vec<RawTopAlbum> = (0..20)
            .map(|i| {
                entry(
                    Some(&format!("Album {i}")),
                    Some("Artist"),
                    Some(&format!("https://img.example/{i}.png")),
                )
            })
            .collect();

        assert_eq!(yielded_titles(&FakeCovers, raw).len(), FETCH_COUNT);
    }

    #[test]
    fn cover_download_failure_skips_the_item() {
        let raw = vec![
            entry(Some("Good"), Some("A"), Some("https://img.example/ok.png")),
            entry(Some("Bad"), Some("B"), Some("https://img.example/broken.png")),
            entry(Some("Also Good"), Some("C"), Some("https://img.example/ok2.png")),
        ];

        assert_eq!(yielded_titles(&FlakyCovers, raw), vec!["Good", "Also Good"]);
    }

    #[test]
    fn undecodable_cover_bytes_skip_the_item() {
        struct GarbageCovers;

        impl CoverSource for GarbageCovers {
            fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>> {
                Ok(b"definitely-not-an-image".to_vec())
            }
        }

        let raw = vec![entry(Some("Only"), Some("A"), Some("https://img.example/x.png"))];
        assert!(yielded_titles(&GarbageCovers, raw).is_empty());
    }

    #[test]
    fn yielded_albums_carry_decoded_rgba_covers() {
        let raw = vec![entry(Some("Only"), Some("A"), Some("https://img.example/x.png"))];
        let albums: Vec<Album> = Albums::new(&FakeCovers, raw).collect();

        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].artist, "A");
        assert_eq!(albums[0].cover_art.dimensions(), (300, 300));
        assert_eq!(albums[0].cover_art.get_pixel(150, 150).0, [40, 80, 120, 255]);
    }
}
