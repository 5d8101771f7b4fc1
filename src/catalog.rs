#![forbid(unsafe_code)]

//! Enumerates a channel's uploads through the metadata service.
//!
//! The walk is lazy: pages are requested only as the caller pulls items, and
//! each item costs one extra lookup for its duration because list responses
//! do not carry it.

use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;

use crate::config::MAX_PAGE_SIZE;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("channel {0} has no uploads collection")]
    NotFound(String),
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("{endpoint} request failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },
    #[error("catalog sent page token {0} a second time")]
    RepeatedCursor(String),
    #[error("decoding {endpoint} response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl VideoRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        let url = format!("https://www.youtube.com/watch?v={id}");
        Self {
            id,
            title: title.into(),
            url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageItem {
    pub video_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<PageItem>,
    pub next_cursor: Option<String>,
}

/// One upload plus its duration encoding. `duration` is `None` when the
/// service has no details for the video (private, deleted, still processing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub video: VideoRef,
    pub duration: Option<String>,
}

/// Read-only view of the remote catalog.
pub trait MetadataService {
    fn uploads_collection(&self, channel_id: &str) -> Result<Option<String>, CatalogError>;

    fn list_page(
        &self,
        collection_id: &str,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<Page, CatalogError>;

    fn video_duration(&self, video_id: &str) -> Result<Option<String>, CatalogError>;
}

pub fn resolve_uploads_collection<S: MetadataService + ?Sized>(
    service: &S,
    channel_id: &str,
) -> Result<String, CatalogError> {
    service
        .uploads_collection(channel_id)?
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| CatalogError::NotFound(channel_id.to_owned()))
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Forward-only iterator over every item in an uploads collection.
pub struct CatalogWalker<'a, S: MetadataService + ?Sized> {
    service: &'a S,
    collection_id: String,
    page_size: u32,
    buffer: VecDeque<PageItem>,
    cursor: Cursor,
    seen_cursors: HashSet<String>,
}

impl<'a, S: MetadataService + ?Sized> CatalogWalker<'a, S> {
    pub fn new(service: &'a S, collection_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            service,
            collection_id: collection_id.into(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            buffer: VecDeque::new(),
            cursor: Cursor::Start,
            seen_cursors: HashSet::new(),
        }
    }

    fn fetch_page(&mut self) -> Result<(), CatalogError> {
        let token = match &self.cursor {
            Cursor::Start => None,
            Cursor::Next(token) => Some(token.as_str()),
            Cursor::Done => return Ok(()),
        };
        let page = self
            .service
            .list_page(&self.collection_id, self.page_size, token)?;
        tracing::debug!(
            collection = %self.collection_id,
            items = page.items.len(),
            has_next = page.next_cursor.is_some(),
            "fetched catalog page"
        );
        let next = match page.next_cursor {
            Some(next) if !next.is_empty() => {
                // A token seen before would loop the walk forever.
                if !self.seen_cursors.insert(next.clone()) {
                    return Err(CatalogError::RepeatedCursor(next));
                }
                Cursor::Next(next)
            }
            _ => Cursor::Done,
        };
        self.buffer.extend(page.items);
        self.cursor = next;
        Ok(())
    }
}

impl<S: MetadataService + ?Sized> Iterator for CatalogWalker<'_, S> {
    type Item = Result<CatalogEntry, CatalogError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Pages can come back empty while still carrying a cursor.
        while self.buffer.is_empty() {
            if matches!(self.cursor, Cursor::Done) {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.cursor = Cursor::Done;
                return Some(Err(err));
            }
        }

        let item = self.buffer.pop_front()?;
        match self.service.video_duration(&item.video_id) {
            Ok(duration) => Some(Ok(CatalogEntry {
                video: VideoRef::new(item.video_id, item.title),
                duration,
            })),
            Err(err) => {
                self.buffer.clear();
                self.cursor = Cursor::Done;
                Some(Err(err))
            }
        }
    }
}

const CHANNELS_ENDPOINT: &str = "channels";
const PLAYLIST_ITEMS_ENDPOINT: &str = "playlistItems";
const VIDEOS_ENDPOINT: &str = "videos";

/// Blocking client for the YouTube Data API v3.
pub struct YouTubeDataApi {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl YouTubeDataApi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn get_json(
        &self,
        endpoint: &'static str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, CatalogError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.agent.get(&url);
        for (key, value) in params {
            request = request.query(key, value);
        }
        request = request.query("key", &self.api_key);

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(CatalogError::Status {
                    endpoint,
                    status,
                    body: body.trim().to_owned(),
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(CatalogError::Transport {
                    endpoint,
                    message: transport.to_string(),
                });
            }
        };

        response
            .into_json::<serde_json::Value>()
            .map_err(|err| CatalogError::Decode {
                endpoint,
                message: err.to_string(),
            })
    }
}

impl MetadataService for YouTubeDataApi {
    fn uploads_collection(&self, channel_id: &str) -> Result<Option<String>, CatalogError> {
        let body = self.get_json(
            CHANNELS_ENDPOINT,
            &[("part", "contentDetails"), ("id", channel_id)],
        )?;
        parse_uploads_collection(body)
    }

    fn list_page(
        &self,
        collection_id: &str,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<Page, CatalogError> {
        let max_results = page_size.to_string();
        let mut params = vec![
            ("part", "snippet,contentDetails"),
            ("playlistId", collection_id),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = cursor {
            params.push(("pageToken", token));
        }
        let body = self.get_json(PLAYLIST_ITEMS_ENDPOINT, &params)?;
        parse_page(body)
    }

    fn video_duration(&self, video_id: &str) -> Result<Option<String>, CatalogError> {
        let body = self.get_json(VIDEOS_ENDPOINT, &[("part", "contentDetails"), ("id", video_id)])?;
        parse_video_duration(body)
    }
}

#[derive(Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: Option<ChannelContentDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemList {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
    content_details: Option<PlaylistItemDetails>,
}

#[derive(Deserialize)]
struct PlaylistSnippet {
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: Option<String>,
}

#[derive(Deserialize)]
struct VideoList {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    content_details: Option<VideoContentDetails>,
}

#[derive(Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(
    endpoint: &'static str,
    body: serde_json::Value,
) -> Result<T, CatalogError> {
    serde_json::from_value(body).map_err(|err| CatalogError::Decode {
        endpoint,
        message: err.to_string(),
    })
}

fn parse_uploads_collection(body: serde_json::Value) -> Result<Option<String>, CatalogError> {
    let list: ChannelList = decode(CHANNELS_ENDPOINT, body)?;
    Ok(list
        .items
        .into_iter()
        .next()
        .and_then(|item| item.content_details)
        .and_then(|details| details.related_playlists)
        .and_then(|playlists| playlists.uploads))
}

fn parse_page(body: serde_json::Value) -> Result<Page, CatalogError> {
    let list: PlaylistItemList = decode(PLAYLIST_ITEMS_ENDPOINT, body)?;
    let items = list
        .items
        .into_iter()
        .filter_map(|item| {
            let video_id = item.content_details?.video_id?;
            if video_id.trim().is_empty() {
                return None;
            }
            let title = item.snippet.and_then(|s| s.title).unwrap_or_default();
            Some(PageItem { video_id, title })
        })
        .collect();
    Ok(Page {
        items,
        next_cursor: list.next_page_token.filter(|token| !token.is_empty()),
    })
}

fn parse_video_duration(body: serde_json::Value) -> Result<Option<String>, CatalogError> {
    let list: VideoList = decode(VIDEOS_ENDPOINT, body)?;
    Ok(list
        .items
        .into_iter()
        .next()
        .and_then(|item| item.content_details)
        .and_then(|details| details.duration))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// In-memory catalog that pages through a fixed list of uploads.
    pub struct FakeCatalog {
        pub uploads: Option<String>,
        pub videos: Vec<(String, String, Option<String>)>,
        pub fail_page: Option<usize>,
        pub page_requests: Cell<usize>,
        pub duration_requests: RefCell<Vec<String>>,
    }

    impl FakeCatalog {
        pub fn new(videos: &[(&str, &str, Option<&str>)]) -> Self {
            Self {
                uploads: Some("UUuploads".into()),
                videos: videos
                    .iter()
                    .map(|(id, title, duration)| {
                        (id.to_string(), title.to_string(), duration.map(str::to_string))
                    })
                    .collect(),
                fail_page: None,
                page_requests: Cell::new(0),
                duration_requests: RefCell::new(Vec::new()),
            }
        }

        fn durations(&self) -> HashMap<&str, Option<&str>> {
            self.videos
                .iter()
                .map(|(id, _, duration)| (id.as_str(), duration.as_deref()))
                .collect()
        }
    }

    impl MetadataService for FakeCatalog {
        fn uploads_collection(&self, _channel_id: &str) -> Result<Option<String>, CatalogError> {
            Ok(self.uploads.clone())
        }

        fn list_page(
            &self,
            collection_id: &str,
            page_size: u32,
            cursor: Option<&str>,
        ) -> Result<Page, CatalogError> {
            assert_eq!(Some(collection_id), self.uploads.as_deref());
            let index = self.page_requests.get();
            self.page_requests.set(index + 1);
            if self.fail_page == Some(index) {
                return Err(CatalogError::Status {
                    endpoint: PLAYLIST_ITEMS_ENDPOINT,
                    status: 500,
                    body: "backend error".into(),
                });
            }

            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (start + page_size as usize).min(self.videos.len());
            let items = self.videos[start..end]
                .iter()
                .map(|(id, title, _)| PageItem {
                    video_id: id.clone(),
                    title: title.clone(),
                })
                .collect();
            let next_cursor = (end < self.videos.len()).then(|| end.to_string());
            Ok(Page { items, next_cursor })
        }

        fn video_duration(&self, video_id: &str) -> Result<Option<String>, CatalogError> {
            self.duration_requests.borrow_mut().push(video_id.to_owned());
            Ok(self
                .durations()
                .get(video_id)
                .copied()
                .flatten()
                .map(str::to_string))
        }
    }
}
