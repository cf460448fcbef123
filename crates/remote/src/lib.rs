//! Client for NASA's Astronomy Picture of the Day API.
//!
//! Two calls: [`ApodClient::info`] looks up the metadata published for a
//! date, [`ApodClient::download`] fetches the bytes behind one of its URLs.
//! Nothing here touches the cache; the caller hands the bytes on.

pub mod error;

use crate::error::{ErrorKind, Result};
use apod_config::ApiConfig;
use exn::{OptionExt, ResultExt};
use reqwest::{Client, Request};
use serde::Deserialize;
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::instrument;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Metadata published for a single day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApodInfo {
    pub date: String,
    pub title: String,
    #[serde(default)]
    pub explanation: String,
    /// `image`, `video`, or `other`.
    pub media_type: String,
    /// Absent for `other` media.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub hdurl: Option<String>,
    /// Only present for videos, and only when requested with `thumbs=true`.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
}

impl ApodInfo {
    /// The URL of the image to download for this day.
    ///
    /// Images use `hdurl` when `prefer_hd` is set and one is published, and
    /// `url` otherwise. Videos fall back to their thumbnail.
    pub fn image_url(&self, prefer_hd: bool) -> Result<&str> {
        let url = match self.media_type.as_str() {
            "image" if prefer_hd => self.hdurl.as_deref().or(self.url.as_deref()),
            "image" => self.url.as_deref(),
            "video" => self.thumbnail_url.as_deref(),
            _ => None,
        };
        url.ok_or_raise(|| ErrorKind::UnsupportedMedia(self.media_type.clone()))
    }

    /// The day this picture was published for.
    pub fn capture_date(&self) -> Result<Date> {
        Date::parse(&self.date, DATE_FORMAT).or_raise(|| ErrorKind::Decode)
    }
}

/// HTTP client for the APOD API.
#[derive(Debug, Clone)]
pub struct ApodClient {
    http: Client,
    url: String,
    key: String,
}

impl ApodClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Request)?;
        Ok(Self { http, url: config.url.clone(), key: config.key.clone() })
    }

    fn info_request(&self, date: Date) -> Result<Request> {
        let date = date.format(DATE_FORMAT).or_raise(|| ErrorKind::Request)?;
        self.http
            .get(&self.url)
            .query(&[("api_key", self.key.as_str()), ("date", date.as_str()), ("thumbs", "true")])
            .build()
            .or_raise(|| ErrorKind::Request)
    }

    /// Look up the picture of the day for `date`.
    #[instrument(skip_all, fields(date = %date))]
    pub async fn info(&self, date: Date) -> Result<ApodInfo> {
        let request = self.info_request(date)?;
        let response = self.http.execute(request).await.or_raise(|| ErrorKind::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body, "metadata lookup rejected");
            exn::bail!(ErrorKind::Status(status.as_u16()));
        }
        let info: ApodInfo = response.json().await.or_raise(|| ErrorKind::Decode)?;
        tracing::debug!(title = %info.title, media_type = %info.media_type, "fetched metadata");
        Ok(info)
    }

    /// Fetch the raw bytes at `url`.
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await.or_raise(|| ErrorKind::Request)?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Status(status.as_u16()));
        }
        let bytes = response.bytes().await.or_raise(|| ErrorKind::Request)?;
        tracing::debug!(size = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }
}
