//! Stream-to-URL conversion
//!
//! Turns an abstract stream descriptor into an absolute media URL on a
//! given streaming server. The conversion is a collaborator contract so
//! hosting applications can plug in their own server dialect; the default
//! implementation covers direct URLs and torrent descriptors.

use crate::error::PlayerError;
use crate::types::{SeriesInfo, Stream};
use async_trait::async_trait;
use url::Url;

/// Resolves a stream descriptor against a streaming server
#[async_trait]
pub trait StreamConverter: Send + Sync + 'static {
    /// Absolute media URL for the descriptor, or an error if this server
    /// cannot resolve it
    async fn convert(
        &self,
        server_url: &Url,
        stream: &Stream,
        series_info: Option<&SeriesInfo>,
    ) -> std::result::Result<Url, PlayerError>;
}

/// Default conversion: direct URLs pass through, torrent descriptors map
/// onto the server's `/{infoHash}/{fileIdx}` route
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStreamConverter;

#[async_trait]
impl StreamConverter for DefaultStreamConverter {
    async fn convert(
        &self,
        server_url: &Url,
        stream: &Stream,
        _series_info: Option<&SeriesInfo>,
    ) -> std::result::Result<Url, PlayerError> {
        if let Some(raw) = stream.url.as_deref() {
            return Url::parse(raw)
                .map_err(|_| PlayerError::unsupported_stream(Some(stream.clone())));
        }

        if let Some(info_hash) = stream.info_hash.as_deref() {
            let file_idx = stream.file_idx.unwrap_or(0);
            return server_url
                .join(&format!("/{}/{}", info_hash, file_idx))
                .map_err(|_| PlayerError::unsupported_stream(Some(stream.clone())));
        }

        Err(PlayerError::unsupported_stream(Some(stream.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Url {
        Url::parse("http://127.0.0.1:11470/").unwrap()
    }

    #[tokio::test]
    async fn test_direct_url_passes_through() {
        let stream = Stream::with_url("https://example.com/movie.mp4");
        let url = DefaultStreamConverter
            .convert(&server(), &stream, None)
            .await
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/movie.mp4");
    }

    #[tokio::test]
    async fn test_torrent_descriptor_maps_onto_the_server() {
        let stream = Stream {
            info_hash: Some("aabbccddeeff00112233445566778899aabbccdd".to_string()),
            file_idx: Some(2),
            ..Default::default()
        };
        let url = DefaultStreamConverter
            .convert(&server(), &stream, None)
            .await
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:11470/aabbccddeeff00112233445566778899aabbccdd/2"
        );
    }

    #[tokio::test]
    async fn test_unresolvable_descriptor_is_rejected() {
        let error = DefaultStreamConverter
            .convert(&server(), &Stream::default(), None)
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "UNSUPPORTED_STREAM");
    }
}
