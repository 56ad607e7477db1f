//! HTTP-backed collaborators: face model service, reference image fetcher
//! and reference photo list.

use async_trait::async_trait;
use facewatch_core::{
    BoundingBox, DetectedFace, FaceDescriptor, FaceModel, FetchError, ImageFetcher,
    ProviderError, ReferencePhoto, ReferenceStore,
};
use image::RgbImage;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Shared client for every outgoing request, with the configured timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("facewatchd/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[derive(Debug, Deserialize)]
struct WireFace {
    #[serde(rename = "box")]
    region: BoundingBox,
    #[serde(default)]
    descriptor: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<WireFace>,
}

/// Pick the most confident face; it must carry a descriptor.
fn select_face(faces: Vec<WireFace>) -> Result<Option<DetectedFace>, ProviderError> {
    let Some(best) = faces
        .into_iter()
        .max_by(|a, b| a.region.confidence.total_cmp(&b.region.confidence))
    else {
        return Ok(None);
    };

    match best.descriptor {
        Some(values) if !values.is_empty() => Ok(Some(DetectedFace {
            region: best.region,
            descriptor: FaceDescriptor::new(values),
        })),
        _ => Err(ProviderError::Malformed("face without descriptor".into())),
    }
}

/// Face model service speaking `POST <endpoint>/detect?descriptors=<bool>`.
pub struct HttpFaceModel {
    client: reqwest::Client,
    detect_url: String,
}

impl HttpFaceModel {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            detect_url: format!("{}/detect", endpoint.trim_end_matches('/')),
        }
    }

    async fn detect(
        &self,
        image: &RgbImage,
        descriptors: bool,
    ) -> Result<Vec<WireFace>, ProviderError> {
        let png = facewatch_hw::frame::spawn_encode_png(image.clone())
            .await
            .map_err(|e| ProviderError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(&self.detect_url)
            .query(&[("descriptors", descriptors)])
            .header(CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        tracing::trace!(faces = parsed.faces.len(), descriptors, "face model answered");
        Ok(parsed.faces)
    }
}

#[async_trait]
impl FaceModel for HttpFaceModel {
    async fn detect_existence(&self, image: &RgbImage) -> Result<bool, ProviderError> {
        Ok(!self.detect(image, false).await?.is_empty())
    }

    async fn detect_and_describe(
        &self,
        image: &RgbImage,
    ) -> Result<Option<DetectedFace>, ProviderError> {
        select_face(self.detect(image, true).await?)
    }
}

/// Loads images from `http(s)://` URLs, `file://` URLs or plain paths.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !is_remote(url) {
            let path = url.strip_prefix("file://").unwrap_or(url);
            return tokio::fs::read(path).await.map_err(|source| FetchError::Io {
                path: path.to_string(),
                source,
            });
        }

        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await.map_err(transport)?.to_vec())
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RgbImage, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        image::load_from_memory(&bytes)
            .map(|img| img.to_rgb8())
            .map_err(|e| FetchError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

/// Reference photo list stored as a JSON array at a URL or path.
pub struct HttpReferenceStore {
    fetcher: Arc<HttpFetcher>,
    source: String,
}

impl HttpReferenceStore {
    pub fn new(fetcher: Arc<HttpFetcher>, source: &str) -> Self {
        Self {
            fetcher,
            source: source.to_string(),
        }
    }
}

#[async_trait]
impl ReferenceStore for HttpReferenceStore {
    async fn list(&self) -> Result<Vec<ReferencePhoto>, FetchError> {
        let bytes = self.fetcher.fetch_bytes(&self.source).await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Write;

    fn wire(confidence: f32, descriptor: Option<Vec<f32>>) -> WireFace {
        WireFace {
            region: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence,
            },
            descriptor,
        }
    }

    fn client() -> reqwest::Client {
        build_client(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_select_face_prefers_confidence() {
        let face = select_face(vec![
            wire(0.6, Some(vec![1.0, 0.0])),
            wire(0.9, Some(vec![0.0, 1.0])),
            wire(0.7, Some(vec![0.5, 0.5])),
        ])
        .unwrap()
        .unwrap();
        assert_eq!(face.descriptor.values, vec![0.0, 1.0]);
        assert!((face.region.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_select_face_empty_and_missing_descriptor() {
        assert!(select_face(Vec::new()).unwrap().is_none());
        assert!(matches!(
            select_face(vec![wire(0.9, None)]),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_detect_response_parses_wire_format() {
        let body = r#"{"faces":[{"box":{"x":1,"y":2,"width":30,"height":40,"confidence":0.98},"descriptor":null}]}"#;
        let parsed: DetectResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.faces.len(), 1);
        assert_eq!(parsed.faces[0].region.width, 30.0);
        assert!(parsed.faces[0].descriptor.is_none());
    }

    #[tokio::test]
    async fn test_fetch_local_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.png");
        RgbImage::from_pixel(3, 2, Rgb([10, 20, 30])).save(&path).unwrap();

        let fetcher = HttpFetcher::new(client());
        let img = fetcher.fetch(path.to_str().unwrap()).await.unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0), &Rgb([10, 20, 30]));

        let url = format!("file://{}", path.display());
        assert!(fetcher.fetch(&url).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let fetcher = HttpFetcher::new(client());
        assert!(matches!(
            fetcher.fetch("/nonexistent/facewatch/ref.png").await,
            Err(FetchError::Io { .. })
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        garbage.write_all(b"not an image").unwrap();
        assert!(matches!(
            fetcher.fetch(garbage.path().to_str().unwrap()).await,
            Err(FetchError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_reference_list_from_file() {
        let mut list = tempfile::NamedTempFile::new().unwrap();
        write!(
            list,
            r#"[{{"id": 4, "image_url": "https://cdn/4.png", "created_at": "x"}},
               {{"identity_id": "ana", "image_url": "/srv/ana.png"}}]"#
        )
        .unwrap();

        let store = HttpReferenceStore::new(
            Arc::new(HttpFetcher::new(client())),
            list.path().to_str().unwrap(),
        );
        let photos = store.list().await.unwrap();
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].identity_id, "4");
        assert_eq!(photos[1].identity_id, "ana");
        assert_eq!(photos[1].image_url, "/srv/ana.png");
    }

    #[tokio::test]
    async fn test_malformed_reference_list() {
        let mut list = tempfile::NamedTempFile::new().unwrap();
        write!(list, r#"{{"rows": []}}"#).unwrap();
        let store = HttpReferenceStore::new(
            Arc::new(HttpFetcher::new(client())),
            list.path().to_str().unwrap(),
        );
        assert!(matches!(store.list().await, Err(FetchError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unreachable_model_service() {
        let model = HttpFaceModel::new(client(), "http://127.0.0.1:1/");
        let image = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        assert!(matches!(
            model.detect_existence(&image).await,
            Err(ProviderError::Unreachable(_))
        ));
    }
}
