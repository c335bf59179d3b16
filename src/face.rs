use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const AVERAGE_HASH: &str = "average-hash";
const COMPARE_HASH: &str = "compare-hash";

#[derive(thiserror::Error, Debug)]
pub enum FaceError {
    #[error("Face service error [{0}]: {1}")]
    Service(StatusCode, String),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("Unexpected face service response: {0}")]
    Response(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub is_match: bool,
    pub hamming_distance: u32,
}

#[derive(Deserialize)]
struct AverageHashResponse {
    average_hash: Option<String>,
}

/// An uploaded picture: raw bytes plus the mime type the browser sent.
#[derive(Clone, Debug)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl Image {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Image {
            bytes,
            mime: "image/jpeg".to_string(),
        }
    }

    fn into_part(self, file_name: String) -> Result<Part, FaceError> {
        let part = Part::bytes(self.bytes)
            .file_name(file_name)
            .mime_str(&self.mime)?;
        Ok(part)
    }
}

/// Facial hash service. It hashes enrolment pictures and compares a login
/// picture with the stored hash.
#[async_trait]
pub trait FaceOracle: Send + Sync {
    /// Binary hash averaged over several pictures of the same face
    async fn average_hash(&self, images: Vec<Image>) -> Result<String, FaceError>;

    async fn compare(&self, image: Image, target_hash: &str) -> Result<FaceMatch, FaceError>;
}

#[derive(Clone)]
pub struct FaceClient {
    client: Client,
    base_url: Url,
}

impl FaceClient {
    pub fn new(base_url: Url) -> Self {
        FaceClient {
            client: Client::new(),
            base_url,
        }
    }

    async fn post_form<Res: DeserializeOwned>(&self, path: &str, form: Form) -> Result<Res, FaceError> {
        let url = self.base_url.join(path)?;
        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FaceError::Service(status, body));
        }
        serde_json::from_str(&body).map_err(|e| FaceError::Response(e.to_string()))
    }
}

#[async_trait]
impl FaceOracle for FaceClient {
    async fn average_hash(&self, images: Vec<Image>) -> Result<String, FaceError> {
        let mut form = Form::new();
        for (index, image) in images.into_iter().enumerate() {
            form = form.part("files", image.into_part(format!("face_{index}.jpg"))?);
        }
        let response: AverageHashResponse = self.post_form(AVERAGE_HASH, form).await?;
        let hash = response
            .average_hash
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FaceError::Response("missing average_hash".to_string()))?;
        tracing::debug!("Average hash of {} bits", hash.len());
        Ok(hash)
    }

    async fn compare(&self, image: Image, target_hash: &str) -> Result<FaceMatch, FaceError> {
        let form = Form::new()
            .part("file", image.into_part("face.jpg".to_string())?)
            .text("target_hash", target_hash.to_string());
        let m: FaceMatch = self.post_form(COMPARE_HASH, form).await?;
        tracing::debug!("Face match {} at distance {}", m.is_match, m.hamming_distance);
        Ok(m)
    }
}
