//! EC2 Query API client.
//!
//! Implements [`ControlPlane`] on top of signed, form-encoded HTTPS POSTs to
//! the regional EC2 endpoint. Responses are XML.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::credentials::Credentials;
use crate::error::ProviderError;
use crate::sigv4::{CanonicalParts, Signer};
use crate::volume::{Attachment, AttachmentState, ControlPlane, Volume};

/// Query API version spoken by this client.
pub const API_VERSION: &str = "2016-11-15";

const SERVICE: &str = "ec2";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Client for one region's EC2 endpoint.
pub struct Ec2Client {
    region: String,
    endpoint: String,
    host: String,
    credentials: Credentials,
    agent: ureq::Agent,
}

impl Ec2Client {
    /// Creates a client for the public endpoint of `region`.
    pub fn new(region: &str, credentials: Credentials) -> Self {
        Self::with_endpoint(region, regional_endpoint(region), credentials)
    }

    /// Creates a client talking to an explicit endpoint URL.
    pub fn with_endpoint(
        region: &str,
        endpoint: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let host = endpoint
            .split_once("://")
            .map_or(endpoint.as_str(), |(_, rest)| rest)
            .to_string();
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build();

        Self {
            region: region.to_string(),
            endpoint,
            host,
            credentials,
            agent,
        }
    }

    /// Sends a signed `action` with `params` and returns the response body.
    fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String, ProviderError> {
        debug!("Calling EC2 {} in {}", action, self.region);

        let body = encode_form(action, params);
        let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("content-type", CONTENT_TYPE),
            ("host", self.host.as_str()),
            ("x-amz-date", amz_date.as_str()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token", token.as_str()));
        }

        let signer = Signer::new(&self.credentials, &self.region, SERVICE);
        let authorization = signer.authorization(
            &amz_date,
            &CanonicalParts {
                method: "POST",
                path: "/",
                query: "",
                headers: &headers,
                payload: body.as_bytes(),
            },
        );

        let mut request = self
            .agent
            .post(&format!("{}/", self.endpoint))
            .set("Authorization", &authorization);
        for (name, value) in headers.iter().filter(|(name, _)| *name != "host") {
            request = request.set(name, value);
        }

        match request.send_string(&body) {
            Ok(response) => response
                .into_string()
                .map_err(|e| ProviderError::new(format!("failed to read {} response: {}", action, e))),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(parse_error(code, &body))
            }
            Err(ureq::Error::Transport(transport)) => Err(ProviderError::new(transport.to_string())),
        }
    }
}

impl ControlPlane for Ec2Client {
    fn find_volumes(&self, name: &str, zone: &str) -> Result<Vec<Volume>, ProviderError> {
        let body = self.call(
            "DescribeVolumes",
            &[
                ("Filter.1.Name", "tag:Name"),
                ("Filter.1.Value.1", name),
                ("Filter.2.Name", "availability-zone"),
                ("Filter.2.Value.1", zone),
            ],
        )?;
        parse_volumes(&body)
    }

    fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ProviderError> {
        self.call(
            "AttachVolume",
            &[
                ("VolumeId", volume_id),
                ("InstanceId", instance_id),
                ("Device", device),
            ],
        )
        .map(drop)
    }

    fn describe_volume(&self, volume_id: &str) -> Result<Option<Volume>, ProviderError> {
        let body = self.call("DescribeVolumes", &[("VolumeId.1", volume_id)])?;
        Ok(parse_volumes(&body)?.into_iter().next())
    }
}

/// Public EC2 endpoint of `region`, using the partition's DNS suffix.
pub fn regional_endpoint(region: &str) -> String {
    let suffix = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    format!("https://ec2.{}.{}", region, suffix)
}

fn encode_form(action: &str, params: &[(&str, &str)]) -> String {
    let mut pairs = vec![
        format!("Action={}", urlencoding::encode(action)),
        format!("Version={}", API_VERSION),
    ];
    pairs.extend(params.iter().map(|(key, value)| {
        format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
    }));
    pairs.join("&")
}

/// `<xxxSet><item>..</item></xxxSet>` list wrapper.
#[derive(Debug, Deserialize)]
struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeVolumesResponse {
    #[serde(rename = "volumeSet", default)]
    volume_set: ItemSet<VolumeItem>,
}

#[derive(Debug, Deserialize)]
struct VolumeItem {
    #[serde(rename = "volumeId")]
    volume_id: String,
    #[serde(rename = "availabilityZone", default)]
    availability_zone: String,
    #[serde(rename = "attachmentSet", default)]
    attachment_set: ItemSet<AttachmentItem>,
    #[serde(rename = "tagSet", default)]
    tag_set: ItemSet<TagItem>,
}

#[derive(Debug, Deserialize)]
struct AttachmentItem {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(default)]
    device: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct TagItem {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Errors")]
    errors: ErrorList,
}

#[derive(Debug, Deserialize)]
struct ErrorList {
    #[serde(rename = "Error", default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

fn parse_volumes(body: &str) -> Result<Vec<Volume>, ProviderError> {
    let response: DescribeVolumesResponse = quick_xml::de::from_str(body)
        .map_err(|e| ProviderError::new(format!("malformed DescribeVolumes response: {}", e)))?;

    Ok(response
        .volume_set
        .items
        .into_iter()
        .map(|item| Volume {
            id: item.volume_id,
            name: item
                .tag_set
                .items
                .into_iter()
                .find(|tag| tag.key == "Name")
                .map(|tag| tag.value),
            zone: item.availability_zone,
            attachments: item
                .attachment_set
                .items
                .into_iter()
                .map(|attachment| Attachment {
                    instance_id: attachment.instance_id,
                    device: attachment.device,
                    state: AttachmentState::parse(&attachment.status),
                })
                .collect(),
        })
        .collect())
}

/// Turns an error body into a provider error, keeping the HTTP status when
/// the body is not the usual `<Response><Errors>` document.
fn parse_error(status: u16, body: &str) -> ProviderError {
    match quick_xml::de::from_str::<ErrorResponse>(body) {
        Ok(response) => match response.errors.errors.into_iter().next() {
            Some(error) => ProviderError::with_code(error.code, error.message),
            None => ProviderError::with_code(status.to_string(), body.trim()),
        },
        Err(_) => ProviderError::with_code(status.to_string(), body.trim()),
    }
}
