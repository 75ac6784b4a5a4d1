use std::time::Duration;

use log::debug;
use num_bigint::BigInt;
use reqwest::StatusCode;
use serde_json::Value;
use sha1::digest::FixedOutputReset;
use sha1::Digest;
use sha1::Sha1;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::err::AuthError;
use crate::protocol_types::compound::Property;

pub(crate) const TEXTURES: &str = "textures";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Textures {
    pub(crate) value: String,
    pub(crate) signature: Option<String>,
}

/// The verified identity of a player.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Profile {
    pub(crate) uuid: Uuid,
    pub(crate) username: String,
    pub(crate) textures: Option<Textures>,
}

impl Profile {
    pub(crate) fn properties(&self) -> Vec<Property> {
        self.textures
            .iter()
            .map(|t| Property {
                name: TEXTURES.into(),
                value: t.value.clone(),
                signature: t.signature.clone(),
            })
            .collect()
    }
}

/// Client for the session server's `hasJoined` endpoint.
///
/// Every lookup goes through the one client handle behind `client`, so concurrent logins queue
/// up on it. The lock is independent of the registry locks.
pub(crate) struct SessionAuthenticator {
    client: Mutex<reqwest::Client>,
    host: String,
}

impl SessionAuthenticator {
    /// A lookup that takes longer than `timeout` fails with `AuthError::Transport`, which frees
    /// the client for the next login.
    pub(crate) fn new(host: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(format!("{e}")))?;
        Ok(Self {
            client: Mutex::new(client),
            host: host.into(),
        })
    }

    pub(crate) async fn has_joined(
        &self,
        username: &str,
        server_hash: &str,
    ) -> Result<Profile, AuthError> {
        let url = format!("{}/session/minecraft/hasJoined", self.host);
        let body = {
            let client = self.client.lock().await;
            let response = client
                .get(&url)
                .query(&[("username", username), ("serverId", server_hash)])
                .send()
                .await
                .map_err(|e| AuthError::Transport(format!("{e}")))?;
            if response.status() != StatusCode::OK {
                return Err(AuthError::Status(response.status().as_u16()));
            }
            response
                .text()
                .await
                .map_err(|e| AuthError::Transport(format!("{e}")))?
        };
        debug!("Response GET {url}: {body}");
        parse_profile(&body)
    }
}

/// Parses a `hasJoined` response body.
///
/// Property objects are walked in document order: a `value` or `signature` that shows up
/// before the property's `name` means the response is corrupt.
pub(crate) fn parse_profile(body: &str) -> Result<Profile, AuthError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse(format!("{e}")))?;
    let root = root
        .as_object()
        .ok_or_else(|| AuthError::MalformedResponse("response is not an object".into()))?;

    let id = string_field(root.get("id"), "id")?;
    let uuid = Uuid::parse_str(id)
        .map_err(|e| AuthError::MalformedResponse(format!("bad id {id}: {e}")))?;
    let username = string_field(root.get("name"), "name")?.to_owned();

    let mut textures = None;
    if let Some(properties) = root.get("properties") {
        let properties = properties
            .as_array()
            .ok_or_else(|| AuthError::MalformedResponse("properties is not an array".into()))?;
        for property in properties {
            if let Some(t) = parse_property(property)? {
                textures = Some(t);
            }
        }
    }

    Ok(Profile {
        uuid,
        username,
        textures,
    })
}

enum PropertyKind {
    Unclassified,
    Ignored,
    Textures,
}

fn parse_property(property: &Value) -> Result<Option<Textures>, AuthError> {
    let property = property
        .as_object()
        .ok_or_else(|| AuthError::MalformedResponse("property is not an object".into()))?;
    let mut kind = PropertyKind::Unclassified;
    let mut value = None;
    let mut signature = None;
    for (key, field) in property {
        match key.as_str() {
            "name" => {
                kind = if field.as_str() == Some(TEXTURES) {
                    PropertyKind::Textures
                } else {
                    PropertyKind::Ignored
                };
            }
            "value" | "signature" => match kind {
                PropertyKind::Unclassified => return Err(AuthError::CorruptProperty),
                PropertyKind::Ignored => {}
                PropertyKind::Textures => {
                    let field = string_field(Some(field), key)?.to_owned();
                    if key == "value" {
                        value = Some(field);
                    } else {
                        signature = Some(field);
                    }
                }
            },
            _ => {}
        }
    }
    match kind {
        PropertyKind::Textures => {
            let value = value.ok_or_else(|| {
                AuthError::MalformedResponse("textures property without value".into())
            })?;
            Ok(Some(Textures { value, signature }))
        }
        _ => Ok(None),
    }
}

fn string_field<'a>(value: Option<&'a Value>, name: &str) -> Result<&'a str, AuthError> {
    value
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::MalformedResponse(format!("missing string field {name}")))
}

/// The `serverId` sent to the session server: SHA-1 over the (always empty) server id, the
/// shared secret and the DER public key.
pub(crate) fn compute_server_hash(public_key_der: &[u8], shared_secret: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(b""); // server ID - always empty
    hasher.update(shared_secret);
    hasher.update(public_key_der);
    hexdigest(hasher.finalize_fixed_reset().as_slice())
}

// Non-standard hex digest used by Minecraft.
fn hexdigest(bytes: &[u8]) -> String {
    let bigint = BigInt::from_signed_bytes_be(bytes);
    let is_negative = bigint < BigInt::from(0);
    let bigint = if is_negative { -bigint } else { bigint };
    let res = format!("{:x}", &bigint);
    if is_negative {
        format!("-{}", res)
    } else {
        res
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves one canned HTTP response on a loopback port. Resolves to the request head.
    pub(crate) async fn session_stub(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let request = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 512];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (host, request)
    }

    fn authenticator(host: String) -> SessionAuthenticator {
        SessionAuthenticator::new(host, Duration::from_millis(300)).unwrap()
    }

    #[test]
    fn test_digest1() {
        let mut hasher = Sha1::new();
        hasher.update(b"Notch");
        let hash = hexdigest(hasher.finalize_fixed_reset().as_slice());
        assert_eq!(hash, "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48");
    }

    #[test]
    fn test_digest2() {
        let mut hasher = Sha1::new();
        hasher.update(b"jeb_");
        let hash = hexdigest(hasher.finalize_fixed_reset().as_slice());
        assert_eq!(hash, "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1");
    }

    #[test]
    fn test_digest3() {
        let mut hasher = Sha1::new();
        hasher.update(b"simon");
        let hash = hexdigest(hasher.finalize_fixed_reset().as_slice());
        assert_eq!(hash, "88e16a1019277b15d58faf0541e11910eb756f6");
    }

    #[test]
    fn server_hash_covers_secret_then_key() {
        let mut hasher = Sha1::new();
        hasher.update(b"secretDER");
        let expected = hexdigest(hasher.finalize_fixed_reset().as_slice());
        assert_eq!(compute_server_hash(b"DER", b"secret"), expected);
    }

    #[test]
    fn parses_profile_with_textures() {
        let body = r#"{
            "id": "069a79f444e94726a5befca90e38aaf5",
            "name": "Notch",
            "properties": [
                {"name": "textures", "value": "dGV4dHVyZXM=", "signature": "c2ln"}
            ]
        }"#;
        let profile = parse_profile(body).unwrap();
        assert_eq!(
            profile.uuid.hyphenated().to_string(),
            "069a79f4-44e9-4726-a5be-fca90e38aaf5"
        );
        assert_eq!(profile.username, "Notch");
        assert_eq!(
            profile.textures,
            Some(Textures {
                value: "dGV4dHVyZXM=".into(),
                signature: Some("c2ln".into()),
            })
        );
        assert_eq!(profile.properties().len(), 1);
    }

    #[test]
    fn unsigned_textures_and_other_properties() {
        let body = r#"{"id": "069a79f444e94726a5befca90e38aaf5", "name": "Notch",
            "properties": [{"name": "other", "value": "x"}, {"name": "textures", "value": "v"}]}"#;
        let profile = parse_profile(body).unwrap();
        assert_eq!(
            profile.textures,
            Some(Textures {
                value: "v".into(),
                signature: None,
            })
        );
    }

    #[test]
    fn value_before_name_is_corrupt() {
        let body = r#"{"id": "069a79f444e94726a5befca90e38aaf5", "name": "Notch",
            "properties": [{"value": "v", "name": "textures"}]}"#;
        assert!(matches!(
            parse_profile(body),
            Err(AuthError::CorruptProperty)
        ));
    }

    #[test]
    fn missing_id_is_malformed() {
        assert!(matches!(
            parse_profile(r#"{"name": "Notch"}"#),
            Err(AuthError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_profile("not json"),
            Err(AuthError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn has_joined_parses_the_profile() {
        let (host, request) = session_stub(
            "200 OK",
            r#"{"id":"069a79f444e94726a5befca90e38aaf5","name":"Notch","properties":[]}"#,
        )
        .await;
        let profile = authenticator(host).has_joined("Notch", "-7c9d").await.unwrap();
        assert_eq!(profile.username, "Notch");
        assert_eq!(
            profile.uuid,
            Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap()
        );
        let request = request.await.unwrap();
        assert!(
            request.starts_with("GET /session/minecraft/hasJoined?username=Notch&serverId=-7c9d "),
            "{request}"
        );
    }

    #[tokio::test]
    async fn rejected_session_is_a_status_error() {
        for (status, code) in [("403 Forbidden", 403), ("204 No Content", 204)] {
            let (host, _request) = session_stub(status, "").await;
            match authenticator(host).has_joined("Notch", "abc").await {
                Err(AuthError::Status(got)) => assert_eq!(got, code),
                other => panic!("expected status {code}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        assert!(matches!(
            authenticator(host).has_joined("Notch", "abc").await,
            Err(AuthError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn silent_session_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let held = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });
        let auth = authenticator(host);
        let first = tokio::time::timeout(Duration::from_secs(5), auth.has_joined("Notch", "abc"))
            .await
            .expect("lookup outlived its timeout");
        assert!(matches!(first, Err(AuthError::Transport(_))), "{first:?}");
        // The client is free again for the next login.
        let second = tokio::time::timeout(Duration::from_secs(5), auth.has_joined("Jeb", "abc"))
            .await
            .expect("client stayed locked");
        assert!(matches!(second, Err(AuthError::Transport(_))));
        held.abort();
    }
}
