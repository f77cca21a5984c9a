// Single outbound HTTP client for the study-group API.
//
// Every request transparently carries the stored bearer token as the raw
// `Authorization` value (the backend expects the bare token, no `Bearer `
// prefix) except the login/registration endpoints, which must go out
// unauthenticated. A 401 on a non-auth endpoint while a token is stored
// means the session was invalidated server-side: the token is purged and
// `SessionExpired` is returned so the caller can route back to login. A 401
// on login/registration is a plain credential failure and leaves the stored
// session untouched.

use std::sync::Arc;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::client::models::message::{Conversation, CreateMessage, Message};
use crate::client::utils::session_store::SessionStore;

#[derive(Debug)]
pub enum GatewayError {
    /// Network-level failure before a status code was received.
    Transport(String),
    /// Credential failure on the auth endpoints themselves.
    Unauthorized,
    /// Valid-looking token rejected by the server; token already purged.
    SessionExpired,
    /// Any other non-success status.
    Status { status: u16, body: String },
    /// Find-or-create returned an envelope without a conversation.
    MissingConversation,
    /// Response body did not match the expected shape.
    Decode(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Transport(msg) => write!(f, "transport error: {}", msg),
            GatewayError::Unauthorized => write!(f, "invalid credentials"),
            GatewayError::SessionExpired => write!(f, "session expired"),
            GatewayError::Status { status, body } => {
                write!(f, "server returned {}: {}", status, body)
            }
            GatewayError::MissingConversation => {
                write!(f, "no conversation data returned from API")
            }
            GatewayError::Decode(msg) => write!(f, "unexpected response shape: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Deserialize)]
struct ConversationEnvelope {
    #[serde(alias = "Conversation")]
    conversation: Option<Conversation>,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    #[serde(alias = "Messages", default)]
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    #[serde(alias = "Message")]
    message: Option<Message>,
}

#[derive(Deserialize)]
struct TokenEnvelope {
    #[serde(alias = "Token")]
    token: Option<String>,
}

#[derive(Deserialize)]
struct UploadEnvelope {
    #[serde(rename = "fileUrl", alias = "FileUrl")]
    file_url: String,
}

#[derive(serde::Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    password: &'a str,
}

pub struct RestGateway {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl RestGateway {
    pub fn new(base_url: &str, session: Arc<SessionStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn is_auth_endpoint(path: &str) -> bool {
        path.contains("/auth/login") || path.contains("/auth/register")
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        if Self::is_auth_endpoint(path) {
            return builder;
        }
        match self.session.token() {
            Some(token) => builder.header("Authorization", token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            if !Self::is_auth_endpoint(path) && self.session.token().is_some() {
                log::warn!("[GATEWAY] 401 on {} with a stored token, purging session", path);
                self.session.clear_token();
                return Err(GatewayError::SessionExpired);
            }
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// `POST /auth/login`. Returns the bearer token. Does not store it;
    /// that is the caller's decision.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, GatewayError> {
        let path = "/auth/login";
        let builder = self
            .request(Method::POST, path)
            .json(&LoginBody { email, password });
        let response = self.send(builder, path).await?;
        let envelope: TokenEnvelope = Self::decode(response).await?;
        envelope
            .token
            .ok_or_else(|| GatewayError::Decode("login response without token".to_string()))
    }

    /// `POST /auth/register`.
    pub async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), GatewayError> {
        let path = "/auth/register";
        let builder = self.request(Method::POST, path).json(&RegisterBody {
            first_name,
            last_name,
            email,
            password,
        });
        self.send(builder, path).await?;
        Ok(())
    }

    /// `GET /conversations/study-group/{groupId}`. Find-or-create,
    /// idempotent per group. An envelope without a conversation is an
    /// explicit error, never a silent partial result.
    pub async fn get_or_create_group_conversation(
        &self,
        group_id: i64,
    ) -> Result<Conversation, GatewayError> {
        let path = format!("/conversations/study-group/{}", group_id);
        let builder = self.request(Method::GET, &path);
        let response = self.send(builder, &path).await?;
        let envelope: ConversationEnvelope = Self::decode(response).await?;
        envelope.conversation.ok_or(GatewayError::MissingConversation)
    }

    /// `GET /messages/conversations/{id}/messages?skip&take`. Paged history.
    pub async fn get_conversation_messages(
        &self,
        conversation_id: i64,
        skip: i64,
        take: i64,
    ) -> Result<Vec<Message>, GatewayError> {
        let path = format!("/messages/conversations/{}/messages", conversation_id);
        let builder = self
            .request(Method::GET, &path)
            .query(&[("skip", skip), ("take", take)]);
        let response = self.send(builder, &path).await?;
        let envelope: MessagesEnvelope = Self::decode(response).await?;
        Ok(envelope.messages)
    }

    /// `POST /messages`. Returns the server-confirmed message with the
    /// authoritative identifier.
    pub async fn send_message(&self, body: &CreateMessage) -> Result<Message, GatewayError> {
        let path = "/messages";
        let builder = self.request(Method::POST, path).json(body);
        let response = self.send(builder, path).await?;
        let envelope: MessageEnvelope = Self::decode(response).await?;
        envelope
            .message
            .ok_or_else(|| GatewayError::Decode("send response without message".to_string()))
    }

    /// `PUT /messages/{id}`.
    pub async fn edit_message(
        &self,
        message_id: i64,
        content: &str,
    ) -> Result<Message, GatewayError> {
        let path = format!("/messages/{}", message_id);
        let builder = self
            .request(Method::PUT, &path)
            .json(&serde_json::json!({ "content": content }));
        let response = self.send(builder, &path).await?;
        Self::decode(response).await
    }

    /// `DELETE /messages/{id}`.
    pub async fn delete_message(&self, message_id: i64) -> Result<(), GatewayError> {
        let path = format!("/messages/{}", message_id);
        let builder = self.request(Method::DELETE, &path);
        self.send(builder, &path).await?;
        Ok(())
    }

    /// `POST /messages/conversations/{id}/mark-read`.
    pub async fn mark_read(&self, conversation_id: i64) -> Result<(), GatewayError> {
        let path = format!("/messages/conversations/{}/mark-read", conversation_id);
        let builder = self.request(Method::POST, &path);
        self.send(builder, &path).await?;
        Ok(())
    }

    /// `POST /fileupload/image`. Multipart upload, returns the file URL for
    /// the subsequent send-message call.
    pub async fn upload_image(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<String, GatewayError> {
        let path = "/fileupload/image";
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let builder = self.request(Method::POST, path).multipart(form);
        let response = self.send(builder, path).await?;
        let envelope: UploadEnvelope = Self::decode(response).await?;
        Ok(envelope.file_url)
    }
}
