use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{ApiResponse, BotApi, BotApiError, BotApiResult, ChatMember, Update};

const PERMISSION_DENIED: &str = "permission_denied";

pub struct HttpBotApi {
    client: Client,
    base_url: Url,
}

impl HttpBotApi {
    /// `base_url` already carries the bot token, e.g. `https://tapi.bale.ai/<token>/`.
    pub fn new(base_url: Url) -> BotApiResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn method_url(&self, method: &str) -> BotApiResult<Url> {
        Ok(self.base_url.join(method)?)
    }

    async fn post_form(&self, method: &str, form: &[(&str, String)]) -> BotApiResult<()> {
        let response = self
            .client
            .post(self.method_url(method)?)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BotApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn get_updates(&self, offset: Option<i64>) -> BotApiResult<Option<Vec<Update>>> {
        let mut url = self.method_url("getupdates")?;
        if let Some(offset) = offset {
            url.query_pairs_mut()
                .append_pair("offset", &offset.to_string());
        }

        let response = self.client.post(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BotApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ApiResponse<Value> =
            serde_json::from_str(&body).map_err(BotApiError::Decode)?;
        match envelope.result {
            None | Some(Value::Null) => Ok(None),
            Some(result) => {
                let updates: Vec<Update> =
                    serde_json::from_value(result).map_err(BotApiError::Malformed)?;
                debug!(count = updates.len(), ?offset, "fetched updates");
                Ok(Some(updates))
            }
        }
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> BotApiResult<()> {
        let mut form = vec![("chat_id", chat_id.to_string()), ("text", text.to_string())];
        if let Some(reply_to) = reply_to_message_id {
            form.push(("reply_to_message_id", reply_to.to_string()));
        }
        self.post_form("sendMessage", &form).await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> BotApiResult<()> {
        let form = [
            ("chat_id", chat_id.to_string()),
            ("message_id", message_id.to_string()),
        ];
        self.post_form("deletemessage", &form).await
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> BotApiResult<Vec<ChatMember>> {
        let mut url = self.method_url("getChatAdministrators")?;
        url.query_pairs_mut()
            .append_pair("chat_id", &chat_id.to_string());

        let body = self.client.post(url).send().await?.text().await?;
        let envelope: ApiResponse<Vec<ChatMember>> =
            serde_json::from_str(&body).map_err(BotApiError::Decode)?;

        if envelope.description.as_deref() == Some(PERMISSION_DENIED) {
            return Err(BotApiError::PermissionDenied);
        }
        match envelope.ok {
            None => Err(BotApiError::Rejected(
                "administrators response carries no ok flag".to_string(),
            )),
            Some(_) => Ok(envelope.result.unwrap_or_default()),
        }
    }
}
