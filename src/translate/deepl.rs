//! DeepL-style HTTP backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{TranslationOutcome, Translator};
use crate::error::TranslateError;

const FREE_ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";
const PRO_ENDPOINT: &str = "https://api.deepl.com/v2/translate";

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    #[serde(default)]
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    #[serde(default)]
    detected_source_language: Option<String>,
    text: String,
}

/// Free-tier keys carry a `:fx` suffix and use their own host.
#[must_use]
pub fn endpoint_for_key(api_key: &str) -> &'static str {
    if api_key.trim().ends_with(":fx") {
        FREE_ENDPOINT
    } else {
        PRO_ENDPOINT
    }
}

pub struct DeepLTranslator {
    client: Client,
    api_key: String,
    endpoint: String,
    formality: Option<String>,
}

impl DeepLTranslator {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: Option<String>,
        formality: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let api_key = api_key.into().trim().to_string();
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = endpoint
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| endpoint_for_key(&api_key).to_string());
        Ok(Self {
            client,
            api_key,
            endpoint,
            formality: formality.filter(|f| !f.trim().is_empty()),
        })
    }

    /// Reads the key from `api_key_env`.
    pub fn from_env(
        api_key_env: &str,
        endpoint: Option<String>,
        formality: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let key = std::env::var(api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TranslateError::MissingApiKey {
                env: api_key_env.to_string(),
            })?;
        Self::new(key, endpoint, formality, timeout)
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    fn name(&self) -> &str {
        "deepl"
    }

    async fn translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationOutcome>, TranslateError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut form: Vec<(&str, &str)> = texts.iter().map(|t| ("text", t.as_str())).collect();
        form.push(("source_lang", source_lang));
        form.push(("target_lang", target_lang));
        form.push(("split_sentences", "nonewlines"));
        form.push(("preserve_formatting", "1"));
        if let Some(f) = self.formality.as_deref() {
            form.push(("formality", f));
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: crate::textutil::truncate_chars(&body, 300).into_owned(),
            });
        }
        let parsed: DeepLResponse = resp
            .json()
            .await
            .map_err(|e| TranslateError::Malformed(e.to_string()))?;
        if parsed.translations.len() != texts.len() {
            return Err(TranslateError::Malformed(format!(
                "{} translations for {} texts",
                parsed.translations.len(),
                texts.len()
            )));
        }
        tracing::debug!(texts = texts.len(), "deepl batch translated");
        Ok(parsed
            .translations
            .into_iter()
            .map(|t| TranslationOutcome::ok(t.text, t.detected_source_language))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_keys_use_free_endpoint() {
        assert_eq!(endpoint_for_key("abc:fx"), FREE_ENDPOINT);
        assert_eq!(endpoint_for_key("abc"), PRO_ENDPOINT);
    }

    #[test]
    fn missing_key_is_reported_with_env_name() {
        let err = DeepLTranslator::from_env(
            "CHAPTER_TRANSLATOR_TEST_UNSET_KEY",
            None,
            None,
            Duration::from_secs(5),
        )
        .err()
        .expect("missing key");
        assert!(err.to_string().contains("CHAPTER_TRANSLATOR_TEST_UNSET_KEY"));
    }

    #[test]
    fn explicit_endpoint_wins() {
        let t = DeepLTranslator::new(
            "k:fx",
            Some("http://localhost:9/v2/translate".into()),
            Some("less".into()),
            Duration::from_secs(5),
        )
        .expect("client");
        assert_eq!(t.endpoint(), "http://localhost:9/v2/translate");
    }

    #[test]
    fn response_shape_parses() {
        let r: DeepLResponse = serde_json::from_str(
            r#"{"translations":[{"detected_source_language":"EN","text":"Привет"}]}"#,
        )
        .expect("parse");
        assert_eq!(r.translations[0].text, "Привет");
        assert_eq!(r.translations[0].detected_source_language.as_deref(), Some("EN"));
    }
}
