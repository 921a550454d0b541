use crate::batch::{fetch_in_batches, BatchConfig};
use crate::client::TranslationClient;
use crate::config::Config;
use crate::error::{SyncError, TransportError};
use crate::models::{
    KeyImport, Language, ListContext, ModelKeyMap, ModelKeys, ModelRecord, ModelType,
    NamespaceTranslations, SyncOutcome, TranslationOptions, TranslationPayload,
};
use crate::transport::ApiRequest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
struct LanguagesResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<EmbeddedLanguages>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedLanguages {
    #[serde(default)]
    languages: Option<Vec<RemoteLanguage>>,
}

#[derive(Debug, Deserialize)]
struct RemoteLanguage {
    name: String,
    tag: String,
    #[serde(default)]
    base: bool,
}

#[derive(Debug, Deserialize)]
struct KeyIdsResponse {
    #[serde(default)]
    ids: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct KeyResponse {
    name: String,
}

#[derive(Debug, Serialize)]
struct ImportRequest<'a> {
    keys: &'a [KeyImport],
}

/// Locale tags such as `en`, `de-AT` or `zh_Hans`
fn is_locale_tag(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn decode<T: DeserializeOwned>(request: &str, body: Value) -> Result<T, SyncError> {
    serde_json::from_value(body)
        .map_err(|e| SyncError::transport(request, TransportError::Decode(e.to_string())))
}

/// Build the import records for `models`: one key per configured property,
/// named `{id}.{property}`, valued in `language` ("" when the model lacks it)
pub fn build_key_imports(models: &[ModelRecord], keys: &ModelKeys, language: &str) -> Vec<KeyImport> {
    models
        .iter()
        .flat_map(|model| {
            keys.properties.iter().map(move |property| KeyImport {
                name: format!("{}.{}", model.id, property),
                namespace: model.id.clone(),
                tags: keys.tags.clone(),
                translations: BTreeMap::from([(language.to_string(), model.text(property))]),
            })
        })
        .collect()
}

/// Domain operations against the translation project
pub struct TranslationService {
    client: Arc<TranslationClient>,
    model_keys: ModelKeyMap,
    batch: BatchConfig,
    api_key: String,
    api_url: String,
    default_language: RwLock<Option<String>>,
}

impl TranslationService {
    pub fn new(client: Arc<TranslationClient>, config: &Config) -> Self {
        Self {
            client,
            model_keys: config.model_keys.clone(),
            batch: config.batch.clone(),
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            default_language: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &TranslationClient {
        &self.client
    }

    /// Languages of the project plus the connection details callers need
    pub async fn get_options(&self) -> Result<TranslationOptions, SyncError> {
        let request = ApiRequest::get("/languages");
        let description = request.to_string();
        let body = self
            .client
            .get(request)
            .await
            .map_err(|e| e.context("Failed to fetch languages for project"))?;

        let response: Option<LanguagesResponse> = decode(&description, body)?;
        let languages: Vec<Language> = response
            .and_then(|r| r.embedded)
            .and_then(|e| e.languages)
            .unwrap_or_default()
            .into_iter()
            .map(|lang| Language {
                label: lang.name,
                tag: lang.tag,
                base: lang.base,
            })
            .collect();

        if languages.is_empty() {
            debug!("Project reports no languages, using fallback options");
            return Ok(TranslationOptions::fallback());
        }

        let options = TranslationOptions::from_languages(&languages, &self.api_key, &self.api_url);
        *self
            .default_language
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(options.default_language.clone());
        Ok(options)
    }

    async fn default_language(&self) -> Result<String, SyncError> {
        let known = self
            .default_language
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match known {
            Some(language) => Ok(language),
            None => Ok(self.get_options().await?.default_language),
        }
    }

    /// Ids of every key under the given namespaces
    pub async fn get_namespace_keys(&self, ids: &[String]) -> Result<Vec<String>, SyncError> {
        let request = ApiRequest::get("/keys/select").with_query("filterNamespace", ids.join(","));
        let description = request.to_string();
        let body = self.client.get(request).await.map_err(|e| {
            e.context(format!("Failed to fetch namespace keys for {}", ids.join(",")))
        })?;

        let response: Option<KeyIdsResponse> = decode(&description, body)?;
        Ok(response
            .map(|r| r.ids)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| match id {
                Value::String(id) => Some(id),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            })
            .collect())
    }

    pub async fn get_key_name(&self, key_id: &str) -> Result<String, SyncError> {
        let request = ApiRequest::get("/keys").with_segment(key_id)?;
        let description = request.to_string();
        let body = self.client.get(request).await.map_err(|e| {
            e.context(format!("Failed to fetch key name for key ID {}", key_id))
        })?;

        let key: KeyResponse = decode(&description, body)?;
        Ok(key.name)
    }

    /// Display names of every key under the given namespaces, in key order
    pub async fn get_translation_key_names(&self, ids: &[String]) -> Result<Vec<String>, SyncError> {
        let keys = self.get_namespace_keys(ids).await?;
        fetch_in_batches(&keys, &self.batch, "Key names", move |key_id| async move {
            self.get_key_name(&key_id).await
        })
        .await
    }

    /// Submit the translatable properties of `models` as one bulk import.
    ///
    /// Never fails: when the service refuses the import (which includes keys
    /// that already exist) the outcome is [`SyncOutcome::Rejected`].
    pub async fn create_model_translations(
        &self,
        models: &[ModelRecord],
        model_type: ModelType,
    ) -> SyncOutcome {
        let keys = self.model_keys.get(model_type);
        let ids: Vec<String> = models.iter().map(|model| model.id.clone()).collect();

        if models.is_empty() || keys.properties.is_empty() {
            debug!("No {} properties to translate", model_type);
            return SyncOutcome::NothingToSync;
        }

        match self.import_keys(models, &keys).await {
            Ok(count) => {
                info!("Imported {} keys for {} {} entities", count, ids.len(), model_type);
                SyncOutcome::Synced(ids)
            }
            Err(e) => {
                error!(
                    "Entities of type {} already translated or error creating translations: {:?}: {}",
                    model_type, ids, e
                );
                SyncOutcome::Rejected {
                    ids,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn import_keys(&self, models: &[ModelRecord], keys: &ModelKeys) -> Result<usize, SyncError> {
        let language = self.default_language().await?;
        let records = build_key_imports(models, keys, &language);

        let body = serde_json::to_value(ImportRequest { keys: &records }).map_err(|e| {
            SyncError::transport("POST /keys/import", TransportError::Decode(e.to_string()))
        })?;
        self.client
            .execute(ApiRequest::post("/keys/import", body))
            .await
            .map_err(|e| e.context("Failed to import keys"))?;

        Ok(records.len())
    }

    /// Remove every key of the namespace `id`.
    ///
    /// The delete is issued even when the namespace has no keys.
    pub async fn delete_translation(&self, id: &str) -> Result<(), SyncError> {
        let keys = self.get_namespace_keys(&[id.to_string()]).await?;

        self.client
            .execute(ApiRequest::delete("/keys").with_segment(&keys.join(","))?)
            .await
            .map_err(|e| e.context(format!("Failed to delete translations for namespace {}", id)))?;

        info!("Deleted {} keys for namespace {}", keys.len(), id);
        Ok(())
    }

    /// Translations for each namespace id, in input order.
    ///
    /// `context.country_code` narrows the listing to one locale; otherwise
    /// every project language is fetched. Ids without translations are left out.
    pub async fn list(
        &self,
        ids: &[String],
        context: Option<&ListContext>,
    ) -> Result<Vec<NamespaceTranslations>, SyncError> {
        let narrowed = context
            .and_then(|c| c.country_code.as_deref())
            .filter(|code| !code.is_empty());
        let languages = match narrowed {
            Some(code) if is_locale_tag(code) => code.to_string(),
            Some(code) => {
                return Err(SyncError::InvalidInput(format!(
                    "'{}' is not a locale tag",
                    code
                )))
            }
            None => self
                .get_options()
                .await?
                .available_languages
                .iter()
                .map(|lang| lang.tag.as_str())
                .collect::<Vec<_>>()
                .join(","),
        };

        if languages.is_empty() {
            debug!("No languages to list translations for");
            return Ok(Vec::new());
        }

        let base = ApiRequest::get("/translations").with_segment(&languages)?;
        let base = &base;
        let fetched = fetch_in_batches(ids, &self.batch, "Translations", move |id| async move {
            let body = self
                .client
                .get(base.clone().with_query("ns", id.as_str()))
                .await
                .map_err(|e| e.context(format!("Failed to fetch translations for {}", id)))?;

            let translations = TranslationPayload::from_response(&id, body)
                .and_then(|payload| payload.into_translations(&id));
            if translations.is_none() {
                debug!("No translations for namespace {}", id);
            }
            Ok(translations)
        })
        .await?;

        Ok(fetched.into_iter().flatten().collect())
    }
}
